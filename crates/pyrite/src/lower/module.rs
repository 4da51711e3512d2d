//! Module lowering: the global constructor, the program entry, and the
//! top-level statement walk.
//!
//! Every module gets a `__runtime_init__` constructor (priority 65535)
//! that installs the builtin dispatch tables before user code runs. The
//! entry module additionally gets a public `__program_entry__() -> i32`
//! that executes the top-level statements in order, then calls `main`
//! through the runtime dispatcher and converts its result to the process
//! exit code. Non-entry modules keep their definitions in an internal
//! `__module_init__` constructor and warn on other top-level statements.

use rustpython_parser::ast::Stmt;

use crate::error::Error;
use crate::ir::{FunctionBuilder, InstKind, IrModule, IrType, Linkage, Terminator};
use crate::lower::LowerCtx;

/// Constructor-list priority for the runtime initializer.
pub const RUNTIME_INIT_PRIORITY: u16 = 65535;

/// The exported entry symbol.
pub const PROGRAM_ENTRY: &str = "__program_entry__";

/// Lower a parsed module. Returns the IR module and every compile error
/// accumulated along the way; callers fail the build on a non-empty set.
pub fn lower_module(
    source: &str,
    body: &[Stmt],
    module_name: &str,
    is_entry: bool,
) -> (IrModule, Vec<Error>) {
    let mut ctx = LowerCtx::new(source, module_name);

    emit_runtime_init(&mut ctx);
    if is_entry {
        emit_program_entry(&mut ctx, body);
    } else {
        emit_module_init(&mut ctx, body);
    }

    let errors = std::mem::take(&mut ctx.errors);
    (ctx.module.finish(), errors)
}

/// `__runtime_init__`: installs the builtin type method tables exactly
/// once, before any user code.
fn emit_runtime_init(ctx: &mut LowerCtx<'_>) {
    let func_id = ctx.module.reserve_function();
    ctx.builders.push(FunctionBuilder::new(
        "__runtime_init__",
        Linkage::Internal,
        Vec::new(),
        IrType::Void,
    ));
    ctx.abi_call("py_initialize_builtin_type_methods", vec![], 0);
    ctx.builder().terminate(Terminator::Ret(None));
    let finished = ctx.builders.pop().expect("builder pushed above").finish();
    ctx.module.set_function(func_id, finished);
    ctx.module.add_ctor(RUNTIME_INIT_PRIORITY, func_id);
}

/// The public program entry: top-level statements, then `main`.
fn emit_program_entry(ctx: &mut LowerCtx<'_>, body: &[Stmt]) {
    let func_id = ctx.module.reserve_function();
    ctx.builders.push(FunctionBuilder::new(
        PROGRAM_ENTRY,
        Linkage::Public,
        Vec::new(),
        IrType::I32,
    ));

    for stmt in body {
        if ctx.is_dead() {
            break;
        }
        ctx.lower_stmt(stmt);
    }

    if !ctx.is_dead() {
        match ctx.symbols.find_function("main") {
            Some(info) => {
                let cell = info.cell;
                let callable = ctx.read_storage(cell, 0);
                let result = ctx
                    .abi_call("py_call_function_noargs", vec![callable], 0)
                    .expect("object result");
                let code = ctx
                    .abi_call("py_object_to_exit_code", vec![result], 0)
                    .expect("i32 result");
                ctx.emit_decref(result, 0);
                ctx.builder().terminate(Terminator::Ret(Some(code)));
            }
            None => {
                tracing::warn!("entry module defines no 'main'; program will exit 1");
                let one = ctx.builder().emit(InstKind::ConstI32(1), IrType::I32, 0);
                ctx.builder().terminate(Terminator::Ret(Some(one)));
            }
        }
    }

    let finished = ctx.builders.pop().expect("builder pushed above").finish();
    ctx.module.set_function(func_id, finished);
}

/// Non-entry modules: definitions lower into a constructor; executable
/// top-level statements only warn.
fn emit_module_init(ctx: &mut LowerCtx<'_>, body: &[Stmt]) {
    let func_id = ctx.module.reserve_function();
    ctx.builders.push(FunctionBuilder::new(
        "__module_init__",
        Linkage::Internal,
        Vec::new(),
        IrType::Void,
    ));

    for stmt in body {
        match stmt {
            Stmt::FunctionDef(_) | Stmt::ClassDef(_) => ctx.lower_stmt(stmt),
            other => {
                let span = ctx.span_of(other);
                let position = crate::diagnostic::line_col(ctx.source, span.start);
                tracing::warn!(
                    %position,
                    "top-level executable statement in a non-entry module is ignored"
                );
            }
        }
    }
    ctx.builder().terminate(Terminator::Ret(None));
    let finished = ctx.builders.pop().expect("builder pushed above").finish();
    ctx.module.set_function(func_id, finished);
    ctx.module.add_ctor(RUNTIME_INIT_PRIORITY, func_id);
}
