//! AST-to-SSA lowering.
//!
//! [`LowerCtx`] carries everything a lowering walk needs: the module
//! under construction, a stack of function builders (definitions nest),
//! the symbol table, the deferred-release temp tracker, the loop-context
//! stack for join-point variables, and the accumulated compile errors.
//!
//! Expression handlers live in [`expr`], statement handlers in [`stmt`],
//! module assembly in [`module`]; result-type derivation sits in the
//! crate-level `infer` module. All of them are `impl LowerCtx` blocks —
//! one walk, one state.

pub mod expr;
pub mod module;
pub mod stmt;

use std::collections::HashMap;

use rustpython_parser::ast::Ranged;

use crate::diagnostic::{self, Span};
use crate::error::Error;
use crate::ir::{
    Callee, CtorEntry, ExternDecl, FuncId, FunctionBuilder, GlobalId, InstKind, IrGlobal, IrModule,
    IrType, ValueId,
};
use crate::symbols::{Storage, SymbolTable};

/// Why a fresh object reference exists; the deferred-release tracker
/// records the source of every temporary it will release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectSource {
    Literal,
    BinaryOp,
    UnaryOp,
    FunctionReturn,
    IndexAccess,
    Conversion,
    Container,
    Attribute,
}

/// A lowered expression: the SSA value, its inferred type ID, and
/// whether the value is an owned reference this statement must release.
#[derive(Debug, Clone, Copy)]
pub struct ExprValue {
    pub value: ValueId,
    pub type_id: i32,
    pub owned: bool,
}

/// One loop-carried variable: the join-point value in the condition
/// block and the storage to restore when the loop closes.
#[derive(Debug, Clone, Copy)]
pub struct LoopVar {
    pub phi: ValueId,
    pub original: Storage,
    pub type_id: i32,
}

/// Per-loop lowering state.
pub struct LoopContext {
    pub cond_block: crate::ir::BlockId,
    pub end_block: crate::ir::BlockId,
    /// Join-point records keyed by variable name.
    pub vars: HashMap<String, LoopVar>,
    /// Builder depth that owns this loop (so nested function bodies never
    /// see an enclosing function's loops).
    pub depth: usize,
}

/// Module under construction.
pub struct ModuleBuilder {
    pub name: String,
    externs: Vec<ExternDecl>,
    extern_index: HashMap<String, usize>,
    globals: Vec<IrGlobal>,
    global_index: HashMap<String, GlobalId>,
    ctors: Vec<CtorEntry>,
    functions: Vec<Option<crate::ir::IrFunction>>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            externs: Vec::new(),
            extern_index: HashMap::new(),
            globals: Vec::new(),
            global_index: HashMap::new(),
            ctors: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Reserve a function index before its body exists (pre-registration
    /// for recursive calls).
    pub fn reserve_function(&mut self) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(None);
        id
    }

    pub fn set_function(&mut self, id: FuncId, function: crate::ir::IrFunction) {
        self.functions[id.0 as usize] = Some(function);
    }

    /// Get or create the named module-level cell.
    pub fn add_global(&mut self, name: &str) -> GlobalId {
        if let Some(id) = self.global_index.get(name) {
            return *id;
        }
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(IrGlobal {
            name: name.to_string(),
        });
        self.global_index.insert(name.to_string(), id);
        id
    }

    pub fn declare_extern(&mut self, name: &str, params: Vec<IrType>, ret: IrType, variadic: bool) {
        if self.extern_index.contains_key(name) {
            return;
        }
        self.extern_index.insert(name.to_string(), self.externs.len());
        self.externs.push(ExternDecl {
            name: name.to_string(),
            params,
            ret,
            variadic,
        });
    }

    pub fn add_ctor(&mut self, priority: u16, func: FuncId) {
        self.ctors.push(CtorEntry { priority, func });
    }

    pub fn finish(self) -> IrModule {
        IrModule {
            name: self.name,
            externs: self.externs,
            globals: self.globals,
            ctors: self.ctors,
            functions: self
                .functions
                .into_iter()
                .map(|f| f.expect("every reserved function was lowered"))
                .collect(),
        }
    }
}

/// Runtime ABI signatures, declared on first use.
fn abi_signature(name: &str) -> (Vec<IrType>, IrType, bool) {
    use IrType::*;
    match name {
        "py_initialize_builtin_type_methods" => (vec![], Void, false),
        "py_create_int_from_string" => (vec![CStr, I32], Obj, false),
        "py_create_double_from_string" => (vec![CStr, I32, I32], Obj, false),
        "py_create_int" => (vec![I32], Obj, false),
        "py_create_bool" => (vec![I1], Obj, false),
        "py_create_string" => (vec![CStr], Obj, false),
        "py_create_list" => (vec![I32, I32], Obj, false),
        "py_create_dict" => (vec![I32, I32], Obj, false),
        "py_get_none" => (vec![], Obj, false),
        "py_create_function" => (vec![I32, I32], Obj, false),
        "py_create_class" => (vec![CStr, Obj, Obj], Obj, false),
        "py_incref" | "py_decref" => (vec![Obj], Void, false),
        "py_object_add" | "py_object_subtract" | "py_object_multiply" | "py_object_divide"
        | "py_object_floor_divide" | "py_object_modulo" | "py_object_power" | "py_object_and"
        | "py_object_or" | "py_object_xor" | "py_object_lshift" | "py_object_rshift" => {
            (vec![Obj, Obj], Obj, false)
        }
        "py_object_negate" | "py_object_not" | "py_object_bitnot" => (vec![Obj], Obj, false),
        "py_object_compare" => (vec![Obj, Obj, I32], Obj, false),
        "py_object_to_bool" => (vec![Obj], I1, false),
        "py_object_index" => (vec![Obj, Obj], Obj, false),
        "py_object_set_index" => (vec![Obj, Obj, Obj], I1, false),
        "py_object_len" => (vec![Obj], I32, false),
        "py_object_getattr" => (vec![Obj, CStr], Obj, false),
        "py_object_setattr" => (vec![Obj, CStr, Obj], I1, false),
        "py_object_copy" => (vec![Obj, I32], Obj, false),
        "py_smart_convert" => (vec![Obj, I32], Obj, false),
        "py_call_function" => (vec![Obj, I32], Obj, true),
        "py_call_function_noargs" => (vec![Obj], Obj, false),
        "py_object_to_exit_code" => (vec![Obj], I32, false),
        "py_print_object" => (vec![Obj], Void, false),
        "py_runtime_error" => (vec![CStr, I32], Void, false),
        "py_list_append" => (vec![Obj, Obj], Obj, false),
        "py_dict_set_item" => (vec![Obj, Obj, Obj], I1, false),
        "py_object_get_iter" => (vec![Obj], Obj, false),
        "py_iter_next" => (vec![Obj], Obj, false),
        other => panic!("no ABI signature recorded for '{}'", other),
    }
}

/// The lowering walk's shared state.
pub struct LowerCtx<'src> {
    pub source: &'src str,
    pub module: ModuleBuilder,
    pub builders: Vec<FunctionBuilder>,
    pub symbols: SymbolTable,
    /// Deferred-release frames; one per statement nesting level.
    temps: Vec<Vec<(ValueId, ObjectSource)>>,
    /// Index into `temps` where the current function's frames begin;
    /// early-exit cleanup never reaches into an enclosing definition.
    frame_bases: Vec<usize>,
    pub loop_stack: Vec<LoopContext>,
    /// Declared return type of each function being lowered (empty at
    /// module level, where `return` is illegal).
    pub function_return_types: Vec<i32>,
    pub errors: Vec<Error>,
    /// Expression types keyed by source byte range.
    pub type_cache: HashMap<(usize, usize), i32>,
}

impl<'src> LowerCtx<'src> {
    pub fn new(source: &'src str, module_name: &str) -> Self {
        Self {
            source,
            module: ModuleBuilder::new(module_name),
            builders: Vec::new(),
            symbols: SymbolTable::new(),
            temps: Vec::new(),
            frame_bases: Vec::new(),
            loop_stack: Vec::new(),
            function_return_types: Vec::new(),
            errors: Vec::new(),
            type_cache: HashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Builder access
    // -----------------------------------------------------------------------

    pub fn builder(&mut self) -> &mut FunctionBuilder {
        self.builders.last_mut().expect("a function is being built")
    }

    pub fn builder_ref(&self) -> &FunctionBuilder {
        self.builders.last().expect("a function is being built")
    }

    /// True when the current insertion point is dead (terminated).
    pub fn is_dead(&self) -> bool {
        self.builder_ref().is_dead()
    }

    // -----------------------------------------------------------------------
    // Spans and errors
    // -----------------------------------------------------------------------

    pub fn span_of(&self, node: &impl Ranged) -> Span {
        let range = node.range();
        Span::new(
            u32::from(range.start()) as usize,
            u32::from(range.end()) as usize,
        )
    }

    pub fn line(&self, span: Span) -> u32 {
        diagnostic::line_of(self.source, span)
    }

    /// Slice the literal text out of the source (numeric literals travel
    /// verbatim to the runtime constructors).
    pub fn source_text(&self, span: Span) -> &'src str {
        self.source.get(span.start..span.end).unwrap_or("")
    }

    pub fn error_type(&mut self, span: Span, message: impl Into<String>) {
        self.errors.push(Error::Type {
            position: diagnostic::line_col(self.source, span.start),
            message: message.into(),
        });
    }

    pub fn error_unknown_name(&mut self, span: Span, name: &str) {
        self.errors.push(Error::UnknownName {
            position: diagnostic::line_col(self.source, span.start),
            name: name.to_string(),
        });
    }

    pub fn error_invalid_assignment(&mut self, span: Span, message: impl Into<String>) {
        self.errors.push(Error::InvalidAssignment {
            position: diagnostic::line_col(self.source, span.start),
            message: message.into(),
        });
    }

    // -----------------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------------

    pub fn const_i32(&mut self, value: i32, line: u32) -> ValueId {
        self.builder().emit(InstKind::ConstI32(value), IrType::I32, line)
    }

    pub fn const_bool(&mut self, value: bool, line: u32) -> ValueId {
        self.builder().emit(InstKind::ConstBool(value), IrType::I1, line)
    }

    pub fn const_str(&mut self, text: &str, line: u32) -> ValueId {
        self.builder()
            .emit(InstKind::ConstStr(text.to_string()), IrType::CStr, line)
    }

    pub fn const_null_obj(&mut self, line: u32) -> ValueId {
        self.builder().emit(InstKind::ConstNullObj, IrType::Obj, line)
    }

    /// Call a runtime ABI symbol, declaring it on first use. Returns the
    /// result value for non-void signatures.
    pub fn abi_call(&mut self, name: &str, args: Vec<ValueId>, line: u32) -> Option<ValueId> {
        let (params, ret, variadic) = abi_signature(name);
        self.module.declare_extern(name, params, ret, variadic);
        let kind = InstKind::Call {
            callee: Callee::Extern(name.to_string()),
            args,
        };
        match ret {
            IrType::Void => {
                self.builder().emit_void(kind, line);
                None
            }
            ty => Some(self.builder().emit(kind, ty, line)),
        }
    }

    /// Call a module function directly.
    pub fn direct_call(&mut self, func: FuncId, args: Vec<ValueId>, line: u32) -> ValueId {
        let kind = InstKind::Call {
            callee: Callee::Function(func),
            args,
        };
        self.builder().emit(kind, IrType::Obj, line)
    }

    pub fn emit_incref(&mut self, value: ValueId, line: u32) {
        self.abi_call("py_incref", vec![value], line);
    }

    pub fn emit_decref(&mut self, value: ValueId, line: u32) {
        self.abi_call("py_decref", vec![value], line);
    }

    // -----------------------------------------------------------------------
    // Deferred-release tracker
    // -----------------------------------------------------------------------

    pub fn push_temp_frame(&mut self) {
        self.temps.push(Vec::new());
    }

    pub fn pop_temp_frame(&mut self) {
        self.temps.pop();
    }

    /// Track a fresh owned reference for release at the frame's cleanup
    /// point.
    pub fn track_temp(&mut self, value: ValueId, source: ObjectSource) {
        if let Some(frame) = self.temps.last_mut() {
            frame.push((value, source));
        }
    }

    /// Emit releases for the current frame (most recent first) and clear
    /// it. Emission is skipped when the insertion point is dead; the
    /// frame clears either way.
    pub fn cleanup_temps(&mut self, line: u32) {
        let Some(frame) = self.temps.last_mut() else { return };
        let entries: Vec<_> = std::mem::take(frame);
        if !self.is_dead() {
            for (value, source) in entries.iter().rev() {
                tracing::trace!(value = value.0, ?source, "releasing temporary");
                self.emit_decref(*value, line);
            }
        }
    }

    /// Mark where the current function's frames begin; called around a
    /// definition body so exits inside it never touch the enclosing
    /// function's temporaries.
    pub fn push_frame_base(&mut self) {
        self.frame_bases.push(self.temps.len());
    }

    pub fn pop_frame_base(&mut self) {
        self.frame_bases.pop();
    }

    /// Release every tracked temporary of the current function's open
    /// frames on an early-exit path (`return`). Only the innermost frame
    /// clears: the outer frames' normal-path releases sit in blocks this
    /// exit never reaches.
    pub fn release_frames_for_exit(&mut self, line: u32) {
        if self.is_dead() {
            return;
        }
        let base = self.frame_bases.last().copied().unwrap_or(0);
        let pending: Vec<ValueId> = self.temps[base..]
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev().map(|(value, _)| *value))
            .collect();
        for value in pending {
            self.emit_decref(value, line);
        }
        if let Some(frame) = self.temps.last_mut() {
            frame.clear();
        }
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Emit the read of a variable given its storage. Loads are borrowed
    /// references, never tracked.
    pub fn read_storage(&mut self, storage: Storage, line: u32) -> ValueId {
        match storage {
            Storage::Slot(slot) => self.builder().emit(InstKind::LoadSlot(slot), IrType::Obj, line),
            Storage::Global(global) => {
                self.builder()
                    .emit(InstKind::LoadGlobal(global), IrType::Obj, line)
            }
            Storage::Value(value) => value,
        }
    }

    /// The loop context owning `name` as a join-point variable, if any,
    /// restricted to loops of the current function.
    pub fn loop_var_context(&self, name: &str) -> Option<usize> {
        let depth = self.builders.len();
        self.loop_stack
            .iter()
            .rposition(|ctx| ctx.depth == depth && ctx.vars.contains_key(name))
    }
}
