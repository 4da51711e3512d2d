//! The compile driver: parse, lower, verify.
//!
//! [`Compiler::compile`] is the one entry point: it runs the collaborator
//! parser, lowers the module to SSA, and verifies the result. Compile
//! errors accumulate across top-level statements; any non-empty set
//! fails the build as one [`Error::Build`].

use rustpython_parser::{ast, Parse};

use crate::error::{Error, Result};
use crate::exec::{self, ExecOutcome};
use crate::ir::IrModule;
use crate::lower::module::lower_module;

/// A compiled, verified module ready for execution or emission.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub ir: IrModule,
    pub source: String,
}

impl CompiledModule {
    /// Run the program and capture its exit code and output.
    pub fn run(&self) -> Result<ExecOutcome> {
        exec::run_module(&self.ir)
    }
}

/// Compiles Python source to a verified SSA module.
pub struct Compiler;

impl Compiler {
    /// Compile an entry module (the one that provides `main`).
    pub fn compile(source: &str) -> Result<CompiledModule> {
        Self::compile_named(source, "main", true)
    }

    /// Compile a module under an explicit name; non-entry modules keep
    /// definitions only.
    pub fn compile_named(source: &str, module_name: &str, is_entry: bool) -> Result<CompiledModule> {
        tracing::debug!(module = module_name, is_entry, "compiling module");
        let body = ast::Suite::parse(source, module_name)
            .map_err(|e| Error::Build(vec![Error::Syntax(e.to_string())]))?;

        let (ir, mut errors) = lower_module(source, &body, module_name, is_entry);

        if let Err(problems) = ir.verify() {
            errors.extend(problems.into_iter().map(Error::ModuleVerification));
        }
        if !errors.is_empty() {
            tracing::debug!(count = errors.len(), "build failed");
            return Err(Error::Build(errors));
        }
        Ok(CompiledModule {
            ir,
            source: source.to_string(),
        })
    }
}

/// Compile and immediately run a program.
pub fn run_source(source: &str) -> Result<ExecOutcome> {
    Compiler::compile(source)?.run()
}
