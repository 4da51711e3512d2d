//! pyrite — an ahead-of-time compiler for a statically-typeable Python
//! subset.
//!
//! The pipeline: the collaborator parser produces an AST with byte-range
//! positions, the inferencer derives a type ID for every expression, and
//! the lowering walk emits an SSA module whose instructions call into the
//! `pyrite-runtime` ABI for every piece of Python semantics — boxed
//! object construction, registry-resolved operators, containers,
//! attribute access, printing. A verification pass gates the result, and
//! the evaluation driver executes verified modules against the runtime.
//!
//! # Quick start
//!
//! ```
//! use pyrite::run_source;
//!
//! let outcome = run_source(
//!     "def main():\n    print(1 + 2 * 3)\n    return 0\n",
//! )
//! .unwrap();
//! assert_eq!(outcome.exit_code, 0);
//! assert_eq!(outcome.stdout, "7\n");
//! ```
//!
//! # Supported surface
//!
//! ## Types
//! - `None`, `bool`, `int` (arbitrary precision), `float` (fixed working
//!   precision), `str`
//! - `list`, `dict`
//! - classes with single inheritance, methods, and instance attributes
//!
//! ## Statements
//! - assignments (plain, augmented, annotated), indexed and attribute
//!   assignment
//! - `if`/`elif`/`else`, `while`, `for` over lists and strings,
//!   `break`/`continue`, `pass`
//! - `def` with positional parameters and optional annotations, `return`
//! - `class` definitions at module level
//! - `print(x)` and the conversion builtins `int`/`float`/`bool`/`str`,
//!   plus `len`
//!
//! ## Not supported
//! - generators, closures over enclosing function locals, decorators
//! - `try`/`except`, `import`, keyword arguments, parameter defaults
//! - membership tests and chained comparisons

mod compiler;
mod diagnostic;
mod error;
mod exec;
mod infer;
mod lower;
mod registry;
mod symbols;

pub mod ir;

pub use compiler::{run_source, CompiledModule, Compiler};
pub use diagnostic::{LineCol, Span};
pub use error::{Error, Result};
pub use exec::{run_module, ExecOutcome};
pub use infer::common_super_type;
pub use registry::{
    BinOpToken, BinaryOpDescriptor, ConversionDescriptor, OperablePath, TypeOperationRegistry,
    UnaryOpDescriptor, UnaryOpToken,
};
pub use symbols::{FunctionInfo, ScopeKind, Storage, SymbolTable, VariableInfo};
