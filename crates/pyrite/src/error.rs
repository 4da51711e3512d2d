//! Compile-time error kinds.
//!
//! Errors carry a resolved `line:col` position where one is known. The
//! driver accumulates every error it can recover from and fails the build
//! with the full set; see [`Error::Build`].

use thiserror::Error;

use crate::diagnostic::LineCol;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The collaborator parser rejected the source.
    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// An operation or conversion has no operable path.
    #[error("{position}: TypeError: {message}")]
    Type { position: LineCol, message: String },

    /// A name was read before any definition.
    #[error("{position}: UnknownName: '{name}' is not defined")]
    UnknownName { position: LineCol, name: String },

    /// An assignment would change a variable to an incompatible type.
    #[error("{position}: InvalidAssignment: {message}")]
    InvalidAssignment { position: LineCol, message: String },

    /// The emitted module failed the verification pass.
    #[error("ModuleVerification: {0}")]
    ModuleVerification(String),

    /// One or more accumulated compile errors.
    #[error("build failed with {} error(s)", .0.len())]
    Build(Vec<Error>),

    /// An internal fault while evaluating a verified module.
    #[error("execution fault: {0}")]
    Execution(String),
}

impl Error {
    /// Render the full accumulated list, one error per line.
    pub fn render(&self) -> String {
        match self {
            Error::Build(errors) => errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_renders_each_member() {
        let e = Error::Build(vec![
            Error::Syntax("bad token".to_string()),
            Error::UnknownName {
                position: LineCol { line: 3, col: 7 },
                name: "zap".to_string(),
            },
        ]);
        let rendered = e.render();
        assert!(rendered.contains("SyntaxError: bad token"));
        assert!(rendered.contains("3:7: UnknownName: 'zap' is not defined"));
    }
}
