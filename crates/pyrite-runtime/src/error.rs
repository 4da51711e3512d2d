//! Runtime error kinds and the `py_runtime_error` reporting channel.
//!
//! The runtime does not implement user-visible exceptions. A failing
//! operation prints a diagnostic through the error sink and returns a null
//! sentinel to its caller; generated code checks the sentinel where the
//! compiler decided it matters and otherwise lets it propagate to the exit
//! path, which turns it into a non-zero exit code.

use std::fmt;

use thiserror::Error;

use crate::io;

/// The enumerated error kinds surfaced by `py_runtime_error`.
///
/// Keys are stable strings so generated code can pass them as plain
/// C-string constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PyErrorKind {
    #[error("TypeError")]
    Type,
    #[error("ValueError")]
    Value,
    #[error("ZeroDivisionError")]
    ZeroDivision,
    #[error("IndexError")]
    Index,
    #[error("KeyError")]
    Key,
    #[error("AttributeError")]
    Attribute,
    #[error("OverflowError")]
    Overflow,
    #[error("MemoryError")]
    Memory,
    #[error("StopIteration")]
    StopIteration,
    #[error("EOFError")]
    Eof,
}

impl PyErrorKind {
    /// Parse an error key as passed across the ABI. Unknown keys are
    /// reported as a plain `TypeError` so a bad constant never panics the
    /// runtime.
    pub fn from_key(key: &str) -> PyErrorKind {
        match key {
            "TypeError" => PyErrorKind::Type,
            "ValueError" => PyErrorKind::Value,
            "ZeroDivisionError" => PyErrorKind::ZeroDivision,
            "IndexError" => PyErrorKind::Index,
            "KeyError" => PyErrorKind::Key,
            "AttributeError" => PyErrorKind::Attribute,
            "OverflowError" => PyErrorKind::Overflow,
            "MemoryError" => PyErrorKind::Memory,
            "StopIteration" => PyErrorKind::StopIteration,
            "EOFError" => PyErrorKind::Eof,
            _ => PyErrorKind::Type,
        }
    }
}

impl PyErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PyErrorKind::Type => "TypeError",
            PyErrorKind::Value => "ValueError",
            PyErrorKind::ZeroDivision => "ZeroDivisionError",
            PyErrorKind::Index => "IndexError",
            PyErrorKind::Key => "KeyError",
            PyErrorKind::Attribute => "AttributeError",
            PyErrorKind::Overflow => "OverflowError",
            PyErrorKind::Memory => "MemoryError",
            PyErrorKind::StopIteration => "StopIteration",
            PyErrorKind::Eof => "EOFError",
        }
    }
}

/// Report a runtime error with an optional source line.
///
/// `key` is one of the enumerated kind names; `line` is the 1-based source
/// line of the offending operation, or `0` when unknown.
pub fn py_runtime_error(key: &str, line: i32) {
    let kind = PyErrorKind::from_key(key);
    report(kind, key, line);
}

/// Report a runtime error with a formatted message.
pub(crate) fn raise(kind: PyErrorKind, message: impl fmt::Display) {
    tracing::debug!(kind = kind.as_str(), %message, "runtime error");
    io::write_err(&format!("{}: {}\n", kind.as_str(), message));
}

fn report(kind: PyErrorKind, key: &str, line: i32) {
    tracing::debug!(kind = kind.as_str(), line, "runtime error");
    if line > 0 {
        io::write_err(&format!("Traceback (most recent call last):\n  File \"<module>\", line {}\n", line));
    }
    if key == kind.as_str() {
        io::write_err(&format!("{}\n", kind.as_str()));
    } else {
        io::write_err(&format!("{}: {}\n", kind.as_str(), key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_round_trip() {
        for key in [
            "TypeError",
            "ValueError",
            "ZeroDivisionError",
            "IndexError",
            "KeyError",
            "AttributeError",
            "OverflowError",
            "MemoryError",
            "StopIteration",
            "EOFError",
        ] {
            assert_eq!(PyErrorKind::from_key(key).as_str(), key);
        }
    }

    #[test]
    fn unknown_key_degrades_to_type_error() {
        assert_eq!(PyErrorKind::from_key("NoSuchError"), PyErrorKind::Type);
    }
}
