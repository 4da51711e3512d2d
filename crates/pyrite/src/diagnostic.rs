//! Source positions for error reporting.
//!
//! The parser hands back byte offsets; compile errors are reported with a
//! `line:col` prefix, so this module does the offset-to-position walk and
//! keeps the span type everything else carries around.

use std::fmt;

/// A byte-offset span in the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A resolved 1-based source position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Find the line and column for a byte offset.
pub fn line_col(source: &str, offset: usize) -> LineCol {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    LineCol { line, col }
}

/// The 1-based line of a span's start, for runtime-error call sites.
pub fn line_of(source: &str, span: Span) -> u32 {
    line_col(source, span.start).line as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_resolve_to_lines_and_columns() {
        let source = "a = 1\nbb = 2\n";
        assert_eq!(line_col(source, 0), LineCol { line: 1, col: 1 });
        assert_eq!(line_col(source, 4), LineCol { line: 1, col: 5 });
        assert_eq!(line_col(source, 6), LineCol { line: 2, col: 1 });
        assert_eq!(line_col(source, 11), LineCol { line: 2, col: 6 });
    }

    #[test]
    fn offset_past_end_is_last_position() {
        let source = "x";
        assert_eq!(line_col(source, 100), LineCol { line: 1, col: 2 });
    }
}
