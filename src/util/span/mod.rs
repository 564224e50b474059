//! Source location tracking
//!
//! Every raw tree node arrives from upstream tagged with the file it came from
//! and a line/column range. Diagnostics carry these locations unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
mod tests;

/// Source position (line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
}

impl Position {
    /// Create a new position
    #[inline]
    pub fn new(
        line: usize,
        column: usize,
    ) -> Self {
        Self { line, column }
    }

    /// Create a dummy position
    #[inline]
    pub fn dummy() -> Self {
        Self { line: 0, column: 0 }
    }
}

impl fmt::Display for Position {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Source span (start position to end position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    /// Start position (inclusive)
    pub start: Position,
    /// End position (exclusive)
    pub end: Position,
}

impl Span {
    /// Create a new span
    #[inline]
    pub fn new(
        start: Position,
        end: Position,
    ) -> Self {
        Self { start, end }
    }

    /// Create a dummy span
    #[inline]
    pub fn dummy() -> Self {
        Self {
            start: Position::dummy(),
            end: Position::dummy(),
        }
    }

    /// Check if this is a dummy span
    #[inline]
    pub fn is_dummy(&self) -> bool {
        self.start.line == 0
    }
}

impl fmt::Display for Span {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "[{} - {}]", self.start, self.end)
    }
}

/// A span inside a named source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    /// File (or other origin) the node was parsed from
    pub source: String,
    /// Range inside the file
    pub span: Span,
}

impl SourceLocation {
    /// Location spanning `line:column` to `end_line:end_column` in `source`
    pub fn new(
        source: impl Into<String>,
        line: usize,
        column: usize,
        end_line: usize,
        end_column: usize,
    ) -> Self {
        Self {
            source: source.into(),
            span: Span::new(
                Position::new(line, column),
                Position::new(end_line, end_column),
            ),
        }
    }

    /// Single-point location, used for tokens whose extent is unknown
    pub fn at(
        source: impl Into<String>,
        line: usize,
        column: usize,
    ) -> Self {
        Self::new(source, line, column, line, column)
    }

    /// Location for synthesized nodes
    pub fn dummy() -> Self {
        Self::default()
    }

    #[inline]
    pub fn line(&self) -> usize {
        self.span.start.line
    }

    #[inline]
    pub fn column(&self) -> usize {
        self.span.start.column
    }

    #[inline]
    pub fn is_dummy(&self) -> bool {
        self.span.is_dummy()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.is_dummy() {
            return write!(f, "<unknown>");
        }
        let source = if self.source.is_empty() {
            "<source>"
        } else {
            self.source.as_str()
        };
        write!(f, "{}:{}", source, self.span.start)
    }
}
