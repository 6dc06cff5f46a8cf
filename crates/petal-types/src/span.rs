use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location of a token or node.
///
/// Line and column are 1-based for human-readable diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    /// Create a new span.
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// A placeholder span for synthesized nodes.
    pub fn none() -> Self {
        Self { line: 0, col: 0 }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}
