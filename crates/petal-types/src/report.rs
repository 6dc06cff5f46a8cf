use crate::Span;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A non-fatal diagnostic with a source location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub span: Span,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: Warning: {}", self.span, self.message)
    }
}

/// Collects warnings across all translation stages.
///
/// Warnings are deduplicated per (line, message) so a statement executed
/// thousands of times by the interpreter reports once. A `defy` statement
/// suppresses every warning on its own source line; registering the same
/// line twice is harmless.
#[derive(Debug, Default)]
pub struct Reporter {
    defied_lines: HashSet<u32>,
    seen: HashSet<(u32, String)>,
    warnings: Vec<Warning>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress all warnings on the given source line.
    pub fn defy(&mut self, line: u32) {
        self.defied_lines.insert(line);
    }

    /// Record a warning unless its line is defied or it was already seen.
    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        let message = message.into();
        if self.defied_lines.contains(&span.line) {
            return;
        }
        if !self.seen.insert((span.line, message.clone())) {
            return;
        }
        log::warn!("{span}: {message}");
        self.warnings.push(Warning { span, message });
    }

    /// All warnings recorded so far, in emission order.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Consume the reporter, yielding the collected warnings.
    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}
