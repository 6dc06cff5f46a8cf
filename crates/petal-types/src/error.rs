use crate::Span;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a translation.
///
/// Translation is all-or-nothing: the first error unwinds the whole
/// pipeline and the caller gets no partial artifacts. `Compile` carries
/// the offending source location; `General` covers conditions with no
/// single token to point at (empty programs, internal emitter checks).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum TranslateError {
    /// A diagnosable error in the source program.
    #[error("{span}: {message}")]
    Compile { span: Span, message: String },

    /// An error with no source location.
    #[error("{0}")]
    General(String),
}

impl TranslateError {
    /// Create a compile error at the given location.
    pub fn at(span: Span, message: impl Into<String>) -> Self {
        Self::Compile {
            span,
            message: message.into(),
        }
    }

    /// The source location, if this error has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Compile { span, .. } => Some(*span),
            Self::General(_) => None,
        }
    }
}

/// Result type used throughout the Petal compiler.
pub type Result<T> = std::result::Result<T, TranslateError>;
