//! Error taxonomy shared by every Glossa component.
//!
//! | Variant | Raised by | Caller sees |
//! |---------|-----------|-------------|
//! | `Parse` | codec (as a diagnostic) | never fatal, collected alongside entries |
//! | `Retrieval` | chunk sources, store | operation fails, yielded entries stay |
//! | `Validation` | request checks | 4xx-style rejection |
//! | `Authorization` | identity checks | connection / request rejected |
//! | `NotFound` | tracker lookups | 404-style rejection |
//! | `Conflict` | reserved for compare-and-swap edits | not raised today |
//! | `Journal` | persistence collaborator | operation fails, nothing applied |
//! | `Publication` | publishers | batch stays pending, nothing applied |

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GlossaError {
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// `offset` is the number of bytes delivered before the failure, so a
    /// caller can resume from the last successful chunk.
    #[error("Retrieval failed at byte {offset}: {message}")]
    Retrieval { offset: u64, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflicting edit for '{key}'")]
    Conflict { key: String },

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Publication failed: {0}")]
    Publication(String),
}

impl GlossaError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn retrieval(offset: u64, message: impl Into<String>) -> Self {
        Self::Retrieval {
            offset,
            message: message.into(),
        }
    }

    /// Whether this error should be reported as a client mistake (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Authorization(_) | Self::NotFound(_) | Self::Conflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GlossaError>;
