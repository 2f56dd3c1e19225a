//! Domain error model.

use thiserror::Error;

/// Failure of a core primitive.
///
/// Bounded contexts with richer vocabularies (the ledger, for one) define
/// their own error enums.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
