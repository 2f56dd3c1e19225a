use thiserror::Error;

use crate::account::AccountId;
use crate::journal::{EntryStatus, JournalEntryId};

/// Everything the ledger can refuse.
///
/// All variants are recoverable by the caller: fix the input, refresh the
/// view, or retry. A command that fails with any of these appends nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed or referentially invalid input.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("journal entry {entry_id} is unbalanced (debits={debits}, credits={credits})")]
    UnbalancedEntry {
        entry_id: JournalEntryId,
        debits: i128,
        credits: i128,
    },

    /// The entry already left the draft state.
    #[error("journal entry {entry_id} is already {status}")]
    AlreadyPosted {
        entry_id: JournalEntryId,
        status: EntryStatus,
    },

    #[error("journal entry {0} not found")]
    EntryNotFound(JournalEntryId),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    /// Duplicate identifier, code or period.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}
