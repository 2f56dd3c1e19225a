use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{AggregateId, UserId};

use crate::account::{AccountId, Side};

/// Journal entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JournalEntryId(pub AggregateId);

impl JournalEntryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for JournalEntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Entry lifecycle: `Draft` → `Posted`, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Draft,
    Posted,
}

impl core::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntryStatus::Draft => f.write_str("draft"),
            EntryStatus::Posted => f.write_str("posted"),
        }
    }
}

/// What produced an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntrySource {
    Manual,
    SalesInvoice { reference: String },
    PaymentReceipt { reference: String },
    Reversal { of: JournalEntryId },
}

/// One side of a journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: AccountId,
    pub side: Side,
    /// Positive amount in smallest unit (e.g., cents).
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl JournalLine {
    pub fn debit(account_id: AccountId, amount: i64) -> Self {
        Self {
            account_id,
            side: Side::Debit,
            amount,
            description: None,
        }
    }

    pub fn credit(account_id: AccountId, amount: i64) -> Self {
        Self {
            account_id,
            side: Side::Credit,
            amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Same account and amount on the opposite side.
    pub fn reversed(&self) -> Self {
        Self {
            side: self.side.opposite(),
            ..self.clone()
        }
    }
}

/// Debit and credit sums of a set of lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTotals {
    pub debits: i128,
    pub credits: i128,
}

impl LineTotals {
    pub fn of<'a>(lines: impl IntoIterator<Item = &'a JournalLine>) -> Self {
        let mut totals = Self::default();
        for line in lines {
            match line.side {
                Side::Debit => totals.debits += line.amount as i128,
                Side::Credit => totals.credits += line.amount as i128,
            }
        }
        totals
    }

    pub fn is_balanced(&self) -> bool {
        self.debits == self.credits
    }
}

/// A journal entry as held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalEntryId,
    /// Sequential per ledger, e.g. "JE-000042".
    pub number: String,
    pub date: NaiveDate,
    pub memo: String,
    pub reference: Option<String>,
    pub source: EntrySource,
    pub status: EntryStatus,
    pub lines: Vec<JournalLine>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<UserId>,
    /// Set once a later reversal entry cancels this one.
    pub reversed_by: Option<JournalEntryId>,
}

impl JournalEntry {
    pub fn totals(&self) -> LineTotals {
        LineTotals::of(&self.lines)
    }

    pub fn is_posted(&self) -> bool {
        self.status == EntryStatus::Posted
    }

    /// Id of the entry this one reverses, if any.
    pub fn reverses(&self) -> Option<JournalEntryId> {
        match self.source {
            EntrySource::Reversal { of } => Some(of),
            _ => None,
        }
    }
}
