use chrono::{DateTime, Utc};

/// A fact recorded in an append-only stream.
///
/// Events are never edited once stored; a correction is always a new event.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "accounting.ledger.journal_entry_posted").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Wall-clock time the event was recorded.
    fn occurred_at(&self) -> DateTime<Utc>;
}
