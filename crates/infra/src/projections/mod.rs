//! Projections: read models built from published ledger events.
//!
//! Rebuildable from the event store, partitioned by tenant, and idempotent
//! under at-least-once delivery.

pub mod account_totals;

pub use account_totals::{AccountTotals, AccountTotalsError, AccountTotalsProjection};
