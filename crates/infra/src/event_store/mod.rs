//! Append-only event store boundary.
//!
//! Streams are keyed by `(tenant_id, aggregate_id)`. The engine keeps one chart
//! stream and one ledger stream per tenant.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
