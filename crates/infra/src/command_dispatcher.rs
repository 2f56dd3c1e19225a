//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events)
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Append to store with ExpectedVersion::Exact(loaded version)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! A command rejected in step 3 appends nothing. A lost race in step 4
//! surfaces as [`DispatchError::Concurrency`]; retrying is the caller's call.
//!
//! Steps 4 and 5 run under a per-stream gate, so subscribers receive each
//! stream's events in sequence order even with concurrent writers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use tally_core::{Aggregate, AggregateId, ExpectedVersion, TenantId};
use tally_events::{Event, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// Stale aggregate version; reload and retry.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// The aggregate rejected the command.
    #[error("{0}")]
    Domain(E),

    /// A historical payload no longer decodes into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl<E> From<EventStoreError> for DispatchError<E> {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Outcome of a successful dispatch.
#[derive(Debug)]
pub struct Dispatched<A> {
    /// Aggregate state after the committed events were applied.
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and the bus so tests and the engine share one
/// pipeline with whichever backends are plugged in.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    gates: StreamGates,
}

/// One lock per `(tenant, aggregate)` stream, held from append to publish.
#[derive(Debug, Default)]
struct StreamGates {
    gates: Mutex<HashMap<(TenantId, AggregateId), Arc<Mutex<()>>>>,
}

impl StreamGates {
    fn gate(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.entry((tenant_id, aggregate_id)).or_default().clone()
    }
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            gates: StreamGates::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate without handling a command.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        rehydrate(tenant_id, aggregate_id, &history, make_aggregate)
    }

    /// Run a command through load → handle → append → publish.
    ///
    /// `make_aggregate` builds the empty aggregate that history is applied to.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: &A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        let mut aggregate = rehydrate(tenant_id, aggregate_id, &history, make_aggregate)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let decided = aggregate.handle(command).map_err(DispatchError::Domain)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                committed: vec![],
            });
        }

        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let gate = self.gates.gate(tenant_id, aggregate_id);
        let _ordered = gate.lock().unwrap_or_else(PoisonError::into_inner);

        let committed = self.store.append(uncommitted, expected)?;
        for ev in &decided {
            aggregate.apply(ev);
        }
        debug!(
            tenant_id = %tenant_id,
            aggregate_type = %aggregate_type,
            events = committed.len(),
            version = stream_version(&committed),
            "events committed"
        );

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(Dispatched {
            aggregate,
            committed,
        })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

/// Validate a loaded stream and replay it onto a fresh aggregate.
///
/// Rejects events from another tenant or aggregate and non-increasing sequence
/// numbers even if the backend returned them.
pub fn rehydrate<A>(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    history: &[StoredEvent],
    make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
) -> Result<A, DispatchError<A::Error>>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let mut last = 0u64;
    for (idx, e) in history.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }

    let mut aggregate = make_aggregate(tenant_id, aggregate_id);
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use tally_accounting::{
        AccountId, CreateJournalEntry, EntrySource, JournalEntryId, JournalLine, Ledger,
        LedgerCommand, LedgerError, LedgerId, PostJournalEntry,
    };
    use tally_core::AggregateRoot;
    use tally_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn setup() -> (CommandDispatcher<InMemoryEventStore, Bus>, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        (CommandDispatcher::new(InMemoryEventStore::new(), bus.clone()), bus)
    }

    fn create_cmd(tenant_id: TenantId, ledger_id: LedgerId, entry_id: JournalEntryId) -> LedgerCommand {
        LedgerCommand::CreateJournalEntry(CreateJournalEntry {
            tenant_id,
            ledger_id,
            entry_id,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            memo: "opening".to_string(),
            reference: None,
            source: EntrySource::Manual,
            lines: vec![
                JournalLine::debit(AccountId::generate(), 100),
                JournalLine::credit(AccountId::generate(), 100),
            ],
            post_immediately: false,
            posted_by: None,
            occurred_at: Utc::now(),
        })
    }

    fn make_ledger(_: TenantId, id: AggregateId) -> Ledger {
        Ledger::empty(LedgerId::new(id))
    }

    #[test]
    fn dispatch_appends_publishes_and_returns_new_state() {
        let (dispatcher, bus) = setup();
        let sub = bus.subscribe();
        let tenant_id = TenantId::new();
        let ledger_id = LedgerId::for_tenant(tenant_id);
        let entry_id = JournalEntryId::generate();

        let out = dispatcher
            .dispatch(
                tenant_id,
                ledger_id.0,
                Ledger::AGGREGATE_TYPE,
                &create_cmd(tenant_id, ledger_id, entry_id),
                make_ledger,
            )
            .unwrap();

        assert_eq!(out.committed.len(), 1);
        assert_eq!(out.aggregate.version(), 1);
        assert!(out.aggregate.entry(entry_id).is_some());

        let envelope = sub.try_recv().unwrap();
        assert_eq!(envelope.sequence_number(), 1);
        assert_eq!(envelope.aggregate_type(), Ledger::AGGREGATE_TYPE);
    }

    #[test]
    fn rejected_commands_append_nothing() {
        let (dispatcher, bus) = setup();
        let sub = bus.subscribe();
        let tenant_id = TenantId::new();
        let ledger_id = LedgerId::for_tenant(tenant_id);
        let missing = JournalEntryId::generate();

        let post = LedgerCommand::PostJournalEntry(PostJournalEntry {
            tenant_id,
            ledger_id,
            entry_id: missing,
            posted_by: None,
            occurred_at: Utc::now(),
        });
        let err = dispatcher
            .dispatch(tenant_id, ledger_id.0, Ledger::AGGREGATE_TYPE, &post, make_ledger)
            .unwrap_err();

        assert!(matches!(err, DispatchError::Domain(LedgerError::EntryNotFound(id)) if id == missing));
        assert!(dispatcher.store().load_stream(tenant_id, ledger_id.0).unwrap().is_empty());
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn load_rebuilds_state_from_the_stream() {
        let (dispatcher, _bus) = setup();
        let tenant_id = TenantId::new();
        let ledger_id = LedgerId::for_tenant(tenant_id);

        for _ in 0..3 {
            dispatcher
                .dispatch(
                    tenant_id,
                    ledger_id.0,
                    Ledger::AGGREGATE_TYPE,
                    &create_cmd(tenant_id, ledger_id, JournalEntryId::generate()),
                    make_ledger,
                )
                .unwrap();
        }

        let ledger: Ledger = dispatcher.load(tenant_id, ledger_id.0, make_ledger).unwrap();
        assert_eq!(ledger.version(), 3);
        assert_eq!(ledger.entries(None).len(), 3);
    }

    #[test]
    fn rehydrate_rejects_foreign_events() {
        let (dispatcher, _bus) = setup();
        let tenant_id = TenantId::new();
        let ledger_id = LedgerId::for_tenant(tenant_id);

        let out = dispatcher
            .dispatch(
                tenant_id,
                ledger_id.0,
                Ledger::AGGREGATE_TYPE,
                &create_cmd(tenant_id, ledger_id, JournalEntryId::generate()),
                make_ledger,
            )
            .unwrap();

        let err = rehydrate(TenantId::new(), ledger_id.0, &out.committed, make_ledger).unwrap_err();
        assert!(matches!(err, DispatchError::TenantIsolation(_)));
    }

    #[test]
    fn concurrent_writers_publish_in_sequence_order() {
        let (dispatcher, bus) = setup();
        let dispatcher = Arc::new(dispatcher);
        let sub = bus.subscribe();
        let tenant_id = TenantId::new();
        let ledger_id = LedgerId::for_tenant(tenant_id);

        let threads = 8;
        let per_thread = 20;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        let cmd = create_cmd(tenant_id, ledger_id, JournalEntryId::generate());
                        loop {
                            match dispatcher.dispatch(
                                tenant_id,
                                ledger_id.0,
                                Ledger::AGGREGATE_TYPE,
                                &cmd,
                                make_ledger,
                            ) {
                                Ok(_) => break,
                                Err(DispatchError::Concurrency(_)) => continue,
                                Err(other) => panic!("dispatch failed: {other}"),
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let sequence: Vec<u64> = std::iter::from_fn(|| sub.try_recv().ok())
            .map(|env| env.sequence_number())
            .collect();
        let expected: Vec<u64> = (1..=(threads * per_thread) as u64).collect();
        assert_eq!(sequence, expected);
    }
}
