use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use tally_accounting::{AccountId, Ledger, LedgerEvent, Side};
use tally_core::{AggregateId, TenantId};
use tally_events::EventEnvelope;

use crate::read_model::TenantStore;

/// Read model: running debit/credit totals of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTotals {
    pub account_id: AccountId,
    pub debits: i128,
    pub credits: i128,
    /// Posted lines that touched the account.
    pub postings: u64,
}

impl AccountTotals {
    pub fn empty(account_id: AccountId) -> Self {
        Self {
            account_id,
            debits: 0,
            credits: 0,
            postings: 0,
        }
    }

    /// Debit-positive net.
    pub fn net_debit(&self) -> i128 {
        self.debits - self.credits
    }
}

#[derive(Debug, Error)]
pub enum AccountTotalsError {
    #[error("failed to deserialize ledger event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// Projection: posted ledger lines → per-account totals per tenant.
///
/// Keeps the last applied sequence number per stream, so redelivered envelopes
/// are skipped and a gap in the stream is reported instead of silently
/// producing wrong totals.
#[derive(Debug)]
pub struct AccountTotalsProjection<S>
where
    S: TenantStore<AccountId, AccountTotals>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> AccountTotalsProjection<S>
where
    S: TenantStore<AccountId, AccountTotals>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, account_id: AccountId) -> Option<AccountTotals> {
        self.store.get(tenant_id, &account_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<AccountTotals> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by_key(|r| r.account_id);
        rows
    }

    /// Last sequence number applied for a stream (0 if none).
    pub fn cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|c| c.get(&CursorKey { tenant_id, aggregate_id }).copied())
            .unwrap_or(0)
    }

    fn set_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(CursorKey { tenant_id, aggregate_id }, sequence_number);
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), AccountTotalsError> {
        if envelope.aggregate_type() != Ledger::AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(tenant_id, aggregate_id);

        if seq == 0 {
            return Err(AccountTotalsError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            debug!(tenant_id = %tenant_id, sequence_number = seq, "duplicate ledger event skipped");
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(AccountTotalsError::NonMonotonicSequence { last, found: seq });
        }

        let event: LedgerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| AccountTotalsError::Deserialize(e.to_string()))?;

        if event.tenant_id() != tenant_id {
            return Err(AccountTotalsError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        if let LedgerEvent::JournalEntryPosted(posted) = event {
            for line in &posted.lines {
                let mut totals = self
                    .store
                    .get(tenant_id, &line.account_id)
                    .unwrap_or_else(|| AccountTotals::empty(line.account_id));
                match line.side {
                    Side::Debit => totals.debits += line.amount as i128,
                    Side::Credit => totals.credits += line.amount as i128,
                }
                totals.postings += 1;
                self.store.upsert(tenant_id, line.account_id, totals);
            }
        }

        self.set_cursor(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Drop the tenants' rows and replay the given history in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), AccountTotalsError> {
        let mut envelopes: Vec<_> = envelopes.into_iter().collect();

        let tenants: BTreeSet<TenantId> = envelopes.iter().map(|e| e.tenant_id()).collect();
        for tenant_id in tenants {
            self.store.clear_tenant(tenant_id);
            self.clear_cursors(tenant_id);
        }

        envelopes.sort_by_key(|e| (e.tenant_id(), e.aggregate_id(), e.sequence_number()));
        for envelope in &envelopes {
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }
}
