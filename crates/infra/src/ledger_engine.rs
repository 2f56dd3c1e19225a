//! Ledger posting engine: the in-process API over the chart and ledger streams.
//!
//! Every mutation runs through the [`CommandDispatcher`] with an exact expected
//! version and is retried a bounded number of times when another writer got
//! there first. Queries load a [`LedgerSnapshot`] and compute reports from it.
//!
//! Chart and ledger are separate streams. Ledger writes that check lines
//! against the chart hold the tenant's chart fence shared from the check to
//! the append; chart changes hold it exclusively, so an account cannot be
//! deactivated between validation and commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use tally_accounting::report::{self, DateWindow};
use tally_accounting::{
    Account, AccountActivity, AccountBalance, AccountId, AccountKind, AccountingPeriod,
    BalanceSheet, ChartCommand, ChartId, ChartOfAccounts, CloseAccountingPeriod,
    CreateJournalEntry, DeactivateAccount, DraftEntry, EntrySource, EntryStatus, JournalEntry,
    JournalEntryId, JournalLine, Ledger, LedgerCommand, LedgerError, LedgerId, OpenAccount,
    PaymentReceiptPosting, PostJournalEntry, PostingAccounts, ProfitAndLoss, ReverseJournalEntry,
    SalesInvoicePosting, TrialBalance,
};
use tally_core::{TenantId, UserId};
use tally_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
use crate::config::LedgerConfig;
use crate::event_store::{EventStore, EventStoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Optimistic concurrency retries exhausted.
    #[error("ledger contention: gave up after {attempts} attempts")]
    Contention { attempts: u32 },

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<DispatchError<LedgerError>> for EngineError {
    fn from(value: DispatchError<LedgerError>) -> Self {
        match value {
            DispatchError::Domain(err) => EngineError::Ledger(err),
            DispatchError::Concurrency(_) => EngineError::Contention { attempts: 1 },
            DispatchError::TenantIsolation(msg) => EngineError::TenantIsolation(msg),
            DispatchError::Deserialize(msg) => EngineError::Deserialize(msg),
            DispatchError::Store(err) => EngineError::Store(err),
            DispatchError::Publish(msg) => EngineError::Publish(msg),
        }
    }
}

impl EngineError {
    /// The ledger rule that rejected the request, if that is what failed.
    pub fn as_ledger(&self) -> Option<&LedgerError> {
        match self {
            EngineError::Ledger(err) => Some(err),
            _ => None,
        }
    }
}

/// Request to open an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    #[serde(default)]
    pub parent: Option<AccountId>,
    #[serde(default)]
    pub is_header: bool,
}

/// Request to create a manual journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub date: NaiveDate,
    pub memo: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub lines: Vec<JournalLine>,
}

/// Chart and ledger of one tenant as of one point in time.
///
/// The ledger is loaded before the chart; accounts are never removed, so every
/// account the ledger references is present.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub chart: ChartOfAccounts,
    pub ledger: Ledger,
}

impl LedgerSnapshot {
    pub fn account_balance(
        &self,
        account_id: AccountId,
        as_of: NaiveDate,
    ) -> Result<AccountBalance, LedgerError> {
        report::account_balance(&self.chart, &self.ledger, account_id, as_of)
    }

    pub fn trial_balance(&self, as_of: NaiveDate) -> TrialBalance {
        report::trial_balance(&self.chart, &self.ledger, as_of)
    }

    pub fn profit_loss(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<ProfitAndLoss, LedgerError> {
        report::profit_loss(&self.chart, &self.ledger, period_start, period_end)
    }

    pub fn balance_sheet(&self, as_of: NaiveDate) -> BalanceSheet {
        report::balance_sheet(&self.chart, &self.ledger, as_of)
    }

    pub fn account_activity(
        &self,
        account_id: AccountId,
        from: Option<NaiveDate>,
        to: NaiveDate,
    ) -> Result<AccountActivity, LedgerError> {
        report::account_activity(&self.chart, &self.ledger, account_id, DateWindow { from, to })
    }
}

/// Posting accounts resolved from the configured codes.
pub fn posting_accounts(chart: &ChartOfAccounts, config: &LedgerConfig) -> PostingAccounts {
    let codes = &config.posting_codes;
    let resolve = |code: &str| chart.by_code(code).map(|a| a.id);
    PostingAccounts {
        receivable: resolve(&codes.receivable),
        revenue: resolve(&codes.revenue),
        output_tax: resolve(&codes.output_tax),
        cash: resolve(&codes.cash),
    }
}

/// Double-entry posting engine.
///
/// Tenants share the store and the bus but never state: each tenant has its own
/// chart stream and ledger stream.
#[derive(Debug)]
pub struct LedgerEngine<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    config: LedgerConfig,
    chart_fences: ChartFences,
}

#[derive(Debug, Default)]
struct ChartFences {
    fences: Mutex<HashMap<TenantId, Arc<RwLock<()>>>>,
}

impl ChartFences {
    fn fence(&self, tenant_id: TenantId) -> Arc<RwLock<()>> {
        let mut fences = self.fences.lock().unwrap_or_else(PoisonError::into_inner);
        fences.entry(tenant_id).or_default().clone()
    }
}

impl<S, B> LedgerEngine<S, B> {
    pub fn new(store: S, bus: B, config: LedgerConfig) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            config,
            chart_fences: ChartFences::default(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
}

fn make_chart(_: TenantId, id: tally_core::AggregateId) -> ChartOfAccounts {
    ChartOfAccounts::empty(ChartId::new(id))
}

fn make_ledger(_: TenantId, id: tally_core::AggregateId) -> Ledger {
    Ledger::empty(LedgerId::new(id))
}

type Attempt<T> = Result<T, DispatchError<LedgerError>>;

impl<S, B> LedgerEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    // ---- chart of accounts ----

    pub fn open_account(
        &self,
        tenant_id: TenantId,
        request: NewAccount,
    ) -> Result<Account, EngineError> {
        let account_id = AccountId::generate();
        let fence = self.chart_fences.fence(tenant_id);
        let _chart_change = fence.write().unwrap_or_else(PoisonError::into_inner);
        let dispatched = self.with_retries(tenant_id, "open_account", || {
            let cmd = ChartCommand::OpenAccount(OpenAccount {
                tenant_id,
                account_id,
                code: request.code.clone(),
                name: request.name.clone(),
                kind: request.kind,
                parent: request.parent,
                is_header: request.is_header,
                occurred_at: Utc::now(),
            });
            self.dispatch_chart(tenant_id, &cmd)
        })?;

        let account = chart_account(&dispatched.aggregate, account_id)?;
        info!(
            tenant_id = %tenant_id,
            account_id = %account.id,
            code = %account.code,
            kind = ?account.kind,
            "account opened"
        );
        Ok(account)
    }

    pub fn deactivate_account(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
    ) -> Result<Account, EngineError> {
        let fence = self.chart_fences.fence(tenant_id);
        let _chart_change = fence.write().unwrap_or_else(PoisonError::into_inner);
        let dispatched = self.with_retries(tenant_id, "deactivate_account", || {
            let cmd = ChartCommand::DeactivateAccount(DeactivateAccount {
                tenant_id,
                account_id,
                occurred_at: Utc::now(),
            });
            self.dispatch_chart(tenant_id, &cmd)
        })?;

        let account = chart_account(&dispatched.aggregate, account_id)?;
        info!(tenant_id = %tenant_id, account_id = %account_id, code = %account.code, "account deactivated");
        Ok(account)
    }

    pub fn chart(&self, tenant_id: TenantId) -> Result<ChartOfAccounts, EngineError> {
        Ok(self.load_chart(tenant_id)?)
    }

    // ---- journal entries ----

    /// Create a draft entry after checking every line against the chart.
    pub fn create_entry(
        &self,
        tenant_id: TenantId,
        request: NewJournalEntry,
    ) -> Result<JournalEntry, EngineError> {
        let entry_id = JournalEntryId::generate();
        let fence = self.chart_fences.fence(tenant_id);
        let _chart_stable = fence.read().unwrap_or_else(PoisonError::into_inner);
        let dispatched = self.with_retries(tenant_id, "create_entry", || {
            let chart = self.load_chart(tenant_id)?;
            chart
                .validate_lines(&request.lines)
                .map_err(DispatchError::Domain)?;

            let cmd = LedgerCommand::CreateJournalEntry(CreateJournalEntry {
                tenant_id,
                ledger_id: LedgerId::for_tenant(tenant_id),
                entry_id,
                date: request.date,
                memo: request.memo.clone(),
                reference: request.reference.clone(),
                source: EntrySource::Manual,
                lines: request.lines.clone(),
                post_immediately: false,
                posted_by: None,
                occurred_at: Utc::now(),
            });
            self.dispatch_ledger(tenant_id, &cmd)
        })?;

        let entry = ledger_entry(&dispatched.aggregate, entry_id)?;
        info!(
            tenant_id = %tenant_id,
            entry_id = %entry.id,
            entry_number = %entry.number,
            lines = entry.lines.len(),
            "journal entry created"
        );
        Ok(entry)
    }

    /// Post a draft entry. Exactly one of several concurrent posts succeeds;
    /// the others reload and fail with `AlreadyPosted`.
    ///
    /// A draft whose lines reference an account deactivated since creation is
    /// rejected with `Validation`.
    pub fn post_entry(
        &self,
        tenant_id: TenantId,
        entry_id: JournalEntryId,
        posted_by: Option<UserId>,
    ) -> Result<JournalEntry, EngineError> {
        let fence = self.chart_fences.fence(tenant_id);
        let _chart_stable = fence.read().unwrap_or_else(PoisonError::into_inner);
        let dispatched = self.with_retries(tenant_id, "post_entry", || {
            let ledger = self.load_ledger(tenant_id)?;
            if let Some(draft) = ledger.entry(entry_id).filter(|e| !e.is_posted()) {
                self.load_chart(tenant_id)?
                    .validate_lines(&draft.lines)
                    .map_err(DispatchError::Domain)?;
            }

            let cmd = LedgerCommand::PostJournalEntry(PostJournalEntry {
                tenant_id,
                ledger_id: LedgerId::for_tenant(tenant_id),
                entry_id,
                posted_by,
                occurred_at: Utc::now(),
            });
            self.dispatch_ledger(tenant_id, &cmd)
        })?;

        let entry = ledger_entry(&dispatched.aggregate, entry_id)?;
        info!(
            tenant_id = %tenant_id,
            entry_id = %entry.id,
            entry_number = %entry.number,
            "journal entry posted"
        );
        Ok(entry)
    }

    /// Create and post the mirror image of a posted entry.
    pub fn reverse_entry(
        &self,
        tenant_id: TenantId,
        entry_id: JournalEntryId,
        date: NaiveDate,
        memo: Option<String>,
        posted_by: Option<UserId>,
    ) -> Result<JournalEntry, EngineError> {
        let reversal_id = JournalEntryId::generate();
        let dispatched = self.with_retries(tenant_id, "reverse_entry", || {
            let cmd = LedgerCommand::ReverseJournalEntry(ReverseJournalEntry {
                tenant_id,
                ledger_id: LedgerId::for_tenant(tenant_id),
                entry_id,
                reversal_id,
                date,
                memo: memo.clone(),
                posted_by,
                occurred_at: Utc::now(),
            });
            self.dispatch_ledger(tenant_id, &cmd)
        })?;

        let reversal = ledger_entry(&dispatched.aggregate, reversal_id)?;
        info!(
            tenant_id = %tenant_id,
            entry_id = %reversal.id,
            entry_number = %reversal.number,
            reverses = %entry_id,
            "journal entry reversed"
        );
        Ok(reversal)
    }

    pub fn close_period(
        &self,
        tenant_id: TenantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AccountingPeriod, EngineError> {
        let period = AccountingPeriod::new(start, end)?;
        self.with_retries(tenant_id, "close_period", || {
            let cmd = LedgerCommand::CloseAccountingPeriod(CloseAccountingPeriod {
                tenant_id,
                ledger_id: LedgerId::for_tenant(tenant_id),
                period,
                occurred_at: Utc::now(),
            });
            self.dispatch_ledger(tenant_id, &cmd)
        })?;

        info!(tenant_id = %tenant_id, period = %period, "accounting period closed");
        Ok(period)
    }

    // ---- derived postings ----

    /// Book an issued invoice: Dr receivable, Cr revenue, Cr output tax.
    pub fn record_sales_invoice(
        &self,
        tenant_id: TenantId,
        invoice: &SalesInvoicePosting,
    ) -> Result<JournalEntry, EngineError> {
        self.post_derived(tenant_id, "record_sales_invoice", |accounts| {
            invoice.to_draft(accounts)
        })
    }

    /// Book a received payment: Dr cash, Cr receivable.
    pub fn record_payment_receipt(
        &self,
        tenant_id: TenantId,
        payment: &PaymentReceiptPosting,
    ) -> Result<JournalEntry, EngineError> {
        self.post_derived(tenant_id, "record_payment_receipt", |accounts| {
            payment.to_draft(accounts)
        })
    }

    fn post_derived(
        &self,
        tenant_id: TenantId,
        op: &'static str,
        rule: impl Fn(&PostingAccounts) -> Result<DraftEntry, LedgerError>,
    ) -> Result<JournalEntry, EngineError> {
        let entry_id = JournalEntryId::generate();
        let fence = self.chart_fences.fence(tenant_id);
        let _chart_stable = fence.read().unwrap_or_else(PoisonError::into_inner);
        let dispatched = self.with_retries(tenant_id, op, || {
            let chart = self.load_chart(tenant_id)?;
            let draft = rule(&posting_accounts(&chart, &self.config)).map_err(DispatchError::Domain)?;
            chart
                .validate_lines(&draft.lines)
                .map_err(DispatchError::Domain)?;

            let cmd = LedgerCommand::CreateJournalEntry(CreateJournalEntry {
                tenant_id,
                ledger_id: LedgerId::for_tenant(tenant_id),
                entry_id,
                date: draft.date,
                memo: draft.memo,
                reference: draft.reference,
                source: draft.source,
                lines: draft.lines,
                post_immediately: true,
                posted_by: None,
                occurred_at: Utc::now(),
            });
            self.dispatch_ledger(tenant_id, &cmd)
        })?;

        let entry = ledger_entry(&dispatched.aggregate, entry_id)?;
        info!(
            tenant_id = %tenant_id,
            entry_id = %entry.id,
            entry_number = %entry.number,
            source = ?entry.source,
            "derived journal entry posted"
        );
        Ok(entry)
    }

    // ---- queries ----

    /// Consistent view of a tenant's chart and ledger.
    pub fn snapshot(&self, tenant_id: TenantId) -> Result<LedgerSnapshot, EngineError> {
        let ledger = self.load_ledger(tenant_id)?;
        let chart = self.load_chart(tenant_id)?;
        Ok(LedgerSnapshot { chart, ledger })
    }

    pub fn entry(
        &self,
        tenant_id: TenantId,
        entry_id: JournalEntryId,
    ) -> Result<JournalEntry, EngineError> {
        let ledger = self.load_ledger(tenant_id)?;
        Ok(ledger_entry(&ledger, entry_id)?)
    }

    /// Entries newest date first, optionally filtered by status.
    pub fn entries(
        &self,
        tenant_id: TenantId,
        status: Option<EntryStatus>,
    ) -> Result<Vec<JournalEntry>, EngineError> {
        let ledger = self.load_ledger(tenant_id)?;
        Ok(ledger.entries(status).into_iter().cloned().collect())
    }

    pub fn account_balance(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        as_of: NaiveDate,
    ) -> Result<AccountBalance, EngineError> {
        Ok(self.snapshot(tenant_id)?.account_balance(account_id, as_of)?)
    }

    pub fn account_activity(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        from: Option<NaiveDate>,
        to: NaiveDate,
    ) -> Result<AccountActivity, EngineError> {
        Ok(self
            .snapshot(tenant_id)?
            .account_activity(account_id, from, to)?)
    }

    pub fn trial_balance(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
    ) -> Result<TrialBalance, EngineError> {
        let tb = self.snapshot(tenant_id)?.trial_balance(as_of);
        if !tb.is_balanced() {
            warn!(
                tenant_id = %tenant_id,
                debits = %tb.total_debits,
                credits = %tb.total_credits,
                "trial balance out of balance"
            );
        }
        Ok(tb)
    }

    pub fn profit_loss(
        &self,
        tenant_id: TenantId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<ProfitAndLoss, EngineError> {
        Ok(self
            .snapshot(tenant_id)?
            .profit_loss(period_start, period_end)?)
    }

    pub fn balance_sheet(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
    ) -> Result<BalanceSheet, EngineError> {
        Ok(self.snapshot(tenant_id)?.balance_sheet(as_of))
    }

    /// The tenant's ledger stream as envelopes, for rebuilding read models.
    pub fn ledger_history(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<EventEnvelope<JsonValue>>, EngineError> {
        let stream = self
            .dispatcher
            .store()
            .load_stream(tenant_id, LedgerId::for_tenant(tenant_id).0)?;
        Ok(stream.iter().map(|e| e.to_envelope()).collect())
    }

    // ---- plumbing ----

    fn load_chart(&self, tenant_id: TenantId) -> Attempt<ChartOfAccounts> {
        self.dispatcher
            .load(tenant_id, ChartId::for_tenant(tenant_id).0, make_chart)
    }

    fn load_ledger(&self, tenant_id: TenantId) -> Attempt<Ledger> {
        self.dispatcher
            .load(tenant_id, LedgerId::for_tenant(tenant_id).0, make_ledger)
    }

    fn dispatch_chart(
        &self,
        tenant_id: TenantId,
        cmd: &ChartCommand,
    ) -> Attempt<Dispatched<ChartOfAccounts>> {
        self.dispatcher.dispatch(
            tenant_id,
            ChartId::for_tenant(tenant_id).0,
            ChartOfAccounts::AGGREGATE_TYPE,
            cmd,
            make_chart,
        )
    }

    fn dispatch_ledger(&self, tenant_id: TenantId, cmd: &LedgerCommand) -> Attempt<Dispatched<Ledger>> {
        self.dispatcher.dispatch(
            tenant_id,
            LedgerId::for_tenant(tenant_id).0,
            Ledger::AGGREGATE_TYPE,
            cmd,
            make_ledger,
        )
    }

    /// Run `attempt` until it stops losing optimistic concurrency races, at
    /// most `1 + max_conflict_retries` times.
    fn with_retries<T>(
        &self,
        tenant_id: TenantId,
        op: &'static str,
        mut attempt: impl FnMut() -> Attempt<T>,
    ) -> Result<T, EngineError> {
        let max_attempts = self.config.max_conflict_retries.saturating_add(1);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match attempt() {
                Ok(value) => return Ok(value),
                Err(DispatchError::Concurrency(reason)) if attempts < max_attempts => {
                    debug!(tenant_id = %tenant_id, op, attempts, reason = %reason, "version conflict, retrying");
                }
                Err(DispatchError::Concurrency(_)) => {
                    warn!(tenant_id = %tenant_id, op, attempts, "version conflict retries exhausted");
                    return Err(EngineError::Contention { attempts });
                }
                Err(DispatchError::Domain(err)) => {
                    warn!(tenant_id = %tenant_id, op, error = %err, "ledger command rejected");
                    return Err(EngineError::Ledger(err));
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}

fn chart_account(chart: &ChartOfAccounts, account_id: AccountId) -> Result<Account, LedgerError> {
    chart
        .get(account_id)
        .cloned()
        .ok_or(LedgerError::AccountNotFound(account_id))
}

fn ledger_entry(ledger: &Ledger, entry_id: JournalEntryId) -> Result<JournalEntry, LedgerError> {
    ledger
        .entry(entry_id)
        .cloned()
        .ok_or(LedgerError::EntryNotFound(entry_id))
}
