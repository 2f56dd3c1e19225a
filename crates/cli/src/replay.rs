use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use tally_accounting::{
    AccountActivity, AccountId, BalanceSheet, JournalEntry, JournalEntryId, JournalLine,
    ProfitAndLoss, TrialBalance,
};
use tally_core::TenantId;
use tally_events::{EventEnvelope, InMemoryEventBus};
use tally_infra::event_store::InMemoryEventStore;
use tally_infra::{LedgerConfig, LedgerEngine, NewAccount, NewJournalEntry};

use crate::script::{ReportRequest, Script, ScriptLine, Step};

type Engine = LedgerEngine<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

/// Everything printed after a script has been replayed.
#[derive(Debug, Serialize)]
pub struct BookReport {
    pub tenant_id: TenantId,
    pub entries: Vec<JournalEntry>,
    pub trial_balance: TrialBalance,
    pub profit_and_loss: ProfitAndLoss,
    pub balance_sheet: BalanceSheet,
    pub activity: Vec<AccountActivity>,
}

/// A fresh in-memory book that script steps are applied to.
pub struct Book {
    engine: Engine,
    tenant_id: TenantId,
    numbers: HashMap<String, JournalEntryId>,
}

impl Book {
    pub fn new(tenant_id: TenantId, config: LedgerConfig) -> Self {
        Self {
            engine: LedgerEngine::new(
                Arc::new(InMemoryEventStore::new()),
                Arc::new(InMemoryEventBus::new()),
                config,
            ),
            tenant_id,
            numbers: HashMap::new(),
        }
    }

    pub fn apply(&mut self, step: &Step) -> anyhow::Result<()> {
        let tenant_id = self.tenant_id;
        match step {
            Step::OpenAccount {
                code,
                name,
                kind,
                parent,
                header,
            } => {
                let parent = parent.as_deref().map(|p| self.account(p)).transpose()?;
                self.engine.open_account(
                    tenant_id,
                    NewAccount {
                        code: code.clone(),
                        name: name.clone(),
                        kind: *kind,
                        parent,
                        is_header: *header,
                    },
                )?;
            }
            Step::DeactivateAccount { code } => {
                let account_id = self.account(code)?;
                self.engine.deactivate_account(tenant_id, account_id)?;
            }
            Step::Entry {
                date,
                memo,
                reference,
                lines,
                post,
            } => {
                let lines = lines
                    .iter()
                    .map(|line| self.line(line))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                let entry = self.engine.create_entry(
                    tenant_id,
                    NewJournalEntry {
                        date: *date,
                        memo: memo.clone(),
                        reference: reference.clone(),
                        lines,
                    },
                )?;
                let entry = if *post {
                    self.engine.post_entry(tenant_id, entry.id, None)?
                } else {
                    entry
                };
                self.remember(&entry);
            }
            Step::Post { entry } => {
                let entry_id = self.entry(entry)?;
                self.engine.post_entry(tenant_id, entry_id, None)?;
            }
            Step::Reverse { entry, date, memo } => {
                let entry_id = self.entry(entry)?;
                let reversal = self
                    .engine
                    .reverse_entry(tenant_id, entry_id, *date, memo.clone(), None)?;
                self.remember(&reversal);
            }
            Step::ClosePeriod { start, end } => {
                self.engine.close_period(tenant_id, *start, *end)?;
            }
            Step::SalesInvoice(invoice) => {
                let entry = self.engine.record_sales_invoice(tenant_id, invoice)?;
                self.remember(&entry);
            }
            Step::PaymentReceipt(payment) => {
                let entry = self.engine.record_payment_receipt(tenant_id, payment)?;
                self.remember(&entry);
            }
        }
        Ok(())
    }

    pub fn report(&self, request: &ReportRequest) -> anyhow::Result<BookReport> {
        let as_of = request.as_of;
        let from = match request.from {
            Some(from) => from,
            None => NaiveDate::from_ymd_opt(as_of.year(), 1, 1)
                .with_context(|| format!("no January 1st in the year of {as_of}"))?,
        };

        // One snapshot keeps every report on the same history.
        let snapshot = self.engine.snapshot(self.tenant_id)?;
        let activity = request
            .activity
            .iter()
            .map(|code| -> anyhow::Result<AccountActivity> {
                let account_id = self.account(code)?;
                Ok(snapshot.account_activity(account_id, Some(from), as_of)?)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(BookReport {
            tenant_id: self.tenant_id,
            entries: self.engine.entries(self.tenant_id, None)?,
            trial_balance: snapshot.trial_balance(as_of),
            profit_and_loss: snapshot.profit_loss(from, as_of)?,
            balance_sheet: snapshot.balance_sheet(as_of),
            activity,
        })
    }

    fn remember(&mut self, entry: &JournalEntry) {
        debug!(entry_number = %entry.number, entry_id = %entry.id, "script entry recorded");
        self.numbers.insert(entry.number.clone(), entry.id);
    }

    fn account(&self, code: &str) -> anyhow::Result<AccountId> {
        let chart = self.engine.chart(self.tenant_id)?;
        match chart.by_code(code) {
            Some(account) => Ok(account.id),
            None => bail!("unknown account code {code}"),
        }
    }

    fn entry(&self, number: &str) -> anyhow::Result<JournalEntryId> {
        self.numbers
            .get(number)
            .copied()
            .with_context(|| format!("unknown entry number {number}"))
    }

    fn line(&self, line: &ScriptLine) -> anyhow::Result<JournalLine> {
        let account_id = self.account(&line.account)?;
        let journal_line = match (line.debit, line.credit) {
            (Some(amount), None) => JournalLine::debit(account_id, amount),
            (None, Some(amount)) => JournalLine::credit(account_id, amount),
            _ => bail!(
                "line on account {} needs exactly one of debit or credit",
                line.account
            ),
        };
        Ok(match &line.description {
            Some(description) => journal_line.with_description(description.clone()),
            None => journal_line,
        })
    }
}

/// Apply every step of `script` to a fresh book and compute its reports.
///
/// `config` is used unless the script carries its own.
pub fn replay(script: &Script, config: LedgerConfig) -> anyhow::Result<BookReport> {
    let config = script.config.clone().unwrap_or(config);
    let tenant_id = script.tenant_id.unwrap_or_default();
    let mut book = Book::new(tenant_id, config);

    for (index, step) in script.steps.iter().enumerate() {
        book.apply(step)
            .with_context(|| format!("step {} ({})", index + 1, step.describe()))?;
    }
    info!(tenant_id = %tenant_id, steps = script.steps.len(), "script replayed");

    book.report(&script.reports)
}
