use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Aggregate, AggregateId, AggregateRoot, TenantId, UserId};
use tally_events::Event;

use crate::error::LedgerError;
use crate::journal::{
    EntrySource, EntryStatus, JournalEntry, JournalEntryId, JournalLine, LineTotals,
};
use crate::period::AccountingPeriod;

/// Prefix of sequential entry numbers.
pub const ENTRY_NUMBER_PREFIX: &str = "JE";

/// Ledger identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerId(pub AggregateId);

impl LedgerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The ledger stream of a tenant.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self(AggregateId::singleton(tenant_id, Ledger::AGGREGATE_TYPE))
    }
}

impl core::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Ledger (double-entry journal).
///
/// Every journal entry of a tenant lives in this one stream, so a single
/// optimistic version check serializes all status transitions. Balances are
/// not held here; reports derive them from the posted entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    id: LedgerId,
    tenant_id: Option<TenantId>,
    version: u64,
    entries: HashMap<JournalEntryId, JournalEntry>,
    /// Creation order; entry numbers follow it.
    created_order: Vec<JournalEntryId>,
    /// Posting order; the append-only ledger history.
    posted_order: Vec<JournalEntryId>,
    closed_periods: Vec<AccountingPeriod>,
}

impl Ledger {
    pub const AGGREGATE_TYPE: &'static str = "accounting.ledger";

    /// Empty aggregate for rehydration.
    pub fn empty(id: LedgerId) -> Self {
        Self {
            id,
            tenant_id: None,
            version: 0,
            entries: HashMap::new(),
            created_order: Vec::new(),
            posted_order: Vec::new(),
            closed_periods: Vec::new(),
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn entry(&self, id: JournalEntryId) -> Option<&JournalEntry> {
        self.entries.get(&id)
    }

    /// Entries newest date first, ties broken by entry number (newest first).
    pub fn entries(&self, status: Option<EntryStatus>) -> Vec<&JournalEntry> {
        let mut out: Vec<&JournalEntry> = self
            .created_order
            .iter()
            .rev()
            .filter_map(|id| self.entries.get(id))
            .filter(|e| status.is_none_or(|s| e.status == s))
            .collect();
        out.sort_by(|a, b| b.date.cmp(&a.date));
        out
    }

    /// Posted entries in the order they were posted.
    pub fn posted_entries(&self) -> impl Iterator<Item = &JournalEntry> + Clone {
        self.posted_order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn closed_periods(&self) -> &[AccountingPeriod] {
        &self.closed_periods
    }

    pub fn is_closed(&self, date: NaiveDate) -> bool {
        self.closed_periods.iter().any(|p| p.contains(date))
    }

    fn next_number(&self) -> String {
        format!("{ENTRY_NUMBER_PREFIX}-{:06}", self.created_order.len() + 1)
    }
}

impl AggregateRoot for Ledger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateJournalEntry.
///
/// With `post_immediately` the entry is created and posted in one decision
/// (used for derived postings), so it is never observable as a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJournalEntry {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry_id: JournalEntryId,
    pub date: NaiveDate,
    pub memo: String,
    pub reference: Option<String>,
    pub source: EntrySource,
    pub lines: Vec<JournalLine>,
    pub post_immediately: bool,
    pub posted_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostJournalEntry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostJournalEntry {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry_id: JournalEntryId,
    pub posted_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseJournalEntry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseJournalEntry {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry_id: JournalEntryId,
    pub reversal_id: JournalEntryId,
    pub date: NaiveDate,
    pub memo: Option<String>,
    pub posted_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseAccountingPeriod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAccountingPeriod {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub period: AccountingPeriod,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    CreateJournalEntry(CreateJournalEntry),
    PostJournalEntry(PostJournalEntry),
    ReverseJournalEntry(ReverseJournalEntry),
    CloseAccountingPeriod(CloseAccountingPeriod),
}

/// Event: JournalEntryCreated (draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryCreated {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry_id: JournalEntryId,
    pub number: String,
    pub date: NaiveDate,
    pub memo: String,
    pub reference: Option<String>,
    pub source: EntrySource,
    pub lines: Vec<JournalLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: JournalEntryPosted.
///
/// Self-contained: carries the lines and date so consumers of the posting
/// stream never need the earlier creation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryPosted {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry_id: JournalEntryId,
    pub number: String,
    pub date: NaiveDate,
    pub lines: Vec<JournalLine>,
    pub posted_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountingPeriodClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingPeriodClosed {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub period: AccountingPeriod,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    JournalEntryCreated(JournalEntryCreated),
    JournalEntryPosted(JournalEntryPosted),
    AccountingPeriodClosed(AccountingPeriodClosed),
}

impl LedgerEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            LedgerEvent::JournalEntryCreated(e) => e.tenant_id,
            LedgerEvent::JournalEntryPosted(e) => e.tenant_id,
            LedgerEvent::AccountingPeriodClosed(e) => e.tenant_id,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::JournalEntryCreated(_) => "accounting.ledger.journal_entry_created",
            LedgerEvent::JournalEntryPosted(_) => "accounting.ledger.journal_entry_posted",
            LedgerEvent::AccountingPeriodClosed(_) => "accounting.ledger.period_closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::JournalEntryCreated(e) => e.occurred_at,
            LedgerEvent::JournalEntryPosted(e) => e.occurred_at,
            LedgerEvent::AccountingPeriodClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Ledger {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        if self.tenant_id.is_none() {
            self.tenant_id = Some(event.tenant_id());
        }

        match event {
            LedgerEvent::JournalEntryCreated(e) => {
                self.id = e.ledger_id;
                self.created_order.push(e.entry_id);
                self.entries.insert(
                    e.entry_id,
                    JournalEntry {
                        id: e.entry_id,
                        number: e.number.clone(),
                        date: e.date,
                        memo: e.memo.clone(),
                        reference: e.reference.clone(),
                        source: e.source.clone(),
                        status: EntryStatus::Draft,
                        lines: e.lines.clone(),
                        created_at: e.occurred_at,
                        posted_at: None,
                        posted_by: None,
                        reversed_by: None,
                    },
                );
            }
            LedgerEvent::JournalEntryPosted(e) => {
                let mut reverses = None;
                if let Some(entry) = self.entries.get_mut(&e.entry_id) {
                    entry.status = EntryStatus::Posted;
                    entry.posted_at = Some(e.occurred_at);
                    entry.posted_by = e.posted_by;
                    reverses = entry.reverses();
                }
                if let Some(original) = reverses.and_then(|id| self.entries.get_mut(&id)) {
                    original.reversed_by = Some(e.entry_id);
                }
                self.posted_order.push(e.entry_id);
            }
            LedgerEvent::AccountingPeriodClosed(e) => {
                self.closed_periods.push(e.period);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::CreateJournalEntry(cmd) => self.handle_create(cmd),
            LedgerCommand::PostJournalEntry(cmd) => self.handle_post(cmd),
            LedgerCommand::ReverseJournalEntry(cmd) => self.handle_reverse(cmd),
            LedgerCommand::CloseAccountingPeriod(cmd) => self.handle_close_period(cmd),
        }
    }
}

impl Ledger {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), LedgerError> {
        match self.tenant_id {
            Some(t) if t != tenant_id => Err(LedgerError::invariant("tenant mismatch")),
            _ => Ok(()),
        }
    }

    fn ensure_new_entry(&self, entry_id: JournalEntryId) -> Result<(), LedgerError> {
        if self.entries.contains_key(&entry_id) {
            return Err(LedgerError::conflict(format!(
                "journal entry {entry_id} already exists"
            )));
        }
        Ok(())
    }

    /// Each invoice and payment document is booked at most once.
    fn ensure_unbooked(&self, source: &EntrySource) -> Result<(), LedgerError> {
        let (kind, reference) = match source {
            EntrySource::SalesInvoice { reference } => ("sales invoice", reference),
            EntrySource::PaymentReceipt { reference } => ("payment receipt", reference),
            EntrySource::Manual | EntrySource::Reversal { .. } => return Ok(()),
        };
        if let Some(existing) = self.entries.values().find(|e| &e.source == source) {
            return Err(LedgerError::conflict(format!(
                "{kind} {reference} already booked as {}",
                existing.number
            )));
        }
        Ok(())
    }

    fn ensure_open(&self, date: NaiveDate) -> Result<(), LedgerError> {
        if let Some(period) = self.closed_periods.iter().find(|p| p.contains(date)) {
            return Err(LedgerError::validation(format!(
                "accounting period {period} is closed (entry dated {date})"
            )));
        }
        Ok(())
    }

    fn ensure_balanced(entry_id: JournalEntryId, lines: &[JournalLine]) -> Result<(), LedgerError> {
        let totals = LineTotals::of(lines);
        if !totals.is_balanced() {
            return Err(LedgerError::UnbalancedEntry {
                entry_id,
                debits: totals.debits,
                credits: totals.credits,
            });
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateJournalEntry) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_new_entry(cmd.entry_id)?;

        if matches!(cmd.source, EntrySource::Reversal { .. }) {
            return Err(LedgerError::validation(
                "reversal entries are created by reversing a posted entry",
            ));
        }
        self.ensure_unbooked(&cmd.source)?;
        if cmd.lines.is_empty() {
            return Err(LedgerError::validation("journal entry must have lines"));
        }
        if cmd.lines.iter().any(|l| l.amount <= 0) {
            return Err(LedgerError::validation("amount must be positive"));
        }

        if cmd.post_immediately {
            Self::ensure_balanced(cmd.entry_id, &cmd.lines)?;
            self.ensure_open(cmd.date)?;
        }

        let created = JournalEntryCreated {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            entry_id: cmd.entry_id,
            number: self.next_number(),
            date: cmd.date,
            memo: cmd.memo.clone(),
            reference: cmd.reference.clone(),
            source: cmd.source.clone(),
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        };

        if !cmd.post_immediately {
            return Ok(vec![LedgerEvent::JournalEntryCreated(created)]);
        }

        let posted = JournalEntryPosted {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            entry_id: cmd.entry_id,
            number: created.number.clone(),
            date: cmd.date,
            lines: cmd.lines.clone(),
            posted_by: cmd.posted_by,
            occurred_at: cmd.occurred_at,
        };

        Ok(vec![
            LedgerEvent::JournalEntryCreated(created),
            LedgerEvent::JournalEntryPosted(posted),
        ])
    }

    fn handle_post(&self, cmd: &PostJournalEntry) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.ensure_tenant(cmd.tenant_id)?;

        let entry = self
            .entry(cmd.entry_id)
            .ok_or(LedgerError::EntryNotFound(cmd.entry_id))?;

        if entry.status != EntryStatus::Draft {
            return Err(LedgerError::AlreadyPosted {
                entry_id: entry.id,
                status: entry.status,
            });
        }
        Self::ensure_balanced(entry.id, &entry.lines)?;
        self.ensure_open(entry.date)?;

        Ok(vec![LedgerEvent::JournalEntryPosted(JournalEntryPosted {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            entry_id: entry.id,
            number: entry.number.clone(),
            date: entry.date,
            lines: entry.lines.clone(),
            posted_by: cmd.posted_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseJournalEntry) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_new_entry(cmd.reversal_id)?;

        let original = self
            .entry(cmd.entry_id)
            .ok_or(LedgerError::EntryNotFound(cmd.entry_id))?;

        if !original.is_posted() {
            return Err(LedgerError::validation(format!(
                "journal entry {} is a draft; only posted entries can be reversed",
                original.number
            )));
        }
        if original.reverses().is_some() {
            return Err(LedgerError::validation(format!(
                "journal entry {} is itself a reversal",
                original.number
            )));
        }
        if let Some(by) = original.reversed_by {
            return Err(LedgerError::conflict(format!(
                "journal entry {} already reversed by {by}",
                original.number
            )));
        }
        if cmd.date < original.date {
            return Err(LedgerError::validation(format!(
                "reversal date {} precedes original date {}",
                cmd.date, original.date
            )));
        }
        self.ensure_open(cmd.date)?;

        let lines: Vec<JournalLine> = original.lines.iter().map(JournalLine::reversed).collect();
        let number = self.next_number();
        let memo = cmd
            .memo
            .clone()
            .unwrap_or_else(|| format!("Reversal of {}", original.number));

        Ok(vec![
            LedgerEvent::JournalEntryCreated(JournalEntryCreated {
                tenant_id: cmd.tenant_id,
                ledger_id: cmd.ledger_id,
                entry_id: cmd.reversal_id,
                number: number.clone(),
                date: cmd.date,
                memo,
                reference: Some(original.number.clone()),
                source: EntrySource::Reversal { of: original.id },
                lines: lines.clone(),
                occurred_at: cmd.occurred_at,
            }),
            LedgerEvent::JournalEntryPosted(JournalEntryPosted {
                tenant_id: cmd.tenant_id,
                ledger_id: cmd.ledger_id,
                entry_id: cmd.reversal_id,
                number,
                date: cmd.date,
                lines,
                posted_by: cmd.posted_by,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_close_period(
        &self,
        cmd: &CloseAccountingPeriod,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.ensure_tenant(cmd.tenant_id)?;

        if cmd.period.start > cmd.period.end {
            return Err(LedgerError::validation("period start is after period end"));
        }
        if let Some(existing) = self.closed_periods.iter().find(|p| p.overlaps(&cmd.period)) {
            return Err(LedgerError::conflict(format!(
                "period {} overlaps closed period {existing}",
                cmd.period
            )));
        }

        Ok(vec![LedgerEvent::AccountingPeriodClosed(AccountingPeriodClosed {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            period: cmd.period,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountId;
    use proptest::prelude::*;
    use tally_events::execute;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_ledger_id() -> LedgerId {
        LedgerId::new(AggregateId::new())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create(
        tenant_id: TenantId,
        ledger_id: LedgerId,
        lines: Vec<JournalLine>,
        on: NaiveDate,
        post_immediately: bool,
    ) -> (JournalEntryId, LedgerCommand) {
        let entry_id = JournalEntryId::generate();
        let cmd = LedgerCommand::CreateJournalEntry(CreateJournalEntry {
            tenant_id,
            ledger_id,
            entry_id,
            date: on,
            memo: "Test entry".to_string(),
            reference: None,
            source: EntrySource::Manual,
            lines,
            post_immediately,
            posted_by: None,
            occurred_at: Utc::now(),
        });
        (entry_id, cmd)
    }

    fn post(tenant_id: TenantId, ledger_id: LedgerId, entry_id: JournalEntryId) -> LedgerCommand {
        LedgerCommand::PostJournalEntry(PostJournalEntry {
            tenant_id,
            ledger_id,
            entry_id,
            posted_by: Some(UserId::new()),
            occurred_at: Utc::now(),
        })
    }

    fn balanced(amount: i64) -> Vec<JournalLine> {
        vec![
            JournalLine::debit(AccountId::generate(), amount),
            JournalLine::credit(AccountId::generate(), amount),
        ]
    }

    #[test]
    fn created_entries_start_as_numbered_drafts() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);

        let (first, cmd) = create(tenant_id, ledger_id, balanced(100), date(2024, 1, 5), false);
        execute(&mut ledger, &cmd).unwrap();
        let (second, cmd) = create(tenant_id, ledger_id, balanced(200), date(2024, 1, 6), false);
        execute(&mut ledger, &cmd).unwrap();

        assert_eq!(ledger.entry(first).unwrap().number, "JE-000001");
        assert_eq!(ledger.entry(second).unwrap().number, "JE-000002");
        assert_eq!(ledger.entry(first).unwrap().status, EntryStatus::Draft);
        assert_eq!(ledger.posted_entries().count(), 0);
    }

    #[test]
    fn post_journal_entry_emits_event_when_balanced() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);
        let lines = balanced(100);

        let (entry_id, cmd) = create(tenant_id, ledger_id, lines.clone(), date(2024, 1, 5), false);
        execute(&mut ledger, &cmd).unwrap();

        let events = execute(&mut ledger, &post(tenant_id, ledger_id, entry_id)).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            LedgerEvent::JournalEntryPosted(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.entry_id, entry_id);
                assert_eq!(e.lines, lines);
                assert_eq!(e.number, "JE-000001");
            }
            other => panic!("unexpected event {other:?}"),
        }

        let entry = ledger.entry(entry_id).unwrap();
        assert!(entry.is_posted());
        assert!(entry.posted_by.is_some());
        assert_eq!(ledger.posted_entries().count(), 1);
    }

    #[test]
    fn unbalanced_entry_is_rejected_at_posting() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);
        let lines = vec![
            JournalLine::debit(AccountId::generate(), 10_000),
            JournalLine::credit(AccountId::generate(), 9_000),
        ];

        let (entry_id, cmd) = create(tenant_id, ledger_id, lines, date(2024, 1, 5), false);
        execute(&mut ledger, &cmd).unwrap();

        let err = ledger.handle(&post(tenant_id, ledger_id, entry_id)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::UnbalancedEntry {
                entry_id,
                debits: 10_000,
                credits: 9_000,
            }
        );
        assert_eq!(ledger.entry(entry_id).unwrap().status, EntryStatus::Draft);
    }

    #[test]
    fn posting_twice_fails_with_already_posted() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);

        let (entry_id, cmd) = create(tenant_id, ledger_id, balanced(50), date(2024, 1, 5), false);
        execute(&mut ledger, &cmd).unwrap();
        execute(&mut ledger, &post(tenant_id, ledger_id, entry_id)).unwrap();

        let err = execute(&mut ledger, &post(tenant_id, ledger_id, entry_id)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::AlreadyPosted {
                entry_id,
                status: EntryStatus::Posted,
            }
        );
        assert_eq!(ledger.posted_entries().count(), 1);
    }

    #[test]
    fn unknown_entry_cannot_be_posted() {
        let ledger_id = test_ledger_id();
        let ledger = Ledger::empty(ledger_id);
        let missing = JournalEntryId::generate();

        let err = ledger.handle(&post(test_tenant_id(), ledger_id, missing)).unwrap_err();
        assert_eq!(err, LedgerError::EntryNotFound(missing));
    }

    #[test]
    fn empty_or_non_positive_lines_are_invalid() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let ledger = Ledger::empty(ledger_id);

        let (_, empty) = create(tenant_id, ledger_id, vec![], date(2024, 1, 5), false);
        assert!(matches!(ledger.handle(&empty), Err(LedgerError::Validation(_))));

        let (_, negative) = create(tenant_id, ledger_id, balanced(-5), date(2024, 1, 5), false);
        assert!(matches!(ledger.handle(&negative), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn immediate_posting_is_atomic_and_checks_balance() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);

        let (entry_id, cmd) = create(tenant_id, ledger_id, balanced(75), date(2024, 3, 1), true);
        let events = execute(&mut ledger, &cmd).unwrap();
        assert_eq!(events.len(), 2);
        assert!(ledger.entry(entry_id).unwrap().is_posted());

        let lopsided = vec![
            JournalLine::debit(AccountId::generate(), 75),
            JournalLine::credit(AccountId::generate(), 70),
        ];
        let (bad_id, cmd) = create(tenant_id, ledger_id, lopsided, date(2024, 3, 1), true);
        assert!(matches!(
            execute(&mut ledger, &cmd),
            Err(LedgerError::UnbalancedEntry { .. })
        ));
        assert!(ledger.entry(bad_id).is_none());
    }

    #[test]
    fn derived_documents_are_booked_once() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);

        let booking = |source: EntrySource| {
            let (entry_id, cmd) = create(tenant_id, ledger_id, balanced(100), date(2024, 2, 1), true);
            let LedgerCommand::CreateJournalEntry(mut inner) = cmd else {
                unreachable!()
            };
            inner.source = source;
            (entry_id, LedgerCommand::CreateJournalEntry(inner))
        };
        let invoice = EntrySource::SalesInvoice { reference: "INV-1".to_string() };
        let payment = EntrySource::PaymentReceipt { reference: "INV-1".to_string() };

        let (first, cmd) = booking(invoice.clone());
        execute(&mut ledger, &cmd).unwrap();
        // Same reference under another document kind is a different document.
        execute(&mut ledger, &booking(payment.clone()).1).unwrap();

        let (_, again) = booking(invoice);
        let err = execute(&mut ledger, &again).unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(ref msg) if msg.contains("JE-000001")));
        assert!(matches!(
            execute(&mut ledger, &booking(payment).1),
            Err(LedgerError::Conflict(_))
        ));

        assert_eq!(ledger.posted_entries().count(), 2);
        assert!(ledger.entry(first).unwrap().is_posted());
    }

    #[test]
    fn closed_periods_reject_postings() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);

        let (draft, cmd) = create(tenant_id, ledger_id, balanced(10), date(2024, 1, 15), false);
        execute(&mut ledger, &cmd).unwrap();

        let january = AccountingPeriod::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        let close = LedgerCommand::CloseAccountingPeriod(CloseAccountingPeriod {
            tenant_id,
            ledger_id,
            period: january,
            occurred_at: Utc::now(),
        });
        execute(&mut ledger, &close).unwrap();
        assert!(ledger.is_closed(date(2024, 1, 31)));

        assert!(matches!(
            ledger.handle(&post(tenant_id, ledger_id, draft)),
            Err(LedgerError::Validation(msg)) if msg.contains("closed")
        ));

        let overlapping = LedgerCommand::CloseAccountingPeriod(CloseAccountingPeriod {
            tenant_id,
            ledger_id,
            period: AccountingPeriod::new(date(2024, 1, 20), date(2024, 2, 10)).unwrap(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(ledger.handle(&overlapping), Err(LedgerError::Conflict(_))));

        let (_, february) = create(tenant_id, ledger_id, balanced(10), date(2024, 2, 1), true);
        execute(&mut ledger, &february).unwrap();
    }

    #[test]
    fn reversal_posts_mirror_entry_and_links_both_ways() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);
        let lines = balanced(300);

        let (original, cmd) = create(tenant_id, ledger_id, lines.clone(), date(2024, 4, 1), true);
        execute(&mut ledger, &cmd).unwrap();

        let reversal_id = JournalEntryId::generate();
        let reverse = LedgerCommand::ReverseJournalEntry(ReverseJournalEntry {
            tenant_id,
            ledger_id,
            entry_id: original,
            reversal_id,
            date: date(2024, 4, 2),
            memo: None,
            posted_by: None,
            occurred_at: Utc::now(),
        });
        execute(&mut ledger, &reverse).unwrap();

        let reversal = ledger.entry(reversal_id).unwrap();
        assert!(reversal.is_posted());
        assert_eq!(reversal.reverses(), Some(original));
        assert_eq!(reversal.memo, "Reversal of JE-000001");
        assert_eq!(reversal.lines[0], lines[0].reversed());
        assert_eq!(ledger.entry(original).unwrap().reversed_by, Some(reversal_id));
        assert!(ledger.entry(original).unwrap().is_posted());

        // Second reversal of the same entry, and reversal of the reversal, are refused.
        let again = LedgerCommand::ReverseJournalEntry(ReverseJournalEntry {
            reversal_id: JournalEntryId::generate(),
            ..match reverse {
                LedgerCommand::ReverseJournalEntry(r) => r,
                _ => unreachable!(),
            }
        });
        assert!(matches!(ledger.handle(&again), Err(LedgerError::Conflict(_))));

        let of_reversal = LedgerCommand::ReverseJournalEntry(ReverseJournalEntry {
            tenant_id,
            ledger_id,
            entry_id: reversal_id,
            reversal_id: JournalEntryId::generate(),
            date: date(2024, 4, 3),
            memo: None,
            posted_by: None,
            occurred_at: Utc::now(),
        });
        assert!(matches!(ledger.handle(&of_reversal), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn drafts_cannot_be_reversed() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);
        let (draft, cmd) = create(tenant_id, ledger_id, balanced(1), date(2024, 4, 1), false);
        execute(&mut ledger, &cmd).unwrap();

        let reverse = LedgerCommand::ReverseJournalEntry(ReverseJournalEntry {
            tenant_id,
            ledger_id,
            entry_id: draft,
            reversal_id: JournalEntryId::generate(),
            date: date(2024, 4, 1),
            memo: None,
            posted_by: None,
            occurred_at: Utc::now(),
        });
        assert!(matches!(ledger.handle(&reverse), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn listing_is_newest_first_with_status_filter() {
        let tenant_id = test_tenant_id();
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);

        let (old, cmd) = create(tenant_id, ledger_id, balanced(1), date(2024, 1, 1), true);
        execute(&mut ledger, &cmd).unwrap();
        let (a, cmd) = create(tenant_id, ledger_id, balanced(1), date(2024, 2, 1), false);
        execute(&mut ledger, &cmd).unwrap();
        let (b, cmd) = create(tenant_id, ledger_id, balanced(1), date(2024, 2, 1), false);
        execute(&mut ledger, &cmd).unwrap();

        let all: Vec<_> = ledger.entries(None).iter().map(|e| e.id).collect();
        assert_eq!(all, vec![b, a, old]);

        let posted: Vec<_> = ledger
            .entries(Some(EntryStatus::Posted))
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(posted, vec![old]);
    }

    #[test]
    fn tenant_mismatch_is_rejected() {
        let ledger_id = test_ledger_id();
        let mut ledger = Ledger::empty(ledger_id);
        let (_, cmd) = create(test_tenant_id(), ledger_id, balanced(1), date(2024, 1, 1), false);
        execute(&mut ledger, &cmd).unwrap();

        let (_, foreign) = create(test_tenant_id(), ledger_id, balanced(1), date(2024, 1, 1), false);
        assert!(matches!(
            ledger.handle(&foreign),
            Err(LedgerError::InvariantViolation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Whatever mix of balanced and unbalanced entries is submitted, only
        /// balanced ones reach the posted history.
        #[test]
        fn posted_history_is_always_balanced(
            entries in prop::collection::vec((1i64..1_000_000i64, 0i64..3i64), 1..20)
        ) {
            let tenant_id = test_tenant_id();
            let ledger_id = test_ledger_id();
            let mut ledger = Ledger::empty(ledger_id);
            let mut expected_posted = 0usize;

            for (amount, skew) in entries {
                let lines = vec![
                    JournalLine::debit(AccountId::generate(), amount),
                    JournalLine::credit(AccountId::generate(), amount + skew),
                ];
                let (entry_id, cmd) = create(tenant_id, ledger_id, lines, date(2024, 1, 1), false);
                execute(&mut ledger, &cmd).unwrap();

                let result = execute(&mut ledger, &post(tenant_id, ledger_id, entry_id));
                if skew == 0 {
                    prop_assert!(result.is_ok());
                    expected_posted += 1;
                } else {
                    let is_unbalanced = matches!(result, Err(LedgerError::UnbalancedEntry { .. }));
                    prop_assert!(is_unbalanced);
                }
            }

            prop_assert_eq!(ledger.posted_entries().count(), expected_posted);
            for entry in ledger.posted_entries() {
                prop_assert!(entry.totals().is_balanced());
            }
        }
    }
}
