//! Accounting module (double-entry ledger, event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.
//! Two aggregates live here: the per-tenant [`ChartOfAccounts`] and the
//! per-tenant [`Ledger`] holding every journal entry. Reports are pure
//! functions over the two.

pub mod account;
pub mod chart;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod period;
pub mod posting_rules;
pub mod report;

pub use account::{Account, AccountId, AccountKind, Side};
pub use chart::{
    AccountDeactivated, AccountOpened, ChartCommand, ChartEvent, ChartId, ChartOfAccounts,
    DeactivateAccount, OpenAccount,
};
pub use error::LedgerError;
pub use journal::{EntrySource, EntryStatus, JournalEntry, JournalEntryId, JournalLine, LineTotals};
pub use ledger::{
    AccountingPeriodClosed, CloseAccountingPeriod, CreateJournalEntry, JournalEntryCreated,
    JournalEntryPosted, Ledger, LedgerCommand, LedgerEvent, LedgerId, PostJournalEntry,
    ReverseJournalEntry,
};
pub use period::AccountingPeriod;
pub use posting_rules::{
    DraftEntry, PaymentReceiptPosting, PostingAccounts, SalesInvoicePosting, TaxRate, TaxSplit,
};
pub use report::{
    AccountActivity, AccountBalance, ActivityLine, BalanceSheet, DateWindow, ProfitAndLoss,
    Report, ReportDefinition, ReportLine, ReportSection, SectionDefinition, TrialBalance,
    TrialBalanceRow, BALANCE_SHEET, PROFIT_AND_LOSS,
};
