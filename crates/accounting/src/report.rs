//! Financial reports derived from posted ledger history.
//!
//! Everything here is a pure function of a chart and a ledger snapshot. Drafts
//! never contribute; only posted lines dated inside the requested window do.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::account::{AccountId, AccountKind, Side};
use crate::chart::ChartOfAccounts;
use crate::error::LedgerError;
use crate::journal::{JournalEntryId, LineTotals};
use crate::ledger::Ledger;

/// Inclusive date window; `from: None` means "since the beginning".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: Option<NaiveDate>,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn as_of(to: NaiveDate) -> Self {
        Self { from: None, to }
    }

    pub fn period(from: NaiveDate, to: NaiveDate) -> Result<Self, LedgerError> {
        if from > to {
            return Err(LedgerError::validation(format!(
                "window start {from} is after window end {to}"
            )));
        }
        Ok(Self {
            from: Some(from),
            to,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date <= self.to && self.from.is_none_or(|from| from <= date)
    }
}

/// Debit/credit totals per account over posted lines inside `window`.
fn totals_by_account(ledger: &Ledger, window: DateWindow) -> HashMap<AccountId, LineTotals> {
    let mut totals: HashMap<AccountId, LineTotals> = HashMap::new();
    for entry in ledger.posted_entries().filter(|e| window.contains(e.date)) {
        for line in &entry.lines {
            let t = totals.entry(line.account_id).or_default();
            match line.side {
                Side::Debit => t.debits += line.amount as i128,
                Side::Credit => t.credits += line.amount as i128,
            }
        }
    }
    totals
}

/// Balance of one account as of a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub as_of: NaiveDate,
    pub debits: i128,
    pub credits: i128,
    /// Net on the account's normal side (positive = normal).
    pub balance: i128,
}

pub fn account_balance(
    chart: &ChartOfAccounts,
    ledger: &Ledger,
    account_id: AccountId,
    as_of: NaiveDate,
) -> Result<AccountBalance, LedgerError> {
    let account = chart
        .get(account_id)
        .ok_or(LedgerError::AccountNotFound(account_id))?;

    let totals = LineTotals::of(
        ledger
            .posted_entries()
            .filter(|e| e.date <= as_of)
            .flat_map(|e| e.lines.iter())
            .filter(|l| l.account_id == account_id),
    );

    Ok(AccountBalance {
        account_id,
        code: account.code.clone(),
        name: account.name.clone(),
        kind: account.kind,
        as_of,
        debits: totals.debits,
        credits: totals.credits,
        balance: account.net(totals.debits, totals.credits),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalanceRow {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub debit: i128,
    pub credit: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of: NaiveDate,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debits: i128,
    pub total_credits: i128,
}

impl TrialBalance {
    pub fn is_balanced(&self) -> bool {
        self.total_debits == self.total_credits
    }
}

/// Every non-header account with a non-zero balance, in code order, with its
/// net in the debit or the credit column.
pub fn trial_balance(chart: &ChartOfAccounts, ledger: &Ledger, as_of: NaiveDate) -> TrialBalance {
    let totals = totals_by_account(ledger, DateWindow::as_of(as_of));
    let mut rows = Vec::new();
    let (mut total_debits, mut total_credits) = (0i128, 0i128);

    for account in chart.accounts().filter(|a| !a.is_header) {
        let Some(t) = totals.get(&account.id) else {
            continue;
        };
        let net = t.debits - t.credits;
        if net == 0 {
            continue;
        }
        let (debit, credit) = if net > 0 { (net, 0) } else { (0, -net) };
        total_debits += debit;
        total_credits += credit;
        rows.push(TrialBalanceRow {
            account_id: account.id,
            code: account.code.clone(),
            name: account.name.clone(),
            kind: account.kind,
            debit,
            credit,
        });
    }

    TrialBalance {
        as_of,
        rows,
        total_debits,
        total_credits,
    }
}

/// One section of a declarative report: which account kinds it gathers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionDefinition {
    pub key: &'static str,
    pub title: &'static str,
    pub kinds: &'static [AccountKind],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportDefinition {
    pub name: &'static str,
    pub sections: &'static [SectionDefinition],
}

pub const PROFIT_AND_LOSS: ReportDefinition = ReportDefinition {
    name: "profit_and_loss",
    sections: &[
        SectionDefinition {
            key: "revenue",
            title: "Revenue",
            kinds: &[AccountKind::Revenue],
        },
        SectionDefinition {
            key: "expenses",
            title: "Expenses",
            kinds: &[AccountKind::Expense],
        },
    ],
};

pub const BALANCE_SHEET: ReportDefinition = ReportDefinition {
    name: "balance_sheet",
    sections: &[
        SectionDefinition {
            key: "assets",
            title: "Assets",
            kinds: &[AccountKind::Asset],
        },
        SectionDefinition {
            key: "liabilities",
            title: "Liabilities",
            kinds: &[AccountKind::Liability],
        },
        SectionDefinition {
            key: "equity",
            title: "Equity",
            kinds: &[AccountKind::Equity],
        },
    ],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLine {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    /// Normal-side amount.
    pub amount: i128,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub key: String,
    pub title: String,
    pub lines: Vec<ReportLine>,
    pub total: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    pub window: DateWindow,
    pub sections: Vec<ReportSection>,
}

impl Report {
    /// Remove and return a section by key (empty if the report has none).
    pub fn take(&mut self, key: &str) -> ReportSection {
        match self.sections.iter().position(|s| s.key == key) {
            Some(idx) => self.sections.remove(idx),
            None => ReportSection {
                key: key.to_string(),
                ..ReportSection::default()
            },
        }
    }
}

impl ReportDefinition {
    /// Aggregate posted lines in `window` into this definition's sections.
    pub fn compose(&self, chart: &ChartOfAccounts, ledger: &Ledger, window: DateWindow) -> Report {
        let totals = totals_by_account(ledger, window);

        let sections = self
            .sections
            .iter()
            .map(|def| {
                let lines: Vec<ReportLine> = chart
                    .accounts()
                    .filter(|a| !a.is_header && def.kinds.contains(&a.kind))
                    .filter_map(|a| {
                        let t = totals.get(&a.id)?;
                        let amount = a.net(t.debits, t.credits);
                        (amount != 0).then(|| ReportLine {
                            account_id: a.id,
                            code: a.code.clone(),
                            name: a.name.clone(),
                            amount,
                        })
                    })
                    .collect();
                ReportSection {
                    key: def.key.to_string(),
                    title: def.title.to_string(),
                    total: lines.iter().map(|l| l.amount).sum(),
                    lines,
                }
            })
            .collect();

        Report {
            name: self.name.to_string(),
            window,
            sections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitAndLoss {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub revenue: ReportSection,
    pub expenses: ReportSection,
    pub net_income: i128,
}

pub fn profit_loss(
    chart: &ChartOfAccounts,
    ledger: &Ledger,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> Result<ProfitAndLoss, LedgerError> {
    let window = DateWindow::period(period_start, period_end)?;
    let mut report = PROFIT_AND_LOSS.compose(chart, ledger, window);
    let revenue = report.take("revenue");
    let expenses = report.take("expenses");

    Ok(ProfitAndLoss {
        period_start,
        period_end,
        net_income: revenue.total - expenses.total,
        revenue,
        expenses,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub as_of: NaiveDate,
    pub assets: ReportSection,
    pub liabilities: ReportSection,
    pub equity: ReportSection,
    /// Cumulative revenue minus expense through `as_of`.
    pub current_earnings: i128,
    /// Equity section total plus current earnings.
    pub total_equity: i128,
}

impl BalanceSheet {
    pub fn is_balanced(&self) -> bool {
        self.assets.total == self.liabilities.total + self.total_equity
    }
}

pub fn balance_sheet(chart: &ChartOfAccounts, ledger: &Ledger, as_of: NaiveDate) -> BalanceSheet {
    let window = DateWindow::as_of(as_of);
    let mut report = BALANCE_SHEET.compose(chart, ledger, window);
    let mut earnings = PROFIT_AND_LOSS.compose(chart, ledger, window);
    let current_earnings = earnings.take("revenue").total - earnings.take("expenses").total;

    let assets = report.take("assets");
    let liabilities = report.take("liabilities");
    let equity = report.take("equity");

    BalanceSheet {
        as_of,
        total_equity: equity.total + current_earnings,
        assets,
        liabilities,
        equity,
        current_earnings,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLine {
    pub date: NaiveDate,
    pub entry_id: JournalEntryId,
    pub entry_number: String,
    pub memo: String,
    pub description: Option<String>,
    pub debit: i64,
    pub credit: i64,
    /// Normal-side balance after this line.
    pub running_balance: i128,
}

/// General-ledger view of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountActivity {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub window: DateWindow,
    pub opening_balance: i128,
    pub lines: Vec<ActivityLine>,
    pub closing_balance: i128,
}

pub fn account_activity(
    chart: &ChartOfAccounts,
    ledger: &Ledger,
    account_id: AccountId,
    window: DateWindow,
) -> Result<AccountActivity, LedgerError> {
    if let Some(from) = window.from {
        DateWindow::period(from, window.to)?;
    }
    let account = chart
        .get(account_id)
        .ok_or(LedgerError::AccountNotFound(account_id))?;

    let mut opening_balance = 0i128;
    let mut in_window = Vec::new();
    for entry in ledger.posted_entries() {
        for line in entry.lines.iter().filter(|l| l.account_id == account_id) {
            if window.from.is_some_and(|from| entry.date < from) {
                opening_balance += account.signed(line.side, line.amount);
            } else if entry.date <= window.to {
                in_window.push((entry, line));
            }
        }
    }
    in_window.sort_by(|(a, _), (b, _)| a.date.cmp(&b.date).then_with(|| a.number.cmp(&b.number)));

    let mut running = opening_balance;
    let lines = in_window
        .into_iter()
        .map(|(entry, line)| {
            running += account.signed(line.side, line.amount);
            let (debit, credit) = match line.side {
                Side::Debit => (line.amount, 0),
                Side::Credit => (0, line.amount),
            };
            ActivityLine {
                date: entry.date,
                entry_id: entry.id,
                entry_number: entry.number.clone(),
                memo: entry.memo.clone(),
                description: line.description.clone(),
                debit,
                credit,
                running_balance: running,
            }
        })
        .collect();

    Ok(AccountActivity {
        account_id,
        code: account.code.clone(),
        name: account.name.clone(),
        kind: account.kind,
        window,
        opening_balance,
        lines,
        closing_balance: running,
    })
}
