//! Derived postings: turn business documents into balanced journal lines.
//!
//! Rules here only shape lines; the ledger still validates and posts them like
//! any other entry.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::error::LedgerError;
use crate::journal::{EntrySource, JournalLine};

const BASIS_POINTS: i128 = 10_000;

/// Tax rate in basis points (700 = 7%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRate {
    pub basis_points: u32,
    /// Whether document amounts already include the tax.
    #[serde(default)]
    pub inclusive: bool,
}

/// Result of splitting an amount into base and tax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxSplit {
    pub base: i64,
    pub tax: i64,
    pub total: i64,
}

impl TaxRate {
    pub fn exclusive(basis_points: u32) -> Self {
        Self {
            basis_points,
            inclusive: false,
        }
    }

    pub fn inclusive(basis_points: u32) -> Self {
        Self {
            basis_points,
            inclusive: true,
        }
    }

    /// Split `amount` into base and tax, rounding the tax half-to-even.
    ///
    /// Inclusive: `amount` is the total. Exclusive: `amount` is the base.
    pub fn split(&self, amount: i64) -> Result<TaxSplit, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::validation("amount must be positive"));
        }
        if self.basis_points as i128 > BASIS_POINTS {
            return Err(LedgerError::validation(format!(
                "tax rate {} bp exceeds 100%",
                self.basis_points
            )));
        }

        let bp = self.basis_points as i128;
        let amount_wide = amount as i128;

        let split = if self.inclusive {
            let tax = div_half_even(amount_wide * bp, BASIS_POINTS + bp);
            TaxSplit {
                base: (amount_wide - tax) as i64,
                tax: tax as i64,
                total: amount,
            }
        } else {
            let tax = div_half_even(amount_wide * bp, BASIS_POINTS);
            let total = i64::try_from(amount_wide + tax)
                .map_err(|_| LedgerError::validation("amount plus tax overflows"))?;
            TaxSplit {
                base: amount,
                tax: tax as i64,
                total,
            }
        };
        Ok(split)
    }
}

/// Non-negative `n / d` rounded half-to-even.
fn div_half_even(n: i128, d: i128) -> i128 {
    let q = n / d;
    let r = n % d;
    match (2 * r).cmp(&d) {
        core::cmp::Ordering::Greater => q + 1,
        core::cmp::Ordering::Equal if q % 2 == 1 => q + 1,
        _ => q,
    }
}

/// Accounts derived postings are booked against.
///
/// Resolved from the chart by configured codes; a `None` means the chart has
/// no such account and the posting is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostingAccounts {
    pub receivable: Option<AccountId>,
    pub revenue: Option<AccountId>,
    pub output_tax: Option<AccountId>,
    pub cash: Option<AccountId>,
}

fn require(account: Option<AccountId>, role: &str) -> Result<AccountId, LedgerError> {
    account.ok_or_else(|| LedgerError::validation(format!("no {role} account configured")))
}

fn require_reference(reference: &str) -> Result<String, LedgerError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(LedgerError::validation("document reference must not be empty"));
    }
    Ok(reference.to_string())
}

/// Entry content produced by a posting rule, ready to be created and posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftEntry {
    pub date: NaiveDate,
    pub memo: String,
    pub reference: Option<String>,
    pub source: EntrySource,
    pub lines: Vec<JournalLine>,
}

/// An issued sales invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesInvoicePosting {
    pub reference: String,
    pub date: NaiveDate,
    pub amount: i64,
    #[serde(default)]
    pub tax: Option<TaxRate>,
    #[serde(default)]
    pub memo: Option<String>,
}

impl SalesInvoicePosting {
    /// Dr receivable (total), Cr revenue (base), Cr output tax (tax, if any).
    pub fn to_draft(&self, accounts: &PostingAccounts) -> Result<DraftEntry, LedgerError> {
        let reference = require_reference(&self.reference)?;
        let split = match self.tax {
            Some(rate) => rate.split(self.amount)?,
            None if self.amount > 0 => TaxSplit {
                base: self.amount,
                tax: 0,
                total: self.amount,
            },
            None => return Err(LedgerError::validation("amount must be positive")),
        };

        let receivable = require(accounts.receivable, "receivable")?;
        let revenue = require(accounts.revenue, "revenue")?;

        let mut lines = vec![
            JournalLine::debit(receivable, split.total),
            JournalLine::credit(revenue, split.base),
        ];
        if split.tax > 0 {
            lines.push(JournalLine::credit(
                require(accounts.output_tax, "output tax")?,
                split.tax,
            ));
        }

        Ok(DraftEntry {
            date: self.date,
            memo: self
                .memo
                .clone()
                .unwrap_or_else(|| format!("Sales invoice {reference}")),
            reference: Some(reference.clone()),
            source: EntrySource::SalesInvoice { reference },
            lines,
        })
    }
}

/// A customer payment received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceiptPosting {
    pub reference: String,
    pub date: NaiveDate,
    pub amount: i64,
    #[serde(default)]
    pub memo: Option<String>,
}

impl PaymentReceiptPosting {
    /// Dr cash, Cr receivable.
    pub fn to_draft(&self, accounts: &PostingAccounts) -> Result<DraftEntry, LedgerError> {
        let reference = require_reference(&self.reference)?;
        if self.amount <= 0 {
            return Err(LedgerError::validation("amount must be positive"));
        }
        let cash = require(accounts.cash, "cash")?;
        let receivable = require(accounts.receivable, "receivable")?;

        Ok(DraftEntry {
            date: self.date,
            memo: self
                .memo
                .clone()
                .unwrap_or_else(|| format!("Payment {reference}")),
            reference: Some(reference.clone()),
            source: EntrySource::PaymentReceipt { reference },
            lines: vec![
                JournalLine::debit(cash, self.amount),
                JournalLine::credit(receivable, self.amount),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Side;
    use crate::journal::LineTotals;
    use proptest::prelude::*;

    fn accounts() -> PostingAccounts {
        PostingAccounts {
            receivable: Some(AccountId::generate()),
            revenue: Some(AccountId::generate()),
            output_tax: Some(AccountId::generate()),
            cash: Some(AccountId::generate()),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn exclusive_tax_is_added_on_top() {
        let split = TaxRate::exclusive(700).split(10_000).unwrap();
        assert_eq!(split, TaxSplit { base: 10_000, tax: 700, total: 10_700 });
    }

    #[test]
    fn inclusive_tax_is_carved_out() {
        let split = TaxRate::inclusive(700).split(10_700).unwrap();
        assert_eq!(split, TaxSplit { base: 10_000, tax: 700, total: 10_700 });
    }

    #[test]
    fn halves_round_to_even() {
        // 0.5 -> 0, 1.5 -> 2
        assert_eq!(TaxRate::exclusive(100).split(50).unwrap().tax, 0);
        assert_eq!(TaxRate::exclusive(100).split(150).unwrap().tax, 2);
        // 0.51 -> 1
        assert_eq!(TaxRate::exclusive(100).split(51).unwrap().tax, 1);
    }

    #[test]
    fn rates_above_one_hundred_percent_are_rejected() {
        assert!(matches!(
            TaxRate::exclusive(10_001).split(100),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn sales_invoice_books_receivable_revenue_and_tax() {
        let accounts = accounts();
        let invoice = SalesInvoicePosting {
            reference: "INV-001".to_string(),
            date: day(),
            amount: 10_000,
            tax: Some(TaxRate::exclusive(700)),
            memo: None,
        };

        let draft = invoice.to_draft(&accounts).unwrap();
        assert_eq!(draft.memo, "Sales invoice INV-001");
        assert_eq!(
            draft.source,
            EntrySource::SalesInvoice {
                reference: "INV-001".to_string()
            }
        );
        assert_eq!(draft.lines.len(), 3);
        assert_eq!(draft.lines[0].account_id, accounts.receivable.unwrap());
        assert_eq!(draft.lines[0].amount, 10_700);
        assert_eq!(draft.lines[1].amount, 10_000);
        assert_eq!(draft.lines[2].account_id, accounts.output_tax.unwrap());
        assert_eq!(draft.lines[2].side, Side::Credit);
        assert!(LineTotals::of(&draft.lines).is_balanced());
    }

    #[test]
    fn untaxed_invoice_has_no_tax_line() {
        let mut accounts = accounts();
        accounts.output_tax = None;
        let invoice = SalesInvoicePosting {
            reference: "INV-002".to_string(),
            date: day(),
            amount: 5_000,
            tax: None,
            memo: Some("Consulting".to_string()),
        };

        let draft = invoice.to_draft(&accounts).unwrap();
        assert_eq!(draft.lines.len(), 2);
        assert_eq!(draft.memo, "Consulting");
    }

    #[test]
    fn payment_receipt_moves_receivable_to_cash() {
        let accounts = accounts();
        let payment = PaymentReceiptPosting {
            reference: "PAY-9".to_string(),
            date: day(),
            amount: 2_500,
            memo: None,
        };

        let draft = payment.to_draft(&accounts).unwrap();
        assert_eq!(draft.lines[0], JournalLine::debit(accounts.cash.unwrap(), 2_500));
        assert_eq!(draft.lines[1], JournalLine::credit(accounts.receivable.unwrap(), 2_500));
    }

    #[test]
    fn missing_accounts_and_blank_references_are_invalid() {
        let payment = PaymentReceiptPosting {
            reference: "PAY-1".to_string(),
            date: day(),
            amount: 1,
            memo: None,
        };
        assert!(matches!(
            payment.to_draft(&PostingAccounts::default()),
            Err(LedgerError::Validation(msg)) if msg.contains("cash")
        ));

        let blank = PaymentReceiptPosting {
            reference: "  ".to_string(),
            ..payment
        };
        assert!(matches!(blank.to_draft(&accounts()), Err(LedgerError::Validation(_))));
    }

    proptest! {
        #[test]
        fn tax_split_always_adds_up(
            amount in 1i64..1_000_000_000i64,
            bp in 0u32..=10_000u32,
            inclusive in any::<bool>(),
        ) {
            let rate = TaxRate { basis_points: bp, inclusive };
            let split = rate.split(amount).unwrap();

            prop_assert_eq!(split.base + split.tax, split.total);
            prop_assert!(split.tax >= 0);
            prop_assert!(split.base >= 0);
        }

        #[test]
        fn invoices_always_produce_balanced_lines(
            amount in 1i64..1_000_000_000i64,
            bp in 0u32..=3_000u32,
            inclusive in any::<bool>(),
        ) {
            let invoice = SalesInvoicePosting {
                reference: "INV".to_string(),
                date: day(),
                amount,
                tax: Some(TaxRate { basis_points: bp, inclusive }),
                memo: None,
            };
            let draft = invoice.to_draft(&accounts()).unwrap();

            prop_assert!(LineTotals::of(&draft.lines).is_balanced());
            prop_assert!(draft.lines.iter().all(|l| l.amount > 0));
        }
    }
}
