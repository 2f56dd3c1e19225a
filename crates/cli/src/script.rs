//! JSON book scripts: an ordered list of bookkeeping steps plus the reports
//! to print once they have all been applied.
//!
//! Accounts are referenced by code and entries by their `JE-` number, so a
//! script never has to know generated identifiers.

use chrono::NaiveDate;
use serde::Deserialize;

use tally_accounting::{AccountKind, PaymentReceiptPosting, SalesInvoicePosting};
use tally_core::TenantId;
use tally_infra::LedgerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Books to write into; a fresh tenant when absent.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    /// Overrides the environment configuration when present.
    #[serde(default)]
    pub config: Option<LedgerConfig>,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub reports: ReportRequest,
}

impl Script {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    OpenAccount {
        code: String,
        name: String,
        kind: AccountKind,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        header: bool,
    },
    DeactivateAccount {
        code: String,
    },
    Entry {
        date: NaiveDate,
        memo: String,
        #[serde(default)]
        reference: Option<String>,
        lines: Vec<ScriptLine>,
        #[serde(default)]
        post: bool,
    },
    Post {
        entry: String,
    },
    Reverse {
        entry: String,
        date: NaiveDate,
        #[serde(default)]
        memo: Option<String>,
    },
    ClosePeriod {
        start: NaiveDate,
        end: NaiveDate,
    },
    SalesInvoice(SalesInvoicePosting),
    PaymentReceipt(PaymentReceiptPosting),
}

impl Step {
    /// Short label used in error context.
    pub fn describe(&self) -> String {
        match self {
            Step::OpenAccount { code, .. } => format!("open account {code}"),
            Step::DeactivateAccount { code } => format!("deactivate account {code}"),
            Step::Entry { memo, .. } => format!("entry '{memo}'"),
            Step::Post { entry } => format!("post {entry}"),
            Step::Reverse { entry, .. } => format!("reverse {entry}"),
            Step::ClosePeriod { start, end } => format!("close {start}..{end}"),
            Step::SalesInvoice(invoice) => format!("sales invoice {}", invoice.reference),
            Step::PaymentReceipt(payment) => format!("payment {}", payment.reference),
        }
    }
}

/// One entry line; exactly one of `debit` and `credit` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptLine {
    pub account: String,
    #[serde(default)]
    pub debit: Option<i64>,
    #[serde(default)]
    pub credit: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub as_of: NaiveDate,
    /// Start of the profit and loss period; January 1st of `as_of`'s year by default.
    #[serde(default)]
    pub from: Option<NaiveDate>,
    /// Account codes to print a general-ledger activity report for.
    #[serde(default)]
    pub activity: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_tagged_by_op() {
        let script = Script::from_json(
            r#"{
                "steps": [
                    {"op": "open_account", "code": "1000", "name": "Cash", "kind": "asset"},
                    {"op": "entry", "date": "2024-01-05", "memo": "sale", "post": true, "lines": [
                        {"account": "1000", "debit": 500},
                        {"account": "4000", "credit": 500}
                    ]},
                    {"op": "sales_invoice", "reference": "INV-1", "date": "2024-01-06",
                     "amount": 1000, "tax": {"basis_points": 2000}},
                    {"op": "close_period", "start": "2024-01-01", "end": "2024-01-31"}
                ],
                "reports": {"as_of": "2024-12-31"}
            }"#,
        )
        .unwrap();

        assert!(script.tenant_id.is_none());
        assert_eq!(script.steps.len(), 4);
        assert!(matches!(
            &script.steps[0],
            Step::OpenAccount { kind: AccountKind::Asset, header: false, parent: None, .. }
        ));
        assert!(matches!(&script.steps[1], Step::Entry { post: true, lines, .. } if lines.len() == 2));
        match &script.steps[2] {
            Step::SalesInvoice(invoice) => {
                assert_eq!(invoice.amount, 1000);
                assert_eq!(invoice.tax.as_ref().map(|t| t.inclusive), Some(false));
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(script.steps[3].describe(), "close 2024-01-01..2024-01-31");
        assert!(script.reports.activity.is_empty());
    }

    #[test]
    fn unknown_op_is_rejected() {
        let err = Script::from_json(r#"{"steps": [{"op": "delete_everything"}], "reports": {"as_of": "2024-01-01"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("delete_everything"));
    }
}
