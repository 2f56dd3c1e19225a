use serde::{Deserialize, Serialize};

use tally_core::AggregateId;

/// Side of a ledger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }
}

impl core::fmt::Display for Side {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Side::Debit => f.write_str("debit"),
            Side::Credit => f.write_str("credit"),
        }
    }
}

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountKind {
    pub const ALL: [AccountKind; 5] = [
        AccountKind::Asset,
        AccountKind::Liability,
        AccountKind::Equity,
        AccountKind::Revenue,
        AccountKind::Expense,
    ];

    /// Assets and expenses grow on the debit side; everything else on the credit side.
    pub fn normal_side(self) -> Side {
        match self {
            AccountKind::Asset | AccountKind::Expense => Side::Debit,
            AccountKind::Liability | AccountKind::Equity | AccountKind::Revenue => Side::Credit,
        }
    }

    pub fn is_balance_sheet(self) -> bool {
        matches!(
            self,
            AccountKind::Asset | AccountKind::Liability | AccountKind::Equity
        )
    }
}

/// Account identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub AggregateId);

impl AccountId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for AccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// An account in the chart.
///
/// Identity (`id`, `code`, `kind`) never changes after opening. Balances are
/// not stored here; they are derived from posted journal lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub code: String, // e.g. "1000"
    pub name: String, // e.g. "Cash"
    pub kind: AccountKind,
    pub parent: Option<AccountId>,
    /// Grouping account; never posted to directly.
    pub is_header: bool,
    pub active: bool,
}

impl Account {
    pub fn normal_side(&self) -> Side {
        self.kind.normal_side()
    }

    /// Whether new journal lines may reference this account.
    pub fn is_postable(&self) -> bool {
        self.active && !self.is_header
    }

    /// Signed effect of a line on this account, positive on the normal side.
    pub fn signed(&self, side: Side, amount: i64) -> i128 {
        if side == self.normal_side() {
            amount as i128
        } else {
            -(amount as i128)
        }
    }

    /// Net balance on the normal side given raw debit and credit totals.
    pub fn net(&self, debits: i128, credits: i128) -> i128 {
        match self.normal_side() {
            Side::Debit => debits - credits,
            Side::Credit => credits - debits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(kind: AccountKind) -> Account {
        Account {
            id: AccountId::generate(),
            code: "1000".to_string(),
            name: "Test".to_string(),
            kind,
            parent: None,
            is_header: false,
            active: true,
        }
    }

    #[test]
    fn normal_sides_follow_the_accounting_equation() {
        assert_eq!(AccountKind::Asset.normal_side(), Side::Debit);
        assert_eq!(AccountKind::Expense.normal_side(), Side::Debit);
        assert_eq!(AccountKind::Liability.normal_side(), Side::Credit);
        assert_eq!(AccountKind::Equity.normal_side(), Side::Credit);
        assert_eq!(AccountKind::Revenue.normal_side(), Side::Credit);
    }

    #[test]
    fn signed_amounts_are_positive_on_the_normal_side() {
        let cash = account(AccountKind::Asset);
        let sales = account(AccountKind::Revenue);

        assert_eq!(cash.signed(Side::Debit, 500), 500);
        assert_eq!(cash.signed(Side::Credit, 500), -500);
        assert_eq!(sales.signed(Side::Credit, 500), 500);
        assert_eq!(sales.net(100, 400), 300);
        assert_eq!(cash.net(100, 400), -300);
    }

    #[test]
    fn headers_and_inactive_accounts_are_not_postable() {
        let mut a = account(AccountKind::Asset);
        assert!(a.is_postable());
        a.is_header = true;
        assert!(!a.is_postable());
        a.is_header = false;
        a.active = false;
        assert!(!a.is_postable());
    }
}
