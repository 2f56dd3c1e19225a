use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Aggregate, AggregateId, AggregateRoot, TenantId};
use tally_events::Event;

use crate::account::{Account, AccountId, AccountKind};
use crate::error::LedgerError;
use crate::journal::JournalLine;

/// Chart identifier (one chart per tenant).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartId(pub AggregateId);

impl ChartId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The chart stream of a tenant.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self(AggregateId::singleton(tenant_id, ChartOfAccounts::AGGREGATE_TYPE))
    }
}

impl core::fmt::Display for ChartId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: the chart of accounts.
///
/// Accounts are only ever added or deactivated, never removed, so historical
/// postings always resolve to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartOfAccounts {
    id: ChartId,
    tenant_id: Option<TenantId>,
    accounts: HashMap<AccountId, Account>,
    by_code: BTreeMap<String, AccountId>,
    version: u64,
}

impl ChartOfAccounts {
    pub const AGGREGATE_TYPE: &'static str = "accounting.chart";

    /// Empty aggregate for rehydration.
    pub fn empty(id: ChartId) -> Self {
        Self {
            id,
            tenant_id: None,
            accounts: HashMap::new(),
            by_code: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn by_code(&self, code: &str) -> Option<&Account> {
        self.by_code.get(code).and_then(|id| self.accounts.get(id))
    }

    /// All accounts ordered by code.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.by_code.values().filter_map(|id| self.accounts.get(id))
    }

    /// Resolve an account that new lines may reference.
    pub fn postable(&self, id: AccountId) -> Result<&Account, LedgerError> {
        let account = self
            .get(id)
            .ok_or_else(|| LedgerError::validation(format!("unknown account {id}")))?;
        if account.is_header {
            return Err(LedgerError::validation(format!(
                "account {} is a header account",
                account.code
            )));
        }
        if !account.active {
            return Err(LedgerError::validation(format!(
                "account {} is inactive",
                account.code
            )));
        }
        Ok(account)
    }

    /// Referential validation of journal lines against this chart.
    pub fn validate_lines(&self, lines: &[JournalLine]) -> Result<(), LedgerError> {
        if lines.is_empty() {
            return Err(LedgerError::validation("journal entry must have lines"));
        }
        for line in lines {
            if line.amount <= 0 {
                return Err(LedgerError::validation("amount must be positive"));
            }
            self.postable(line.account_id)?;
        }
        Ok(())
    }
}

impl AggregateRoot for ChartOfAccounts {
    type Id = ChartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub parent: Option<AccountId>,
    pub is_header: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateAccount {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartCommand {
    OpenAccount(OpenAccount),
    DeactivateAccount(DeactivateAccount),
}

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub tenant_id: TenantId,
    pub account: Account,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDeactivated {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartEvent {
    AccountOpened(AccountOpened),
    AccountDeactivated(AccountDeactivated),
}

impl ChartEvent {
    fn tenant_id(&self) -> TenantId {
        match self {
            ChartEvent::AccountOpened(e) => e.tenant_id,
            ChartEvent::AccountDeactivated(e) => e.tenant_id,
        }
    }
}

impl Event for ChartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ChartEvent::AccountOpened(_) => "accounting.chart.account_opened",
            ChartEvent::AccountDeactivated(_) => "accounting.chart.account_deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ChartEvent::AccountOpened(e) => e.occurred_at,
            ChartEvent::AccountDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ChartOfAccounts {
    type Command = ChartCommand;
    type Event = ChartEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        if self.tenant_id.is_none() {
            self.tenant_id = Some(event.tenant_id());
        }

        match event {
            ChartEvent::AccountOpened(e) => {
                self.by_code.insert(e.account.code.clone(), e.account.id);
                self.accounts.insert(e.account.id, e.account.clone());
            }
            ChartEvent::AccountDeactivated(e) => {
                if let Some(account) = self.accounts.get_mut(&e.account_id) {
                    account.active = false;
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ChartCommand::OpenAccount(cmd) => self.handle_open(cmd),
            ChartCommand::DeactivateAccount(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl ChartOfAccounts {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), LedgerError> {
        match self.tenant_id {
            Some(t) if t != tenant_id => Err(LedgerError::invariant("tenant mismatch")),
            _ => Ok(()),
        }
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<ChartEvent>, LedgerError> {
        self.ensure_tenant(cmd.tenant_id)?;

        let code = cmd.code.trim();
        let name = cmd.name.trim();
        if code.is_empty() {
            return Err(LedgerError::validation("account code must not be empty"));
        }
        if name.is_empty() {
            return Err(LedgerError::validation("account name must not be empty"));
        }
        if self.accounts.contains_key(&cmd.account_id) {
            return Err(LedgerError::conflict(format!(
                "account {} already exists",
                cmd.account_id
            )));
        }
        if self.by_code.contains_key(code) {
            return Err(LedgerError::conflict(format!(
                "account code {code} already in use"
            )));
        }

        if let Some(parent_id) = cmd.parent {
            let parent = self
                .get(parent_id)
                .ok_or_else(|| LedgerError::validation(format!("unknown parent account {parent_id}")))?;
            if !parent.is_header {
                return Err(LedgerError::validation(format!(
                    "parent account {} is not a header account",
                    parent.code
                )));
            }
            if parent.kind != cmd.kind {
                return Err(LedgerError::validation(format!(
                    "parent account {} is {:?}, child is {:?}",
                    parent.code, parent.kind, cmd.kind
                )));
            }
        }

        Ok(vec![ChartEvent::AccountOpened(AccountOpened {
            tenant_id: cmd.tenant_id,
            account: Account {
                id: cmd.account_id,
                code: code.to_string(),
                name: name.to_string(),
                kind: cmd.kind,
                parent: cmd.parent,
                is_header: cmd.is_header,
                active: true,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateAccount) -> Result<Vec<ChartEvent>, LedgerError> {
        self.ensure_tenant(cmd.tenant_id)?;

        let account = self
            .get(cmd.account_id)
            .ok_or(LedgerError::AccountNotFound(cmd.account_id))?;

        // Already inactive: nothing to record.
        if !account.active {
            return Ok(vec![]);
        }

        Ok(vec![ChartEvent::AccountDeactivated(AccountDeactivated {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
