//! In-memory account directory and journal for tests and local development

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AccountDirectory, JournalSink};
use crate::domain::{Account, AccountRole, JournalEntryDraft, JournalEntryId};
use crate::error::StoreResult;

/// Fixed role → account bindings shared by every tenant
#[derive(Debug, Clone, Default)]
pub struct StaticAccountDirectory {
    accounts: HashMap<AccountRole, Account>,
}

impl StaticAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a role to an account code
    pub fn with(mut self, role: AccountRole, code: &str, name: &str) -> Self {
        self.accounts.insert(
            role,
            Account {
                code: code.to_string(),
                name: name.to_string(),
                role,
            },
        );
        self
    }

    /// Drop a binding, e.g. to exercise degraded postings
    pub fn without(mut self, role: AccountRole) -> Self {
        self.accounts.remove(&role);
        self
    }

    /// A conventional chart: 1000 Cash, 1100 AR, 2000 AP, 4100 sales returns,
    /// 5100 purchase returns
    pub fn standard() -> Self {
        Self::new()
            .with(AccountRole::Cash, "1000", "Cash")
            .with(AccountRole::Receivable, "1100", "Accounts Receivable")
            .with(AccountRole::Payable, "2000", "Accounts Payable")
            .with(AccountRole::SalesReturn, "4100", "Sales Returns")
            .with(AccountRole::PurchaseReturn, "5100", "Purchase Returns")
    }
}

#[async_trait]
impl AccountDirectory for StaticAccountDirectory {
    async fn resolve(&self, _tenant_id: &str, role: AccountRole) -> StoreResult<Option<Account>> {
        Ok(self.accounts.get(&role).cloned())
    }
}

/// Appended entry as recorded by [`InMemoryJournal`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEntry {
    pub id: JournalEntryId,
    pub tenant_id: String,
    pub draft: JournalEntryDraft,
}

/// Append-only journal held in memory
#[derive(Clone, Default)]
pub struct InMemoryJournal {
    entries: Arc<RwLock<Vec<RecordedEntry>>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<RecordedEntry> {
        self.entries.read().await.clone()
    }

    pub async fn entry(&self, id: JournalEntryId) -> Option<RecordedEntry> {
        self.entries.read().await.iter().find(|e| e.id == id).cloned()
    }
}

#[async_trait]
impl JournalSink for InMemoryJournal {
    async fn append(
        &self,
        tenant_id: &str,
        draft: JournalEntryDraft,
    ) -> StoreResult<JournalEntryId> {
        let id = JournalEntryId::new();
        self.entries.write().await.push(RecordedEntry {
            id,
            tenant_id: tenant_id.to_string(),
            draft,
        });
        Ok(id)
    }
}
