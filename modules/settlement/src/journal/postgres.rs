//! PostgreSQL account directory and journal

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use super::{AccountDirectory, JournalSink};
use crate::domain::{Account, AccountRole, JournalEntryDraft, JournalEntryId};
use crate::error::StoreResult;
use crate::repos::{account_role_repo, journal_repo};

/// Resolves roles through the `account_role_mappings` table
#[derive(Clone)]
pub struct PgAccountDirectory {
    pool: PgPool,
}

impl PgAccountDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountDirectory for PgAccountDirectory {
    async fn resolve(&self, tenant_id: &str, role: AccountRole) -> StoreResult<Option<Account>> {
        account_role_repo::find_active_by_role(&self.pool, tenant_id, role).await
    }
}

/// Appends entries to `journal_entries` / `journal_lines`
#[derive(Clone)]
pub struct PgJournal {
    pool: PgPool,
}

impl PgJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JournalSink for PgJournal {
    async fn append(
        &self,
        tenant_id: &str,
        draft: JournalEntryDraft,
    ) -> StoreResult<JournalEntryId> {
        let entry_id = JournalEntryId::new();
        let lines = journal_repo::JournalLineInsert::from_draft(&draft);

        let mut tx = self.pool.begin().await?;
        journal_repo::insert_entry(&mut tx, entry_id.0, tenant_id, Utc::now(), &draft).await?;
        journal_repo::bulk_insert_lines(&mut tx, entry_id.0, lines).await?;
        tx.commit().await?;

        Ok(entry_id)
    }
}
