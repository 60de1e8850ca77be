use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::journal::{AccountDirectory, JournalSink, PgAccountDirectory, PgJournal};
use crate::metrics::SettlementMetrics;
use crate::store::{LedgerStore, PgLedger};

/// Collaborators shared by every settlement operation
#[derive(Clone)]
pub struct SettlementContext {
    pub store: Arc<dyn LedgerStore>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub journal: Arc<dyn JournalSink>,
    pub metrics: SettlementMetrics,
    /// Currency stamped on appended journal entries
    pub currency: String,
}

impl SettlementContext {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        accounts: Arc<dyn AccountDirectory>,
        journal: Arc<dyn JournalSink>,
        metrics: SettlementMetrics,
    ) -> Self {
        Self {
            store,
            accounts,
            journal,
            metrics,
            currency: "USD".to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Wire every collaborator to the same PostgreSQL pool
    pub fn postgres(pool: PgPool, config: &Config, metrics: SettlementMetrics) -> Self {
        Self::new(
            Arc::new(PgLedger::new(pool.clone())),
            Arc::new(PgAccountDirectory::new(pool.clone())),
            Arc::new(PgJournal::new(pool)),
            metrics,
        )
        .with_currency(config.currency.clone())
    }
}
