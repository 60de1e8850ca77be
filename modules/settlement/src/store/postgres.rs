//! PostgreSQL implementation of the LedgerStore trait

use async_trait::async_trait;
use sqlx::PgPool;

use super::{lock_order, LedgerChanges, LedgerStore, VersionGuard};
use crate::domain::{
    AllocationId, Invoice, InvoiceId, Note, NoteId, Payment, PaymentAllocation, PaymentId,
};
use crate::error::{StoreError, StoreResult};
use crate::repos::{allocation_repo, invoice_repo, note_repo, outbox_repo, payment_repo};

/// LedgerStore over a sqlx connection pool
///
/// Each commit runs in one transaction: note guard and version guards (row
/// locks), then invoices, payments, allocations, notes and outbox events.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn invoice(&self, tenant_id: &str, id: InvoiceId) -> StoreResult<Option<Invoice>> {
        invoice_repo::find(&self.pool, tenant_id, id).await
    }

    async fn payment(&self, tenant_id: &str, id: PaymentId) -> StoreResult<Option<Payment>> {
        payment_repo::find(&self.pool, tenant_id, id).await
    }

    async fn allocation(
        &self,
        tenant_id: &str,
        id: AllocationId,
    ) -> StoreResult<Option<PaymentAllocation>> {
        allocation_repo::find(&self.pool, tenant_id, id).await
    }

    async fn note(&self, tenant_id: &str, id: NoteId) -> StoreResult<Option<Note>> {
        note_repo::find(&self.pool, tenant_id, id).await
    }

    async fn active_allocations_for_invoice(
        &self,
        tenant_id: &str,
        invoice_id: InvoiceId,
    ) -> StoreResult<Vec<PaymentAllocation>> {
        allocation_repo::active_for_invoice(&self.pool, tenant_id, invoice_id).await
    }

    async fn active_allocations_for_payment(
        &self,
        tenant_id: &str,
        payment_id: PaymentId,
    ) -> StoreResult<Vec<PaymentAllocation>> {
        allocation_repo::active_for_payment(&self.pool, tenant_id, payment_id).await
    }

    async fn invoice_ids(&self, tenant_id: &str) -> StoreResult<Vec<InvoiceId>> {
        invoice_repo::list_ids(&self.pool, tenant_id).await
    }

    async fn payment_ids(&self, tenant_id: &str) -> StoreResult<Vec<PaymentId>> {
        payment_repo::list_ids(&self.pool, tenant_id).await
    }

    async fn commit(&self, tenant_id: &str, changes: LedgerChanges) -> StoreResult<()> {
        changes.check_tenant(tenant_id)?;

        // Start transaction
        let mut tx = self.pool.begin().await?;

        if let Some(guard) = changes.note_guard {
            let found = note_repo::lock_status_tx(&mut tx, tenant_id, guard.note_id).await?;
            if found != Some(guard.expected) {
                // Dropping the transaction rolls it back
                return Err(StoreError::NoteGuardFailed {
                    note_id: guard.note_id,
                    expected: guard.expected,
                    found,
                });
            }
        }

        for guard in lock_order(&changes.versions) {
            let found = match guard {
                VersionGuard::Invoice { id, .. } => {
                    invoice_repo::lock_updated_at_tx(&mut tx, tenant_id, id).await?
                }
                VersionGuard::Payment { id, .. } => {
                    payment_repo::lock_updated_at_tx(&mut tx, tenant_id, id).await?
                }
            };
            guard.check(found)?;
        }

        for invoice in &changes.invoices {
            invoice_repo::upsert_tx(&mut tx, invoice).await?;
        }
        for payment in &changes.payments {
            payment_repo::upsert_tx(&mut tx, payment).await?;
        }
        for allocation in &changes.allocations {
            allocation_repo::upsert_tx(&mut tx, allocation).await?;
        }
        for note in &changes.notes {
            note_repo::upsert_tx(&mut tx, note).await?;
        }
        for event in &changes.events {
            outbox_repo::insert_outbox_event(&mut tx, tenant_id, event).await?;
        }

        // Commit transaction
        tx.commit().await?;

        tracing::debug!(
            tenant_id = %tenant_id,
            invoices = changes.invoices.len(),
            payments = changes.payments.len(),
            allocations = changes.allocations.len(),
            notes = changes.notes.len(),
            events = changes.events.len(),
            "Ledger changes committed"
        );

        Ok(())
    }
}
