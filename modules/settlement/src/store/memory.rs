//! In-memory implementation of the LedgerStore trait for testing and development

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{LedgerChanges, LedgerEvent, LedgerStore, VersionGuard};
use crate::domain::{
    AllocationId, Invoice, InvoiceId, Note, NoteId, Payment, PaymentAllocation, PaymentId,
};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
struct State {
    invoices: HashMap<InvoiceId, Invoice>,
    payments: HashMap<PaymentId, Payment>,
    allocations: HashMap<AllocationId, PaymentAllocation>,
    // insertion order; stands in for the `seq` column of the Postgres table
    allocation_order: Vec<AllocationId>,
    notes: HashMap<NoteId, Note>,
    events: Vec<LedgerEvent>,
}

impl State {
    fn allocations_where(
        &self,
        tenant_id: &str,
        pred: impl Fn(&PaymentAllocation) -> bool,
    ) -> Vec<PaymentAllocation> {
        self.allocation_order
            .iter()
            .filter_map(|id| self.allocations.get(id))
            .filter(|a| a.tenant_id == tenant_id && a.is_active() && pred(a))
            .cloned()
            .collect()
    }
}

/// LedgerStore backed by hash maps behind one async write lock
///
/// A commit holds the write lock for its whole duration, so commits are
/// atomic with respect to each other and to readers.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<State>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outbox events committed so far, in commit order
    pub async fn events(&self) -> Vec<LedgerEvent> {
        self.state.read().await.events.clone()
    }

    /// Every allocation row including soft-deleted ones, in insertion order
    pub async fn all_allocations(&self, tenant_id: &str) -> Vec<PaymentAllocation> {
        let state = self.state.read().await;
        state
            .allocation_order
            .iter()
            .filter_map(|id| state.allocations.get(id))
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Every payment row of a tenant
    pub async fn all_payments(&self, tenant_id: &str) -> Vec<Payment> {
        let state = self.state.read().await;
        state
            .payments
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn invoice(&self, tenant_id: &str, id: InvoiceId) -> StoreResult<Option<Invoice>> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn payment(&self, tenant_id: &str, id: PaymentId) -> StoreResult<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn allocation(
        &self,
        tenant_id: &str,
        id: AllocationId,
    ) -> StoreResult<Option<PaymentAllocation>> {
        let state = self.state.read().await;
        Ok(state
            .allocations
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn note(&self, tenant_id: &str, id: NoteId) -> StoreResult<Option<Note>> {
        let state = self.state.read().await;
        Ok(state
            .notes
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn active_allocations_for_invoice(
        &self,
        tenant_id: &str,
        invoice_id: InvoiceId,
    ) -> StoreResult<Vec<PaymentAllocation>> {
        let state = self.state.read().await;
        Ok(state.allocations_where(tenant_id, |a| a.invoice_id == invoice_id))
    }

    async fn active_allocations_for_payment(
        &self,
        tenant_id: &str,
        payment_id: PaymentId,
    ) -> StoreResult<Vec<PaymentAllocation>> {
        let state = self.state.read().await;
        Ok(state.allocations_where(tenant_id, |a| a.payment_id == payment_id))
    }

    async fn invoice_ids(&self, tenant_id: &str) -> StoreResult<Vec<InvoiceId>> {
        let state = self.state.read().await;
        let mut ids: Vec<InvoiceId> = state
            .invoices
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn payment_ids(&self, tenant_id: &str) -> StoreResult<Vec<PaymentId>> {
        let state = self.state.read().await;
        let mut ids: Vec<PaymentId> = state
            .payments
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn commit(&self, tenant_id: &str, changes: LedgerChanges) -> StoreResult<()> {
        changes.check_tenant(tenant_id)?;

        let mut state = self.state.write().await;

        // Validate the guards before touching anything
        if let Some(guard) = changes.note_guard {
            let found = state
                .notes
                .get(&guard.note_id)
                .filter(|n| n.tenant_id == tenant_id)
                .map(|n| n.status);
            if found != Some(guard.expected) {
                return Err(StoreError::NoteGuardFailed {
                    note_id: guard.note_id,
                    expected: guard.expected,
                    found,
                });
            }
        }

        for guard in &changes.versions {
            let found = match guard {
                VersionGuard::Invoice { id, .. } => state
                    .invoices
                    .get(id)
                    .filter(|r| r.tenant_id == tenant_id)
                    .map(|r| r.updated_at),
                VersionGuard::Payment { id, .. } => state
                    .payments
                    .get(id)
                    .filter(|r| r.tenant_id == tenant_id)
                    .map(|r| r.updated_at),
            };
            guard.check(found)?;
        }

        for invoice in changes.invoices {
            state.invoices.insert(invoice.id, invoice);
        }
        for payment in changes.payments {
            state.payments.insert(payment.id, payment);
        }
        for allocation in changes.allocations {
            if !state.allocations.contains_key(&allocation.id) {
                state.allocation_order.push(allocation.id);
            }
            state.allocations.insert(allocation.id, allocation);
        }
        for note in changes.notes {
            state.notes.insert(note.id, note);
        }
        state.events.extend(changes.events);

        Ok(())
    }
}
