//! Ledger accessor
//!
//! [`LedgerStore`] is the persistence seam of the engine. Reads are point
//! lookups; every mutation of one logical operation is shipped as a single
//! [`LedgerChanges`] and applied atomically by [`LedgerStore::commit`].
//!
//! ## Implementations
//!
//! - [`PgLedger`]: PostgreSQL, one transaction per commit, transactional outbox
//! - [`InMemoryLedger`]: tests and local development

mod memory;
mod postgres;

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    AllocationId, Invoice, InvoiceId, Note, NoteId, NoteStatus, Payment, PaymentAllocation,
    PaymentId,
};
use crate::error::StoreResult;

pub const EVENT_ALLOCATION_CREATED: &str = "settlement.events.allocation.created";
pub const EVENT_ALLOCATION_UPDATED: &str = "settlement.events.allocation.updated";
pub const EVENT_ALLOCATION_DELETED: &str = "settlement.events.allocation.deleted";
pub const EVENT_NOTE_SUBMITTED: &str = "settlement.events.note.submitted";
pub const EVENT_NOTE_APPLIED: &str = "settlement.events.note.applied";
pub const EVENT_REFUND_DRAFTED: &str = "settlement.events.refund.drafted";

/// Outbox event written in the same commit as the records it describes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEvent {
    pub fn new<T: Serialize>(
        event_type: &str,
        aggregate_type: &str,
        aggregate_id: impl ToString,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id: aggregate_id.to_string(),
            payload: serde_json::to_value(payload)?,
            occurred_at: Utc::now(),
        })
    }
}

/// Optimistic status check applied inside the commit
///
/// If the stored note is not in `expected` status the whole commit is
/// rejected with [`crate::error::StoreError::NoteGuardFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteGuard {
    pub note_id: NoteId,
    pub expected: NoteStatus,
}

/// Version a record had when it was read for planning
///
/// The commit is rejected with [`crate::error::StoreError::StaleRecord`] if
/// the stored `updated_at` has moved on since, so two operations planned
/// from the same snapshot cannot both write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionGuard {
    Invoice {
        id: InvoiceId,
        updated_at: DateTime<Utc>,
    },
    Payment {
        id: PaymentId,
        updated_at: DateTime<Utc>,
    },
}

impl VersionGuard {
    pub fn invoice(invoice: &Invoice) -> Self {
        Self::Invoice {
            id: invoice.id,
            updated_at: invoice.updated_at,
        }
    }

    pub fn payment(payment: &Payment) -> Self {
        Self::Payment {
            id: payment.id,
            updated_at: payment.updated_at,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Invoice { .. } => "invoices",
            Self::Payment { .. } => "payments",
        }
    }

    pub fn expected(&self) -> DateTime<Utc> {
        match self {
            Self::Invoice { updated_at, .. } | Self::Payment { updated_at, .. } => *updated_at,
        }
    }

    pub fn record_id(&self) -> String {
        match self {
            Self::Invoice { id, .. } => id.to_string(),
            Self::Payment { id, .. } => id.to_string(),
        }
    }

    fn stale(&self) -> crate::error::StoreError {
        crate::error::StoreError::StaleRecord {
            table: self.table(),
            id: self.record_id(),
        }
    }

    /// Compare against the stored version, `None` when the row is gone
    pub(crate) fn check(&self, found: Option<DateTime<Utc>>) -> StoreResult<()> {
        if found == Some(self.expected()) {
            Ok(())
        } else {
            Err(self.stale())
        }
    }
}

/// Guards sorted invoices first, then by id, so row locks are always taken
/// in the same order
pub(crate) fn lock_order(guards: &[VersionGuard]) -> Vec<VersionGuard> {
    let mut sorted = guards.to_vec();
    sorted.sort_by_key(|g| match g {
        VersionGuard::Invoice { id, .. } => (0, id.0),
        VersionGuard::Payment { id, .. } => (1, id.0),
    });
    sorted.dedup();
    sorted
}

/// Full-record upserts for one logical unit of work
#[derive(Debug, Clone, Default)]
pub struct LedgerChanges {
    pub invoices: Vec<Invoice>,
    pub payments: Vec<Payment>,
    pub allocations: Vec<PaymentAllocation>,
    pub notes: Vec<Note>,
    pub note_guard: Option<NoteGuard>,
    /// Snapshot versions of the invoices and payments being rewritten
    pub versions: Vec<VersionGuard>,
    pub events: Vec<LedgerEvent>,
}

impl LedgerChanges {
    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
            && self.payments.is_empty()
            && self.allocations.is_empty()
            && self.notes.is_empty()
            && self.events.is_empty()
    }

    /// Every record must belong to `tenant_id`
    pub(crate) fn check_tenant(&self, tenant_id: &str) -> StoreResult<()> {
        let owners = self
            .invoices
            .iter()
            .map(|r| (r.tenant_id.as_str(), r.id.to_string()))
            .chain(self.payments.iter().map(|r| (r.tenant_id.as_str(), r.id.to_string())))
            .chain(self.allocations.iter().map(|r| (r.tenant_id.as_str(), r.id.to_string())))
            .chain(self.notes.iter().map(|r| (r.tenant_id.as_str(), r.id.to_string())));

        for (record_tenant, id) in owners {
            if record_tenant != tenant_id {
                return Err(crate::error::StoreError::TenantMismatch {
                    tenant_id: tenant_id.to_string(),
                    record_tenant: record_tenant.to_string(),
                    id,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn invoice(&self, tenant_id: &str, id: InvoiceId) -> StoreResult<Option<Invoice>>;

    async fn payment(&self, tenant_id: &str, id: PaymentId) -> StoreResult<Option<Payment>>;

    async fn allocation(
        &self,
        tenant_id: &str,
        id: AllocationId,
    ) -> StoreResult<Option<PaymentAllocation>>;

    async fn note(&self, tenant_id: &str, id: NoteId) -> StoreResult<Option<Note>>;

    /// Active allocations on an invoice, oldest first (insertion order)
    async fn active_allocations_for_invoice(
        &self,
        tenant_id: &str,
        invoice_id: InvoiceId,
    ) -> StoreResult<Vec<PaymentAllocation>>;

    /// Active allocations of a payment across all invoices, oldest first
    async fn active_allocations_for_payment(
        &self,
        tenant_id: &str,
        payment_id: PaymentId,
    ) -> StoreResult<Vec<PaymentAllocation>>;

    async fn invoice_ids(&self, tenant_id: &str) -> StoreResult<Vec<InvoiceId>>;

    async fn payment_ids(&self, tenant_id: &str) -> StoreResult<Vec<PaymentId>>;

    /// Apply all changes atomically, or none of them
    async fn commit(&self, tenant_id: &str, changes: LedgerChanges) -> StoreResult<()>;
}
