//! Settlement operations
//!
//! Each service splits into a pure planning step (loads nothing, mutates
//! nothing, fully unit-testable) and an async wrapper that loads a snapshot
//! from the [`crate::store::LedgerStore`], plans, and commits the resulting
//! [`crate::store::LedgerChanges`] in one unit.

pub mod allocation_service;
pub mod audit_writer;
pub mod lifo_reversal;
pub mod note_service;
pub mod note_validator;
pub mod reconciliation;
pub mod settlement_router;

use chrono::Utc;
use serde::Serialize;

use crate::context::SettlementContext;
use crate::domain::{
    derive_payment_status, derive_unallocated, sum_active, Invoice, InvoiceId, Payment,
    PaymentAllocation, PaymentId,
};
use crate::error::{InvariantViolation, SettlementError, SettlementResult, StoreError, ValidationError};
use crate::store::LedgerEvent;

/// An invoice together with its active allocations
#[derive(Debug, Clone)]
pub struct InvoiceSnapshot {
    pub invoice: Invoice,
    pub active: Vec<PaymentAllocation>,
}

impl InvoiceSnapshot {
    pub fn allocated(&self) -> i64 {
        sum_active(&self.active)
    }

    pub fn outstanding(&self) -> i64 {
        self.invoice.outstanding(self.allocated())
    }
}

/// A payment together with its active allocations
#[derive(Debug, Clone)]
pub struct PaymentSnapshot {
    pub payment: Payment,
    pub active: Vec<PaymentAllocation>,
}

impl PaymentSnapshot {
    /// Unallocated amount recomputed from the allocation set, not the cache
    pub fn available(&self) -> i64 {
        derive_unallocated(self.payment.id, self.payment.amount_minor, &self.active)
    }
}

/// Load an invoice and its active allocations
pub(crate) async fn load_invoice(
    ctx: &SettlementContext,
    tenant_id: &str,
    invoice_id: InvoiceId,
) -> SettlementResult<InvoiceSnapshot> {
    let invoice = ctx
        .store
        .invoice(tenant_id, invoice_id)
        .await?
        .ok_or(ValidationError::InvoiceNotFound(invoice_id))?;
    let active = ctx
        .store
        .active_allocations_for_invoice(tenant_id, invoice_id)
        .await?;
    Ok(InvoiceSnapshot { invoice, active })
}

/// Load a payment and its active allocations
pub(crate) async fn load_payment(
    ctx: &SettlementContext,
    tenant_id: &str,
    payment_id: PaymentId,
) -> SettlementResult<PaymentSnapshot> {
    let payment = ctx
        .store
        .payment(tenant_id, payment_id)
        .await?
        .ok_or(ValidationError::PaymentNotFound(payment_id))?;
    let active = ctx
        .store
        .active_allocations_for_payment(tenant_id, payment_id)
        .await?;
    Ok(PaymentSnapshot { payment, active })
}

/// Build an outbox event, folding serialization failures into the store error
pub(crate) fn outbox_event<T: Serialize>(
    event_type: &str,
    aggregate_type: &str,
    aggregate_id: impl ToString,
    payload: &T,
) -> SettlementResult<LedgerEvent> {
    LedgerEvent::new(event_type, aggregate_type, aggregate_id, payload)
        .map_err(|e| SettlementError::Store(StoreError::Serialization(e)))
}

/// Overlay updated allocation rows onto an active set.
///
/// Rows with a matching id are replaced, unknown ids are appended, and
/// anything no longer active is dropped.
pub(crate) fn overlay_active(
    active: &[PaymentAllocation],
    updates: &[PaymentAllocation],
) -> Vec<PaymentAllocation> {
    let mut result: Vec<PaymentAllocation> = active
        .iter()
        .map(|a| {
            updates
                .iter()
                .find(|u| u.id == a.id)
                .cloned()
                .unwrap_or_else(|| a.clone())
        })
        .collect();

    for update in updates {
        if !active.iter().any(|a| a.id == update.id) {
            result.push(update.clone());
        }
    }

    result.retain(|a| a.is_active());
    result
}

/// Recompute the cached unallocated amount from the post-change allocation set
pub(crate) fn refreshed_payment(
    payment: &Payment,
    active_after: &[PaymentAllocation],
) -> Result<Payment, InvariantViolation> {
    let unallocated = derive_unallocated(payment.id, payment.amount_minor, active_after);
    if unallocated < 0 || unallocated > payment.amount_minor {
        return Err(InvariantViolation::UnallocatedOutOfRange {
            payment_id: payment.id,
            unallocated,
            amount: payment.amount_minor,
        });
    }

    let mut updated = payment.clone();
    updated.unallocated_minor = unallocated;
    updated.updated_at = Utc::now();
    Ok(updated)
}

/// Recompute the cached payment status from the post-change allocation set
pub(crate) fn refreshed_invoice(invoice: &Invoice, active_after: &[PaymentAllocation]) -> Invoice {
    let allocated: i64 = active_after
        .iter()
        .filter(|a| a.invoice_id == invoice.id && a.is_active())
        .map(|a| a.allocated_minor)
        .sum();

    let mut updated = invoice.clone();
    updated.payment_status = derive_payment_status(invoice.total_minor, allocated);
    updated.updated_at = Utc::now();
    updated
}

/// Count and log a rejected request, then hand the error back
pub(crate) fn rejected(
    ctx: &SettlementContext,
    tenant_id: &str,
    operation: &str,
    err: SettlementError,
) -> SettlementError {
    ctx.metrics
        .rejections_total
        .with_label_values(&[operation, err.reason()])
        .inc();

    match &err {
        SettlementError::Invariant(violation) => {
            tracing::error!(
                tenant_id = %tenant_id,
                operation,
                error = %violation,
                "Ledger invariant violated"
            );
        }
        SettlementError::Store(store_err) => {
            tracing::error!(
                tenant_id = %tenant_id,
                operation,
                error = %store_err,
                "Ledger store failure"
            );
        }
        other => {
            tracing::warn!(
                tenant_id = %tenant_id,
                operation,
                error = %other,
                "Settlement request rejected"
            );
        }
    }

    err
}
