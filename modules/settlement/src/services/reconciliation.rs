//! Ledger reconciliation
//!
//! Re-checks the ledger invariants against stored records and repairs drift
//! in the cached fields (`Payment::unallocated_minor`,
//! `Invoice::payment_status`) by recomputing them from the allocation set.
//! Breaches of the hard invariants are reported, never "repaired".

use chrono::Utc;
use serde::Serialize;

use super::{InvoiceSnapshot, PaymentSnapshot};
use crate::domain::{derive_payment_status, InvoiceId, PaymentId, PaymentStatus};
use crate::error::{SettlementResult, ValidationError};
use crate::store::{LedgerChanges, LedgerStore, VersionGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "breach", rename_all = "snake_case")]
pub enum InvariantBreach {
    /// Cumulative notes above the invoice's original total
    NotesExceedOriginal {
        invoice_id: InvoiceId,
        total_notes_minor: i64,
        original_total_minor: i64,
    },
    /// Active allocations above the invoice's current total
    OverAllocated {
        invoice_id: InvoiceId,
        allocated_minor: i64,
        total_minor: i64,
    },
    /// Active allocations above the payment's amount
    PaymentOverdrawn {
        payment_id: PaymentId,
        allocated_minor: i64,
        amount_minor: i64,
    },
    UnallocatedDrift {
        payment_id: PaymentId,
        cached_minor: i64,
        derived_minor: i64,
    },
    PaymentStatusDrift {
        invoice_id: InvoiceId,
        cached: PaymentStatus,
        derived: PaymentStatus,
    },
}

impl InvariantBreach {
    /// Drift in a cached field can be fixed by [`rebuild_derived`]
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            Self::UnallocatedDrift { .. } | Self::PaymentStatusDrift { .. }
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub tenant_id: String,
    pub invoices_checked: usize,
    pub payments_checked: usize,
    pub breaches: Vec<InvariantBreach>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.breaches.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub invoices_repaired: Vec<InvoiceId>,
    pub payments_repaired: Vec<PaymentId>,
}

pub fn check_invoice(snapshot: &InvoiceSnapshot) -> Vec<InvariantBreach> {
    let invoice = &snapshot.invoice;
    let allocated = snapshot.allocated();
    let mut breaches = Vec::new();

    if invoice.total_notes_minor > invoice.original_total_minor {
        breaches.push(InvariantBreach::NotesExceedOriginal {
            invoice_id: invoice.id,
            total_notes_minor: invoice.total_notes_minor,
            original_total_minor: invoice.original_total_minor,
        });
    }
    if allocated > invoice.total_minor {
        breaches.push(InvariantBreach::OverAllocated {
            invoice_id: invoice.id,
            allocated_minor: allocated,
            total_minor: invoice.total_minor,
        });
    }

    let derived = derive_payment_status(invoice.total_minor, allocated);
    if derived != invoice.payment_status {
        breaches.push(InvariantBreach::PaymentStatusDrift {
            invoice_id: invoice.id,
            cached: invoice.payment_status,
            derived,
        });
    }
    breaches
}

pub fn check_payment(snapshot: &PaymentSnapshot) -> Vec<InvariantBreach> {
    let payment = &snapshot.payment;
    let derived = snapshot.available();
    let mut breaches = Vec::new();

    if derived < 0 {
        breaches.push(InvariantBreach::PaymentOverdrawn {
            payment_id: payment.id,
            allocated_minor: payment.amount_minor - derived,
            amount_minor: payment.amount_minor,
        });
    }
    if derived != payment.unallocated_minor {
        breaches.push(InvariantBreach::UnallocatedDrift {
            payment_id: payment.id,
            cached_minor: payment.unallocated_minor,
            derived_minor: derived,
        });
    }
    breaches
}

async fn invoice_snapshot(
    store: &dyn LedgerStore,
    tenant_id: &str,
    invoice_id: InvoiceId,
) -> SettlementResult<InvoiceSnapshot> {
    let invoice = store
        .invoice(tenant_id, invoice_id)
        .await?
        .ok_or(ValidationError::InvoiceNotFound(invoice_id))?;
    let active = store
        .active_allocations_for_invoice(tenant_id, invoice_id)
        .await?;
    Ok(InvoiceSnapshot { invoice, active })
}

async fn payment_snapshot(
    store: &dyn LedgerStore,
    tenant_id: &str,
    payment_id: PaymentId,
) -> SettlementResult<PaymentSnapshot> {
    let payment = store
        .payment(tenant_id, payment_id)
        .await?
        .ok_or(ValidationError::PaymentNotFound(payment_id))?;
    let active = store
        .active_allocations_for_payment(tenant_id, payment_id)
        .await?;
    Ok(PaymentSnapshot { payment, active })
}

/// Check the given invoices and payments
pub async fn check_invariants(
    store: &dyn LedgerStore,
    tenant_id: &str,
    invoice_ids: &[InvoiceId],
    payment_ids: &[PaymentId],
) -> SettlementResult<ReconciliationReport> {
    let mut report = ReconciliationReport {
        tenant_id: tenant_id.to_string(),
        ..Default::default()
    };

    for invoice_id in invoice_ids {
        let snapshot = invoice_snapshot(store, tenant_id, *invoice_id).await?;
        report.breaches.extend(check_invoice(&snapshot));
        report.invoices_checked += 1;
    }
    for payment_id in payment_ids {
        let snapshot = payment_snapshot(store, tenant_id, *payment_id).await?;
        report.breaches.extend(check_payment(&snapshot));
        report.payments_checked += 1;
    }

    for breach in &report.breaches {
        tracing::warn!(tenant_id = %tenant_id, breach = ?breach, "Ledger invariant breach");
    }

    Ok(report)
}

/// Check every invoice and payment of a tenant
pub async fn check_tenant(
    store: &dyn LedgerStore,
    tenant_id: &str,
) -> SettlementResult<ReconciliationReport> {
    let invoice_ids = store.invoice_ids(tenant_id).await?;
    let payment_ids = store.payment_ids(tenant_id).await?;
    check_invariants(store, tenant_id, &invoice_ids, &payment_ids).await
}

/// Recompute cached fields from allocations and commit the corrected values
pub async fn rebuild_derived(
    store: &dyn LedgerStore,
    tenant_id: &str,
    invoice_ids: &[InvoiceId],
    payment_ids: &[PaymentId],
) -> SettlementResult<RebuildReport> {
    let now = Utc::now();
    let mut changes = LedgerChanges::default();
    let mut report = RebuildReport::default();

    for invoice_id in invoice_ids {
        let snapshot = invoice_snapshot(store, tenant_id, *invoice_id).await?;
        let derived = derive_payment_status(snapshot.invoice.total_minor, snapshot.allocated());
        if derived != snapshot.invoice.payment_status {
            let mut invoice = snapshot.invoice;
            tracing::warn!(
                tenant_id = %tenant_id,
                invoice_id = %invoice.id,
                cached = %invoice.payment_status,
                derived = %derived,
                "Repairing invoice payment status"
            );
            changes.versions.push(VersionGuard::invoice(&invoice));
            invoice.payment_status = derived;
            invoice.updated_at = now;
            report.invoices_repaired.push(invoice.id);
            changes.invoices.push(invoice);
        }
    }

    for payment_id in payment_ids {
        let snapshot = payment_snapshot(store, tenant_id, *payment_id).await?;
        let derived = snapshot.available();
        // An overdrawn payment is a hard breach; there is no value to repair to
        if derived >= 0 && derived != snapshot.payment.unallocated_minor {
            let mut payment = snapshot.payment;
            tracing::warn!(
                tenant_id = %tenant_id,
                payment_id = %payment.id,
                cached_minor = payment.unallocated_minor,
                derived_minor = derived,
                "Repairing payment unallocated amount"
            );
            changes.versions.push(VersionGuard::payment(&payment));
            payment.unallocated_minor = derived;
            payment.updated_at = now;
            report.payments_repaired.push(payment.id);
            changes.payments.push(payment);
        }
    }

    if !changes.is_empty() {
        store.commit(tenant_id, changes).await?;
    }

    tracing::info!(
        tenant_id = %tenant_id,
        invoices_repaired = report.invoices_repaired.len(),
        payments_repaired = report.payments_repaired.len(),
        "Derived fields rebuilt"
    );

    Ok(report)
}
