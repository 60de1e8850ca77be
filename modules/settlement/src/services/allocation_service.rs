//! Allocation Manager
//!
//! Splits submitted payments across invoices of the same party. Every request
//! is validated in full against a snapshot before anything is written; a
//! multi-invoice request commits all of its lines or none of them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use super::{
    load_invoice, load_payment, outbox_event, overlay_active, refreshed_invoice,
    refreshed_payment, rejected, InvoiceSnapshot, PaymentSnapshot,
};
use crate::context::SettlementContext;
use crate::domain::{
    AllocationId, Invoice, InvoiceId, Payment, PaymentAllocation, PaymentDocStatus, PaymentId,
    PaymentStatus,
};
use crate::error::{SettlementError, SettlementResult, ValidationError};
use crate::metrics::SettlementMetrics;
use crate::store::{
    LedgerChanges, VersionGuard, EVENT_ALLOCATION_CREATED, EVENT_ALLOCATION_DELETED,
    EVENT_ALLOCATION_UPDATED,
};

/// One `(invoice, amount)` pair of an allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub invoice_id: InvoiceId,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationReceipt {
    pub allocations: Vec<PaymentAllocation>,
    pub unallocated_minor: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeallocationReceipt {
    pub success: bool,
    pub allocation_id: AllocationId,
    pub payment_unallocated_minor: i64,
    pub invoice_payment_status: PaymentStatus,
}

/// Records to write for one allocation operation
#[derive(Debug, Clone)]
pub struct AllocationPlan {
    pub allocations: Vec<PaymentAllocation>,
    pub payment: Payment,
    pub invoices: Vec<Invoice>,
    /// Versions of the snapshots the plan was computed from
    pub versions: Vec<VersionGuard>,
}

impl AllocationPlan {
    fn into_changes(self, event_type: &str) -> SettlementResult<LedgerChanges> {
        let events = self
            .allocations
            .iter()
            .map(|a| outbox_event(event_type, "payment_allocation", a.id, a))
            .collect::<SettlementResult<Vec<_>>>()?;

        Ok(LedgerChanges {
            invoices: self.invoices,
            payments: vec![self.payment],
            allocations: self.allocations,
            versions: self.versions,
            events,
            ..Default::default()
        })
    }
}

/// Validate an allocation request and compute the resulting records.
///
/// Checks, in order: non-empty request, positive amounts, submitted payment,
/// total against the payment's unallocated amount, then per line the
/// invoice's existence, party, settlement direction and outstanding amount.
/// Several lines on the same invoice draw from one outstanding balance.
pub fn plan_allocation(
    payment: &PaymentSnapshot,
    invoices: &[InvoiceSnapshot],
    lines: &[AllocationLine],
) -> SettlementResult<AllocationPlan> {
    if lines.is_empty() {
        return Err(ValidationError::EmptyAllocation.into());
    }
    if let Some(line) = lines.iter().find(|l| l.amount_minor <= 0) {
        return Err(ValidationError::NonPositiveAmount(line.amount_minor).into());
    }

    let p = &payment.payment;
    if p.status != PaymentDocStatus::Submitted {
        return Err(ValidationError::PaymentNotSubmitted {
            payment_id: p.id,
            status: p.status,
        }
        .into());
    }

    // A total past i64::MAX cannot fit any payment; report it saturated
    let requested = lines
        .iter()
        .try_fold(0i64, |acc, l| acc.checked_add(l.amount_minor))
        .unwrap_or(i64::MAX);
    let available = payment.available();
    if requested > available {
        return Err(ValidationError::ExceedsPaymentUnallocated {
            payment_id: p.id,
            requested,
            available,
            excess: requested.saturating_sub(available),
        }
        .into());
    }

    let mut pending: HashMap<InvoiceId, i64> = HashMap::new();
    for line in lines {
        let snapshot = invoices
            .iter()
            .find(|s| s.invoice.id == line.invoice_id)
            .ok_or(ValidationError::InvoiceNotFound(line.invoice_id))?;
        let invoice = &snapshot.invoice;

        if invoice.party_id != p.party_id {
            return Err(ValidationError::PartyMismatch {
                invoice_id: invoice.id,
                invoice_party: invoice.party_id.clone(),
                other_party: p.party_id.clone(),
            }
            .into());
        }
        if invoice.kind.settling_direction() != p.direction {
            return Err(ValidationError::DirectionMismatch {
                invoice_id: invoice.id,
                direction: p.direction,
                kind: invoice.kind,
            }
            .into());
        }

        let already = pending.entry(invoice.id).or_insert(0);
        let outstanding = snapshot.outstanding() - *already;
        if line.amount_minor > outstanding {
            return Err(ValidationError::ExceedsInvoiceOutstanding {
                invoice_id: invoice.id,
                requested: line.amount_minor,
                outstanding,
                excess: line.amount_minor.saturating_sub(outstanding),
            }
            .into());
        }
        *already += line.amount_minor;
    }

    let allocations: Vec<PaymentAllocation> = lines
        .iter()
        .map(|l| PaymentAllocation::active(p.tenant_id.clone(), p.id, l.invoice_id, l.amount_minor))
        .collect();

    let payment_after = refreshed_payment(p, &overlay_active(&payment.active, &allocations))?;

    let mut touched: Vec<InvoiceId> = Vec::new();
    for line in lines {
        if !touched.contains(&line.invoice_id) {
            touched.push(line.invoice_id);
        }
    }
    let snapshots: Vec<&InvoiceSnapshot> = touched
        .iter()
        .filter_map(|id| invoices.iter().find(|s| s.invoice.id == *id))
        .collect();
    let invoices_after = snapshots
        .iter()
        .map(|s| refreshed_invoice(&s.invoice, &overlay_active(&s.active, &allocations)))
        .collect();
    let versions = std::iter::once(VersionGuard::payment(p))
        .chain(snapshots.iter().map(|s| VersionGuard::invoice(&s.invoice)))
        .collect();

    Ok(AllocationPlan {
        allocations,
        payment: payment_after,
        invoices: invoices_after,
        versions,
    })
}

/// Soft-delete an active allocation and restore its amount to the payment
pub fn plan_deallocation(
    allocation: &PaymentAllocation,
    payment: &PaymentSnapshot,
    invoice: &InvoiceSnapshot,
) -> SettlementResult<AllocationPlan> {
    if !allocation.is_active() {
        return Err(ValidationError::AllocationDeleted(allocation.id).into());
    }

    let mut deleted = allocation.clone();
    deleted.mark_deleted();
    let changed = [deleted.clone()];

    Ok(AllocationPlan {
        payment: refreshed_payment(&payment.payment, &overlay_active(&payment.active, &changed))?,
        invoices: vec![refreshed_invoice(
            &invoice.invoice,
            &overlay_active(&invoice.active, &changed),
        )],
        allocations: vec![deleted],
        versions: snapshot_versions(payment, invoice),
    })
}

fn snapshot_versions(payment: &PaymentSnapshot, invoice: &InvoiceSnapshot) -> Vec<VersionGuard> {
    vec![
        VersionGuard::payment(&payment.payment),
        VersionGuard::invoice(&invoice.invoice),
    ]
}

/// Change an active allocation's amount in place.
///
/// The increase (if any) must fit the payment's unallocated amount, and the
/// new amount must fit the invoice once the other active allocations on it
/// are accounted for.
pub fn plan_update(
    allocation: &PaymentAllocation,
    new_amount_minor: i64,
    payment: &PaymentSnapshot,
    invoice: &InvoiceSnapshot,
) -> SettlementResult<AllocationPlan> {
    if !allocation.is_active() {
        return Err(ValidationError::AllocationDeleted(allocation.id).into());
    }
    if new_amount_minor <= 0 {
        return Err(ValidationError::NonPositiveAmount(new_amount_minor).into());
    }

    let delta = new_amount_minor.saturating_sub(allocation.allocated_minor);
    let available = payment.available();
    if delta > available {
        return Err(ValidationError::ExceedsPaymentUnallocated {
            payment_id: payment.payment.id,
            requested: delta,
            available,
            excess: delta.saturating_sub(available),
        }
        .into());
    }

    let others: i64 = invoice
        .active
        .iter()
        .filter(|a| a.id != allocation.id)
        .map(|a| a.allocated_minor)
        .sum();
    let outstanding = invoice.invoice.total_minor - others;
    if new_amount_minor > outstanding {
        return Err(ValidationError::ExceedsInvoiceOutstanding {
            invoice_id: invoice.invoice.id,
            requested: new_amount_minor,
            outstanding,
            excess: new_amount_minor.saturating_sub(outstanding),
        }
        .into());
    }

    let mut updated = allocation.clone();
    updated.allocated_minor = new_amount_minor;
    updated.updated_at = Utc::now();
    let changed = [updated.clone()];

    Ok(AllocationPlan {
        payment: refreshed_payment(&payment.payment, &overlay_active(&payment.active, &changed))?,
        invoices: vec![refreshed_invoice(
            &invoice.invoice,
            &overlay_active(&invoice.active, &changed),
        )],
        allocations: vec![updated],
        versions: snapshot_versions(payment, invoice),
    })
}

/// Allocate a payment across one or more invoices
pub async fn allocate_payment(
    ctx: &SettlementContext,
    tenant_id: &str,
    payment_id: PaymentId,
    lines: &[AllocationLine],
) -> SettlementResult<AllocationReceipt> {
    let started = SettlementMetrics::timer();

    let result: SettlementResult<AllocationReceipt> = async {
        let payment = load_payment(ctx, tenant_id, payment_id).await?;

        let mut invoices: Vec<InvoiceSnapshot> = Vec::new();
        for line in lines {
            if !invoices.iter().any(|s| s.invoice.id == line.invoice_id) {
                invoices.push(load_invoice(ctx, tenant_id, line.invoice_id).await?);
            }
        }

        let plan = plan_allocation(&payment, &invoices, lines)?;
        let receipt = AllocationReceipt {
            allocations: plan.allocations.clone(),
            unallocated_minor: plan.payment.unallocated_minor,
        };

        ctx.store
            .commit(tenant_id, plan.into_changes(EVENT_ALLOCATION_CREATED)?)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            payment_id = %payment_id,
            allocations = receipt.allocations.len(),
            unallocated_minor = receipt.unallocated_minor,
            "Payment allocated"
        );

        Ok(receipt)
    }
    .await;

    finish(ctx, tenant_id, "allocate", started, result)
}

/// Remove an allocation, returning its amount to the payment
pub async fn deallocate_payment(
    ctx: &SettlementContext,
    tenant_id: &str,
    allocation_id: AllocationId,
) -> SettlementResult<DeallocationReceipt> {
    let started = SettlementMetrics::timer();

    let result: SettlementResult<DeallocationReceipt> = async {
        let allocation = load_allocation(ctx, tenant_id, allocation_id).await?;
        let payment = load_payment(ctx, tenant_id, allocation.payment_id).await?;
        let invoice = load_invoice(ctx, tenant_id, allocation.invoice_id).await?;

        let plan = plan_deallocation(&allocation, &payment, &invoice)?;
        let receipt = DeallocationReceipt {
            success: true,
            allocation_id,
            payment_unallocated_minor: plan.payment.unallocated_minor,
            invoice_payment_status: plan
                .invoices
                .first()
                .map(|i| i.payment_status)
                .unwrap_or(invoice.invoice.payment_status),
        };

        ctx.store
            .commit(tenant_id, plan.into_changes(EVENT_ALLOCATION_DELETED)?)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            allocation_id = %allocation_id,
            payment_id = %allocation.payment_id,
            invoice_id = %allocation.invoice_id,
            restored_minor = allocation.allocated_minor,
            "Allocation removed"
        );

        Ok(receipt)
    }
    .await;

    finish(ctx, tenant_id, "deallocate", started, result)
}

/// Change the amount of an existing allocation
pub async fn update_allocation(
    ctx: &SettlementContext,
    tenant_id: &str,
    allocation_id: AllocationId,
    new_amount_minor: i64,
) -> SettlementResult<PaymentAllocation> {
    let started = SettlementMetrics::timer();

    let result: SettlementResult<PaymentAllocation> = async {
        let allocation = load_allocation(ctx, tenant_id, allocation_id).await?;
        let payment = load_payment(ctx, tenant_id, allocation.payment_id).await?;
        let invoice = load_invoice(ctx, tenant_id, allocation.invoice_id).await?;

        let plan = plan_update(&allocation, new_amount_minor, &payment, &invoice)?;
        let updated = plan.allocations[0].clone();

        ctx.store
            .commit(tenant_id, plan.into_changes(EVENT_ALLOCATION_UPDATED)?)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            allocation_id = %allocation_id,
            from_minor = allocation.allocated_minor,
            to_minor = new_amount_minor,
            "Allocation updated"
        );

        Ok(updated)
    }
    .await;

    finish(ctx, tenant_id, "update", started, result)
}

async fn load_allocation(
    ctx: &SettlementContext,
    tenant_id: &str,
    allocation_id: AllocationId,
) -> SettlementResult<PaymentAllocation> {
    let allocation = ctx
        .store
        .allocation(tenant_id, allocation_id)
        .await?
        .ok_or(ValidationError::AllocationNotFound(allocation_id))?;
    if !allocation.is_active() {
        return Err(ValidationError::AllocationDeleted(allocation_id).into());
    }
    Ok(allocation)
}

fn finish<T>(
    ctx: &SettlementContext,
    tenant_id: &str,
    op: &str,
    started: Instant,
    result: SettlementResult<T>,
) -> SettlementResult<T> {
    ctx.metrics.observe(op, started);

    let label = match &result {
        Ok(_) => "ok",
        Err(SettlementError::Validation(_)) => "rejected",
        Err(_) => "error",
    };
    ctx.metrics
        .allocation_ops_total
        .with_label_values(&[op, label])
        .inc();

    result.map_err(|e| rejected(ctx, tenant_id, op, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InvoiceKind, PaymentDirection};
    use crate::error::StoreError;
    use crate::store::{InMemoryLedger, LedgerStore};

    fn invoice(total: i64) -> InvoiceSnapshot {
        InvoiceSnapshot {
            invoice: Invoice::submitted("t1", InvoiceKind::Sales, "cust-1", total),
            active: Vec::new(),
        }
    }

    fn payment(amount: i64) -> PaymentSnapshot {
        PaymentSnapshot {
            payment: Payment::submitted("t1", "cust-1", PaymentDirection::Receive, amount),
            active: Vec::new(),
        }
    }

    #[test]
    fn test_plan_allocation_updates_both_sides() {
        let pay = payment(1000);
        let inv = invoice(600);
        let lines = [AllocationLine {
            invoice_id: inv.invoice.id,
            amount_minor: 600,
        }];

        let plan = plan_allocation(&pay, &[inv], &lines).unwrap();
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.payment.unallocated_minor, 400);
        assert_eq!(plan.invoices[0].payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_plan_allocation_rejects_over_payment() {
        let pay = payment(100);
        let inv = invoice(1000);
        let lines = [AllocationLine {
            invoice_id: inv.invoice.id,
            amount_minor: 150,
        }];

        let err = plan_allocation(&pay, &[inv], &lines).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Validation(ValidationError::ExceedsPaymentUnallocated {
                requested: 150,
                available: 100,
                excess: 50,
                ..
            })
        ));
    }

    #[test]
    fn test_plan_allocation_total_cannot_overflow() {
        let pay = payment(1000);
        let a = invoice(500);
        let b = invoice(500);
        let lines = [
            AllocationLine {
                invoice_id: a.invoice.id,
                amount_minor: i64::MAX,
            },
            AllocationLine {
                invoice_id: b.invoice.id,
                amount_minor: i64::MAX,
            },
        ];

        let err = plan_allocation(&pay, &[a, b], &lines).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Validation(ValidationError::ExceedsPaymentUnallocated {
                requested: i64::MAX,
                available: 1000,
                excess,
                ..
            }) if excess == i64::MAX - 1000
        ));
    }

    #[tokio::test]
    async fn test_second_plan_from_same_snapshot_is_stale() {
        let store = InMemoryLedger::new();
        let pay = payment(1000);
        let first = invoice(1000);
        let second = invoice(1000);
        store
            .commit(
                "t1",
                LedgerChanges {
                    invoices: vec![first.invoice.clone(), second.invoice.clone()],
                    payments: vec![pay.payment.clone()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Both requests read the payment before either commits
        let line = |invoice_id| {
            [AllocationLine {
                invoice_id,
                amount_minor: 1000,
            }]
        };
        let plan_a = plan_allocation(&pay, &[first.clone()], &line(first.invoice.id)).unwrap();
        let plan_b = plan_allocation(&pay, &[second.clone()], &line(second.invoice.id)).unwrap();

        store
            .commit("t1", plan_a.into_changes(EVENT_ALLOCATION_CREATED).unwrap())
            .await
            .unwrap();
        let err = store
            .commit("t1", plan_b.into_changes(EVENT_ALLOCATION_CREATED).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleRecord { table: "payments", .. }));

        let stored = store.payment("t1", pay.payment.id).await.unwrap().unwrap();
        assert_eq!(stored.unallocated_minor, 0);
        assert_eq!(store.all_allocations("t1").await.len(), 1);
    }

    #[test]
    fn test_plan_allocation_sums_lines_on_same_invoice() {
        let pay = payment(1000);
        let inv = invoice(500);
        let id = inv.invoice.id;
        let lines = [
            AllocationLine {
                invoice_id: id,
                amount_minor: 300,
            },
            AllocationLine {
                invoice_id: id,
                amount_minor: 300,
            },
        ];

        let err = plan_allocation(&pay, &[inv], &lines).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Validation(ValidationError::ExceedsInvoiceOutstanding {
                requested: 300,
                outstanding: 200,
                excess: 100,
                ..
            })
        ));
    }

    #[test]
    fn test_plan_allocation_rejects_foreign_party_and_direction() {
        let pay = payment(1000);
        let mut other_party = invoice(500);
        other_party.invoice.party_id = "cust-2".to_string();
        let lines = [AllocationLine {
            invoice_id: other_party.invoice.id,
            amount_minor: 100,
        }];
        let err = plan_allocation(&pay, &[other_party], &lines).unwrap_err();
        assert_eq!(err.reason(), "party_mismatch");

        let mut purchase = invoice(500);
        purchase.invoice.kind = InvoiceKind::Purchase;
        let lines = [AllocationLine {
            invoice_id: purchase.invoice.id,
            amount_minor: 100,
        }];
        let err = plan_allocation(&pay, &[purchase], &lines).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Validation(ValidationError::DirectionMismatch { .. })
        ));
    }

    #[test]
    fn test_plan_allocation_requires_submitted_payment() {
        let mut pay = payment(1000);
        pay.payment.status = PaymentDocStatus::Draft;
        let inv = invoice(500);
        let lines = [AllocationLine {
            invoice_id: inv.invoice.id,
            amount_minor: 100,
        }];

        let err = plan_allocation(&pay, &[inv], &lines).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Validation(ValidationError::PaymentNotSubmitted { .. })
        ));
    }

    #[test]
    fn test_plan_update_checks_other_allocations_on_invoice() {
        let mut pay = payment(1000);
        let mut inv = invoice(500);
        let other = PaymentAllocation::active("t1", PaymentId::new(), inv.invoice.id, 300);
        let mine = PaymentAllocation::active("t1", pay.payment.id, inv.invoice.id, 100);
        inv.active = vec![other, mine.clone()];
        pay.active = vec![mine.clone()];

        let err = plan_update(&mine, 250, &pay, &inv).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Validation(ValidationError::ExceedsInvoiceOutstanding {
                outstanding: 200,
                excess: 50,
                ..
            })
        ));

        let plan = plan_update(&mine, 200, &pay, &inv).unwrap();
        assert_eq!(plan.allocations[0].allocated_minor, 200);
        assert_eq!(plan.payment.unallocated_minor, 800);
        assert_eq!(plan.invoices[0].payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_plan_deallocation_rejects_deleted_row() {
        let pay = payment(1000);
        let inv = invoice(500);
        let mut row = PaymentAllocation::active("t1", pay.payment.id, inv.invoice.id, 100);
        row.mark_deleted();

        let err = plan_deallocation(&row, &pay, &inv).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Validation(ValidationError::AllocationDeleted(_))
        ));
    }
}
