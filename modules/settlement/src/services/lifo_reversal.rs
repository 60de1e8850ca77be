//! LIFO allocation reversal
//!
//! When a note lowers an invoice's total below what has already been
//! allocated to it, the excess is taken back from the invoice's allocations,
//! newest first. Older settlements are left untouched for as long as
//! possible. A fully consumed allocation is soft-deleted; a partially
//! consumed one is reduced in place.

use chrono::Utc;
use serde::Serialize;

use crate::domain::{sum_active, AllocationId, InvoiceId, PaymentAllocation, PaymentId};
use crate::error::InvariantViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReversalStep {
    pub allocation_id: AllocationId,
    pub payment_id: PaymentId,
    pub taken_minor: i64,
    /// The whole allocation was consumed and is deleted
    pub fully_reversed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReversalPlan {
    pub invoice_id: InvoiceId,
    pub target_total_minor: i64,
    pub excess_minor: i64,
    pub reversed_minor: i64,
    pub steps: Vec<ReversalStep>,
}

impl ReversalPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Rows changed by the plan, ready to upsert
    pub fn apply(&self, active: &[PaymentAllocation]) -> Vec<PaymentAllocation> {
        let now = Utc::now();
        self.steps
            .iter()
            .filter_map(|step| {
                let mut row = active.iter().find(|a| a.id == step.allocation_id)?.clone();
                if step.fully_reversed {
                    row.mark_deleted();
                } else {
                    row.allocated_minor -= step.taken_minor;
                    row.updated_at = now;
                }
                Some(row)
            })
            .collect()
    }
}

/// Active allocations ordered newest first.
///
/// Ties on `created_at` fall back to reverse insertion order, so the input
/// must be in insertion order (as the store returns it).
pub fn newest_first(active: &[PaymentAllocation]) -> Vec<&PaymentAllocation> {
    let mut ordered: Vec<&PaymentAllocation> =
        active.iter().filter(|a| a.is_active()).rev().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    ordered
}

/// Plan the reversal that brings the invoice's allocated sum down to
/// `target_total_minor`.
///
/// Returns an empty plan when nothing exceeds the target. Running out of
/// allocations before the excess is covered means the ledger was already
/// inconsistent and is reported as an invariant violation.
pub fn plan_reversal(
    invoice_id: InvoiceId,
    active: &[PaymentAllocation],
    target_total_minor: i64,
) -> Result<ReversalPlan, InvariantViolation> {
    let excess = sum_active(active) - target_total_minor;

    let mut plan = ReversalPlan {
        invoice_id,
        target_total_minor,
        excess_minor: excess.max(0),
        reversed_minor: 0,
        steps: Vec::new(),
    };
    if excess <= 0 {
        return Ok(plan);
    }

    let mut remaining = excess;
    for allocation in newest_first(active) {
        if remaining == 0 {
            break;
        }
        let taken = allocation.allocated_minor.min(remaining);
        plan.steps.push(ReversalStep {
            allocation_id: allocation.id,
            payment_id: allocation.payment_id,
            taken_minor: taken,
            fully_reversed: taken == allocation.allocated_minor,
        });
        remaining -= taken;
    }

    if remaining > 0 {
        return Err(InvariantViolation::InsufficientAllocations {
            invoice_id,
            excess,
            remaining,
        });
    }

    plan.reversed_minor = excess;
    Ok(plan)
}
