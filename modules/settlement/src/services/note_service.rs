//! Credit/debit note settlement
//!
//! Applying a note runs, in order:
//!
//! 1. Status guard: only a draft note takes effect, exactly once
//! 2. Note Validator: kind, party and cumulative ceiling against the invoice
//! 3. LIFO reversal of allocations above the invoice's new total
//! 4. Settlement Router: refund or adjustment
//! 5. One guarded commit of every ledger record touched
//! 6. Journal postings: the standard entry, then the route's entry
//! 7. Audit Writer: journal references stamped onto the note
//!
//! Steps 1 to 4 are pure ([`plan_note`]); nothing is written when they fail.
//! A missing account in step 6 skips that entry and is reported as a
//! [`DegradedOperation`]; the ledger mutation of step 5 stands.

use chrono::Utc;
use serde::Serialize;

use super::audit_writer::{stamp, write_audit, NoteAudit};
use super::lifo_reversal::{plan_reversal, ReversalPlan, ReversalStep};
use super::note_validator::{check_note_ceiling, check_note_reference, NoteCeiling};
use super::settlement_router::{
    adjusted_invoice, posting_roles, refund_payment, route_settlement, target_total,
    SettlementRoute,
};
use super::{
    load_invoice, outbox_event, overlay_active, refreshed_payment, rejected, InvoiceSnapshot,
    PaymentSnapshot,
};
use crate::context::SettlementContext;
use crate::domain::{
    sum_active, Invoice, InvoiceId, JournalEntryId, JournalPurpose, Note, NoteId, NoteStatus,
    Payment, PaymentAllocation, PaymentId,
};
use crate::error::{
    DegradedOperation, InvariantViolation, SettlementError, SettlementResult, StoreError,
    ValidationError,
};
use crate::journal::{post_two_line, PostingOutcome, TwoLinePosting};
use crate::metrics::SettlementMetrics;
use crate::store::{
    LedgerChanges, NoteGuard, VersionGuard, EVENT_ALLOCATION_DELETED, EVENT_ALLOCATION_UPDATED,
    EVENT_NOTE_APPLIED, EVENT_NOTE_SUBMITTED, EVENT_REFUND_DRAFTED,
};

/// Ledger records produced by a note, before anything is written
#[derive(Debug, Clone)]
pub struct NotePlan {
    /// The note moved to submitted, with its settlement flags set
    pub note: Note,
    pub route: SettlementRoute,
    pub ceiling: Option<NoteCeiling>,
    pub reversal: Option<ReversalPlan>,
    pub invoice: Option<Invoice>,
    /// How much the invoice total went down
    pub adjustment_minor: i64,
    pub allocations: Vec<PaymentAllocation>,
    pub payments: Vec<Payment>,
    pub refund: Option<Payment>,
    /// Versions of the invoice and payment snapshots the plan read
    pub versions: Vec<VersionGuard>,
}

/// Outcome of [`apply_note`]
#[derive(Debug, Clone, Serialize)]
pub struct NoteSettlement {
    pub note: Note,
    pub route: SettlementRoute,
    pub standard_journal_entry_id: Option<JournalEntryId>,
    pub adjustment_journal_entry_id: Option<JournalEntryId>,
    pub refund_payment_id: Option<PaymentId>,
    pub refund_journal_entry_id: Option<JournalEntryId>,
    pub reversed: Vec<ReversalStep>,
    /// Journal entries skipped for want of an account
    pub degraded: Vec<DegradedOperation>,
}

#[derive(Debug, Serialize)]
struct NoteSubmittedPayload<'a> {
    note_id: NoteId,
    kind: &'a str,
    amount_minor: i64,
    reference_invoice_id: Option<InvoiceId>,
    route: SettlementRoute,
    reversed_minor: i64,
}

/// Work out everything a draft note does to the ledger.
///
/// `invoice` must be the snapshot of the referenced invoice (if any) and
/// `payments` must hold every payment with an active allocation on it.
pub fn plan_note(
    note: &Note,
    invoice: Option<&InvoiceSnapshot>,
    payments: &[PaymentSnapshot],
) -> SettlementResult<NotePlan> {
    if note.status != NoteStatus::Draft {
        return Err(SettlementError::NoteAlreadyApplied(note.id));
    }
    if note.amount_minor <= 0 {
        return Err(ValidationError::NonPositiveAmount(note.amount_minor).into());
    }

    let now = Utc::now();
    let mut submitted = note.clone();
    submitted.status = NoteStatus::Submitted;
    submitted.submitted_at = Some(now);
    submitted.updated_at = now;

    let Some(invoice_id) = note.reference_invoice_id else {
        return Ok(NotePlan {
            note: submitted,
            route: SettlementRoute::Unlinked,
            ceiling: None,
            reversal: None,
            invoice: None,
            adjustment_minor: 0,
            allocations: Vec::new(),
            payments: Vec::new(),
            refund: None,
            versions: Vec::new(),
        });
    };

    let snapshot = invoice
        .filter(|s| s.invoice.id == invoice_id)
        .ok_or(ValidationError::InvoiceNotFound(invoice_id))?;
    let current = &snapshot.invoice;

    check_note_reference(note, current)?;
    let ceiling = check_note_ceiling(current, note.amount_minor)?;

    let target = target_total(current, note.amount_minor);
    let allocated_before = snapshot.allocated();
    let reversal = plan_reversal(current.id, &snapshot.active, target)?;
    let allocations = reversal.apply(&snapshot.active);
    let allocated_after = sum_active(&overlay_active(&snapshot.active, &allocations));

    let mut versions = vec![VersionGuard::invoice(current)];
    let mut payments_after: Vec<Payment> = Vec::new();
    for step in &reversal.steps {
        if payments_after.iter().any(|p| p.id == step.payment_id) {
            continue;
        }
        let payment = payments
            .iter()
            .find(|p| p.payment.id == step.payment_id)
            .ok_or(InvariantViolation::DanglingAllocation {
                allocation_id: step.allocation_id,
                payment_id: step.payment_id,
            })?;
        versions.push(VersionGuard::payment(&payment.payment));
        payments_after.push(refreshed_payment(
            &payment.payment,
            &overlay_active(&payment.active, &allocations),
        )?);
    }

    let route = route_settlement(
        allocated_before,
        allocated_after,
        target,
        note.amount_minor,
        current.original_total_minor,
    );
    let invoice_after = adjusted_invoice(current, note, &reversal, allocated_after);
    let refund = match route {
        SettlementRoute::Refund { refund_minor } => {
            Some(refund_payment(current, note, refund_minor))
        }
        _ => None,
    };

    let submitted = stamp(
        &submitted,
        &NoteAudit {
            refund_payment_id: refund.as_ref().map(|p| p.id),
            invoice_adjusted: true,
            refund_created: refund.is_some(),
            allocations_reversed: !reversal.is_empty(),
            ..Default::default()
        },
    );

    Ok(NotePlan {
        note: submitted,
        route,
        ceiling: Some(ceiling),
        adjustment_minor: current.total_minor - invoice_after.total_minor,
        invoice: Some(invoice_after),
        reversal: Some(reversal),
        allocations,
        payments: payments_after,
        refund,
        versions,
    })
}

impl NotePlan {
    fn reversed_minor(&self) -> i64 {
        self.reversal.as_ref().map_or(0, |r| r.reversed_minor)
    }

    fn into_changes(self) -> SettlementResult<LedgerChanges> {
        let mut events = Vec::new();
        for allocation in &self.allocations {
            let event_type = if allocation.is_active() {
                EVENT_ALLOCATION_UPDATED
            } else {
                EVENT_ALLOCATION_DELETED
            };
            events.push(outbox_event(
                event_type,
                "payment_allocation",
                allocation.id,
                allocation,
            )?);
        }

        events.push(outbox_event(
            EVENT_NOTE_SUBMITTED,
            "note",
            self.note.id,
            &NoteSubmittedPayload {
                note_id: self.note.id,
                kind: self.note.kind.as_str(),
                amount_minor: self.note.amount_minor,
                reference_invoice_id: self.note.reference_invoice_id,
                route: self.route,
                reversed_minor: self.reversed_minor(),
            },
        )?);

        let mut payments = self.payments;
        if let Some(refund) = self.refund {
            events.push(outbox_event(EVENT_REFUND_DRAFTED, "payment", refund.id, &refund)?);
            payments.push(refund);
        }

        Ok(LedgerChanges {
            invoices: self.invoice.into_iter().collect(),
            payments,
            allocations: self.allocations,
            note_guard: Some(NoteGuard {
                note_id: self.note.id,
                expected: NoteStatus::Draft,
            }),
            versions: self.versions,
            notes: vec![self.note],
            events,
        })
    }
}

/// Apply a draft credit or debit note
pub async fn apply_note(
    ctx: &SettlementContext,
    tenant_id: &str,
    note_id: NoteId,
) -> SettlementResult<NoteSettlement> {
    let started = SettlementMetrics::timer();
    let result = settle(ctx, tenant_id, note_id).await;
    ctx.metrics.observe("apply_note", started);
    result.map_err(|e| rejected(ctx, tenant_id, "apply_note", e))
}

async fn settle(
    ctx: &SettlementContext,
    tenant_id: &str,
    note_id: NoteId,
) -> SettlementResult<NoteSettlement> {
    let note = ctx
        .store
        .note(tenant_id, note_id)
        .await?
        .ok_or(ValidationError::NoteNotFound(note_id))?;
    if note.status != NoteStatus::Draft {
        return Err(SettlementError::NoteAlreadyApplied(note_id));
    }

    let invoice = match note.reference_invoice_id {
        Some(invoice_id) => Some(load_invoice(ctx, tenant_id, invoice_id).await?),
        None => None,
    };

    let mut payments: Vec<PaymentSnapshot> = Vec::new();
    if let Some(snapshot) = &invoice {
        for allocation in &snapshot.active {
            if payments.iter().any(|p| p.payment.id == allocation.payment_id) {
                continue;
            }
            // A missing payment is reported by the planner if it matters
            if let Some(payment) = ctx.store.payment(tenant_id, allocation.payment_id).await? {
                let active = ctx
                    .store
                    .active_allocations_for_payment(tenant_id, payment.id)
                    .await?;
                payments.push(PaymentSnapshot { payment, active });
            }
        }
    }

    let plan = plan_note(&note, invoice.as_ref(), &payments)?;
    let route = plan.route;
    let submitted = plan.note.clone();
    let adjustment_minor = plan.adjustment_minor;
    let refund_payment_id = plan.refund.as_ref().map(|p| p.id);
    let reversed: Vec<ReversalStep> = plan
        .reversal
        .as_ref()
        .map(|r| r.steps.clone())
        .unwrap_or_default();
    let reversed_minor = plan.reversed_minor();

    match ctx.store.commit(tenant_id, plan.into_changes()?).await {
        Ok(()) => {}
        Err(StoreError::NoteGuardFailed { .. }) => {
            return Err(SettlementError::NoteAlreadyApplied(note_id));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        tenant_id = %tenant_id,
        note_id = %note_id,
        kind = %note.kind,
        amount_minor = note.amount_minor,
        route = %route,
        reversed_minor,
        "Note submitted"
    );

    // Journal postings happen after the ledger commit; a skipped entry
    // never undoes it.
    let mut degraded = Vec::new();
    let mut audit = NoteAudit {
        refund_payment_id,
        invoice_adjusted: submitted.invoice_adjusted,
        refund_created: submitted.refund_created,
        allocations_reversed: submitted.allocations_reversed,
        ..Default::default()
    };

    let standard = post(ctx, tenant_id, &note, JournalPurpose::NoteStandard, note.amount_minor)
        .await?;
    audit.standard_journal_entry_id = standard.entry_id();
    degraded.extend(standard.degraded().cloned());

    match route {
        SettlementRoute::Adjustment if adjustment_minor > 0 => {
            let outcome = post(
                ctx,
                tenant_id,
                &note,
                JournalPurpose::InvoiceAdjustment,
                adjustment_minor,
            )
            .await?;
            audit.invoice_adjustment_je_id = outcome.entry_id();
            degraded.extend(outcome.degraded().cloned());
        }
        SettlementRoute::Refund { refund_minor } => {
            let outcome = post(ctx, tenant_id, &note, JournalPurpose::Refund, refund_minor).await?;
            audit.refund_journal_entry_id = outcome.entry_id();
            degraded.extend(outcome.degraded().cloned());
        }
        _ => {}
    }

    let stamped = write_audit(ctx, tenant_id, &submitted, &audit).await?;

    ctx.metrics
        .notes_applied_total
        .with_label_values(&[note.kind.as_str(), route.as_str()])
        .inc();
    for step in &reversed {
        let mode = if step.fully_reversed { "full" } else { "partial" };
        ctx.metrics
            .allocations_reversed_total
            .with_label_values(&[mode])
            .inc();
    }

    Ok(NoteSettlement {
        note: stamped,
        route,
        standard_journal_entry_id: audit.standard_journal_entry_id,
        adjustment_journal_entry_id: audit.invoice_adjustment_je_id,
        refund_payment_id,
        refund_journal_entry_id: audit.refund_journal_entry_id,
        reversed,
        degraded,
    })
}

async fn post(
    ctx: &SettlementContext,
    tenant_id: &str,
    note: &Note,
    purpose: JournalPurpose,
    amount_minor: i64,
) -> SettlementResult<PostingOutcome> {
    let (debit, credit) = posting_roles(note.kind, purpose);
    let reference_id = note.id.to_string();

    let outcome = post_two_line(
        ctx.accounts.as_ref(),
        ctx.journal.as_ref(),
        tenant_id,
        &ctx.currency,
        TwoLinePosting {
            purpose,
            debit,
            credit,
            amount_minor,
            reference_type: note.kind.as_str(),
            reference_id: &reference_id,
        },
    )
    .await?;

    if let Some(skipped) = outcome.degraded() {
        ctx.metrics
            .journal_degraded_total
            .with_label_values(&[skipped.purpose.as_str(), skipped.missing_role.as_str()])
            .inc();
    }
    Ok(outcome)
}

/// Move a submitted note to its terminal applied state
pub async fn mark_note_applied(
    ctx: &SettlementContext,
    tenant_id: &str,
    note_id: NoteId,
) -> SettlementResult<Note> {
    let result: SettlementResult<Note> = async {
        let note = ctx
            .store
            .note(tenant_id, note_id)
            .await?
            .ok_or(ValidationError::NoteNotFound(note_id))?;

        if !note.status.can_transition_to(NoteStatus::Applied) {
            return Err(SettlementError::InvalidNoteTransition {
                note_id,
                from: note.status,
                to: NoteStatus::Applied,
            });
        }

        let mut applied = note.clone();
        applied.status = NoteStatus::Applied;
        applied.updated_at = Utc::now();

        let changes = LedgerChanges {
            notes: vec![applied.clone()],
            note_guard: Some(NoteGuard {
                note_id,
                expected: NoteStatus::Submitted,
            }),
            events: vec![outbox_event(EVENT_NOTE_APPLIED, "note", note_id, &applied)?],
            ..Default::default()
        };

        match ctx.store.commit(tenant_id, changes).await {
            Ok(()) => {}
            Err(StoreError::NoteGuardFailed { found, .. }) => {
                return Err(SettlementError::InvalidNoteTransition {
                    note_id,
                    from: found.unwrap_or(note.status),
                    to: NoteStatus::Applied,
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(tenant_id = %tenant_id, note_id = %note_id, "Note applied");
        Ok(applied)
    }
    .await;

    result.map_err(|e| rejected(ctx, tenant_id, "mark_note_applied", e))
}
