//! Credit/debit note settlement end to end against the in-memory ledger

mod common;

use common::{harness, harness_with_accounts, TENANT};
use settlement_rs::domain::{
    AccountRole, AllocationStatus, JournalPurpose, NoteStatus, PaymentDirection, PaymentDocStatus,
    PaymentStatus,
};
use settlement_rs::error::DegradedOperation;
use settlement_rs::journal::StaticAccountDirectory;
use settlement_rs::store::{EVENT_NOTE_SUBMITTED, EVENT_REFUND_DRAFTED};
use settlement_rs::{
    apply_note, check_tenant, mark_note_applied, SettlementError, SettlementRoute, ValidationError,
};

#[tokio::test]
async fn test_note_on_fully_paid_invoice_refunds() {
    let h = harness();
    let invoice = h.sales_invoice("cust-1", 1000).await;
    let payment = h.receipt("cust-1", 1000).await;
    let allocation = h.allocate(payment.id, invoice.id, 1000).await;
    let note = h.credit_note("cust-1", Some(invoice.id), 400).await;

    let outcome = apply_note(&h.ctx, TENANT, note.id).await.unwrap();

    assert_eq!(outcome.route, SettlementRoute::Refund { refund_minor: 400 });
    assert!(outcome.degraded.is_empty());
    assert_eq!(outcome.adjustment_journal_entry_id, None);

    // LIFO reversal took 400 off the only allocation
    assert_eq!(h.allocation(allocation.id).await.allocated_minor, 600);
    assert_eq!(h.payment(payment.id).await.unallocated_minor, 400);

    let refund_id = outcome.refund_payment_id.unwrap();
    let refund = h.payment(refund_id).await;
    assert_eq!(refund.amount_minor, 400);
    assert_eq!(refund.status, PaymentDocStatus::Draft);
    assert_eq!(refund.direction, PaymentDirection::Pay);
    assert_eq!(refund.refund_of_note_id, Some(note.id));

    let updated = h.invoice(invoice.id).await;
    assert_eq!(updated.original_total_minor, 1000);
    assert_eq!(updated.total_minor, 600);
    assert_eq!(updated.total_notes_minor, 400);
    assert_eq!(updated.notes, vec![note.id]);
    assert_eq!(updated.payment_status, PaymentStatus::Paid);
    assert_eq!(updated.last_reversal_note_id, Some(note.id));
    assert_eq!(updated.last_reversed_minor, 400);

    let refund_entry = h
        .journal
        .entry(outcome.refund_journal_entry_id.unwrap())
        .await
        .unwrap();
    assert!(refund_entry.draft.is_balanced());
    assert_eq!(refund_entry.draft.totals(), (400, 400));
    assert_eq!(refund_entry.draft.lines[0].account_ref, "1100");
    assert_eq!(refund_entry.draft.lines[1].account_ref, "1000");

    let standard = h
        .journal
        .entry(outcome.standard_journal_entry_id.unwrap())
        .await
        .unwrap();
    assert_eq!(standard.draft.purpose, JournalPurpose::NoteStandard);
    assert_eq!(standard.draft.lines[0].account_ref, "4100");
    assert_eq!(standard.draft.lines[1].account_ref, "1100");

    let stamped = h.note(note.id).await;
    assert_eq!(stamped.status, NoteStatus::Submitted);
    assert!(stamped.submitted_at.is_some());
    assert_eq!(stamped.refund_payment_id, Some(refund_id));
    assert_eq!(
        stamped.refund_journal_entry_id,
        outcome.refund_journal_entry_id
    );
    assert_eq!(
        stamped.standard_journal_entry_id,
        outcome.standard_journal_entry_id
    );
    assert!(stamped.refund_created);
    assert!(stamped.allocations_reversed);

    let types: Vec<String> = h
        .ledger
        .events()
        .await
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert!(types.iter().any(|t| t == EVENT_NOTE_SUBMITTED));
    assert!(types.iter().any(|t| t == EVENT_REFUND_DRAFTED));
}

#[tokio::test]
async fn test_note_on_partially_paid_invoice_adjusts() {
    let h = harness();
    let invoice = h.sales_invoice("cust-1", 1000).await;
    let payment = h.receipt("cust-1", 500).await;
    let allocation = h.allocate(payment.id, invoice.id, 500).await;
    let note = h.credit_note("cust-1", Some(invoice.id), 200).await;

    let outcome = apply_note(&h.ctx, TENANT, note.id).await.unwrap();

    assert_eq!(outcome.route, SettlementRoute::Adjustment);
    assert!(outcome.reversed.is_empty());
    assert_eq!(outcome.refund_payment_id, None);

    let updated = h.invoice(invoice.id).await;
    assert_eq!(updated.total_minor, 800);
    assert_eq!(updated.total_notes_minor, 200);
    assert_eq!(updated.payment_status, PaymentStatus::PartiallyPaid);
    assert_eq!(updated.last_reversal_note_id, None);

    assert_eq!(h.allocation(allocation.id).await.allocated_minor, 500);
    assert_eq!(h.payment(payment.id).await.unallocated_minor, 0);

    let entry = h
        .journal
        .entry(outcome.adjustment_journal_entry_id.unwrap())
        .await
        .unwrap();
    assert_eq!(entry.draft.purpose, JournalPurpose::InvoiceAdjustment);
    assert_eq!(entry.draft.totals(), (200, 200));

    let stamped = h.note(note.id).await;
    assert!(stamped.invoice_adjusted);
    assert!(!stamped.refund_created);
    assert_eq!(
        stamped.invoice_adjustment_je_id,
        outcome.adjustment_journal_entry_id
    );
}

#[tokio::test]
async fn test_cumulative_notes_capped_by_original_total() {
    let h = harness();
    let invoice = h.sales_invoice("cust-1", 1000).await;
    let first = h.credit_note("cust-1", Some(invoice.id), 600).await;
    let second = h.credit_note("cust-1", Some(invoice.id), 500).await;

    apply_note(&h.ctx, TENANT, first.id).await.unwrap();
    assert_eq!(h.invoice(invoice.id).await.total_notes_minor, 600);

    let err = apply_note(&h.ctx, TENANT, second.id).await.unwrap_err();
    match err {
        SettlementError::Validation(ValidationError::NoteCeilingExceeded {
            original_total,
            already_applied,
            available,
            requested,
            ..
        }) => {
            assert_eq!(original_total, 1000);
            assert_eq!(already_applied, 600);
            assert_eq!(available, 400);
            assert_eq!(requested, 500);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The rejected note stays a draft and the invoice is untouched
    assert_eq!(h.note(second.id).await.status, NoteStatus::Draft);
    let invoice = h.invoice(invoice.id).await;
    assert_eq!(invoice.total_notes_minor, 600);
    assert_eq!(invoice.total_minor, 400);
}

#[tokio::test]
async fn test_huge_note_amount_cannot_wrap_past_ceiling() {
    let h = harness();
    let invoice = h.sales_invoice("cust-1", 1000).await;
    let first = h.credit_note("cust-1", Some(invoice.id), 600).await;
    let huge = h.credit_note("cust-1", Some(invoice.id), i64::MAX).await;
    apply_note(&h.ctx, TENANT, first.id).await.unwrap();

    let err = apply_note(&h.ctx, TENANT, huge.id).await.unwrap_err();
    match err {
        SettlementError::Validation(ValidationError::NoteCeilingExceeded {
            requested,
            available,
            ..
        }) => {
            assert_eq!(requested, i64::MAX);
            assert_eq!(available, 400);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(h.note(huge.id).await.status, NoteStatus::Draft);
    let invoice = h.invoice(invoice.id).await;
    assert_eq!(invoice.total_notes_minor, 600);
    assert_eq!(invoice.total_minor, 400);
    let report = check_tenant(&h.ledger, TENANT).await.unwrap();
    assert!(report.is_clean(), "breaches: {:?}", report.breaches);
}

#[tokio::test]
async fn test_reversal_consumes_newest_allocation_first() {
    let h = harness();
    let invoice = h.sales_invoice("cust-1", 500).await;
    let older_payment = h.receipt("cust-1", 300).await;
    let newer_payment = h.receipt("cust-1", 200).await;
    let older = h.allocate(older_payment.id, invoice.id, 300).await;
    let newer = h.allocate(newer_payment.id, invoice.id, 200).await;
    let note = h.credit_note("cust-1", Some(invoice.id), 150).await;

    let outcome = apply_note(&h.ctx, TENANT, note.id).await.unwrap();

    assert_eq!(outcome.reversed.len(), 1);
    assert_eq!(outcome.reversed[0].allocation_id, newer.id);
    assert_eq!(h.allocation(newer.id).await.allocated_minor, 50);
    assert_eq!(h.allocation(older.id).await.allocated_minor, 300);
    assert_eq!(h.payment(newer_payment.id).await.unallocated_minor, 150);
    assert_eq!(h.payment(older_payment.id).await.unallocated_minor, 0);
}

#[tokio::test]
async fn test_reversal_deletes_exhausted_allocation() {
    let h = harness();
    let invoice = h.sales_invoice("cust-1", 500).await;
    let older_payment = h.receipt("cust-1", 300).await;
    let newer_payment = h.receipt("cust-1", 200).await;
    let older = h.allocate(older_payment.id, invoice.id, 300).await;
    let newer = h.allocate(newer_payment.id, invoice.id, 200).await;
    let note = h.credit_note("cust-1", Some(invoice.id), 250).await;

    let outcome = apply_note(&h.ctx, TENANT, note.id).await.unwrap();

    assert_eq!(outcome.reversed.len(), 2);
    assert!(outcome.reversed[0].fully_reversed);
    assert_eq!(h.allocation(newer.id).await.status, AllocationStatus::Deleted);
    assert_eq!(h.allocation(older.id).await.allocated_minor, 250);
    assert_eq!(h.payment(newer_payment.id).await.unallocated_minor, 200);
    assert_eq!(h.payment(older_payment.id).await.unallocated_minor, 50);
    assert_eq!(h.invoice(invoice.id).await.total_minor, 250);
}

#[tokio::test]
async fn test_reapplying_note_is_rejected() {
    let h = harness();
    let invoice = h.sales_invoice("cust-1", 1000).await;
    let note = h.credit_note("cust-1", Some(invoice.id), 300).await;

    apply_note(&h.ctx, TENANT, note.id).await.unwrap();
    let entries_after_first = h.journal.entries().await.len();

    let err = apply_note(&h.ctx, TENANT, note.id).await.unwrap_err();
    assert!(matches!(err, SettlementError::NoteAlreadyApplied(id) if id == note.id));
    assert!(!err.is_retriable());

    let invoice = h.invoice(invoice.id).await;
    assert_eq!(invoice.total_notes_minor, 300);
    assert_eq!(invoice.total_minor, 700);
    assert_eq!(invoice.notes.len(), 1);
    assert_eq!(h.journal.entries().await.len(), entries_after_first);
}

#[tokio::test]
async fn test_missing_account_degrades_without_rollback() {
    let h = harness_with_accounts(StaticAccountDirectory::standard().without(AccountRole::Cash));
    let invoice = h.sales_invoice("cust-1", 1000).await;
    let payment = h.receipt("cust-1", 1000).await;
    h.allocate(payment.id, invoice.id, 1000).await;
    let note = h.credit_note("cust-1", Some(invoice.id), 400).await;

    let outcome = apply_note(&h.ctx, TENANT, note.id).await.unwrap();

    assert_eq!(
        outcome.degraded,
        vec![DegradedOperation {
            purpose: JournalPurpose::Refund,
            missing_role: AccountRole::Cash,
        }]
    );
    assert!(outcome.standard_journal_entry_id.is_some());
    assert_eq!(outcome.refund_journal_entry_id, None);

    // Financial mutation stands
    assert!(outcome.refund_payment_id.is_some());
    assert_eq!(h.invoice(invoice.id).await.total_minor, 600);
    assert_eq!(h.payment(payment.id).await.unallocated_minor, 400);
    assert_eq!(h.journal.entries().await.len(), 1);

    let text = h.ctx.metrics.render().unwrap();
    assert!(text.contains("settlement_journal_degraded_total"));
}

#[tokio::test]
async fn test_debit_note_mirrors_credit_note() {
    let h = harness();
    let invoice = h.purchase_invoice("supp-1", 1000).await;
    let payment = h.disbursement("supp-1", 1000).await;
    h.allocate(payment.id, invoice.id, 1000).await;
    let note = h.debit_note("supp-1", Some(invoice.id), 400).await;

    let outcome = apply_note(&h.ctx, TENANT, note.id).await.unwrap();
    assert_eq!(outcome.route, SettlementRoute::Refund { refund_minor: 400 });

    let refund = h.payment(outcome.refund_payment_id.unwrap()).await;
    assert_eq!(refund.direction, PaymentDirection::Receive);
    assert_eq!(refund.party_id, "supp-1");

    let standard = h
        .journal
        .entry(outcome.standard_journal_entry_id.unwrap())
        .await
        .unwrap();
    assert_eq!(standard.draft.lines[0].account_ref, "2000");
    assert_eq!(standard.draft.lines[1].account_ref, "5100");

    let refund_entry = h
        .journal
        .entry(outcome.refund_journal_entry_id.unwrap())
        .await
        .unwrap();
    assert_eq!(refund_entry.draft.lines[0].account_ref, "1000");
    assert_eq!(refund_entry.draft.lines[1].account_ref, "2000");
}

#[tokio::test]
async fn test_note_for_other_party_is_rejected() {
    let h = harness();
    let invoice = h.sales_invoice("cust-1", 1000).await;
    let note = h.credit_note("cust-2", Some(invoice.id), 100).await;

    let err = apply_note(&h.ctx, TENANT, note.id).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::Validation(ValidationError::PartyMismatch { .. })
    ));
    assert_eq!(h.note(note.id).await.status, NoteStatus::Draft);
    assert_eq!(h.invoice(invoice.id).await.total_notes_minor, 0);
    assert!(h.journal.entries().await.is_empty());
}

#[tokio::test]
async fn test_credit_note_cannot_reference_purchase_invoice() {
    let h = harness();
    let invoice = h.purchase_invoice("supp-1", 1000).await;
    let note = h.credit_note("supp-1", Some(invoice.id), 100).await;

    let err = apply_note(&h.ctx, TENANT, note.id).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::Validation(ValidationError::NoteKindMismatch { .. })
    ));
}

#[tokio::test]
async fn test_unlinked_note_posts_standard_entry_only() {
    let h = harness();
    let note = h.credit_note("cust-1", None, 250).await;

    let outcome = apply_note(&h.ctx, TENANT, note.id).await.unwrap();

    assert_eq!(outcome.route, SettlementRoute::Unlinked);
    assert!(outcome.standard_journal_entry_id.is_some());
    assert_eq!(outcome.adjustment_journal_entry_id, None);
    assert_eq!(outcome.refund_payment_id, None);
    assert_eq!(h.journal.entries().await.len(), 1);
    assert_eq!(h.note(note.id).await.status, NoteStatus::Submitted);
}

#[tokio::test]
async fn test_unpaid_invoice_full_note_adjusts_to_zero() {
    let h = harness();
    let invoice = h.sales_invoice("cust-1", 1000).await;
    let note = h.credit_note("cust-1", Some(invoice.id), 1000).await;

    let outcome = apply_note(&h.ctx, TENANT, note.id).await.unwrap();

    assert_eq!(outcome.route, SettlementRoute::Adjustment);
    let invoice = h.invoice(invoice.id).await;
    assert_eq!(invoice.total_minor, 0);
    assert_eq!(invoice.payment_status, PaymentStatus::Unpaid);
}

#[tokio::test]
async fn test_mark_applied_after_submission_only() {
    let h = harness();
    let note = h.credit_note("cust-1", None, 100).await;

    let err = mark_note_applied(&h.ctx, TENANT, note.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InvalidNoteTransition {
            from: NoteStatus::Draft,
            to: NoteStatus::Applied,
            ..
        }
    ));

    apply_note(&h.ctx, TENANT, note.id).await.unwrap();
    let applied = mark_note_applied(&h.ctx, TENANT, note.id).await.unwrap();
    assert_eq!(applied.status, NoteStatus::Applied);
    assert_eq!(h.note(note.id).await.status, NoteStatus::Applied);

    // Terminal
    assert!(mark_note_applied(&h.ctx, TENANT, note.id).await.is_err());
    assert!(matches!(
        apply_note(&h.ctx, TENANT, note.id).await,
        Err(SettlementError::NoteAlreadyApplied(_))
    ));
}

#[tokio::test]
async fn test_unknown_note_is_not_found() {
    let h = harness();
    let err = apply_note(&h.ctx, TENANT, settlement_rs::domain::NoteId::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::Validation(ValidationError::NoteNotFound(_))
    ));
}
