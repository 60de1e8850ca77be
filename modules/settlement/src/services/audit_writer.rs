//! Audit Writer
//!
//! Stamps the outcome of a note settlement onto the note itself: the journal
//! entries that were appended, the refund payment (if any) and what the
//! settlement did to the referenced invoice.

use chrono::Utc;
use serde::Serialize;

use crate::context::SettlementContext;
use crate::domain::{JournalEntryId, Note, NoteStatus, PaymentId};
use crate::error::SettlementResult;
use crate::store::{LedgerChanges, NoteGuard};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NoteAudit {
    pub standard_journal_entry_id: Option<JournalEntryId>,
    pub invoice_adjustment_je_id: Option<JournalEntryId>,
    pub refund_payment_id: Option<PaymentId>,
    pub refund_journal_entry_id: Option<JournalEntryId>,
    pub invoice_adjusted: bool,
    pub refund_created: bool,
    pub allocations_reversed: bool,
}

/// Copy of `note` carrying the audit fields; the status is left alone.
///
/// Ids already present on the note are kept when the audit has none.
pub fn stamp(note: &Note, audit: &NoteAudit) -> Note {
    let mut stamped = note.clone();
    stamped.standard_journal_entry_id = audit
        .standard_journal_entry_id
        .or(note.standard_journal_entry_id);
    stamped.invoice_adjustment_je_id = audit
        .invoice_adjustment_je_id
        .or(note.invoice_adjustment_je_id);
    stamped.refund_payment_id = audit.refund_payment_id.or(note.refund_payment_id);
    stamped.refund_journal_entry_id = audit
        .refund_journal_entry_id
        .or(note.refund_journal_entry_id);
    stamped.invoice_adjusted = audit.invoice_adjusted;
    stamped.refund_created = audit.refund_created;
    stamped.allocations_reversed = audit.allocations_reversed;
    stamped.updated_at = Utc::now();
    stamped
}

/// Persist the journal references of a submitted note
pub async fn write_audit(
    ctx: &SettlementContext,
    tenant_id: &str,
    note: &Note,
    audit: &NoteAudit,
) -> SettlementResult<Note> {
    let stamped = stamp(note, audit);

    let changes = LedgerChanges {
        notes: vec![stamped.clone()],
        note_guard: Some(NoteGuard {
            note_id: note.id,
            expected: NoteStatus::Submitted,
        }),
        ..Default::default()
    };
    ctx.store.commit(tenant_id, changes).await?;

    tracing::debug!(
        tenant_id = %tenant_id,
        note_id = %note.id,
        standard_je = ?stamped.standard_journal_entry_id,
        adjustment_je = ?stamped.invoice_adjustment_je_id,
        refund_je = ?stamped.refund_journal_entry_id,
        "Note audit fields written"
    );

    Ok(stamped)
}
