//! Note Validator
//!
//! Cumulative notes against an invoice are capped by its original total, the
//! value frozen at first submission. The shrinking current total is never the
//! reference: two 60% notes against one invoice sum to 120% and the second is
//! rejected even though the current total has already dropped to 40%.

use serde::Serialize;

use crate::domain::{Invoice, Note};
use crate::error::ValidationError;

/// Accepted ceiling check, with the figures that justified it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NoteCeiling {
    pub original_total_minor: i64,
    pub already_applied_minor: i64,
    pub cumulative_minor: i64,
    /// Headroom left once this note is applied
    pub remaining_minor: i64,
}

/// Check `amount_minor` of a new note against the invoice's ceiling
pub fn check_note_ceiling(
    invoice: &Invoice,
    amount_minor: i64,
) -> Result<NoteCeiling, ValidationError> {
    if amount_minor <= 0 {
        return Err(ValidationError::NonPositiveAmount(amount_minor));
    }

    // Compared against the headroom so an oversized amount cannot wrap
    let available = invoice.note_headroom();
    if amount_minor > available {
        return Err(ValidationError::NoteCeilingExceeded {
            invoice_id: invoice.id,
            requested: amount_minor,
            original_total: invoice.original_total_minor,
            already_applied: invoice.total_notes_minor,
            available,
        });
    }
    let cumulative = invoice.total_notes_minor + amount_minor;

    Ok(NoteCeiling {
        original_total_minor: invoice.original_total_minor,
        already_applied_minor: invoice.total_notes_minor,
        cumulative_minor: cumulative,
        remaining_minor: invoice.original_total_minor - cumulative,
    })
}

/// Check that a note may reference this invoice at all
pub fn check_note_reference(note: &Note, invoice: &Invoice) -> Result<(), ValidationError> {
    if note.kind.invoice_kind() != invoice.kind {
        return Err(ValidationError::NoteKindMismatch {
            invoice_id: invoice.id,
            note_kind: note.kind,
            invoice_kind: invoice.kind,
        });
    }
    if note.party_id != invoice.party_id {
        return Err(ValidationError::PartyMismatch {
            invoice_id: invoice.id,
            invoice_party: invoice.party_id.clone(),
            other_party: note.party_id.clone(),
        });
    }
    Ok(())
}
