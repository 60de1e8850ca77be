use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{InvoiceId, JournalEntryId, NoteId, PaymentId};
use super::invoice::InvoiceKind;

/// Credit note (sales side) or debit note (purchase side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    CreditNote,
    DebitNote,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditNote => "credit_note",
            Self::DebitNote => "debit_note",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "credit_note" => Some(Self::CreditNote),
            "debit_note" => Some(Self::DebitNote),
            _ => None,
        }
    }

    /// The only invoice kind this note may reference
    pub fn invoice_kind(&self) -> InvoiceKind {
        match self {
            Self::CreditNote => InvoiceKind::Sales,
            Self::DebitNote => InvoiceKind::Purchase,
        }
    }
}

impl std::fmt::Display for NoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Note lifecycle: draft → submitted → applied.
///
/// The financial effect fires exactly once, on draft → submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteStatus {
    Draft,
    Submitted,
    Applied,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Applied => "applied",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "applied" => Some(Self::Applied),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: NoteStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Submitted) | (Self::Submitted, Self::Applied)
        )
    }
}

impl std::fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub tenant_id: String,
    pub kind: NoteKind,
    pub party_id: String,
    pub reference_invoice_id: Option<InvoiceId>,
    pub amount_minor: i64,
    pub status: NoteStatus,

    // Audit stamps written once the note is settled
    pub standard_journal_entry_id: Option<JournalEntryId>,
    pub invoice_adjustment_je_id: Option<JournalEntryId>,
    pub refund_payment_id: Option<PaymentId>,
    pub refund_journal_entry_id: Option<JournalEntryId>,
    pub invoice_adjusted: bool,
    pub refund_created: bool,
    pub allocations_reversed: bool,
    pub submitted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn draft(
        tenant_id: impl Into<String>,
        kind: NoteKind,
        party_id: impl Into<String>,
        reference_invoice_id: Option<InvoiceId>,
        amount_minor: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: NoteId::new(),
            tenant_id: tenant_id.into(),
            kind,
            party_id: party_id.into(),
            reference_invoice_id,
            amount_minor,
            status: NoteStatus::Draft,
            standard_journal_entry_id: None,
            invoice_adjustment_je_id: None,
            refund_payment_id: None,
            refund_journal_entry_id: None,
            invoice_adjusted: false,
            refund_created: false,
            allocations_reversed: false,
            submitted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(NoteStatus::Draft.can_transition_to(NoteStatus::Submitted));
        assert!(NoteStatus::Submitted.can_transition_to(NoteStatus::Applied));

        assert!(!NoteStatus::Submitted.can_transition_to(NoteStatus::Submitted));
        assert!(!NoteStatus::Applied.can_transition_to(NoteStatus::Submitted));
        assert!(!NoteStatus::Draft.can_transition_to(NoteStatus::Applied));
        assert!(!NoteStatus::Applied.can_transition_to(NoteStatus::Draft));
    }

    #[test]
    fn test_note_kind_maps_to_invoice_kind() {
        assert_eq!(NoteKind::CreditNote.invoice_kind(), InvoiceKind::Sales);
        assert_eq!(NoteKind::DebitNote.invoice_kind(), InvoiceKind::Purchase);
    }
}
