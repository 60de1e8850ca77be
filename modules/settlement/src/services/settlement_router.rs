//! Note Settlement Router
//!
//! Decides how a note's financial effect reaches the party once the LIFO
//! reversal has run:
//!
//! - **Refund**: the invoice was settled before the note and is still fully
//!   covered afterwards. The money the note returns goes back as a draft
//!   payment in the opposite cash direction.
//! - **Adjustment**: the invoice still has something outstanding, so the note
//!   simply lowers what is owed.
//! - **Unlinked**: the note references no invoice; only the standard entry is
//!   posted.
//!
//! In both linked routes the invoice total is lowered by the note amount and
//! the note is recorded against the invoice's ceiling.

use chrono::Utc;
use serde::Serialize;

use super::lifo_reversal::ReversalPlan;
use crate::domain::{
    derive_payment_status, AccountRole, Invoice, JournalPurpose, Note, NoteKind, Payment,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum SettlementRoute {
    Refund { refund_minor: i64 },
    Adjustment,
    Unlinked,
}

impl SettlementRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refund { .. } => "refund",
            Self::Adjustment => "adjustment",
            Self::Unlinked => "unlinked",
        }
    }
}

impl std::fmt::Display for SettlementRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the route for a note linked to an invoice.
///
/// An invoice with nothing allocated before the note was never covered, so a
/// zero target does not turn it into a refund.
pub fn route_settlement(
    allocated_before_minor: i64,
    allocated_after_minor: i64,
    target_total_minor: i64,
    note_amount_minor: i64,
    original_total_minor: i64,
) -> SettlementRoute {
    if allocated_before_minor > 0 && allocated_after_minor >= target_total_minor {
        SettlementRoute::Refund {
            refund_minor: note_amount_minor.min(original_total_minor),
        }
    } else {
        SettlementRoute::Adjustment
    }
}

/// Invoice total after the note, floored at zero
pub fn target_total(invoice: &Invoice, note_amount_minor: i64) -> i64 {
    invoice.total_minor.saturating_sub(note_amount_minor).max(0)
}

/// Invoice after the note: total lowered, note recorded, status recomputed
/// from the allocated sum left after reversal.
pub fn adjusted_invoice(
    invoice: &Invoice,
    note: &Note,
    reversal: &ReversalPlan,
    allocated_after_minor: i64,
) -> Invoice {
    let mut updated = invoice.clone();
    updated.total_minor = target_total(invoice, note.amount_minor);
    updated.total_notes_minor = updated.total_notes_minor.saturating_add(note.amount_minor);
    if !updated.notes.contains(&note.id) {
        updated.notes.push(note.id);
    }
    if !reversal.is_empty() {
        updated.last_reversal_note_id = Some(note.id);
        updated.last_reversed_minor = reversal.reversed_minor;
    }
    updated.payment_status = derive_payment_status(updated.total_minor, allocated_after_minor);
    updated.updated_at = Utc::now();
    updated
}

/// Draft refund payment for the refund route
pub fn refund_payment(invoice: &Invoice, note: &Note, refund_minor: i64) -> Payment {
    Payment::draft_refund(
        invoice.tenant_id.clone(),
        invoice.party_id.clone(),
        invoice.kind.settling_direction().opposite(),
        refund_minor,
        note.id,
    )
}

/// Debit and credit roles for each posting a note produces
pub fn posting_roles(kind: NoteKind, purpose: JournalPurpose) -> (AccountRole, AccountRole) {
    match (kind, purpose) {
        (NoteKind::CreditNote, JournalPurpose::NoteStandard)
        | (NoteKind::CreditNote, JournalPurpose::InvoiceAdjustment) => {
            (AccountRole::SalesReturn, AccountRole::Receivable)
        }
        (NoteKind::CreditNote, JournalPurpose::Refund) => {
            (AccountRole::Receivable, AccountRole::Cash)
        }
        (NoteKind::DebitNote, JournalPurpose::NoteStandard)
        | (NoteKind::DebitNote, JournalPurpose::InvoiceAdjustment) => {
            (AccountRole::Payable, AccountRole::PurchaseReturn)
        }
        (NoteKind::DebitNote, JournalPurpose::Refund) => (AccountRole::Cash, AccountRole::Payable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InvoiceKind, PaymentDirection, PaymentDocStatus, PaymentStatus};

    fn empty_reversal(invoice: &Invoice) -> ReversalPlan {
        ReversalPlan {
            invoice_id: invoice.id,
            target_total_minor: 0,
            excess_minor: 0,
            reversed_minor: 0,
            steps: Vec::new(),
        }
    }

    #[test]
    fn test_fully_covered_invoice_routes_to_refund() {
        // 1000 allocated, note 400, 600 left against target 600
        let route = route_settlement(1000, 600, 600, 400, 1000);
        assert_eq!(route, SettlementRoute::Refund { refund_minor: 400 });
    }

    #[test]
    fn test_outstanding_invoice_routes_to_adjustment() {
        let route = route_settlement(500, 500, 800, 200, 1000);
        assert_eq!(route, SettlementRoute::Adjustment);
    }

    #[test]
    fn test_unpaid_invoice_never_refunds() {
        // Note for the full amount: target 0, nothing allocated
        let route = route_settlement(0, 0, 0, 1000, 1000);
        assert_eq!(route, SettlementRoute::Adjustment);
    }

    #[test]
    fn test_adjusted_invoice_keeps_original_total() {
        let invoice = Invoice::submitted("t1", InvoiceKind::Sales, "cust-1", 1000);
        let note = Note::draft("t1", NoteKind::CreditNote, "cust-1", Some(invoice.id), 200);

        let updated = adjusted_invoice(&invoice, &note, &empty_reversal(&invoice), 500);
        assert_eq!(updated.total_minor, 800);
        assert_eq!(updated.original_total_minor, 1000);
        assert_eq!(updated.total_notes_minor, 200);
        assert_eq!(updated.notes, vec![note.id]);
        assert_eq!(updated.payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(updated.last_reversal_note_id, None);
    }

    #[test]
    fn test_refund_goes_opposite_way() {
        let sales = Invoice::submitted("t1", InvoiceKind::Sales, "cust-1", 1000);
        let note = Note::draft("t1", NoteKind::CreditNote, "cust-1", Some(sales.id), 400);
        let refund = refund_payment(&sales, &note, 400);
        assert_eq!(refund.direction, PaymentDirection::Pay);
        assert_eq!(refund.status, PaymentDocStatus::Draft);
        assert_eq!(refund.refund_of_note_id, Some(note.id));

        let purchase = Invoice::submitted("t1", InvoiceKind::Purchase, "supp-1", 1000);
        let note = Note::draft("t1", NoteKind::DebitNote, "supp-1", Some(purchase.id), 400);
        assert_eq!(
            refund_payment(&purchase, &note, 400).direction,
            PaymentDirection::Receive
        );
    }

    #[test]
    fn test_posting_roles() {
        assert_eq!(
            posting_roles(NoteKind::CreditNote, JournalPurpose::Refund),
            (AccountRole::Receivable, AccountRole::Cash)
        );
        assert_eq!(
            posting_roles(NoteKind::DebitNote, JournalPurpose::Refund),
            (AccountRole::Cash, AccountRole::Payable)
        );
        assert_eq!(
            posting_roles(NoteKind::CreditNote, JournalPurpose::InvoiceAdjustment),
            (AccountRole::SalesReturn, AccountRole::Receivable)
        );
        assert_eq!(
            posting_roles(NoteKind::DebitNote, JournalPurpose::NoteStandard),
            (AccountRole::Payable, AccountRole::PurchaseReturn)
        );
    }
}
