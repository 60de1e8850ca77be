use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{InvoiceId, NoteId};
use super::payment::PaymentDirection;

/// Sales (receivable) or purchase (payable) invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Sales,
    Purchase,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Purchase => "purchase",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "sales" => Some(Self::Sales),
            "purchase" => Some(Self::Purchase),
            _ => None,
        }
    }

    /// Cash direction of a payment that settles this kind of invoice
    pub fn settling_direction(&self) -> PaymentDirection {
        match self {
            Self::Sales => PaymentDirection::Receive,
            Self::Purchase => PaymentDirection::Pay,
        }
    }
}

impl std::fmt::Display for InvoiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement state of an invoice, derived from its active allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "unpaid" => Some(Self::Unpaid),
            "partially_paid" => Some(Self::PartiallyPaid),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive an invoice's payment status from its total and allocated amount.
///
/// A zero-total invoice with nothing allocated is `Unpaid`.
pub fn derive_payment_status(total_minor: i64, allocated_minor: i64) -> PaymentStatus {
    if total_minor > 0 && allocated_minor >= total_minor {
        PaymentStatus::Paid
    } else if allocated_minor > 0 {
        PaymentStatus::PartiallyPaid
    } else {
        PaymentStatus::Unpaid
    }
}

/// Submitted invoice as seen by the settlement engine
///
/// `original_total_minor` is frozen at first submission and is the ceiling for
/// cumulative notes. `total_minor` shrinks as notes are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub tenant_id: String,
    pub kind: InvoiceKind,
    pub party_id: String,
    pub original_total_minor: i64,
    pub total_minor: i64,
    pub total_notes_minor: i64,
    pub notes: Vec<NoteId>,
    pub payment_status: PaymentStatus,
    pub last_reversal_note_id: Option<NoteId>,
    pub last_reversed_minor: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Build a freshly submitted invoice; the original total is frozen here.
    pub fn submitted(
        tenant_id: impl Into<String>,
        kind: InvoiceKind,
        party_id: impl Into<String>,
        total_minor: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InvoiceId::new(),
            tenant_id: tenant_id.into(),
            kind,
            party_id: party_id.into(),
            original_total_minor: total_minor,
            total_minor,
            total_notes_minor: 0,
            notes: Vec::new(),
            payment_status: PaymentStatus::Unpaid,
            last_reversal_note_id: None,
            last_reversed_minor: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount still payable given the allocated sum
    pub fn outstanding(&self, allocated_minor: i64) -> i64 {
        self.total_minor - allocated_minor
    }

    /// Room left under the original-total ceiling for further notes
    pub fn note_headroom(&self) -> i64 {
        self.original_total_minor.saturating_sub(self.total_notes_minor)
    }
}
