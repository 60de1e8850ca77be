use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::allocation::PaymentAllocation;
use super::ids::{NoteId, PaymentId};

/// Cash direction of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    /// Money received from a customer
    Receive,
    /// Money paid out to a supplier (or refunded to a customer)
    Pay,
}

impl PaymentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Pay => "pay",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "receive" => Some(Self::Receive),
            "pay" => Some(Self::Pay),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Receive => Self::Pay,
            Self::Pay => Self::Receive,
        }
    }
}

impl std::fmt::Display for PaymentDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document lifecycle of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDocStatus {
    Draft,
    Submitted,
    Cancelled,
}

impl PaymentDocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentDocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub tenant_id: String,
    pub party_id: String,
    pub direction: PaymentDirection,
    pub status: PaymentDocStatus,
    /// Immutable once submitted
    pub amount_minor: i64,
    /// Cached `amount_minor - sum(active allocations)`
    pub unallocated_minor: i64,
    /// Set on refund payments drafted by note settlement
    pub refund_of_note_id: Option<NoteId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn submitted(
        tenant_id: impl Into<String>,
        party_id: impl Into<String>,
        direction: PaymentDirection,
        amount_minor: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            tenant_id: tenant_id.into(),
            party_id: party_id.into(),
            direction,
            status: PaymentDocStatus::Submitted,
            amount_minor,
            unallocated_minor: amount_minor,
            refund_of_note_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Draft refund payment; disbursement happens outside the engine.
    pub fn draft_refund(
        tenant_id: impl Into<String>,
        party_id: impl Into<String>,
        direction: PaymentDirection,
        amount_minor: i64,
        note_id: NoteId,
    ) -> Self {
        let mut payment = Self::submitted(tenant_id, party_id, direction, amount_minor);
        payment.status = PaymentDocStatus::Draft;
        payment.refund_of_note_id = Some(note_id);
        payment
    }
}

/// Recompute a payment's unallocated amount from the authoritative allocation set.
///
/// Only active allocations belonging to `payment_id` are counted.
pub fn derive_unallocated(
    payment_id: PaymentId,
    amount_minor: i64,
    allocations: &[PaymentAllocation],
) -> i64 {
    let allocated: i64 = allocations
        .iter()
        .filter(|a| a.payment_id == payment_id && a.is_active())
        .map(|a| a.allocated_minor)
        .sum();
    amount_minor - allocated
}
