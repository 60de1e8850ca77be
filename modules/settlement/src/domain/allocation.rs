use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AllocationId, InvoiceId, PaymentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Active,
    Deleted,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Portion of a payment applied to one invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub id: AllocationId,
    pub tenant_id: String,
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub allocated_minor: i64,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAllocation {
    pub fn active(
        tenant_id: impl Into<String>,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        allocated_minor: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AllocationId::new(),
            tenant_id: tenant_id.into(),
            payment_id,
            invoice_id,
            allocated_minor,
            status: AllocationStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }

    /// Soft delete; the amount is kept for audit.
    pub fn mark_deleted(&mut self) {
        self.status = AllocationStatus::Deleted;
        self.updated_at = Utc::now();
    }
}

/// Sum of active allocation amounts in `allocations`
pub fn sum_active(allocations: &[PaymentAllocation]) -> i64 {
    allocations
        .iter()
        .filter(|a| a.is_active())
        .map(|a| a.allocated_minor)
        .sum()
}
