//! Error taxonomy for settlement operations
//!
//! - [`ValidationError`]: user-correctable, detected before any mutation,
//!   always carries the amounts needed to self-correct.
//! - [`InvariantViolation`]: should never happen; logged and surfaced as an
//!   internal failure, never retried automatically.
//! - [`StoreError`]: persistence failures, retriable.
//!
//! A missing journal account is not an error: it is reported as a
//! [`DegradedOperation`] next to the successful result.

use serde::Serialize;
use thiserror::Error;

use crate::domain::{
    AccountRole, AllocationId, InvoiceId, InvoiceKind, JournalPurpose, NoteId, NoteKind,
    NoteStatus, PaymentDirection, PaymentDocStatus, PaymentId,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("Allocation request must contain at least one invoice line")]
    EmptyAllocation,

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),

    #[error("Allocation not found: {0}")]
    AllocationNotFound(AllocationId),

    #[error("Note not found: {0}")]
    NoteNotFound(NoteId),

    #[error("Allocation {0} is already deleted")]
    AllocationDeleted(AllocationId),

    #[error("Payment {payment_id} is {status}; only submitted payments can be allocated")]
    PaymentNotSubmitted {
        payment_id: PaymentId,
        status: PaymentDocStatus,
    },

    #[error("Party mismatch on invoice {invoice_id}: invoice party '{invoice_party}', got '{other_party}'")]
    PartyMismatch {
        invoice_id: InvoiceId,
        invoice_party: String,
        other_party: String,
    },

    #[error("A {direction} payment cannot settle {kind} invoice {invoice_id}")]
    DirectionMismatch {
        invoice_id: InvoiceId,
        direction: PaymentDirection,
        kind: InvoiceKind,
    },

    #[error("A {note_kind} cannot reference {invoice_kind} invoice {invoice_id}")]
    NoteKindMismatch {
        invoice_id: InvoiceId,
        note_kind: NoteKind,
        invoice_kind: InvoiceKind,
    },

    #[error("Allocation of {requested} exceeds unallocated amount {available} of payment {payment_id} by {excess}")]
    ExceedsPaymentUnallocated {
        payment_id: PaymentId,
        requested: i64,
        available: i64,
        excess: i64,
    },

    #[error("Allocation of {requested} exceeds outstanding amount {outstanding} of invoice {invoice_id} by {excess}")]
    ExceedsInvoiceOutstanding {
        invoice_id: InvoiceId,
        requested: i64,
        outstanding: i64,
        excess: i64,
    },

    #[error("Note amount {requested} exceeds ceiling of invoice {invoice_id}: original total {original_total}, already applied {already_applied}, available {available}")]
    NoteCeilingExceeded {
        invoice_id: InvoiceId,
        requested: i64,
        original_total: i64,
        already_applied: i64,
        available: i64,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("Cannot reverse {excess} on invoice {invoice_id}: {remaining} still unreversed after exhausting active allocations")]
    InsufficientAllocations {
        invoice_id: InvoiceId,
        excess: i64,
        remaining: i64,
    },

    #[error("Allocation {allocation_id} points at missing payment {payment_id}")]
    DanglingAllocation {
        allocation_id: AllocationId,
        payment_id: PaymentId,
    },

    #[error("Payment {payment_id} unallocated amount {unallocated} outside [0, {amount}]")]
    UnallocatedOutOfRange {
        payment_id: PaymentId,
        unallocated: i64,
        amount: i64,
    },

    #[error("Journal entry {purpose} is unbalanced: debits {debits}, credits {credits}")]
    UnbalancedJournal {
        purpose: JournalPurpose,
        debits: i64,
        credits: i64,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt {table} row {id}: {detail}")]
    Decode {
        table: &'static str,
        id: String,
        detail: String,
    },

    #[error("Note {note_id} status guard failed: expected {expected}, found {found:?}")]
    NoteGuardFailed {
        note_id: NoteId,
        expected: NoteStatus,
        found: Option<NoteStatus>,
    },

    #[error("{table} row {id} changed since it was read")]
    StaleRecord { table: &'static str, id: String },

    #[error("Record {id} belongs to tenant '{record_tenant}', not '{tenant_id}'")]
    TenantMismatch {
        tenant_id: String,
        record_tenant: String,
        id: String,
    },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Note {0} has already been applied")]
    NoteAlreadyApplied(NoteId),

    #[error("Note {note_id} cannot move from {from} to {to}")]
    InvalidNoteTransition {
        note_id: NoteId,
        from: NoteStatus,
        to: NoteStatus,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SettlementError {
    /// Only persistence failures and lost races are worth retrying;
    /// everything else is deterministic for the same input.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Database(_)) | Self::Store(StoreError::StaleRecord { .. })
        )
    }

    /// Short reason label used for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::ExceedsPaymentUnallocated { .. }) => {
                "exceeds_payment_unallocated"
            }
            Self::Validation(ValidationError::ExceedsInvoiceOutstanding { .. }) => {
                "exceeds_invoice_outstanding"
            }
            Self::Validation(ValidationError::NoteCeilingExceeded { .. }) => "note_ceiling",
            Self::Validation(ValidationError::PartyMismatch { .. }) => "party_mismatch",
            Self::Validation(_) => "validation",
            Self::Invariant(_) => "invariant",
            Self::NoteAlreadyApplied(_) => "already_applied",
            Self::InvalidNoteTransition { .. } => "invalid_transition",
            Self::Store(StoreError::StaleRecord { .. }) => "conflict",
            Self::Store(_) => "store",
        }
    }
}

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;

/// A journal entry that was skipped because its account could not be resolved.
///
/// The financial mutation it accompanied is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedOperation {
    pub purpose: JournalPurpose,
    pub missing_role: AccountRole,
}
