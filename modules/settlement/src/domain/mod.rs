//! Ledger records owned by the settlement engine
//!
//! All money is carried in minor units (`i64` cents).

pub mod allocation;
pub mod ids;
pub mod invoice;
pub mod journal;
pub mod note;
pub mod payment;

pub use allocation::{sum_active, AllocationStatus, PaymentAllocation};
pub use ids::{AllocationId, InvoiceId, JournalEntryId, NoteId, PaymentId};
pub use invoice::{derive_payment_status, Invoice, InvoiceKind, PaymentStatus};
pub use journal::{Account, AccountRole, JournalEntryDraft, JournalLine, JournalPurpose};
pub use note::{Note, NoteKind, NoteStatus};
pub use payment::{derive_unallocated, Payment, PaymentDirection, PaymentDocStatus};
