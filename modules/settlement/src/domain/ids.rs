//! Opaque record identifiers.
//!
//! Every ledger record is keyed by a UUID wrapped in its own newtype so an
//! invoice id can never be passed where a payment id is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

opaque_id!(
    /// Sales or purchase invoice
    InvoiceId
);
opaque_id!(
    /// Incoming or outgoing payment
    PaymentId
);
opaque_id!(
    /// Payment-to-invoice allocation row
    AllocationId
);
opaque_id!(
    /// Credit or debit note
    NoteId
);
opaque_id!(
    /// Journal entry appended to the general ledger
    JournalEntryId
);
