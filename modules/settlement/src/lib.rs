pub mod config;
pub mod context;
pub mod db;
pub mod domain;
pub mod error;
pub mod journal;
pub mod metrics;
pub mod repos;
pub mod services;
pub mod store;

pub use context::SettlementContext;
pub use error::{
    DegradedOperation, InvariantViolation, SettlementError, SettlementResult, StoreError,
    ValidationError,
};
pub use services::allocation_service::{
    allocate_payment, deallocate_payment, update_allocation, AllocationLine, AllocationReceipt,
    DeallocationReceipt,
};
pub use services::note_service::{apply_note, mark_note_applied, NoteSettlement};
pub use services::reconciliation::{
    check_invariants, check_tenant, rebuild_derived, InvariantBreach, ReconciliationReport,
};
pub use services::settlement_router::SettlementRoute;
