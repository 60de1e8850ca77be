//! SQL access for the PostgreSQL backends
//!
//! Row structs mirror table columns; enum columns are TEXT and are decoded
//! into domain enums here so a corrupt value surfaces as
//! [`StoreError::Decode`] instead of a panic.

pub mod account_role_repo;
pub mod allocation_repo;
pub mod invoice_repo;
pub mod journal_repo;
pub mod note_repo;
pub mod outbox_repo;
pub mod payment_repo;

use crate::error::{StoreError, StoreResult};

pub(crate) fn parse_column<T>(
    table: &'static str,
    id: &impl ToString,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> StoreResult<T> {
    parse(value).ok_or_else(|| StoreError::Decode {
        table,
        id: id.to_string(),
        detail: format!("unknown value '{}'", value),
    })
}
