//! Outbox repository for reliable event publishing
//!
//! Events are persisted in the same transaction as the ledger changes they
//! describe; a relay outside this crate publishes them.

use sqlx::{Postgres, Transaction};

use crate::store::LedgerEvent;

/// Insert an event into the outbox for later publishing
pub async fn insert_outbox_event(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    event: &LedgerEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO events_outbox
            (event_id, tenant_id, event_type, aggregate_type, aggregate_id, payload, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.event_id)
    .bind(tenant_id)
    .bind(&event.event_type)
    .bind(&event.aggregate_type)
    .bind(&event.aggregate_id)
    .bind(&event.payload)
    .bind(event.occurred_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
