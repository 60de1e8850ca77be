use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::parse_column;
use crate::domain::{NoteId, Payment, PaymentDirection, PaymentDocStatus, PaymentId};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub party_id: String,
    pub direction: String,
    pub status: String,
    pub amount_minor: i64,
    pub unallocated_minor: i64,
    pub refund_of_note_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            direction: parse_column("payments", &row.id, &row.direction, PaymentDirection::from_str)?,
            status: parse_column("payments", &row.id, &row.status, PaymentDocStatus::from_str)?,
            id: PaymentId(row.id),
            tenant_id: row.tenant_id,
            party_id: row.party_id,
            amount_minor: row.amount_minor,
            unallocated_minor: row.unallocated_minor,
            refund_of_note_id: row.refund_of_note_id.map(NoteId),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn find(pool: &PgPool, tenant_id: &str, id: PaymentId) -> StoreResult<Option<Payment>> {
    let row = sqlx::query_as::<_, PaymentRow>(
        r#"
        SELECT id, tenant_id, party_id, direction, status, amount_minor,
               unallocated_minor, refund_of_note_id, created_at, updated_at
        FROM payments
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    row.map(Payment::try_from).transpose()
}

pub async fn list_ids(pool: &PgPool, tenant_id: &str) -> StoreResult<Vec<PaymentId>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM payments WHERE tenant_id = $1 ORDER BY id",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    Ok(ids.into_iter().map(PaymentId).collect())
}

pub async fn lock_updated_at_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: PaymentId,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT updated_at FROM payments WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
    )
    .bind(tenant_id)
    .bind(id.0)
    .fetch_optional(&mut **tx)
    .await
}

/// Insert or update a payment; `amount_minor` is immutable after insert
pub async fn upsert_tx(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payments
            (id, tenant_id, party_id, direction, status, amount_minor,
             unallocated_minor, refund_of_note_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            unallocated_minor = EXCLUDED.unallocated_minor,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(payment.id.0)
    .bind(&payment.tenant_id)
    .bind(&payment.party_id)
    .bind(payment.direction.as_str())
    .bind(payment.status.as_str())
    .bind(payment.amount_minor)
    .bind(payment.unallocated_minor)
    .bind(payment.refund_of_note_id.map(|n| n.0))
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
