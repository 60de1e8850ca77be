use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::parse_column;
use crate::domain::{AllocationId, AllocationStatus, InvoiceId, PaymentAllocation, PaymentId};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, FromRow)]
pub struct AllocationRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub allocated_minor: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AllocationRow> for PaymentAllocation {
    type Error = StoreError;

    fn try_from(row: AllocationRow) -> Result<Self, Self::Error> {
        Ok(PaymentAllocation {
            status: parse_column(
                "payment_allocations",
                &row.id,
                &row.status,
                AllocationStatus::from_str,
            )?,
            id: AllocationId(row.id),
            tenant_id: row.tenant_id,
            payment_id: PaymentId(row.payment_id),
            invoice_id: InvoiceId(row.invoice_id),
            allocated_minor: row.allocated_minor,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_ALLOCATION: &str = r#"
    SELECT id, tenant_id, payment_id, invoice_id, allocated_minor, status,
           created_at, updated_at
    FROM payment_allocations
"#;

fn decode_all(rows: Vec<AllocationRow>) -> StoreResult<Vec<PaymentAllocation>> {
    rows.into_iter().map(PaymentAllocation::try_from).collect()
}

pub async fn find(
    pool: &PgPool,
    tenant_id: &str,
    id: AllocationId,
) -> StoreResult<Option<PaymentAllocation>> {
    let row = sqlx::query_as::<_, AllocationRow>(&format!(
        "{} WHERE tenant_id = $1 AND id = $2",
        SELECT_ALLOCATION
    ))
    .bind(tenant_id)
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    row.map(PaymentAllocation::try_from).transpose()
}

/// Active allocations on an invoice, oldest first
pub async fn active_for_invoice(
    pool: &PgPool,
    tenant_id: &str,
    invoice_id: InvoiceId,
) -> StoreResult<Vec<PaymentAllocation>> {
    let rows = sqlx::query_as::<_, AllocationRow>(&format!(
        "{} WHERE tenant_id = $1 AND invoice_id = $2 AND status = 'active' ORDER BY created_at, seq",
        SELECT_ALLOCATION
    ))
    .bind(tenant_id)
    .bind(invoice_id.0)
    .fetch_all(pool)
    .await?;

    decode_all(rows)
}

/// Active allocations of a payment, oldest first
pub async fn active_for_payment(
    pool: &PgPool,
    tenant_id: &str,
    payment_id: PaymentId,
) -> StoreResult<Vec<PaymentAllocation>> {
    let rows = sqlx::query_as::<_, AllocationRow>(&format!(
        "{} WHERE tenant_id = $1 AND payment_id = $2 AND status = 'active' ORDER BY created_at, seq",
        SELECT_ALLOCATION
    ))
    .bind(tenant_id)
    .bind(payment_id.0)
    .fetch_all(pool)
    .await?;

    decode_all(rows)
}

/// Insert a new allocation or update amount/status of an existing one
pub async fn upsert_tx(
    tx: &mut Transaction<'_, Postgres>,
    allocation: &PaymentAllocation,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payment_allocations
            (id, tenant_id, payment_id, invoice_id, allocated_minor, status,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            allocated_minor = EXCLUDED.allocated_minor,
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(allocation.id.0)
    .bind(&allocation.tenant_id)
    .bind(allocation.payment_id.0)
    .bind(allocation.invoice_id.0)
    .bind(allocation.allocated_minor)
    .bind(allocation.status.as_str())
    .bind(allocation.created_at)
    .bind(allocation.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
