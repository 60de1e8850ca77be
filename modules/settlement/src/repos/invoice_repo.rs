use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::parse_column;
use crate::domain::{Invoice, InvoiceId, InvoiceKind, NoteId, PaymentStatus};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, FromRow)]
pub struct InvoiceRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub kind: String,
    pub party_id: String,
    pub original_total_minor: i64,
    pub total_minor: i64,
    pub total_notes_minor: i64,
    pub note_ids: Vec<Uuid>,
    pub payment_status: String,
    pub last_reversal_note_id: Option<Uuid>,
    pub last_reversed_minor: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = StoreError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            kind: parse_column("invoices", &row.id, &row.kind, InvoiceKind::from_str)?,
            payment_status: parse_column(
                "invoices",
                &row.id,
                &row.payment_status,
                PaymentStatus::from_str,
            )?,
            id: InvoiceId(row.id),
            tenant_id: row.tenant_id,
            party_id: row.party_id,
            original_total_minor: row.original_total_minor,
            total_minor: row.total_minor,
            total_notes_minor: row.total_notes_minor,
            notes: row.note_ids.into_iter().map(NoteId).collect(),
            last_reversal_note_id: row.last_reversal_note_id.map(NoteId),
            last_reversed_minor: row.last_reversed_minor,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_INVOICE: &str = r#"
    SELECT id, tenant_id, kind, party_id, original_total_minor, total_minor,
           total_notes_minor, note_ids, payment_status, last_reversal_note_id,
           last_reversed_minor, created_at, updated_at
    FROM invoices
"#;

/// Find an invoice by tenant and id
pub async fn find(pool: &PgPool, tenant_id: &str, id: InvoiceId) -> StoreResult<Option<Invoice>> {
    let row = sqlx::query_as::<_, InvoiceRow>(&format!(
        "{} WHERE tenant_id = $1 AND id = $2",
        SELECT_INVOICE
    ))
    .bind(tenant_id)
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    row.map(Invoice::try_from).transpose()
}

pub async fn list_ids(pool: &PgPool, tenant_id: &str) -> StoreResult<Vec<InvoiceId>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM invoices WHERE tenant_id = $1 ORDER BY id",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    Ok(ids.into_iter().map(InvoiceId).collect())
}

/// Lock a invoice row for the rest of the transaction and read its version
pub async fn lock_updated_at_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: InvoiceId,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT updated_at FROM invoices WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
    )
    .bind(tenant_id)
    .bind(id.0)
    .fetch_optional(&mut **tx)
    .await
}

/// Insert or fully replace an invoice within a transaction
///
/// `original_total_minor` is never overwritten once the row exists.
pub async fn upsert_tx(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &Invoice,
) -> Result<(), sqlx::Error> {
    let note_ids: Vec<Uuid> = invoice.notes.iter().map(|n| n.0).collect();

    sqlx::query(
        r#"
        INSERT INTO invoices
            (id, tenant_id, kind, party_id, original_total_minor, total_minor,
             total_notes_minor, note_ids, payment_status, last_reversal_note_id,
             last_reversed_minor, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET
            total_minor = EXCLUDED.total_minor,
            total_notes_minor = EXCLUDED.total_notes_minor,
            note_ids = EXCLUDED.note_ids,
            payment_status = EXCLUDED.payment_status,
            last_reversal_note_id = EXCLUDED.last_reversal_note_id,
            last_reversed_minor = EXCLUDED.last_reversed_minor,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(invoice.id.0)
    .bind(&invoice.tenant_id)
    .bind(invoice.kind.as_str())
    .bind(&invoice.party_id)
    .bind(invoice.original_total_minor)
    .bind(invoice.total_minor)
    .bind(invoice.total_notes_minor)
    .bind(&note_ids)
    .bind(invoice.payment_status.as_str())
    .bind(invoice.last_reversal_note_id.map(|n| n.0))
    .bind(invoice.last_reversed_minor)
    .bind(invoice.created_at)
    .bind(invoice.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str, status: &str) -> InvoiceRow {
        let now = Utc::now();
        InvoiceRow {
            id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            kind: kind.to_string(),
            party_id: "cust-1".to_string(),
            original_total_minor: 1000,
            total_minor: 800,
            total_notes_minor: 200,
            note_ids: vec![Uuid::new_v4()],
            payment_status: status.to_string(),
            last_reversal_note_id: None,
            last_reversed_minor: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_decodes_into_invoice() {
        let invoice = Invoice::try_from(row("sales", "partially_paid")).unwrap();
        assert_eq!(invoice.kind, InvoiceKind::Sales);
        assert_eq!(invoice.payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(invoice.notes.len(), 1);
    }

    #[test]
    fn test_unknown_enum_value_is_decode_error() {
        let result = Invoice::try_from(row("quote", "paid"));
        assert!(matches!(result, Err(StoreError::Decode { table: "invoices", .. })));
    }
}
