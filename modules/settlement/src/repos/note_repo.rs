use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::parse_column;
use crate::domain::{InvoiceId, JournalEntryId, Note, NoteId, NoteKind, NoteStatus, PaymentId};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, FromRow)]
pub struct NoteRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub kind: String,
    pub party_id: String,
    pub reference_invoice_id: Option<Uuid>,
    pub amount_minor: i64,
    pub status: String,
    pub standard_journal_entry_id: Option<Uuid>,
    pub invoice_adjustment_je_id: Option<Uuid>,
    pub refund_payment_id: Option<Uuid>,
    pub refund_journal_entry_id: Option<Uuid>,
    pub invoice_adjusted: bool,
    pub refund_created: bool,
    pub allocations_reversed: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<NoteRow> for Note {
    type Error = StoreError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        Ok(Note {
            kind: parse_column("notes", &row.id, &row.kind, NoteKind::from_str)?,
            status: parse_column("notes", &row.id, &row.status, NoteStatus::from_str)?,
            id: NoteId(row.id),
            tenant_id: row.tenant_id,
            party_id: row.party_id,
            reference_invoice_id: row.reference_invoice_id.map(InvoiceId),
            amount_minor: row.amount_minor,
            standard_journal_entry_id: row.standard_journal_entry_id.map(JournalEntryId),
            invoice_adjustment_je_id: row.invoice_adjustment_je_id.map(JournalEntryId),
            refund_payment_id: row.refund_payment_id.map(PaymentId),
            refund_journal_entry_id: row.refund_journal_entry_id.map(JournalEntryId),
            invoice_adjusted: row.invoice_adjusted,
            refund_created: row.refund_created,
            allocations_reversed: row.allocations_reversed,
            submitted_at: row.submitted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn find(pool: &PgPool, tenant_id: &str, id: NoteId) -> StoreResult<Option<Note>> {
    let row = sqlx::query_as::<_, NoteRow>(
        r#"
        SELECT id, tenant_id, kind, party_id, reference_invoice_id, amount_minor, status,
               standard_journal_entry_id, invoice_adjustment_je_id, refund_payment_id,
               refund_journal_entry_id, invoice_adjusted, refund_created,
               allocations_reversed, submitted_at, created_at, updated_at
        FROM notes
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    row.map(Note::try_from).transpose()
}

/// Lock the note row and return its current status
pub async fn lock_status_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: NoteId,
) -> StoreResult<Option<NoteStatus>> {
    let status = sqlx::query_scalar::<_, String>(
        "SELECT status FROM notes WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
    )
    .bind(tenant_id)
    .bind(id.0)
    .fetch_optional(&mut **tx)
    .await?;

    status
        .map(|s| parse_column("notes", &id, &s, NoteStatus::from_str))
        .transpose()
}

pub async fn upsert_tx(tx: &mut Transaction<'_, Postgres>, note: &Note) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO notes
            (id, tenant_id, kind, party_id, reference_invoice_id, amount_minor, status,
             standard_journal_entry_id, invoice_adjustment_je_id, refund_payment_id,
             refund_journal_entry_id, invoice_adjusted, refund_created,
             allocations_reversed, submitted_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            standard_journal_entry_id = EXCLUDED.standard_journal_entry_id,
            invoice_adjustment_je_id = EXCLUDED.invoice_adjustment_je_id,
            refund_payment_id = EXCLUDED.refund_payment_id,
            refund_journal_entry_id = EXCLUDED.refund_journal_entry_id,
            invoice_adjusted = EXCLUDED.invoice_adjusted,
            refund_created = EXCLUDED.refund_created,
            allocations_reversed = EXCLUDED.allocations_reversed,
            submitted_at = EXCLUDED.submitted_at,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(note.id.0)
    .bind(&note.tenant_id)
    .bind(note.kind.as_str())
    .bind(&note.party_id)
    .bind(note.reference_invoice_id.map(|i| i.0))
    .bind(note.amount_minor)
    .bind(note.status.as_str())
    .bind(note.standard_journal_entry_id.map(|j| j.0))
    .bind(note.invoice_adjustment_je_id.map(|j| j.0))
    .bind(note.refund_payment_id.map(|p| p.0))
    .bind(note.refund_journal_entry_id.map(|j| j.0))
    .bind(note.invoice_adjusted)
    .bind(note.refund_created)
    .bind(note.allocations_reversed)
    .bind(note.submitted_at)
    .bind(note.created_at)
    .bind(note.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
