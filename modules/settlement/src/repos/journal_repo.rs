use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain::JournalEntryDraft;

/// Struct for inserting a journal line
#[derive(Debug, Clone)]
pub struct JournalLineInsert {
    pub id: Uuid,
    pub line_no: i32,
    pub account_ref: String,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub memo: Option<String>,
}

impl JournalLineInsert {
    pub fn from_draft(draft: &JournalEntryDraft) -> Vec<Self> {
        draft
            .lines
            .iter()
            .enumerate()
            .map(|(idx, line)| JournalLineInsert {
                id: Uuid::new_v4(),
                line_no: (idx + 1) as i32,
                account_ref: line.account_ref.clone(),
                debit_minor: line.debit_minor,
                credit_minor: line.credit_minor,
                memo: line.memo.clone(),
            })
            .collect()
    }
}

/// Insert a journal entry header
pub async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry_id: Uuid,
    tenant_id: &str,
    posted_at: DateTime<Utc>,
    draft: &JournalEntryDraft,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO journal_entries
            (id, tenant_id, source_module, purpose, posted_at, currency,
             description, reference_type, reference_id)
        VALUES ($1, $2, 'settlement', $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry_id)
    .bind(tenant_id)
    .bind(draft.purpose.as_str())
    .bind(posted_at)
    .bind(&draft.currency)
    .bind(&draft.description)
    .bind(&draft.reference_type)
    .bind(&draft.reference_id)
    .execute(&mut **tx)
    .await?;

    Ok(entry_id)
}

/// Bulk insert journal lines for a journal entry
pub async fn bulk_insert_lines(
    tx: &mut Transaction<'_, Postgres>,
    journal_entry_id: Uuid,
    lines: Vec<JournalLineInsert>,
) -> Result<(), sqlx::Error> {
    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO journal_lines
                (id, journal_entry_id, line_no, account_ref, debit_minor, credit_minor, memo)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(line.id)
        .bind(journal_entry_id)
        .bind(line.line_no)
        .bind(&line.account_ref)
        .bind(line.debit_minor)
        .bind(line.credit_minor)
        .bind(&line.memo)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}
