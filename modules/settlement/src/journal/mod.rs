//! Outbound journal adapters
//!
//! The engine consumes two capabilities of the general ledger:
//!
//! - [`AccountDirectory`]: resolve an account by typed [`AccountRole`]
//! - [`JournalSink`]: append a balanced entry and get its id back
//!
//! A role that cannot be resolved skips the entry and yields a
//! [`DegradedOperation`]; the financial mutation that triggered the posting
//! is never rolled back because of it.

mod memory;
mod postgres;

pub use memory::{InMemoryJournal, RecordedEntry, StaticAccountDirectory};
pub use postgres::{PgAccountDirectory, PgJournal};

use async_trait::async_trait;

use crate::domain::{Account, AccountRole, JournalEntryDraft, JournalEntryId, JournalPurpose};
use crate::error::{DegradedOperation, InvariantViolation, SettlementResult, StoreResult};

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn resolve(&self, tenant_id: &str, role: AccountRole) -> StoreResult<Option<Account>>;
}

#[async_trait]
pub trait JournalSink: Send + Sync {
    /// Append a balanced entry; callers guarantee `draft.is_balanced()`
    async fn append(&self, tenant_id: &str, draft: JournalEntryDraft)
        -> StoreResult<JournalEntryId>;
}

/// Result of one posting attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingOutcome {
    Posted(JournalEntryId),
    Skipped(DegradedOperation),
}

impl PostingOutcome {
    pub fn entry_id(&self) -> Option<JournalEntryId> {
        match self {
            Self::Posted(id) => Some(*id),
            Self::Skipped(_) => None,
        }
    }

    pub fn degraded(&self) -> Option<&DegradedOperation> {
        match self {
            Self::Posted(_) => None,
            Self::Skipped(d) => Some(d),
        }
    }
}

/// One debit/credit pair to post
#[derive(Debug, Clone, Copy)]
pub struct TwoLinePosting<'a> {
    pub purpose: JournalPurpose,
    pub debit: AccountRole,
    pub credit: AccountRole,
    pub amount_minor: i64,
    pub reference_type: &'a str,
    pub reference_id: &'a str,
}

/// Resolve both accounts and append a balanced two-line entry
pub async fn post_two_line(
    accounts: &dyn AccountDirectory,
    sink: &dyn JournalSink,
    tenant_id: &str,
    currency: &str,
    posting: TwoLinePosting<'_>,
) -> SettlementResult<PostingOutcome> {
    let debit = accounts.resolve(tenant_id, posting.debit).await?;
    let credit = accounts.resolve(tenant_id, posting.credit).await?;

    let (debit, credit) = match (debit, credit) {
        (Some(debit), Some(credit)) => (debit, credit),
        (debit, _) => {
            let missing_role = if debit.is_none() {
                posting.debit
            } else {
                posting.credit
            };
            tracing::warn!(
                tenant_id = %tenant_id,
                purpose = %posting.purpose,
                missing_role = %missing_role,
                reference_id = %posting.reference_id,
                "Account not configured, skipping journal entry"
            );
            return Ok(PostingOutcome::Skipped(DegradedOperation {
                purpose: posting.purpose,
                missing_role,
            }));
        }
    };

    let draft = JournalEntryDraft::two_line(
        posting.purpose,
        currency,
        &debit,
        &credit,
        posting.amount_minor,
        posting.reference_type,
        posting.reference_id,
    );

    if !draft.is_balanced() {
        let (debits, credits) = draft.totals();
        tracing::error!(
            tenant_id = %tenant_id,
            purpose = %posting.purpose,
            debits,
            credits,
            "Refusing to append unbalanced journal entry"
        );
        return Err(InvariantViolation::UnbalancedJournal {
            purpose: posting.purpose,
            debits,
            credits,
        }
        .into());
    }

    let entry_id = sink.append(tenant_id, draft).await?;

    tracing::info!(
        tenant_id = %tenant_id,
        entry_id = %entry_id,
        purpose = %posting.purpose,
        amount_minor = posting.amount_minor,
        reference_id = %posting.reference_id,
        "Journal entry appended"
    );

    Ok(PostingOutcome::Posted(entry_id))
}
