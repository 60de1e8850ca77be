//! Journal entry drafts handed to the general ledger
//!
//! The engine never reads the ledger back; it only builds balanced two-sided
//! drafts and appends them through [`crate::journal::JournalSink`].

use serde::{Deserialize, Serialize};

/// Account capability resolved once per posting, never by name pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Receivable,
    Payable,
    SalesReturn,
    PurchaseReturn,
    Cash,
}

impl AccountRole {
    pub const ALL: [AccountRole; 5] = [
        Self::Receivable,
        Self::Payable,
        Self::SalesReturn,
        Self::PurchaseReturn,
        Self::Cash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receivable => "receivable",
            Self::Payable => "payable",
            Self::SalesReturn => "sales_return",
            Self::PurchaseReturn => "purchase_return",
            Self::Cash => "cash",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "receivable" => Some(Self::Receivable),
            "payable" => Some(Self::Payable),
            "sales_return" => Some(Self::SalesReturn),
            "purchase_return" => Some(Self::PurchaseReturn),
            "cash" => Some(Self::Cash),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chart-of-accounts entry resolved for a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub code: String,
    pub name: String,
    pub role: AccountRole,
}

/// Why an entry was appended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalPurpose {
    /// The note's own sales/purchase-return impact
    NoteStandard,
    /// Reduction of the referenced invoice
    InvoiceAdjustment,
    /// Cash returned to the party
    Refund,
}

impl JournalPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoteStandard => "NOTE_STANDARD",
            Self::InvoiceAdjustment => "INVOICE_ADJUSTMENT",
            Self::Refund => "NOTE_REFUND",
        }
    }
}

impl std::fmt::Display for JournalPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_ref: String,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryDraft {
    pub purpose: JournalPurpose,
    pub currency: String,
    pub description: String,
    pub reference_type: String,
    pub reference_id: String,
    pub lines: Vec<JournalLine>,
}

impl JournalEntryDraft {
    /// Debit one account and credit another for the same amount
    pub fn two_line(
        purpose: JournalPurpose,
        currency: &str,
        debit: &Account,
        credit: &Account,
        amount_minor: i64,
        reference_type: &str,
        reference_id: &str,
    ) -> Self {
        Self {
            purpose,
            currency: currency.to_string(),
            description: format!("{} {} {}", purpose, reference_type, reference_id),
            reference_type: reference_type.to_string(),
            reference_id: reference_id.to_string(),
            lines: vec![
                JournalLine {
                    account_ref: debit.code.clone(),
                    debit_minor: amount_minor,
                    credit_minor: 0,
                    memo: Some(debit.name.clone()),
                },
                JournalLine {
                    account_ref: credit.code.clone(),
                    debit_minor: 0,
                    credit_minor: amount_minor,
                    memo: Some(credit.name.clone()),
                },
            ],
        }
    }

    /// (total debits, total credits)
    pub fn totals(&self) -> (i64, i64) {
        self.lines.iter().fold((0, 0), |(d, c), line| {
            (d + line.debit_minor, c + line.credit_minor)
        })
    }

    /// Balanced, non-empty, and free of negative amounts
    pub fn is_balanced(&self) -> bool {
        let (debits, credits) = self.totals();
        self.lines.len() >= 2
            && debits > 0
            && debits == credits
            && self
                .lines
                .iter()
                .all(|l| l.debit_minor >= 0 && l.credit_minor >= 0)
    }
}
