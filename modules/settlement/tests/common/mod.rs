//! Common fixtures for settlement integration tests
//!
//! Every test gets its own [`Harness`]: an in-memory ledger, an in-memory
//! journal and the standard chart of accounts, wired into one
//! [`SettlementContext`]. Records are seeded through `LedgerStore::commit`
//! exactly as the engine writes them.

#![allow(dead_code)]

use std::sync::Arc;

use settlement_rs::domain::{
    AllocationId, Invoice, InvoiceId, InvoiceKind, Note, NoteId, NoteKind, Payment,
    PaymentAllocation, PaymentDirection, PaymentId,
};
use settlement_rs::journal::{InMemoryJournal, StaticAccountDirectory};
use settlement_rs::metrics::SettlementMetrics;
use settlement_rs::store::{InMemoryLedger, LedgerChanges, LedgerStore};
use settlement_rs::{allocate_payment, AllocationLine, SettlementContext};

pub const TENANT: &str = "tenant-a";

pub struct Harness {
    pub ctx: SettlementContext,
    pub ledger: InMemoryLedger,
    pub journal: InMemoryJournal,
}

pub fn harness() -> Harness {
    harness_with_accounts(StaticAccountDirectory::standard())
}

pub fn harness_with_accounts(accounts: StaticAccountDirectory) -> Harness {
    let ledger = InMemoryLedger::new();
    let journal = InMemoryJournal::new();
    let metrics = SettlementMetrics::new().expect("metrics registry");
    let ctx = SettlementContext::new(
        Arc::new(ledger.clone()),
        Arc::new(accounts),
        Arc::new(journal.clone()),
        metrics,
    );
    Harness {
        ctx,
        ledger,
        journal,
    }
}

impl Harness {
    async fn seed(&self, changes: LedgerChanges) {
        self.ledger
            .commit(TENANT, changes)
            .await
            .expect("Failed to seed ledger");
    }

    pub async fn sales_invoice(&self, party: &str, total_minor: i64) -> Invoice {
        self.invoice_of_kind(InvoiceKind::Sales, party, total_minor)
            .await
    }

    pub async fn purchase_invoice(&self, party: &str, total_minor: i64) -> Invoice {
        self.invoice_of_kind(InvoiceKind::Purchase, party, total_minor)
            .await
    }

    async fn invoice_of_kind(&self, kind: InvoiceKind, party: &str, total_minor: i64) -> Invoice {
        let invoice = Invoice::submitted(TENANT, kind, party, total_minor);
        self.seed(LedgerChanges {
            invoices: vec![invoice.clone()],
            ..Default::default()
        })
        .await;
        invoice
    }

    /// Submitted customer receipt
    pub async fn receipt(&self, party: &str, amount_minor: i64) -> Payment {
        self.payment_of(PaymentDirection::Receive, party, amount_minor)
            .await
    }

    /// Submitted supplier disbursement
    pub async fn disbursement(&self, party: &str, amount_minor: i64) -> Payment {
        self.payment_of(PaymentDirection::Pay, party, amount_minor)
            .await
    }

    async fn payment_of(
        &self,
        direction: PaymentDirection,
        party: &str,
        amount_minor: i64,
    ) -> Payment {
        let payment = Payment::submitted(TENANT, party, direction, amount_minor);
        self.seed(LedgerChanges {
            payments: vec![payment.clone()],
            ..Default::default()
        })
        .await;
        payment
    }

    pub async fn credit_note(
        &self,
        party: &str,
        invoice_id: Option<InvoiceId>,
        amount_minor: i64,
    ) -> Note {
        self.note_of(NoteKind::CreditNote, party, invoice_id, amount_minor)
            .await
    }

    pub async fn debit_note(
        &self,
        party: &str,
        invoice_id: Option<InvoiceId>,
        amount_minor: i64,
    ) -> Note {
        self.note_of(NoteKind::DebitNote, party, invoice_id, amount_minor)
            .await
    }

    async fn note_of(
        &self,
        kind: NoteKind,
        party: &str,
        invoice_id: Option<InvoiceId>,
        amount_minor: i64,
    ) -> Note {
        let note = Note::draft(TENANT, kind, party, invoice_id, amount_minor);
        self.seed(LedgerChanges {
            notes: vec![note.clone()],
            ..Default::default()
        })
        .await;
        note
    }

    /// Allocate through the engine and return the single new allocation
    pub async fn allocate(
        &self,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount_minor: i64,
    ) -> PaymentAllocation {
        let receipt = allocate_payment(
            &self.ctx,
            TENANT,
            payment_id,
            &[AllocationLine {
                invoice_id,
                amount_minor,
            }],
        )
        .await
        .expect("Failed to allocate");
        receipt.allocations[0].clone()
    }

    pub async fn invoice(&self, id: InvoiceId) -> Invoice {
        self.ledger
            .invoice(TENANT, id)
            .await
            .expect("store read")
            .expect("invoice exists")
    }

    pub async fn payment(&self, id: PaymentId) -> Payment {
        self.ledger
            .payment(TENANT, id)
            .await
            .expect("store read")
            .expect("payment exists")
    }

    pub async fn note(&self, id: NoteId) -> Note {
        self.ledger
            .note(TENANT, id)
            .await
            .expect("store read")
            .expect("note exists")
    }

    pub async fn allocation(&self, id: AllocationId) -> PaymentAllocation {
        self.ledger
            .allocation(TENANT, id)
            .await
            .expect("store read")
            .expect("allocation exists")
    }
}
