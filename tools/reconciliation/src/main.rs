//! Settlement ledger reconciliation runner
//!
//! Re-derives every cached field of the settlement ledger from its
//! allocations and reports where the stored values disagree. With `--repair`
//! the drifted caches are rewritten and the tenant is checked again.
//!
//! # Usage
//! ```bash
//! DATABASE_URL=postgres://... reconciliation --tenant TENANT_ID [--tenant ...] [--repair]
//! ```
//!
//! Exits non-zero when any breach remains after the run, so it can gate a
//! deploy or a nightly job.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use settlement_rs::config::Config;
use settlement_rs::db::{init_pool, run_migrations};
use settlement_rs::services::reconciliation::RebuildReport;
use settlement_rs::store::{LedgerStore, PgLedger};
use settlement_rs::{check_tenant, rebuild_derived, ReconciliationReport};

#[derive(Debug, Parser)]
#[command(name = "reconciliation", about = "Check settlement ledger invariants")]
struct Args {
    /// Tenant to check (repeatable)
    #[arg(long = "tenant", required = true)]
    tenants: Vec<String>,

    /// Rewrite drifted payment statuses and unallocated amounts
    #[arg(long)]
    repair: bool,
}

#[derive(Debug, Serialize)]
struct TenantRun {
    before: ReconciliationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    repaired: Option<RebuildReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<ReconciliationReport>,
}

impl TenantRun {
    fn is_clean(&self) -> bool {
        self.after.as_ref().unwrap_or(&self.before).is_clean()
    }
}

async fn reconcile(ledger: &PgLedger, tenant_id: &str, repair: bool) -> Result<TenantRun> {
    let before = check_tenant(ledger, tenant_id)
        .await
        .with_context(|| format!("checking tenant {}", tenant_id))?;

    if !repair || before.breaches.iter().all(|b| !b.is_repairable()) {
        return Ok(TenantRun {
            before,
            repaired: None,
            after: None,
        });
    }

    let invoice_ids = ledger.invoice_ids(tenant_id).await?;
    let payment_ids = ledger.payment_ids(tenant_id).await?;
    let repaired = rebuild_derived(ledger, tenant_id, &invoice_ids, &payment_ids)
        .await
        .with_context(|| format!("repairing tenant {}", tenant_id))?;
    let after = check_tenant(ledger, tenant_id).await?;

    Ok(TenantRun {
        before,
        repaired: Some(repaired),
        after: Some(after),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().map_err(anyhow::Error::msg)?;

    let pool = init_pool(&config.database_url)
        .await
        .context("connecting to database")?;
    if config.run_migrations {
        run_migrations(&pool).await.context("running migrations")?;
    }
    let ledger = PgLedger::new(pool);

    let mut dirty = 0usize;
    for tenant_id in &args.tenants {
        tracing::info!(tenant_id = %tenant_id, repair = args.repair, "Reconciling tenant");
        let run = reconcile(&ledger, tenant_id, args.repair).await?;
        if !run.is_clean() {
            dirty += 1;
        }
        println!("{}", serde_json::to_string_pretty(&run)?);
    }

    if dirty > 0 {
        tracing::error!(tenants = dirty, "Ledger breaches remain");
        std::process::exit(1);
    }

    tracing::info!("All tenants reconcile cleanly");
    Ok(())
}
