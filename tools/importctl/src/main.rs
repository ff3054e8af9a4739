//! importctl: operator CLI for client data workflows
//!
//! ```bash
//! importctl purge --client AVII            # dry run
//! importctl purge --client AVII --execute
//! importctl import --client AVII --dir ./exports/AVII
//! ```
//!
//! Exit codes: 0 success, 1 failure, 2 safety-check failure (for example a
//! clientId mismatch between the dataset and the target).

use clap::{Parser, Subcommand};
use doc_store::{MemoryStore, PgStore, SharedStore};
use fiscal_core::{calendar, IdGenerator};
use importctl::{
    CancelFlag, ImportDataset, ImportError, ImportOrchestrator, PurgeOptions, PurgeOrchestrator,
};
use platform_contracts::ErrorKind;
use security::Principal;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "importctl", about = "Client data import and purge")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Store backend: memory (dev) or postgres
    #[arg(long, env = "STORE_BACKEND", default_value = "postgres")]
    store: String,

    /// Acting operator id recorded in the audit trail
    #[arg(long, env = "IMPORTCTL_USER", default_value = "importctl")]
    user: String,
}

#[derive(Subcommand)]
enum Command {
    /// Recursively delete a client's data (dry run unless --execute)
    Purge {
        /// Target client association
        #[arg(long)]
        client: String,

        /// Actually delete instead of counting
        #[arg(long)]
        execute: bool,

        /// Top-level collections purged as a terminal step
        #[arg(long, default_value = "importMetadata")]
        exclude: Vec<String>,
    },
    /// Run the ordered bulk import from a directory of exported JSON
    Import {
        /// Target client association; must match the dataset's clientId
        #[arg(long)]
        client: String,

        /// Directory holding Client.json and friends
        #[arg(long)]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let exit = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "importctl failed");
            match classify(&err) {
                ErrorKind::SafetyCheckFailed => 2,
                _ => 1,
            }
        }
    };
    std::process::exit(exit);
}

fn classify(err: &anyhow::Error) -> ErrorKind {
    match err.downcast_ref::<ImportError>() {
        Some(import_err) => import_err.kind(),
        None => ErrorKind::Integrity,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = build_store(&cli.store).await?;
    let audit = audit::AuditLogger::new(store.clone());
    let principal = Principal::super_admin(&cli.user);
    let cancel = CancelFlag::new();

    match cli.command {
        Command::Purge { client, execute, exclude } => {
            let orchestrator = PurgeOrchestrator::new(store, audit);
            let options = PurgeOptions { execute, exclude };
            let summary = orchestrator
                .purge(&principal, &client, &options, &cancel)
                .await?;
            if summary.dry_run {
                tracing::info!(
                    scanned = summary.scanned,
                    ghost_docs = summary.ghost_docs,
                    "dry run only; re-run with --execute to delete"
                );
            }
        }
        Command::Import { client, dir } => {
            let dataset = ImportDataset::from_dir(&dir)?;
            let ids = Arc::new(IdGenerator::new(calendar::default_offset()));
            let orchestrator = ImportOrchestrator::new(store, audit, ids);
            let summary = orchestrator
                .import(&principal, &client, &dataset, &cancel)
                .await?;
            tracing::info!(
                run_id = %summary.run_id,
                cross_ref_entries = summary.cross_ref_entries,
                corrupt = summary.corrupt_transactions.len(),
                unresolved = summary.unresolved_pay_seqs,
                "import finished"
            );
        }
    }
    Ok(())
}

async fn build_store(backend: &str) -> anyhow::Result<SharedStore> {
    match backend {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "postgres" => {
            let database_url = std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set for the postgres backend"))?;
            let pool = doc_store::init_pool(&database_url).await?;
            let store = PgStore::new(pool);
            store
                .ensure_schema()
                .await
                .map_err(|err| anyhow::anyhow!("schema setup failed: {err}"))?;
            Ok(Arc::new(store))
        }
        other => Err(anyhow::anyhow!(
            "unknown STORE_BACKEND '{other}' (expected memory or postgres)"
        )),
    }
}
