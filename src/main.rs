//! # DocVault CLI (`dv`)
//!
//! The `dv` binary is the primary interface for DocVault. It provides
//! commands for initializing the metadata store, committing and retrieving
//! document versions, integrity verification, recovery, and starting the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! dv --config ./config/docvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dv init` | Create the SQLite metadata store and run migrations |
//! | `dv commit <file>` | Store a file as a new document or a new version |
//! | `dv get <id>` | Retrieve a document's current content, fail-closed |
//! | `dv history <id>` | Print the version ledger |
//! | `dv restore <id> <version>` | Copy an earlier version forward |
//! | `dv prune <id>` | Delete old version objects, keeping the newest N |
//! | `dv verify [id]` | Digest-check one document or the whole fleet |
//! | `dv scan` | Flag missing/corrupted documents and enqueue recovery |
//! | `dv recover <id>...` | Recover documents immediately |
//! | `dv retry process` | Run due retry-queue items |
//! | `dv report` | Fleet health report (JSON or CSV) |
//! | `dv serve` | Start the HTTP API server |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use docvault::{
    checksum, config, db, documents, gateway::Gateway, migrate, recovery, report, server, versions,
};

/// DocVault CLI — a document integrity and recovery engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docvault.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dv",
    about = "DocVault — a document integrity and recovery engine",
    version,
    long_about = "DocVault stores document content in a primary object store and a local cache, \
    tracks checksums and an immutable version history for every document, and detects and \
    repairs missing or corrupted content automatically."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the metadata store.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// document_versions, recovery_events, retry_queue). Idempotent.
    Init,

    /// Store a file's content as a document version.
    ///
    /// Without `--document`, creates a new document at version 1. With
    /// `--document <id>`, appends the content as the next version of that
    /// document. Prints the document id, version number, and checksum.
    Commit {
        /// Path to the file to store.
        file: PathBuf,

        /// Append to this existing document instead of creating a new one.
        #[arg(long)]
        document: Option<String>,

        /// Display name for a new document. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// Actor recorded in the version ledger.
        #[arg(long)]
        actor: Option<String>,

        /// Free-form notes recorded in the version ledger.
        #[arg(long)]
        notes: Option<String>,
    },

    /// Retrieve a document's current content.
    ///
    /// Reads are digest-audited and fail closed: corrupt content is never
    /// written out, the command exits nonzero instead.
    Get {
        /// Document id.
        id: String,

        /// Write content to this path instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print a document's version ledger, newest first.
    History {
        /// Document id.
        id: String,
    },

    /// Restore an earlier version by copying it forward as a new version.
    Restore {
        /// Document id.
        id: String,

        /// Version number to restore.
        version: i64,

        /// Actor recorded in the version ledger.
        #[arg(long)]
        actor: Option<String>,

        /// Free-form notes recorded in the version ledger.
        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete old version objects, keeping the newest N and the current
    /// version.
    Prune {
        /// Document id.
        id: String,

        /// How many of the newest versions to keep.
        #[arg(long, default_value_t = 5)]
        keep: i64,
    },

    /// Digest-check stored content against recorded checksums.
    ///
    /// With an id, verifies that document; without, verifies the whole
    /// fleet. Verification is read-only and never mutates state.
    Verify {
        /// Document id. Omit to verify every document.
        id: Option<String>,
    },

    /// Sweep all documents for missing or corrupted content.
    ///
    /// Flags problems in the metadata store, records audit events, and
    /// enqueues the affected documents for background recovery.
    Scan,

    /// Recover documents immediately, bypassing the retry queue.
    Recover {
        /// Document ids to recover.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Retry-queue management.
    Retry {
        #[command(subcommand)]
        action: RetryAction,
    },

    /// Fleet or per-document health report.
    Report {
        /// Report on a single document, including its event trail.
        #[arg(long)]
        id: Option<String>,

        /// Emit CSV instead of JSON (fleet report only).
        #[arg(long)]
        csv: bool,

        /// Write the report to this path instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

/// Retry-queue subcommands.
#[derive(Subcommand)]
enum RetryAction {
    /// Run every due retry-queue item once.
    ///
    /// Successful recoveries mark their item succeeded; failures reschedule
    /// with exponential backoff until `recovery.max_attempts` is reached,
    /// then the item is abandoned.
    Process,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Metadata store initialized successfully.");
        }
        Commands::Commit {
            file,
            document,
            name,
            actor,
            notes,
        } => {
            cmd_commit(&cfg, &file, document, name, actor, notes).await?;
        }
        Commands::Get { id, output } => {
            cmd_get(&cfg, &id, output).await?;
        }
        Commands::History { id } => {
            cmd_history(&cfg, &id).await?;
        }
        Commands::Restore {
            id,
            version,
            actor,
            notes,
        } => {
            cmd_restore(&cfg, &id, version, actor, notes).await?;
        }
        Commands::Prune { id, keep } => {
            cmd_prune(&cfg, &id, keep).await?;
        }
        Commands::Verify { id } => {
            cmd_verify(&cfg, id).await?;
        }
        Commands::Scan => {
            cmd_scan(&cfg).await?;
        }
        Commands::Recover { ids } => {
            cmd_recover(&cfg, ids).await?;
        }
        Commands::Retry {
            action: RetryAction::Process,
        } => {
            cmd_retry_process(&cfg).await?;
        }
        Commands::Report { id, csv, output } => {
            cmd_report(&cfg, id, csv, output).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn cmd_commit(
    cfg: &config::Config,
    file: &PathBuf,
    document: Option<String>,
    name: Option<String>,
    actor: Option<String>,
    notes: Option<String>,
) -> Result<()> {
    let bytes = tokio::fs::read(file).await?;
    let pool = db::connect(cfg).await?;
    let gw = Gateway::from_config(cfg)?;

    let outcome = match document {
        Some(id) => {
            versions::create_version(&pool, &gw, &id, &bytes, actor.as_deref(), notes.as_deref())
                .await?
        }
        None => {
            let display_name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "untitled".to_string())
            });
            versions::commit_new_document(
                &pool,
                &gw,
                &display_name,
                &bytes,
                actor.as_deref(),
                notes.as_deref(),
            )
            .await?
        }
    };

    println!("document: {}", outcome.document_id);
    println!("version: {}", outcome.version);
    println!("checksum: {}", outcome.checksum);
    if !outcome.stored_primary {
        println!("note: primary write failed; upload queued for retry");
    }
    Ok(())
}

async fn cmd_get(cfg: &config::Config, id: &str, output: Option<PathBuf>) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let gw = Gateway::from_config(cfg)?;

    let doc = documents::get_document(&pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no document with id: {}", id))?;
    let bytes = gw.fetch(&pool, &doc).await?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, &bytes).await?;
            println!("wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => {
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

async fn cmd_history(cfg: &config::Config, id: &str) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let doc = documents::get_document(&pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no document with id: {}", id))?;
    let ledger = versions::history(&pool, id).await?;

    println!("document: {} ({})", doc.id, doc.display_name);
    println!("current version: {}", doc.current_version);
    for v in ledger {
        println!(
            "  v{}  {}  by {}  {}",
            v.version_number,
            v.checksum,
            v.created_by.as_deref().unwrap_or("system"),
            v.notes.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_restore(
    cfg: &config::Config,
    id: &str,
    version: i64,
    actor: Option<String>,
    notes: Option<String>,
) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let gw = Gateway::from_config(cfg)?;

    let new_version =
        versions::restore(&pool, &gw, id, version, actor.as_deref(), notes.as_deref()).await?;
    println!("document: {}", id);
    println!("restored version {} as version {}", version, new_version);
    Ok(())
}

async fn cmd_prune(cfg: &config::Config, id: &str, keep: i64) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let gw = Gateway::from_config(cfg)?;

    let outcome = versions::prune(&pool, &gw, id, keep).await?;
    println!("pruned: {} versions deleted, {} kept", outcome.deleted, outcome.kept);
    Ok(())
}

async fn cmd_verify(cfg: &config::Config, id: Option<String>) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let gw = Gateway::from_config(cfg)?;

    let ids = match id {
        Some(id) => vec![id],
        None => documents::list_document_ids(&pool).await?,
    };
    let results =
        checksum::verify_batch(&pool, &gw, &ids, cfg.recovery.concurrency).await?;

    let mut problems = 0;
    for (id, verification) in &results {
        println!("{}  {}", id, verification.status.as_str());
        if verification.status != checksum::VerifyStatus::Valid {
            problems += 1;
        }
    }
    println!(
        "verified {} document(s), {} problem(s)",
        results.len(),
        problems
    );
    Ok(())
}

async fn cmd_scan(cfg: &config::Config) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let gw = Gateway::from_config(cfg)?;

    let outcome = recovery::scan(&pool, &gw, cfg.recovery.concurrency).await?;
    println!("scanned: {}", outcome.scanned);
    println!("missing: {}", outcome.missing);
    println!("mismatched: {}", outcome.mismatched);
    println!("enqueued: {}", outcome.enqueued);
    Ok(())
}

async fn cmd_recover(cfg: &config::Config, ids: Vec<String>) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let gw = Gateway::from_config(cfg)?;

    let results = recovery::recover_batch(&pool, &gw, &ids, cfg.recovery.concurrency).await?;
    let mut failures = 0;
    for (id, result) in results {
        match result {
            Ok(r) => match r.new_version {
                Some(v) => println!("{}  recovered ({}, new version {})", id, r.method, v),
                None => println!("{}  recovered ({})", id, r.method),
            },
            Err(e) => {
                failures += 1;
                println!("{}  failed: {}", id, e);
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} document(s) could not be recovered", failures);
    }
    Ok(())
}

async fn cmd_retry_process(cfg: &config::Config) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let gw = Gateway::from_config(cfg)?;

    let outcome = recovery::process_retry_queue(&pool, &gw, &cfg.recovery).await?;
    println!("processed: {}", outcome.processed);
    println!("succeeded: {}", outcome.succeeded);
    println!("failed: {}", outcome.failed);
    println!("abandoned: {}", outcome.abandoned);
    println!("rescheduled: {}", outcome.rescheduled);
    Ok(())
}

async fn cmd_report(
    cfg: &config::Config,
    id: Option<String>,
    csv: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let pool = db::connect(cfg).await?;

    let rendered = match id {
        Some(id) => {
            let doc_report = report::document_report(&pool, &id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no document with id: {}", id))?;
            serde_json::to_string_pretty(&doc_report)?
        }
        None => {
            let snapshot = report::health_report(&pool).await?;
            if csv {
                report::export_csv(&snapshot)
            } else {
                serde_json::to_string_pretty(&snapshot)?
            }
        }
    };

    match output {
        Some(path) => {
            tokio::fs::write(&path, rendered.as_bytes()).await?;
            println!("wrote report to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
