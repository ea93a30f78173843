//! # kb-sync CLI (`kbsync`)
//!
//! Imports help-desk articles into a vector store.
//!
//! ## Usage
//!
//! ```bash
//! kbsync --config ./config/kbsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbsync init` | Create the destination collection if it is missing |
//! | `kbsync sync` | Run one incremental sync in the foreground |
//! | `kbsync sync --reset` | Drop the collection and reimport everything |
//! | `kbsync serve` | Start the HTTP control server |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` filter);
//! command summaries go to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

use kb_sync::config;
use kb_sync::error::SyncError;
use kb_sync::ingest::{Importer, SyncOptions, SyncReport};
use kb_sync::progress::ProgressMode;
use kb_sync::run_state::SyncCounters;
use kb_sync::schema::{ensure_schema, SchemaAction};
use kb_sync::server;
use kb_sync::store::create_store;

/// kb-sync: keep a vector store in step with a help-desk knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbsync.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "kbsync", version, about = "Sync help-desk articles into a vector store")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the destination collection if it does not exist.
    ///
    /// Idempotent: an existing collection and its records are left alone.
    Init,

    /// Import new and changed articles.
    Sync {
        /// Drop and recreate the collection, then import every article.
        #[arg(long)]
        reset: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Start the HTTP server (`POST /import/articles`, `GET /import/status`).
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = create_store(&cfg.store).await?;
            let dims = if cfg.embedding.is_enabled() {
                cfg.embedding.dims.unwrap_or(0)
            } else {
                0
            };
            let action = ensure_schema(store.as_ref(), false, dims, &cfg.store.readiness).await?;
            let verb = match action {
                SchemaAction::Kept => "already exists",
                SchemaAction::Created | SchemaAction::Recreated => "created",
            };
            println!(
                "Collection '{}' ({}) {}.",
                store.collection(),
                store.backend(),
                verb
            );
        }
        Commands::Sync { reset, progress } => {
            let importer = Importer::from_config(&cfg).await?;
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();

            match importer.run(SyncOptions { reset }, reporter.as_ref()).await {
                Ok(report) => print_report(&report),
                Err(SyncError::Fatal { message, counters }) => {
                    println!("sync failed");
                    print_counters(&counters);
                    anyhow::bail!("sync failed: {}", message);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Serve => {
            let importer = Arc::new(Importer::from_config(&cfg).await?);
            server::run_server(&cfg, importer).await?;
        }
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "sync {}{}",
        report.collection,
        if report.reset { " (reset)" } else { "" }
    );
    print_counters(&report.counters);
    println!("  elapsed: {} ms", report.elapsed_ms);
    println!("ok");
}

fn print_counters(c: &SyncCounters) {
    println!("  pages: {}", c.pages);
    println!("  seen: {}", c.seen);
    println!("  written: {}", c.written);
    println!("  skipped unchanged: {}", c.skipped_unchanged);
    println!("  skipped no content: {}", c.skipped_no_content);
    println!("  skipped embedding failure: {}", c.skipped_embedding_failure);
    println!("  skipped duplicate: {}", c.skipped_duplicate);
    println!("  skipped source error: {}", c.skipped_source_error);
    println!("  date parse failures: {}", c.date_parse_failures);
    if c.batch_failures > 0 {
        println!(
            "  batch failures: {} ({} records)",
            c.batch_failures, c.records_failed
        );
    }
}
