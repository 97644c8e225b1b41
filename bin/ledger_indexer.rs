//! # Ledger Indexer
//!
//! Command-line entry point: runs one ingestion pass over a block range, or rebuilds the
//! projection tables from the stored event log.
//!
//! ## Usage
//!
//! ```bash
//! ledger-indexer run --from-block 1200000 --to-block latest
//! ledger-indexer run --dry-run
//! ledger-indexer rebuild
//! ```
//!
//! Configuration comes from `Config.toml`, `.env` and the process environment
//! (`RPC_URL`, `CHAIN_ID`, `POSTGRES_DSN`, `<CONTRACT>_ADDRESS`, ...). Exits non-zero
//! unless the pass committed.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use deal_ledger_indexer::{
    fetcher::RpcLogFetcher,
    store::{memory::MemoryStore, postgres::PgLedgerStore, LedgerStore},
    types::BlockTag,
    PassReport, Pipeline, Settings, SignatureRegistry,
};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[clap(rename_all = "kebab-case", author, version, about)]
struct Args {
    /// Configuration file (defaults to ./Config.toml when present)
    #[clap(long)]
    config: Option<PathBuf>,
    /// Directory with `<Contract>.abi.json` files; overrides ABI_DIR
    #[clap(long)]
    abi_dir: Option<PathBuf>,
    /// Serve Prometheus metrics on this address
    #[cfg(feature = "observability")]
    #[clap(long)]
    metrics_addr: Option<std::net::SocketAddr>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one block range and commit it atomically
    Run {
        #[clap(long)]
        from_block: Option<u64>,
        /// Block number or `latest`
        #[clap(long)]
        to_block: Option<BlockTag>,
        /// Use an in-memory store instead of PostgreSQL and discard the result
        #[clap(long)]
        dry_run: bool,
    },
    /// Rebuild projection tables from stored events
    Rebuild,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load(Some(path.as_path()))?,
        None => Settings::new()?,
    };
    if let Some(dir) = args.abi_dir {
        settings.abi.dir = Some(dir);
    }

    #[cfg(feature = "observability")]
    {
        if let Some(addr) = args.metrics_addr {
            deal_ledger_indexer::metrics::install_exporter(addr)?;
        }
    }

    let dry_run = match &args.command {
        Command::Run {
            from_block,
            to_block,
            dry_run,
        } => {
            if let Some(from) = from_block {
                settings.scan.from_block = *from;
            }
            if let Some(to) = to_block {
                settings.scan.to_block = *to;
            }
            *dry_run
        }
        Command::Rebuild => false,
    };

    settings.validate(dry_run)?;
    let contracts = settings.contract_addresses()?;
    let registry = SignatureRegistry::load(
        settings.abi.dir.as_deref(),
        contracts.keys().map(String::as_str),
    )?;
    let fetcher = RpcLogFetcher::new(&settings.rpc)?;

    let store: Box<dyn LedgerStore> = if dry_run {
        info!("Dry run: writes go to an in-memory store");
        Box::new(MemoryStore::new())
    } else {
        let dsn = settings.database.dsn.as_deref().unwrap_or_default();
        Box::new(
            PgLedgerStore::connect(
                dsn,
                settings.database.max_connections,
                settings.database.connect_attempts,
            )
            .await?,
        )
    };

    let pipeline = Pipeline::new(settings.chain.id, &registry, &fetcher, store.as_ref());
    let report = match args.command {
        Command::Run { .. } => {
            pipeline
                .run_pass(settings.scan.from_block, settings.scan.to_block, &contracts)
                .await?
        }
        Command::Rebuild => pipeline.rebuild(&contracts).await?,
    };

    print_report(&report, dry_run);
    Ok(())
}

fn print_report(report: &PassReport, dry_run: bool) {
    let title = if dry_run {
        "Pass completed (dry run, nothing persisted)".yellow().bold()
    } else {
        "Pass committed".green().bold()
    };
    println!("{} {}", title, report.pass_id.to_string().dimmed());
    println!("  blocks      {}..={}", report.from_block, report.to_block);
    println!("  fetched     {}", report.fetched);
    println!("  skipped     {}", report.skipped);
    println!("  appended    {}", report.appended);
    println!("  duplicates  {}", report.duplicates);
    println!("  projected   {}", report.projected);
    println!("  unchanged   {}", report.unchanged);
    let gaps = format!("  gaps        {}", report.gaps);
    println!("{}", if report.gaps > 0 { gaps.yellow() } else { gaps.normal() });
    let stale = format!("  stale       {}", report.stale);
    println!("{}", if report.stale > 0 { stale.yellow() } else { stale.normal() });
}
