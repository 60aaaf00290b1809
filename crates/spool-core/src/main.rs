//! Event spool CLI.
//!
//! Operates on a feature's on-disk spool:
//! - `write`: persist events read line by line
//! - `status`: inventory of batches awaiting upload
//! - `upload`: one upload tick against the intake
//! - `flush`: upload every batch once and empty the spool
//! - `purge`: delete everything the feature holds

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use spool_common::{ConsentState, InternalLogger, Result, SystemTimeProvider, TracingLogger};
use spool_config::{ConfigResolver, SpoolConfig};
use spool_core::exit_codes::ExitCode;
use spool_core::inventory::{self, FeatureInventory, RootInventory};
use spool_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use spool_core::{Spool, SpoolOptions};
use spool_store::PlainBatchStore;
use tracing::debug;

/// Writes between two waits for the persistence queue to empty.
const WRITE_CHUNK: usize = 256;

/// Client-side event spool: batch, persist and upload telemetry events
#[derive(Parser)]
#[command(name = "spool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to the JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the storage root
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist events, one per input line
    Write(WriteArgs),

    /// Show the batches a feature holds
    Status(StatusArgs),

    /// Run one upload tick
    Upload(UploadArgs),

    /// Upload every batch once, then delete it
    Flush(UploadArgs),

    /// Delete every batch of a feature
    Purge(PurgeArgs),
}

#[derive(Args, Debug)]
struct WriteArgs {
    feature: String,

    /// Read events from this file instead of stdin
    #[arg(long)]
    input: Option<PathBuf>,

    /// Tracking consent the events are written under
    #[arg(long, default_value = "granted")]
    consent: ConsentState,

    /// Opaque batch metadata stored next to the batch
    #[arg(long)]
    metadata: Option<String>,

    /// Close the current batch after writing
    #[arg(long)]
    seal: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    feature: String,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct UploadArgs {
    feature: String,

    /// Intake URL, overriding the configured one
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Args, Debug)]
struct PurgeArgs {
    feature: String,
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(cli.global.log_level, cli.global.log_format);
    init_logging(&log_config);

    let result = match &cli.command {
        Commands::Write(args) => run_write(&cli.global, args),
        Commands::Status(args) => run_status(&cli.global, args),
        Commands::Upload(args) => run_upload(&cli.global, args),
        Commands::Flush(args) => run_flush(&cli.global, args),
        Commands::Purge(args) => run_purge(&cli.global, args),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            let code = ExitCode::from(&e);
            eprintln!("spool: {} [{}]", e, code.code_name());
            code
        }
    };
    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(global: &GlobalOpts) -> Result<SpoolConfig> {
    let (mut config, source) = ConfigResolver::new(global.config.clone()).load()?;
    debug!(
        resolution = %source.resolution,
        path = ?source.path,
        "configuration loaded"
    );
    if let Some(dir) = &global.storage_dir {
        config.storage_dir = Some(dir.clone());
    }
    Ok(config)
}

fn cli_options(consent: ConsentState) -> SpoolOptions {
    SpoolOptions {
        initial_consent: consent,
        start_uploads: false,
        ..SpoolOptions::default()
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("spool: unable to render output: {}", e),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn run_write(global: &GlobalOpts, args: &WriteArgs) -> Result<ExitCode> {
    let config = load_config(global)?;
    let timeout = Duration::from_millis(config.shutdown.wait_timeout_ms);
    let spool = Spool::new(config, cli_options(args.consent))?;
    let feature = spool.register_feature(&args.feature, None)?;
    let storage = feature.storage();

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).map_err(|e| spool_common::Error::io(path, e))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let metadata = args.metadata.as_ref().map(|m| m.as_bytes().to_vec());
    let mut written = 0usize;
    for line in reader.lines() {
        let line = line.map_err(|e| spool_common::Error::io("<input>", e))?;
        let event = line.trim();
        if event.is_empty() {
            continue;
        }
        storage.write_event(event.as_bytes().to_vec(), metadata.clone());
        written += 1;
        if written % WRITE_CHUNK == 0 {
            spool.wait_to_idle(timeout);
        }
    }
    if args.seal {
        storage.request_new_batch();
    }

    let report = spool.stop();
    print_json(&json!({
        "feature": args.feature,
        "consent": args.consent.to_string(),
        "written": written,
        "dropped_tasks": report.dropped_tasks,
    }));
    Ok(ExitCode::Clean)
}

fn run_status(global: &GlobalOpts, args: &StatusArgs) -> Result<ExitCode> {
    let config = load_config(global)?;
    let logger: Arc<dyn InternalLogger> = Arc::new(TracingLogger::new());
    let store = PlainBatchStore::new(logger.clone());
    let inventory = inventory::scan_feature(
        &config.resolved_storage_dir(),
        &args.feature,
        &store,
        &SystemTimeProvider,
        logger.as_ref(),
    );

    if args.json {
        print_json(&serde_json::to_value(&inventory)?);
    } else {
        print_inventory(&inventory);
    }
    Ok(ExitCode::Clean)
}

fn print_inventory(inventory: &FeatureInventory) {
    println!("feature: {}", inventory.feature);
    print_root("granted", &inventory.granted);
    print_root("pending", &inventory.pending);
}

fn print_root(label: &str, root: &RootInventory) {
    println!(
        "{}: {} ({} batches, {} records, {} bytes)",
        label,
        root.path.display(),
        root.batches.len(),
        root.total_records,
        root.total_bytes
    );
    for batch in &root.batches {
        let created = batch
            .created_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {}  age {:.1}s  {} records  {} bytes{}",
            batch.name,
            created,
            batch.age_ms as f64 / 1000.0,
            batch.records,
            batch.size_bytes,
            if batch.has_metadata { "  +metadata" } else { "" }
        );
    }
}

fn with_endpoint(mut config: SpoolConfig, endpoint: &Option<String>) -> SpoolConfig {
    if let Some(endpoint) = endpoint {
        config.intake.endpoint = Some(endpoint.clone());
    }
    config
}

fn run_upload(global: &GlobalOpts, args: &UploadArgs) -> Result<ExitCode> {
    let config = with_endpoint(load_config(global)?, &args.endpoint);
    let spool = Spool::new(config, cli_options(ConsentState::Granted))?;
    let uploader = spool.http_uploader(&args.feature)?;
    let feature = spool.register_feature(&args.feature, Some(uploader))?;

    let report = match feature.scheduler() {
        Some(scheduler) => scheduler.run_once(),
        None => return Err(spool_common::Error::Config("feature has no uploader".to_string())),
    };
    spool.stop();

    print_json(&serde_json::to_value(&report)?);
    Ok(if report.retained > 0 {
        ExitCode::Retained
    } else {
        ExitCode::Clean
    })
}

fn run_flush(global: &GlobalOpts, args: &UploadArgs) -> Result<ExitCode> {
    let config = with_endpoint(load_config(global)?, &args.endpoint);
    let spool = Spool::new(config, cli_options(ConsentState::Granted))?;
    let uploader = spool.http_uploader(&args.feature)?;
    spool.register_feature(&args.feature, Some(uploader))?;

    let report = spool.flush_and_stop();
    print_json(&serde_json::to_value(&report)?);
    let failed: usize = report.flushed.iter().map(|f| f.failed).sum();
    Ok(if failed > 0 {
        ExitCode::Retained
    } else {
        ExitCode::Clean
    })
}

fn run_purge(global: &GlobalOpts, args: &PurgeArgs) -> Result<ExitCode> {
    let config = load_config(global)?;
    let logger: Arc<dyn InternalLogger> = Arc::new(TracingLogger::new());
    let before = inventory::scan_feature(
        &config.resolved_storage_dir(),
        &args.feature,
        &PlainBatchStore::new(logger.clone()),
        &SystemTimeProvider,
        logger.as_ref(),
    );

    let spool = Spool::new(config, cli_options(ConsentState::Granted))?;
    let feature = spool.register_feature(&args.feature, None)?;
    feature.storage().drop_all();
    spool.stop();

    print_json(&json!({
        "feature": args.feature,
        "purged_batches": before.granted.batches.len() + before.pending.batches.len(),
        "purged_records": before.granted.total_records + before.pending.total_records,
    }));
    Ok(ExitCode::Clean)
}
