//! The scan tool (§6, §4.11): walks the configured root, records file
//! documents, reconciles files gone missing from the filesystem, and runs
//! routine database cleanup.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;

use dirscansync::config::{self, Config};
use dirscansync::error::ScanError;
use dirscansync::janitor::Janitor;
use dirscansync::logging::{self, Level};
use dirscansync::model::Run;
use dirscansync::reconciler::Reconciler;
use dirscansync::scanner::{ScanConfig, Scanner};
use dirscansync::selector::{self, MAIN_DB_NAME};
use dirscansync::store::http::HttpStore;
use dirscansync::store::DocumentStore;
use dirscansync::views::{self, TargetDb};

#[derive(Parser, Debug)]
#[command(name = "dirscan", version)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Initial-setup exclusions file, one substring pattern per line
    #[arg(short = 'x', long = "exclude-file")]
    exclude_file: Option<PathBuf>,

    /// Logging level: CRITICAL, ERROR, WARNING, INFO, DEBUG
    #[arg(short = 'l', long = "level")]
    level: Option<String>,

    /// Mirror log records to stdout
    #[arg(short = 'v', long = "verbose", default_value_t = false)]
    verbose: bool,

    /// Enable content digesting
    #[arg(long = "deep", default_value_t = false)]
    deep: bool,

    /// Ensure and upgrade all views, then exit
    #[arg(long = "check", default_value_t = false)]
    check: bool,

    /// Run the Janitor, then exit
    #[arg(long = "flush", default_value_t = false)]
    flush: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("fatal: {e}");
            logging::critical(e.to_string());
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<(), ScanError> {
    let level = cli
        .level
        .as_deref()
        .map(|s| Level::parse(s).ok_or_else(|| ScanError::Config {
            detail: format!("unknown logging level `{s}`"),
        }))
        .transpose()?
        .unwrap_or(Level::Warning);
    logging::init(&logging::default_log_path(), level, cli.verbose).map_err(|e| {
        ScanError::Config {
            detail: format!("init logging: {e}"),
        }
    })?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;

    let extra_exclusions = match &cli.exclude_file {
        Some(path) => config::load_exclusions(path)?,
        None => Vec::new(),
    };

    let store = HttpStore::new(&config.cloudant_account, &config.cloudant_auth);

    views::ensure_views(&store, MAIN_DB_NAME, TargetDb::Main)
        .await
        .map_err(store_err)?;

    if cli.check {
        logging::info("--check: views ensured, exiting");
        return Ok(());
    }

    if cli.flush {
        let janitor = Janitor::new(&store, MAIN_DB_NAME);
        let summary = janitor.run().await?;
        println!(
            "Janitor deleted {} empty and {} orphaned databases",
            summary.deleted_empty.len(),
            summary.deleted_orphaned.len()
        );
        return Ok(());
    }

    let runtime = config::load_runtime_config(&store, MAIN_DB_NAME, config).await?;
    let mut exclusions = runtime.relationship.excludedfiles.clone();
    exclusions.extend(extra_exclusions);

    let selection = selector::select_scan_db(
        &store,
        MAIN_DB_NAME,
        &runtime.config.host_id,
        &runtime.peer_host_id,
    )
    .await?;

    let started = now_epoch();
    let scan_id = format!("scan-{}-{started}", runtime.config.host_id);

    let run_doc = Run::started_now(
        runtime.config.host_id.clone(),
        runtime.config.relationship.clone(),
        runtime.is_source,
        runtime.local_dir.clone(),
        selection.database.clone(),
        None,
        selection.firstscan,
        cli.deep,
        started,
    );
    put_run(&store, &scan_id, &run_doc).await?;

    let scan_config = ScanConfig {
        host_id: runtime.config.host_id.clone(),
        peer_host_id: runtime.peer_host_id.clone(),
        relationship_id: runtime.config.relationship.clone(),
        root: PathBuf::from(&runtime.local_dir),
        exclusions,
        threshold: runtime.config.threshold as usize,
        deep: cli.deep,
        source: runtime.is_source,
        scan_id: scan_id.clone(),
        first_scan: selection.firstscan,
    };

    let scanner = Scanner::new(&store, &selection.database, &scan_config);
    let summary = scanner.run().await?;

    if !selection.firstscan && !summary.missing_files.is_empty() {
        let reconciler = Reconciler::new(&store, &selection.database);
        reconciler.run(&summary.missing_files).await?;
    }

    finish_run(&store, &scan_id, &summary).await?;

    let janitor = Janitor::new(&store, MAIN_DB_NAME);
    if let Err(e) = janitor.run().await {
        logging::warning(format!("end-of-scan janitor pass failed: {e}"));
    }

    if summary.success {
        println!(
            "Scan completed at {} on {} files",
            summary.ended, summary.filecount
        );
        Ok(())
    } else {
        println!(
            "Scan completed at {} with {} errors on {} files",
            summary.ended, summary.errorcount, summary.filecount
        );
        Err(ScanError::Batch {
            detail: format!("{} files failed", summary.errorcount),
        })
    }
}

async fn put_run(store: &dyn DocumentStore, id: &str, run: &Run) -> Result<(), ScanError> {
    let mut value = serde_json::to_value(run).expect("Run always serializes");
    value["_id"] = serde_json::Value::String(id.to_string());
    store.put(MAIN_DB_NAME, value).await.map_err(store_err)?;
    Ok(())
}

async fn finish_run(
    store: &dyn DocumentStore,
    id: &str,
    summary: &dirscansync::scanner::RunSummary,
) -> Result<(), ScanError> {
    let mut doc = store.get(MAIN_DB_NAME, id).await.map_err(store_err)?;
    doc["ended"] = serde_json::Value::from(summary.ended);
    doc["success"] = serde_json::Value::from(summary.success);
    doc["errorcount"] = serde_json::Value::from(summary.errorcount);
    doc["filecount"] = serde_json::Value::from(summary.filecount);
    doc["directorysize"] = serde_json::Value::from(summary.directorysize);
    store.put(MAIN_DB_NAME, doc).await.map_err(store_err)?;
    Ok(())
}

fn store_err(e: dirscansync::store::StoreError) -> ScanError {
    ScanError::Run {
        detail: e.to_string(),
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
