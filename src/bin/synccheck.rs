//! The status tool (§6, §4.11): reports the most recent run per host plus
//! optional detail listings, including the legacy stale/orphaned read path
//! kept only for the dashboard (§9 Open Question) — it never writes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;

use dirscansync::config::{self, Config};
use dirscansync::error::ScanError;
use dirscansync::selector::{self, MAIN_DB_NAME};
use dirscansync::store::http::HttpStore;
use dirscansync::store::{DocumentStore, ViewQuery};
use dirscansync::views::{self, TargetDb};

#[derive(Parser, Debug)]
#[command(name = "synccheck", version)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Repeat every <minutes>, polling indefinitely
    #[arg(short = 'r', long = "repeat")]
    repeat: Option<u64>,

    /// Detail listings to include: any subset of s (stale), o (orphaned), m (missing), e (error)
    #[arg(long = "detail")]
    detail: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let detail: HashSet<char> = cli.detail.as_deref().unwrap_or("").chars().collect();
    let repeat = cli.repeat;

    match run(cli.config, detail, repeat).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(
    config_flag: Option<PathBuf>,
    detail: HashSet<char>,
    repeat_minutes: Option<u64>,
) -> Result<(), ScanError> {
    let config_path = Config::resolve_path(config_flag.as_deref());
    let config = Config::load(&config_path)?;
    let store = HttpStore::new(&config.cloudant_account, &config.cloudant_auth);
    views::ensure_views(&store, MAIN_DB_NAME, TargetDb::Main)
        .await
        .map_err(store_err)?;

    let runtime = config::load_runtime_config(&store, MAIN_DB_NAME, config).await?;

    loop {
        report(&store, &runtime.config.host_id, &runtime.peer_host_id, &detail).await?;
        match repeat_minutes {
            Some(minutes) => tokio::time::sleep(Duration::from_secs(minutes * 60)).await,
            None => return Ok(()),
        }
    }
}

async fn report(
    store: &dyn DocumentStore,
    host_id: &str,
    peer_host_id: &str,
    detail: &HashSet<char>,
) -> Result<(), ScanError> {
    let own_db = selector::current_database_for(store, MAIN_DB_NAME, host_id).await?;
    let peer_db = selector::current_database_for(store, MAIN_DB_NAME, peer_host_id).await?;

    match &own_db {
        Some(db) => println!("host {host_id}: scan database {db}"),
        None => {
            println!("host {host_id}: no scan database on record");
            return Ok(());
        }
    }
    let own_db = own_db.unwrap();

    if detail.contains(&'e') {
        let rows = store
            .view(&own_db, "files", "problemfiles", ViewQuery::new())
            .await
            .map_err(store_err)?;
        println!("errors: {}", rows.len());
        for row in &rows {
            println!("  {} {}", describe_key(&row.key), value_str(&row.value));
        }
    }

    if detail.contains(&'m') {
        let rows = store
            .view(
                &own_db,
                "files",
                "missingfiles",
                ViewQuery::new().reduced(2),
            )
            .await
            .map_err(store_err)?;
        for row in &rows {
            println!("missing: {} -> {}", describe_key(&row.key), row.value);
        }
    }

    if (detail.contains(&'s') || detail.contains(&'o')) && peer_db.is_some() {
        let peer_db = peer_db.unwrap();
        let (stale, orphaned) = legacy_stale_and_orphaned(store, &own_db, &peer_db).await?;
        if detail.contains(&'s') {
            println!("stale (legacy): {}", stale.len());
            for id in &stale {
                println!("  {id}");
            }
        }
        if detail.contains(&'o') {
            println!("orphaned (legacy): {}", orphaned.len());
            for id in &orphaned {
                println!("  {id}");
            }
        }
    }

    Ok(())
}

/// Legacy dashboard read path (§9 Open Question): a file is `stale` when its
/// source-side sync entry has no counterpart on the peer; `orphaned` when the
/// peer has an entry whose expected source prefix doesn't exist locally.
/// Retained only as a report — the core write path uses `check_for_delete`
/// and `duplicate_files` instead.
async fn legacy_stale_and_orphaned(
    store: &dyn DocumentStore,
    own_db: &str,
    peer_db: &str,
) -> Result<(Vec<String>, Vec<String>), ScanError> {
    let own_rows = store
        .view(own_db, "sync", "sync", ViewQuery::new())
        .await
        .map_err(store_err)?;
    let peer_rows = store
        .view(peer_db, "sync", "sync", ViewQuery::new())
        .await
        .map_err(store_err)?;

    let own_prefixes: HashSet<String> = own_rows
        .iter()
        .filter_map(|r| key_part(&r.key, 0))
        .collect();
    let peer_prefixes: HashSet<String> = peer_rows
        .iter()
        .filter_map(|r| key_part(&r.key, 0))
        .collect();

    let stale = own_rows
        .iter()
        .filter(|r| {
            key_part(&r.key, 1)
                .map(|sync_prefix| !peer_prefixes.contains(&sync_prefix))
                .unwrap_or(false)
        })
        .filter_map(|r| r.id.clone())
        .collect();

    let orphaned = peer_rows
        .iter()
        .filter(|r| {
            key_part(&r.key, 1)
                .map(|sync_prefix| !own_prefixes.contains(&sync_prefix))
                .unwrap_or(false)
        })
        .filter_map(|r| r.id.clone())
        .collect();

    Ok((stale, orphaned))
}

fn key_part(key: &Value, idx: usize) -> Option<String> {
    key.as_array()?.get(idx)?.as_str().map(str::to_string)
}

fn describe_key(key: &Value) -> String {
    key.as_array()
        .map(|parts| {
            parts
                .iter()
                .map(value_str)
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_else(|| value_str(key))
}

fn value_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn store_err(e: dirscansync::store::StoreError) -> ScanError {
    ScanError::Run {
        detail: e.to_string(),
    }
}
