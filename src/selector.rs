//! Picks the scan database a run writes into (§4.5).

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::error::ScanError;
use crate::store::{DocumentStore, KeyBound, ViewQuery};
use crate::views::{self, TargetDb};

pub const MAIN_DB_NAME: &str = "rsynccheckpoint";

pub struct Selection {
    pub database: String,
    pub firstscan: bool,
}

/// Algorithm (§4.5):
/// 1. Most recent run for THIS host, if its database still exists, wins.
/// 2. Otherwise the most recent run for the PEER, if its database exists.
/// 3. Otherwise create `scandb-<unix-seconds>` and ensure its views.
pub async fn select_scan_db(
    store: &dyn DocumentStore,
    main_db: &str,
    host_id: &str,
    peer_host_id: &str,
) -> Result<Selection, ScanError> {
    if let Some(db) = most_recent_database(store, main_db, host_id).await? {
        if store.exists(&db).await.map_err(store_err)? {
            return Ok(Selection {
                database: db,
                firstscan: false,
            });
        }
    }

    if let Some(db) = most_recent_database(store, main_db, peer_host_id).await? {
        if store.exists(&db).await.map_err(store_err)? {
            return Ok(Selection {
                database: db,
                firstscan: false,
            });
        }
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ScanError::Run {
            detail: format!("system clock before epoch: {e}"),
        })?
        .as_secs();
    let name = format!("scandb-{now}");
    store.create_db(&name).await.map_err(store_err)?;
    views::ensure_views(store, &name, TargetDb::Scan)
        .await
        .map_err(store_err)?;
    Ok(Selection {
        database: name,
        firstscan: true,
    })
}

/// Read-only lookup for the status tool (§4.11): the scan database a host's
/// most recent run wrote into, if it still exists. Never creates anything.
pub async fn current_database_for(
    store: &dyn DocumentStore,
    main_db: &str,
    host_id: &str,
) -> Result<Option<String>, ScanError> {
    match most_recent_database(store, main_db, host_id).await? {
        Some(db) if store.exists(&db).await.map_err(store_err)? => Ok(Some(db)),
        _ => Ok(None),
    }
}

async fn most_recent_database(
    store: &dyn DocumentStore,
    main_db: &str,
    host_id: &str,
) -> Result<Option<String>, ScanError> {
    // Covers both success values for this host; "most recent" is decided in
    // Rust by comparing the `started` component of the emitted key, since
    // the view groups by (hostID, success) before (started) and a plain
    // descending walk would surface the latest *successful* run ahead of a
    // later failed one.
    let query = ViewQuery::new().range(
        KeyBound::Value(Value::from(vec![
            Value::String(host_id.to_string()),
            Value::Bool(false),
            Value::from(0),
        ])),
        KeyBound::Value(Value::from(vec![
            Value::String(host_id.to_string()),
            Value::Bool(true),
            serde_json::Value::Object(Default::default()),
        ])),
    );
    let rows = store
        .view(main_db, "scans", "recentscans", query)
        .await
        .map_err(store_err)?;

    let mut best: Option<(i64, String)> = None;
    for row in rows {
        let started = row
            .key
            .as_array()
            .and_then(|k| k.get(2))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let Some(database) = row.value.as_str() else {
            continue;
        };
        if best.as_ref().map(|(s, _)| started > *s).unwrap_or(true) {
            best = Some((started, database.to_string()));
        }
    }
    Ok(best.map(|(_, db)| db))
}

fn store_err(e: crate::store::StoreError) -> ScanError {
    ScanError::Run {
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    async fn seed_run(store: &MemoryStore, id: &str, host: &str, started: i64, database: &str) {
        store
            .put(
                MAIN_DB_NAME,
                json!({
                    "_id": id,
                    "type": "scan",
                    "hostID": host,
                    "success": true,
                    "started": started,
                    "database": database,
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn creates_fresh_database_when_nothing_exists() {
        let store = MemoryStore::new();
        store.create_db(MAIN_DB_NAME).await.unwrap();
        let selection = select_scan_db(&store, MAIN_DB_NAME, "host-a", "host-b")
            .await
            .unwrap();
        assert!(selection.firstscan);
        assert!(selection.database.starts_with("scandb-"));
        assert!(store.exists(&selection.database).await.unwrap());
    }

    #[tokio::test]
    async fn reuses_this_hosts_most_recent_database() {
        let store = MemoryStore::new();
        store.create_db(MAIN_DB_NAME).await.unwrap();
        store.create_db("scandb-100").await.unwrap();
        seed_run(&store, "run1", "host-a", 100, "scandb-100").await;

        let selection = select_scan_db(&store, MAIN_DB_NAME, "host-a", "host-b")
            .await
            .unwrap();
        assert!(!selection.firstscan);
        assert_eq!(selection.database, "scandb-100");
    }

    #[tokio::test]
    async fn falls_back_to_peers_database_when_this_host_has_none() {
        let store = MemoryStore::new();
        store.create_db(MAIN_DB_NAME).await.unwrap();
        store.create_db("scandb-200").await.unwrap();
        seed_run(&store, "run1", "host-b", 200, "scandb-200").await;

        let selection = select_scan_db(&store, MAIN_DB_NAME, "host-a", "host-b")
            .await
            .unwrap();
        assert!(!selection.firstscan);
        assert_eq!(selection.database, "scandb-200");
    }
}
