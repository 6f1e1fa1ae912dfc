//! Scan-database cleanup (§4.8). Runs on demand, or optionally at the end of
//! a scan, against whichever main database holds the run records.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ScanError;
use crate::store::{DocumentStore, ViewQuery};
use crate::views::{self, TargetDb};

const ONE_DAY_SECS: i64 = 24 * 60 * 60;
const SEVEN_DAY_SECS: i64 = 7 * ONE_DAY_SECS;

#[derive(Debug, Default)]
pub struct JanitorSummary {
    pub deleted_empty: Vec<String>,
    pub deleted_orphaned: Vec<String>,
}

pub struct Janitor<'a> {
    store: &'a dyn DocumentStore,
    main_db: &'a str,
}

impl<'a> Janitor<'a> {
    pub fn new(store: &'a dyn DocumentStore, main_db: &'a str) -> Self {
        Self { store, main_db }
    }

    pub async fn run(&self) -> Result<JanitorSummary, ScanError> {
        let now = now_epoch();
        let mut summary = JanitorSummary::default();

        let candidates: Vec<String> = self
            .store
            .list_dbs()
            .await
            .map_err(store_err)?
            .into_iter()
            .filter(|name| name.starts_with("scandb-"))
            .collect();

        let referenced = self.successfully_referenced().await?;
        let baseline = scan_design_doc_baseline();

        for name in candidates {
            let Some(born) = parse_birth_timestamp(&name) else {
                continue;
            };
            let age = now - born;

            if age > ONE_DAY_SECS {
                let count = self.store.doc_count(&name).await.map_err(store_err)?;
                if count <= baseline {
                    self.store.delete_db(&name).await.map_err(store_err)?;
                    crate::logging::info(format!("janitor deleted empty database {name}"));
                    summary.deleted_empty.push(name);
                    continue;
                }
            }

            if age > SEVEN_DAY_SECS && !referenced.contains(&name) {
                self.store.delete_db(&name).await.map_err(store_err)?;
                crate::logging::info(format!("janitor deleted orphaned database {name}"));
                summary.deleted_orphaned.push(name);
            }
        }

        Ok(summary)
    }

    /// Scan database names referenced by any `success=true` run, across all
    /// hosts, via an unbounded walk of `recent_scans` (§4.4).
    async fn successfully_referenced(&self) -> Result<HashSet<String>, ScanError> {
        let rows = self
            .store
            .view(self.main_db, "scans", "recentscans", ViewQuery::new())
            .await
            .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                row.key
                    .as_array()
                    .and_then(|k| k.get(1))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            })
            .filter_map(|row| row.value.as_str().map(str::to_string))
            .collect())
    }
}

fn scan_design_doc_baseline() -> u64 {
    let design_docs: HashSet<&str> = views::registry()
        .into_iter()
        .filter(|d| d.target == TargetDb::Scan)
        .map(|d| d.design_doc)
        .collect();
    design_docs.len() as u64 + 1 // + scanversion
}

fn parse_birth_timestamp(name: &str) -> Option<i64> {
    name.strip_prefix("scandb-")?.parse().ok()
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
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

    #[tokio::test]
    async fn leaves_young_empty_database_alone() {
        let store = MemoryStore::new();
        store.create_db("main").await.unwrap();
        let now = now_epoch();
        let name = format!("scandb-{now}");
        store.create_db(&name).await.unwrap();

        let janitor = Janitor::new(&store, "main");
        let summary = janitor.run().await.unwrap();
        assert!(summary.deleted_empty.is_empty());
        assert!(store.exists(&name).await.unwrap());
    }

    #[tokio::test]
    async fn deletes_old_empty_database() {
        let store = MemoryStore::new();
        store.create_db("main").await.unwrap();
        let born = now_epoch() - ONE_DAY_SECS - 10;
        let name = format!("scandb-{born}");
        store.create_db(&name).await.unwrap();

        let janitor = Janitor::new(&store, "main");
        let summary = janitor.run().await.unwrap();
        assert_eq!(summary.deleted_empty, vec![name.clone()]);
        assert!(!store.exists(&name).await.unwrap());
    }

    #[tokio::test]
    async fn keeps_old_nonempty_database_referenced_by_recent_success() {
        let store = MemoryStore::new();
        store.create_db("main").await.unwrap();
        let born = now_epoch() - SEVEN_DAY_SECS - 10;
        let name = format!("scandb-{born}");
        store.create_db(&name).await.unwrap();
        views::ensure_views(&store, &name, TargetDb::Scan).await.unwrap();
        store
            .put(&name, json!({"_id": "f1", "type": "file", "goodscan": true}))
            .await
            .unwrap();
        store
            .put(
                "main",
                json!({
                    "_id": "run1",
                    "type": "scan",
                    "hostID": "host-a",
                    "success": true,
                    "started": born,
                    "database": name,
                }),
            )
            .await
            .unwrap();

        let janitor = Janitor::new(&store, "main");
        let summary = janitor.run().await.unwrap();
        assert!(summary.deleted_empty.is_empty());
        assert!(summary.deleted_orphaned.is_empty());
        assert!(store.exists(&name).await.unwrap());
    }

    #[tokio::test]
    async fn deletes_old_nonempty_database_with_no_successful_reference() {
        let store = MemoryStore::new();
        store.create_db("main").await.unwrap();
        let born = now_epoch() - SEVEN_DAY_SECS - 10;
        let name = format!("scandb-{born}");
        store.create_db(&name).await.unwrap();
        views::ensure_views(&store, &name, TargetDb::Scan).await.unwrap();
        store
            .put(&name, json!({"_id": "f1", "type": "file", "goodscan": true}))
            .await
            .unwrap();

        let janitor = Janitor::new(&store, "main");
        let summary = janitor.run().await.unwrap();
        assert_eq!(summary.deleted_orphaned, vec![name.clone()]);
        assert!(!store.exists(&name).await.unwrap());
    }
}
