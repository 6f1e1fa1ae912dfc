//! Walks the configured root, applies the exclusion filter, produces file
//! records, batches them, and drives the compare-and-insert pipeline (§4.6).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use walkdir::WalkDir;

use crate::error::ScanError;
use crate::identity::{error_id, file_id, id_prefix};
use crate::metadata;
use crate::model::{FileDoc, FileStatus};
use crate::store::{DocumentStore, KeyBound, StoreError, ViewQuery};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub host_id: String,
    pub peer_host_id: String,
    pub relationship_id: String,
    pub root: PathBuf,
    pub exclusions: Vec<String>,
    pub threshold: usize,
    pub deep: bool,
    pub source: bool,
    pub scan_id: String,
    pub first_scan: bool,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub started: i64,
    pub ended: i64,
    pub filecount: u64,
    pub errorcount: u64,
    pub directorysize: u64,
    pub success: bool,
    /// Document ids the directory-scoped check expected but the filesystem
    /// no longer has — drained by the Reconciler (§4.6 step 5, §9 design
    /// note "Missing-files set").
    pub missing_files: Vec<String>,
}

pub struct Scanner<'a> {
    store: &'a dyn DocumentStore,
    scandb: &'a str,
    config: &'a ScanConfig,
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn is_excluded(path: &Path, exclusions: &[String]) -> bool {
    let p = path.to_string_lossy();
    exclusions.iter().any(|pattern| p.contains(pattern.as_str()))
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a dyn DocumentStore, scandb: &'a str, config: &'a ScanConfig) -> Self {
        Self {
            store,
            scandb,
            config,
        }
    }

    pub async fn run(&self) -> Result<RunSummary, ScanError> {
        let started = now_epoch();
        let mut summary = RunSummary {
            started,
            ..Default::default()
        };
        let mut batch: Vec<FileDoc> = Vec::new();

        let walker = WalkDir::new(&self.config.root)
            .contents_first(true)
            .into_iter()
            .filter_entry(|e| !is_excluded(e.path(), &self.config.exclusions));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    summary.errorcount += 1;
                    crate::logging::warning(format!("walk error: {e}"));
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                if !self.config.first_scan {
                    self.check_directory_for_missing(entry.path(), &mut summary)
                        .await?;
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let doc = self.build_record(entry.path(), &mut summary);
            summary.directorysize += doc.size;
            batch.push(doc);

            if batch.len() >= self.config.threshold {
                self.flush_batch(std::mem::take(&mut batch), &mut summary)
                    .await?;
            }
        }

        if !batch.is_empty() {
            self.flush_batch(batch, &mut summary).await?;
        }

        summary.ended = now_epoch();
        summary.success = summary.errorcount == 0;
        Ok(summary)
    }

    fn relative_parts(&self, abs_path: &Path) -> Option<(String, String, String)> {
        let rel = abs_path.strip_prefix(&self.config.root).ok()?;
        let rel_str = rel.to_str()?.replace(std::path::MAIN_SEPARATOR, "/");
        let name = rel
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let dir = rel
            .parent()
            .map(|p| p.to_str().unwrap_or_default().replace(std::path::MAIN_SEPARATOR, "/"))
            .unwrap_or_default();
        Some((rel_str, dir, name))
    }

    fn build_record(&self, abs_path: &Path, summary: &mut RunSummary) -> FileDoc {
        let host = &self.config.host_id;
        let now = now_epoch();

        let Some((rel_full, rel_dir, name)) = self.relative_parts(abs_path) else {
            summary.errorcount += 1;
            let raw = abs_path.as_os_str().as_encoded_bytes();
            let id = error_id(host, raw);
            return FileDoc {
                id,
                rev: None,
                doc_type: "file".to_string(),
                id_prefix: String::new(),
                sync_id_prefix: String::new(),
                syncpath: String::new(),
                host: host.clone(),
                relationship: self.config.relationship_id.clone(),
                scan_id: self.config.scan_id.clone(),
                source: self.config.source,
                path: String::new(),
                name: abs_path.to_string_lossy().to_string(),
                datescanned: now,
                size: 0,
                permissions_unix: 0,
                datemodified: 0,
                owner: 0,
                group: 0,
                goodscan: false,
                checksum: None,
                status: FileStatus::error("path is not valid UTF-8"),
            };
        };

        let id_pfx = id_prefix(host, &rel_full);
        let sync_id_pfx = id_prefix(&self.config.peer_host_id, &rel_full);

        match metadata::probe(abs_path) {
            Ok(stat) => {
                summary.filecount += 1;
                let checksum = if self.config.deep {
                    metadata::digest(abs_path).ok()
                } else {
                    None
                };
                FileDoc {
                    id: file_id(host, &rel_full, stat.mtime),
                    rev: None,
                    doc_type: "file".to_string(),
                    id_prefix: id_pfx,
                    sync_id_prefix: sync_id_pfx,
                    syncpath: rel_full,
                    host: host.clone(),
                    relationship: self.config.relationship_id.clone(),
                    scan_id: self.config.scan_id.clone(),
                    source: self.config.source,
                    path: rel_dir,
                    name,
                    datescanned: now,
                    size: stat.size,
                    permissions_unix: stat.mode,
                    datemodified: stat.mtime,
                    owner: stat.uid,
                    group: stat.gid,
                    goodscan: true,
                    checksum,
                    status: FileStatus::ok(),
                }
            }
            Err(stat_err) => {
                summary.errorcount += 1;
                FileDoc {
                    id: id_pfx.clone(),
                    rev: None,
                    doc_type: "file".to_string(),
                    id_prefix: id_pfx,
                    sync_id_prefix: sync_id_pfx,
                    syncpath: rel_full,
                    host: host.clone(),
                    relationship: self.config.relationship_id.clone(),
                    scan_id: self.config.scan_id.clone(),
                    source: self.config.source,
                    path: rel_dir,
                    name,
                    datescanned: now,
                    size: 0,
                    permissions_unix: 0,
                    datemodified: 0,
                    owner: 0,
                    group: 0,
                    goodscan: false,
                    checksum: None,
                    status: FileStatus::error(stat_err.to_string()),
                }
            }
        }
    }

    /// §4.6 step 4 — first scan inserts unconditionally; subsequent scans
    /// compare by drift field (checksum under deep scan, else size) and only
    /// re-insert the residual.
    async fn flush_batch(
        &self,
        batch: Vec<FileDoc>,
        summary: &mut RunSummary,
    ) -> Result<(), ScanError> {
        if self.config.first_scan {
            return self.bulk_insert(batch, summary).await;
        }

        let ids: Vec<String> = batch.iter().map(|d| d.id.clone()).collect();
        let existing = self
            .store
            .all_by_ids(self.scandb, &ids)
            .await
            .map_err(|e| ScanError::Batch {
                detail: e.to_string(),
            })?;

        let mut residual = Vec::with_capacity(batch.len());
        for (doc, prior) in batch.into_iter().zip(existing.into_iter()) {
            match prior {
                Some(prior_doc) => {
                    if self.has_drifted(&prior_doc, &doc) {
                        self.mark_possibly_corrupted(prior_doc, &doc).await?;
                    }
                    // Same _id, so same path+mtime: the stored document
                    // already represents this file. No re-insert needed.
                }
                None => residual.push(doc),
            }
        }

        if !residual.is_empty() {
            self.bulk_insert(residual, summary).await?;
        }
        Ok(())
    }

    fn has_drifted(&self, prior: &Value, fresh: &FileDoc) -> bool {
        if self.config.deep {
            let prior_sum = prior.get("checksum").and_then(|v| v.as_str());
            prior_sum != fresh.checksum.as_deref()
        } else {
            let prior_size = prior.get("size").and_then(|v| v.as_u64());
            prior_size != Some(fresh.size)
        }
    }

    async fn mark_possibly_corrupted(
        &self,
        mut prior_doc: Value,
        fresh: &FileDoc,
    ) -> Result<(), ScanError> {
        prior_doc["status"] =
            serde_json::to_value(FileStatus::possibly_corrupted()).expect("FileStatus always serializes");
        if self.config.deep {
            prior_doc["checksum"] = fresh
                .checksum
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null);
        } else {
            prior_doc["size"] = Value::from(fresh.size);
        }
        crate::logging::warning(format!(
            "possible corruption detected for {} ({})",
            fresh.syncpath, fresh.id
        ));
        self.store
            .put(self.scandb, prior_doc)
            .await
            .map_err(|e| ScanError::Batch {
                detail: e.to_string(),
            })?;
        Ok(())
    }

    async fn bulk_insert(
        &self,
        docs: Vec<FileDoc>,
        summary: &mut RunSummary,
    ) -> Result<(), ScanError> {
        if docs.is_empty() {
            return Ok(());
        }
        let values: Vec<Value> = docs
            .iter()
            .map(|d| serde_json::to_value(d).expect("FileDoc always serializes"))
            .collect();
        let outcomes = self
            .store
            .bulk(self.scandb, values.clone())
            .await
            .map_err(|e| ScanError::Batch {
                detail: e.to_string(),
            })?;

        let failed_ids: Vec<String> = outcomes
            .iter()
            .filter_map(|o| match o {
                crate::store::BulkOutcome::Err { id, .. } => Some(id.clone()),
                crate::store::BulkOutcome::Ok { .. } => None,
            })
            .collect();
        if failed_ids.is_empty() {
            return Ok(());
        }

        // Batch-level error (§7): retry the failed items once.
        crate::logging::warning(format!(
            "{} documents failed bulk insert, retrying once",
            failed_ids.len()
        ));
        let retry_docs: Vec<Value> = values
            .into_iter()
            .filter(|v| {
                v.get("_id")
                    .and_then(|id| id.as_str())
                    .map(|id| failed_ids.contains(&id.to_string()))
                    .unwrap_or(false)
            })
            .collect();
        let retry_outcomes = self
            .store
            .bulk(self.scandb, retry_docs)
            .await
            .map_err(|e| ScanError::Batch {
                detail: e.to_string(),
            })?;
        let still_failing = retry_outcomes
            .iter()
            .filter(|o| matches!(o, crate::store::BulkOutcome::Err { .. }))
            .count();
        summary.errorcount += still_failing as u64;
        Ok(())
    }

    /// §4.6 step 5 — after a directory has been walked, check whether any
    /// file the store expects under it is now gone from the filesystem.
    async fn check_directory_for_missing(
        &self,
        dir_abs: &Path,
        summary: &mut RunSummary,
    ) -> Result<(), ScanError> {
        let Ok(rel_dir) = dir_abs.strip_prefix(&self.config.root) else {
            return Ok(());
        };
        let rel_dir_str = rel_dir.to_str().unwrap_or_default().replace(std::path::MAIN_SEPARATOR, "/");

        let query = ViewQuery::new().range(
            KeyBound::Value(Value::from(vec![
                Value::String(self.config.host_id.clone()),
                Value::String(rel_dir_str.clone()),
                Value::Null,
            ])),
            KeyBound::Value(Value::from(vec![
                Value::String(self.config.host_id.clone()),
                Value::String(rel_dir_str),
                serde_json::Value::Object(Default::default()),
            ])),
        );
        let expected = match self.store.view(self.scandb, "files", "checkfordelete", query).await {
            Ok(rows) => rows,
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => {
                return Err(ScanError::Batch {
                    detail: e.to_string(),
                })
            }
        };

        let current: HashSet<String> = std::fs::read_dir(dir_abs)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();

        for row in expected {
            let name = row
                .key
                .as_array()
                .and_then(|k| k.get(2))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if !current.contains(name) {
                if let Some(id) = row.id {
                    summary.missing_files.push(id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::views::{self, TargetDb};

    fn cfg(root: PathBuf, first_scan: bool) -> ScanConfig {
        ScanConfig {
            host_id: "host-a".to_string(),
            peer_host_id: "host-b".to_string(),
            relationship_id: "rel-1".to_string(),
            root,
            exclusions: vec![],
            threshold: 2000,
            deep: false,
            source: true,
            scan_id: "run-1".to_string(),
            first_scan,
        }
    }

    #[tokio::test]
    async fn empty_tree_yields_zero_files_and_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.create_db("scandb-1").await.unwrap();
        views::ensure_views(&store, "scandb-1", TargetDb::Scan).await.unwrap();

        let config = cfg(dir.path().to_path_buf(), true);
        let scanner = Scanner::new(&store, "scandb-1", &config);
        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.filecount, 0);
        assert_eq!(summary.errorcount, 0);
        assert!(summary.success);
    }

    #[tokio::test]
    async fn single_file_produces_expected_id_and_status() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let store = MemoryStore::new();
        store.create_db("scandb-1").await.unwrap();
        views::ensure_views(&store, "scandb-1", TargetDb::Scan).await.unwrap();

        let config = cfg(dir.path().to_path_buf(), true);
        let scanner = Scanner::new(&store, "scandb-1", &config);
        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.filecount, 1);

        let expected_prefix = id_prefix("host-a", "a.txt");
        let all = store.list_dbs().await.unwrap();
        assert!(all.contains(&"scandb-1".to_string()));

        let stat = metadata::probe(&dir.path().join("a.txt")).unwrap();
        let id = file_id("host-a", "a.txt", stat.mtime);
        assert!(id.starts_with(&expected_prefix));
        let doc = store.get("scandb-1", &id).await.unwrap();
        assert_eq!(doc["size"], Value::from(10u64));
        assert_eq!(doc["status"]["state"], Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn exclusions_skip_matching_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
        std::fs::write(dir.path().join("tmp").join("x"), b"data").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"data").unwrap();

        let store = MemoryStore::new();
        store.create_db("scandb-1").await.unwrap();
        views::ensure_views(&store, "scandb-1", TargetDb::Scan).await.unwrap();

        let mut config = cfg(dir.path().to_path_buf(), true);
        config.exclusions = vec!["tmp".to_string()];
        let scanner = Scanner::new(&store, "scandb-1", &config);
        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.filecount, 1);
    }
}
