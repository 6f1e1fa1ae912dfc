//! Resolves files collected into a run's `missing_files` set into `moved` or
//! `deleted` status (§4.7). Runs once per scan, after the walk completes.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::error::ScanError;
use crate::model::FileStatus;
use crate::store::{DocumentStore, KeyBound, StoreError, ViewQuery};

pub struct Reconciler<'a> {
    store: &'a dyn DocumentStore,
    scandb: &'a str,
}

#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub moved: u64,
    pub deleted: u64,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn DocumentStore, scandb: &'a str) -> Self {
        Self { store, scandb }
    }

    pub async fn run(&self, missing_files: &[String]) -> Result<ReconcileSummary, ScanError> {
        let mut summary = ReconcileSummary::default();
        for id in missing_files {
            if self.reconcile_one(id, &mut summary).await? {
                continue;
            }
        }
        Ok(summary)
    }

    async fn reconcile_one(&self, id: &str, summary: &mut ReconcileSummary) -> Result<bool, ScanError> {
        let mut doc = match self.store.get(self.scandb, id).await {
            Ok(doc) => doc,
            Err(StoreError::NotFound) => return Ok(false),
            Err(e) => {
                return Err(ScanError::Batch {
                    detail: e.to_string(),
                })
            }
        };

        let key = duplicate_key(&doc);
        let rows = self
            .store
            .view(
                self.scandb,
                "files",
                "duplicatefiles",
                ViewQuery::new().range(KeyBound::Value(key.clone()), KeyBound::Value(key)),
            )
            .await
            .map_err(|e| ScanError::Batch {
                detail: e.to_string(),
            })?;

        let original_path = doc.get("path").and_then(|v| v.as_str()).unwrap_or_default();
        let counterpart = rows.into_iter().find(|row| {
            row.id.as_deref() != Some(id) && row.value.as_str() != Some(original_path)
        });

        match counterpart {
            Some(row) => {
                let new_id = row.id.unwrap_or_default();
                crate::logging::info(format!("{id} reclassified as moved to {new_id}"));
                doc["status"] = serde_json::to_value(FileStatus::moved(new_id))
                    .expect("FileStatus always serializes");
                summary.moved += 1;
            }
            None => {
                crate::logging::info(format!("{id} reclassified as deleted"));
                doc["status"] = serde_json::to_value(FileStatus::deleted(now_epoch()))
                    .expect("FileStatus always serializes");
                summary.deleted += 1;
            }
        }

        self.store
            .put(self.scandb, doc)
            .await
            .map_err(|e| ScanError::Batch {
                detail: e.to_string(),
            })?;
        Ok(true)
    }
}

fn duplicate_key(doc: &Value) -> Value {
    serde_json::json!([
        doc.get("name").cloned().unwrap_or(Value::Null),
        doc.get("datemodified").cloned().unwrap_or(Value::Null),
        doc.get("checksum").cloned().unwrap_or(Value::Null),
        doc.get("size").cloned().unwrap_or(Value::Null),
        doc.get("host").cloned().unwrap_or(Value::Null),
    ])
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
