//! An in-memory [`super::DocumentStore`] used by tests (§4.3, §9 design
//! note "Polymorphism over the store"). It reproduces the range-query and
//! `_count`/`_stats` reduce semantics of the handful of views this crate
//! actually defines (see [`crate::views`]) — it is not a general CouchDB
//! emulator, only enough of one to exercise the Scanner/Reconciler/Janitor
//! without a live store.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{BulkOutcome, DocumentStore, KeyBound, StoreError, ViewQuery, ViewRow};

#[derive(Default)]
struct DbState {
    docs: HashMap<String, Value>,
    design_docs: HashMap<String, Value>,
    rev_counter: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    dbs: Mutex<HashMap<String, DbState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn next_rev(state: &mut DbState) -> String {
    state.rev_counter += 1;
    format!("{}-mem", state.rev_counter)
}

fn couch_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Approximates CouchDB's collation order closely enough for the ranges
/// this crate actually issues: null < bool < number < string < array <
/// object, with the sentinel `{}` (empty object) always sorting highest.
fn couch_cmp(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (couch_rank(a), couch_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let c = couch_cmp(xi, yi);
                if c != Ordering::Equal {
                    return c;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => Ordering::Equal,
        _ => Ordering::Equal,
    }
}

fn key_prefix(key: &Value, group_level: u32) -> Value {
    match key {
        Value::Array(items) => {
            let n = (group_level as usize).min(items.len());
            Value::Array(items[..n].to_vec())
        }
        other => other.clone(),
    }
}

/// Stats accumulator for `_stats` reduce (sum, count, min, max, sumsqr).
#[derive(Default, Clone)]
struct Stats {
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
    sumsqr: f64,
}

impl Stats {
    fn add(&mut self, v: f64) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.sum += v;
        self.sumsqr += v * v;
        self.count += 1;
    }

    fn to_json(&self) -> Value {
        json!({
            "sum": self.sum,
            "count": self.count,
            "min": self.min,
            "max": self.max,
            "sumsqr": self.sumsqr,
        })
    }
}

fn str_field<'a>(doc: &'a Value, field: &str) -> &'a str {
    doc.get(field).and_then(|v| v.as_str()).unwrap_or("")
}

fn bool_field(doc: &Value, field: &str) -> bool {
    doc.get(field).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn num_field(doc: &Value, field: &str) -> f64 {
    doc.get(field).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

fn status_state<'a>(doc: &'a Value) -> &'a str {
    doc.get("status")
        .and_then(|s| s.get("state"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[idx + 1..],
        _ => "",
    }
}

/// Emits `(key, value, doc_id)` triples for one of this crate's known views.
/// Returns `None` for an unknown ddoc/view pair (the caller treats that as a
/// transport error, matching "query a predefined view" in §4.3 — there is no
/// such thing as an ad-hoc view here).
fn emit_rows(ddoc: &str, view: &str, docs: &HashMap<String, Value>) -> Option<Vec<(Value, Value, String)>> {
    let mut out = Vec::new();
    match (ddoc, view) {
        ("scans", "recentscans") => {
            for doc in docs.values() {
                if str_field(doc, "type") != "scan" {
                    continue;
                }
                let key = json!([
                    str_field(doc, "hostID"),
                    bool_field(doc, "success"),
                    num_field(doc, "started"),
                ]);
                out.push((key, doc.get("database").cloned().unwrap_or(Value::Null), id_of(doc)));
            }
        }
        ("files", "problemfiles") => {
            for doc in docs.values() {
                if str_field(doc, "type") != "file" || bool_field(doc, "goodscan") {
                    continue;
                }
                let key = json!([
                    str_field(doc, "scanID"),
                    str_field(doc, "path"),
                    str_field(doc, "name"),
                ]);
                let detail = doc
                    .get("status")
                    .and_then(|s| s.get("detail"))
                    .cloned()
                    .unwrap_or(Value::Null);
                out.push((key, detail, id_of(doc)));
            }
        }
        ("sourcefiles", "sourcefiles") => {
            for doc in docs.values() {
                if str_field(doc, "type") != "file"
                    || !bool_field(doc, "goodscan")
                    || !bool_field(doc, "source")
                {
                    continue;
                }
                out.push((
                    Value::String(id_of(doc)),
                    doc.get("datemodified").cloned().unwrap_or(Value::Null),
                    id_of(doc),
                ));
            }
        }
        ("files", "checkfordelete") => {
            for doc in docs.values() {
                if str_field(doc, "type") != "file" || status_state(doc) != "ok" {
                    continue;
                }
                let key = json!([
                    str_field(doc, "host"),
                    str_field(doc, "path"),
                    str_field(doc, "name"),
                ]);
                out.push((key, doc.get("datemodified").cloned().unwrap_or(Value::Null), id_of(doc)));
            }
        }
        ("files", "duplicatefiles") => {
            for doc in docs.values() {
                if str_field(doc, "type") != "file" || status_state(doc) != "ok" {
                    continue;
                }
                let Some(checksum) = doc.get("checksum").and_then(|v| v.as_str()) else {
                    continue;
                };
                let key = json!([
                    str_field(doc, "name"),
                    doc.get("datemodified").cloned().unwrap_or(Value::Null),
                    checksum,
                    doc.get("size").cloned().unwrap_or(Value::Null),
                    str_field(doc, "host"),
                ]);
                out.push((key, Value::String(str_field(doc, "path").to_string()), id_of(doc)));
            }
        }
        ("sync", "sync") => {
            for doc in docs.values() {
                if str_field(doc, "type") != "file" {
                    continue;
                }
                let key = json!([str_field(doc, "IDprefix"), str_field(doc, "syncIDprefix")]);
                out.push((key, doc.get("datemodified").cloned().unwrap_or(Value::Null), id_of(doc)));
            }
        }
        ("files", "filestatuses") => {
            for doc in docs.values() {
                if str_field(doc, "type") != "file" {
                    continue;
                }
                out.push((json!([status_state(doc)]), Value::from(1), id_of(doc)));
            }
        }
        ("files", "filetypes") => {
            for doc in docs.values() {
                if str_field(doc, "type") != "file" || !bool_field(doc, "goodscan") {
                    continue;
                }
                let key = json!([
                    str_field(doc, "host"),
                    str_field(doc, "scanID"),
                    extension(str_field(doc, "name")),
                ]);
                out.push((key, doc.get("size").cloned().unwrap_or(Value::Null), id_of(doc)));
            }
        }
        ("files", "missingfiles") => {
            for doc in docs.values() {
                if str_field(doc, "type") != "file" {
                    continue;
                }
                let state = status_state(doc);
                if state != "moved" && state != "deleted" {
                    continue;
                }
                out.push((
                    json!([str_field(doc, "scanID"), state]),
                    Value::from(1),
                    id_of(doc),
                ));
            }
        }
        _ => return None,
    }
    Some(out)
}

fn id_of(doc: &Value) -> String {
    doc.get("_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, db: &str, id: &str) -> Result<Value, StoreError> {
        let dbs = self.dbs.lock().unwrap();
        let state = dbs.get(db).ok_or(StoreError::NotFound)?;
        state.docs.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn put(&self, db: &str, mut doc: Value) -> Result<String, StoreError> {
        let mut dbs = self.dbs.lock().unwrap();
        let state = dbs.entry(db.to_string()).or_default();
        let id = doc
            .get("_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::Transport("put: document missing _id".to_string()))?
            .to_string();
        let rev = next_rev(state);
        doc["_rev"] = Value::String(rev.clone());
        state.docs.insert(id, doc);
        Ok(rev)
    }

    async fn bulk(&self, db: &str, docs: Vec<Value>) -> Result<Vec<BulkOutcome>, StoreError> {
        let mut dbs = self.dbs.lock().unwrap();
        let state = dbs.entry(db.to_string()).or_default();
        let mut out = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let Some(id) = doc.get("_id").and_then(|v| v.as_str()).map(|s| s.to_string()) else {
                out.push(BulkOutcome::Err {
                    id: String::new(),
                    error: "missing _id".to_string(),
                });
                continue;
            };
            let rev = next_rev(state);
            doc["_rev"] = Value::String(rev.clone());
            state.docs.insert(id.clone(), doc);
            out.push(BulkOutcome::Ok { id, rev });
        }
        Ok(out)
    }

    async fn all_by_ids(&self, db: &str, ids: &[String]) -> Result<Vec<Option<Value>>, StoreError> {
        let dbs = self.dbs.lock().unwrap();
        let state = dbs.get(db);
        Ok(ids
            .iter()
            .map(|id| state.and_then(|s| s.docs.get(id).cloned()))
            .collect())
    }

    async fn view(
        &self,
        db: &str,
        ddoc: &str,
        view: &str,
        query: ViewQuery,
    ) -> Result<Vec<ViewRow>, StoreError> {
        let dbs = self.dbs.lock().unwrap();
        let state = dbs.get(db).ok_or(StoreError::NotFound)?;
        let rows = emit_rows(ddoc, view, &state.docs)
            .ok_or_else(|| StoreError::Transport(format!("unknown view {ddoc}/{view}")))?;

        let mut filtered: Vec<(Value, Value, String)> = rows
            .into_iter()
            .filter(|(key, _, _)| {
                let lo_ok = query
                    .startkey
                    .as_ref()
                    .map(|b| couch_cmp(key, &b.to_json()) != Ordering::Less)
                    .unwrap_or(true);
                let hi_ok = query
                    .endkey
                    .as_ref()
                    .map(|b| couch_cmp(key, &b.to_json()) != Ordering::Greater)
                    .unwrap_or(true);
                lo_ok && hi_ok
            })
            .collect();
        filtered.sort_by(|a, b| couch_cmp(&a.0, &b.0));
        if query.descending {
            filtered.reverse();
        }

        let result_rows: Vec<ViewRow> = if query.reduce {
            let mut groups: Vec<(Value, Vec<(Value, String)>)> = Vec::new();
            for (key, value, id) in filtered {
                let group_key = match query.group_level {
                    Some(gl) => key_prefix(&key, gl),
                    None => Value::Null,
                };
                if let Some(existing) = groups.iter_mut().find(|(k, _)| *k == group_key) {
                    existing.1.push((value, id));
                } else {
                    groups.push((group_key, vec![(value, id)]));
                }
            }
            groups
                .into_iter()
                .map(|(key, values)| {
                    let looks_numeric = values
                        .iter()
                        .all(|(v, _)| v.is_number() || v.is_null());
                    let reduced = if looks_numeric && view != "problemfiles" && view != "filestatuses" && view != "missingfiles" {
                        let mut stats = Stats::default();
                        for (v, _) in &values {
                            stats.add(v.as_f64().unwrap_or(0.0));
                        }
                        stats.to_json()
                    } else {
                        Value::from(values.len() as u64)
                    };
                    ViewRow {
                        key,
                        value: reduced,
                        id: None,
                        doc: None,
                    }
                })
                .collect()
        } else {
            filtered
                .into_iter()
                .map(|(key, value, id)| {
                    let doc = if query.include_docs {
                        state.docs.get(&id).cloned()
                    } else {
                        None
                    };
                    ViewRow {
                        key,
                        value,
                        id: Some(id),
                        doc,
                    }
                })
                .collect()
        };

        let limited = match query.limit {
            Some(limit) => result_rows.into_iter().take(limit as usize).collect(),
            None => result_rows,
        };
        Ok(limited)
    }

    async fn put_design_doc(&self, db: &str, ddoc_id: &str, doc: Value) -> Result<(), StoreError> {
        let mut dbs = self.dbs.lock().unwrap();
        let state = dbs.entry(db.to_string()).or_default();
        state.design_docs.insert(ddoc_id.to_string(), doc);
        Ok(())
    }

    async fn get_design_doc(&self, db: &str, ddoc_id: &str) -> Result<Option<Value>, StoreError> {
        let dbs = self.dbs.lock().unwrap();
        Ok(dbs
            .get(db)
            .and_then(|s| s.design_docs.get(ddoc_id).cloned()))
    }

    async fn create_db(&self, name: &str) -> Result<(), StoreError> {
        let mut dbs = self.dbs.lock().unwrap();
        dbs.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn delete_db(&self, name: &str) -> Result<(), StoreError> {
        let mut dbs = self.dbs.lock().unwrap();
        dbs.remove(name);
        Ok(())
    }

    async fn list_dbs(&self) -> Result<Vec<String>, StoreError> {
        let dbs = self.dbs.lock().unwrap();
        Ok(dbs.keys().cloned().collect())
    }

    async fn exists(&self, db: &str) -> Result<bool, StoreError> {
        let dbs = self.dbs.lock().unwrap();
        Ok(dbs.contains_key(db))
    }

    async fn doc_count(&self, db: &str) -> Result<u64, StoreError> {
        let dbs = self.dbs.lock().unwrap();
        let state = dbs.get(db).ok_or(StoreError::NotFound)?;
        Ok((state.docs.len() + state.design_docs.len()) as u64)
    }
}
