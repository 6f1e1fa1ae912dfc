//! Abstraction over the JSON document store (§4.3). Nothing above this
//! module — Scanner, Reconciler, Janitor, ViewRegistry — talks to a concrete
//! transport; they all depend on the [`DocumentStore`] trait so tests can
//! substitute [`memory::MemoryStore`] for the real [`http::HttpStore`].

pub mod http;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

/// A composite range key. CouchDB/Cloudant-style views key on JSON arrays;
/// [`KeyBound::Sentinel`] is the `{}` object that sorts greater than any
/// string or number, used to terminate an otherwise-open range (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum KeyBound {
    Value(Value),
    Sentinel,
}

impl KeyBound {
    pub fn to_json(&self) -> Value {
        match self {
            KeyBound::Value(v) => v.clone(),
            KeyBound::Sentinel => Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    pub startkey: Option<KeyBound>,
    pub endkey: Option<KeyBound>,
    pub reduce: bool,
    pub group_level: Option<u32>,
    pub limit: Option<u64>,
    pub descending: bool,
    pub include_docs: bool,
}

impl ViewQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(mut self, start: KeyBound, end: KeyBound) -> Self {
        self.startkey = Some(start);
        self.endkey = Some(end);
        self
    }

    pub fn reduced(mut self, group_level: u32) -> Self {
        self.reduce = true;
        self.group_level = Some(group_level);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ViewRow {
    pub key: Value,
    pub value: Value,
    pub id: Option<String>,
    pub doc: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum BulkOutcome {
    Ok { id: String, rev: String },
    Err { id: String, error: String },
}

#[derive(Debug)]
pub enum StoreError {
    NotFound,
    Conflict(String),
    Transport(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "document not found"),
            StoreError::Conflict(d) => write!(f, "conflict: {d}"),
            StoreError::Transport(d) => write!(f, "store transport error: {d}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, db: &str, id: &str) -> Result<Value, StoreError>;
    async fn put(&self, db: &str, doc: Value) -> Result<String, StoreError>;
    /// Per-document create/update; partial success is reported per element (§4.3).
    async fn bulk(&self, db: &str, docs: Vec<Value>) -> Result<Vec<BulkOutcome>, StoreError>;
    async fn all_by_ids(&self, db: &str, ids: &[String]) -> Result<Vec<Option<Value>>, StoreError>;
    async fn view(
        &self,
        db: &str,
        ddoc: &str,
        view: &str,
        query: ViewQuery,
    ) -> Result<Vec<ViewRow>, StoreError>;
    async fn put_design_doc(&self, db: &str, ddoc_id: &str, doc: Value) -> Result<(), StoreError>;
    async fn get_design_doc(&self, db: &str, ddoc_id: &str) -> Result<Option<Value>, StoreError>;
    async fn create_db(&self, name: &str) -> Result<(), StoreError>;
    async fn delete_db(&self, name: &str) -> Result<(), StoreError>;
    async fn list_dbs(&self) -> Result<Vec<String>, StoreError>;
    async fn exists(&self, db: &str) -> Result<bool, StoreError>;
    /// Document count, used by the Janitor to decide whether a scan database
    /// "contains no file records" (§4.8).
    async fn doc_count(&self, db: &str) -> Result<u64, StoreError>;
}
