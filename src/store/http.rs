//! CouchDB/Cloudant-style adapter for [`super::DocumentStore`]: `_bulk_docs`,
//! `_all_docs`, `_view`, and PUT-database semantics over HTTPS with HTTP
//! Basic auth built from the configuration's account/user/auth fields.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::{json, Value};

use super::{BulkOutcome, DocumentStore, StoreError, ViewQuery, ViewRow};

/// Bounded poll for database-creation visibility (§4.5): wait until the
/// store reports the new database as existing before returning.
const DB_CREATE_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DB_CREATE_POLL_ATTEMPTS: u32 = 25;

pub struct HttpStore {
    base: String,
    http: HttpClient,
    account: String,
    auth_header: String,
}

impl HttpStore {
    /// `auth` is the base64 `user:pass` string persisted in the config file
    /// (§6) — built once at setup time, never re-derived here.
    pub fn new(account: &str, auth_base64: &str) -> Self {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("build http client");
        Self {
            base: format!("https://{account}.cloudant.com"),
            http,
            account: account.to_string(),
            auth_header: format!("Basic {auth_base64}"),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn url(&self, db: &str, path: &str) -> String {
        if path.is_empty() {
            format!("{}/{}", self.base, db)
        } else {
            format!("{}/{}/{}", self.base, db, path)
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", &self.auth_header)
    }

    async fn send_json(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, Value), StoreError> {
        let resp = self
            .auth(builder)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .unwrap_or_else(|_| Value::Object(Default::default()));
        Ok((status, body))
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn get(&self, db: &str, id: &str) -> Result<Value, StoreError> {
        let (status, body) = self
            .send_json(self.http.get(self.url(db, id)))
            .await?;
        match status {
            StatusCode::OK => Ok(body),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            other => Err(StoreError::Transport(format!("GET {id}: {other}"))),
        }
    }

    async fn put(&self, db: &str, doc: Value) -> Result<String, StoreError> {
        let id = doc
            .get("_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::Transport("put: document missing _id".to_string()))?
            .to_string();
        let (status, body) = self
            .send_json(self.http.put(self.url(db, &id)).json(&doc))
            .await?;
        match status {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => body
                .get("rev")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| StoreError::Transport("put: missing rev in response".to_string())),
            StatusCode::CONFLICT => Err(StoreError::Conflict(id)),
            other => Err(StoreError::Transport(format!("PUT {id}: {other}"))),
        }
    }

    async fn bulk(&self, db: &str, docs: Vec<Value>) -> Result<Vec<BulkOutcome>, StoreError> {
        let body = json!({ "docs": docs });
        let (status, resp) = self
            .send_json(self.http.post(self.url(db, "_bulk_docs")).json(&body))
            .await?;
        if status != StatusCode::CREATED && status != StatusCode::OK {
            return Err(StoreError::Transport(format!("_bulk_docs: {status}")));
        }
        let rows = resp.as_array().cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if let Some(rev) = row.get("rev").and_then(|v| v.as_str()) {
                    BulkOutcome::Ok {
                        id,
                        rev: rev.to_string(),
                    }
                } else {
                    let error = row
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string();
                    BulkOutcome::Err { id, error }
                }
            })
            .collect())
    }

    async fn all_by_ids(&self, db: &str, ids: &[String]) -> Result<Vec<Option<Value>>, StoreError> {
        let body = json!({ "keys": ids });
        let (status, resp) = self
            .send_json(
                self.http
                    .post(self.url(db, "_all_docs?include_docs=true"))
                    .json(&body),
            )
            .await?;
        if status != StatusCode::OK {
            return Err(StoreError::Transport(format!("_all_docs: {status}")));
        }
        let rows = resp
            .get("rows")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|row| row.get("doc").cloned().filter(|d| !d.is_null()))
            .collect())
    }

    async fn view(
        &self,
        db: &str,
        ddoc: &str,
        view: &str,
        query: ViewQuery,
    ) -> Result<Vec<ViewRow>, StoreError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(sk) = &query.startkey {
            params.push(("startkey", sk.to_json().to_string()));
        }
        if let Some(ek) = &query.endkey {
            params.push(("endkey", ek.to_json().to_string()));
        }
        if query.reduce {
            params.push(("reduce", "true".to_string()));
            if let Some(gl) = query.group_level {
                params.push(("group_level", gl.to_string()));
            }
        } else {
            params.push(("reduce", "false".to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if query.descending {
            params.push(("descending", "true".to_string()));
        }
        if query.include_docs {
            params.push(("include_docs", "true".to_string()));
        }

        let url = format!(
            "{}/_design/{}/_view/{}",
            self.url(db, ""),
            ddoc,
            view
        );
        let (status, resp) = self
            .send_json(self.http.get(url).query(&params))
            .await?;
        if status != StatusCode::OK {
            return Err(StoreError::Transport(format!(
                "_view/{ddoc}/{view}: {status}"
            )));
        }
        let rows = resp
            .get("rows")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|row| ViewRow {
                key: row.get("key").cloned().unwrap_or(Value::Null),
                value: row.get("value").cloned().unwrap_or(Value::Null),
                id: row
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                doc: row.get("doc").cloned(),
            })
            .collect())
    }

    async fn put_design_doc(&self, db: &str, ddoc_id: &str, doc: Value) -> Result<(), StoreError> {
        let path = format!("_design/{ddoc_id}");
        let (status, _) = self
            .send_json(self.http.put(self.url(db, &path)).json(&doc))
            .await?;
        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            StatusCode::CONFLICT => Err(StoreError::Conflict(ddoc_id.to_string())),
            other => Err(StoreError::Transport(format!(
                "PUT _design/{ddoc_id}: {other}"
            ))),
        }
    }

    async fn get_design_doc(&self, db: &str, ddoc_id: &str) -> Result<Option<Value>, StoreError> {
        let path = format!("_design/{ddoc_id}");
        match self.get(db, &path).await {
            Ok(v) => Ok(Some(v)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_db(&self, name: &str) -> Result<(), StoreError> {
        let (status, _) = self.send_json(self.http.put(self.url(name, ""))).await?;
        if !matches!(
            status,
            StatusCode::OK | StatusCode::CREATED | StatusCode::PRECONDITION_FAILED
        ) {
            return Err(StoreError::Transport(format!("PUT {name}: {status}")));
        }
        for _ in 0..DB_CREATE_POLL_ATTEMPTS {
            if self.exists(name).await.unwrap_or(false) {
                return Ok(());
            }
            tokio::time::sleep(DB_CREATE_POLL_INTERVAL).await;
        }
        Err(StoreError::Transport(format!(
            "database {name} did not become visible in time"
        )))
    }

    async fn delete_db(&self, name: &str) -> Result<(), StoreError> {
        let (status, _) = self.send_json(self.http.delete(self.url(name, ""))).await?;
        match status {
            StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            other => Err(StoreError::Transport(format!("DELETE {name}: {other}"))),
        }
    }

    async fn list_dbs(&self) -> Result<Vec<String>, StoreError> {
        let (status, body) = self
            .send_json(self.http.get(format!("{}/_all_dbs", self.base)))
            .await?;
        if status != StatusCode::OK {
            return Err(StoreError::Transport(format!("_all_dbs: {status}")));
        }
        Ok(body
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect())
    }

    async fn exists(&self, db: &str) -> Result<bool, StoreError> {
        let (status, _) = self.send_json(self.http.head(self.url(db, ""))).await?;
        Ok(status == StatusCode::OK)
    }

    async fn doc_count(&self, db: &str) -> Result<u64, StoreError> {
        let (status, body) = self.send_json(self.http.get(self.url(db, ""))).await?;
        if status != StatusCode::OK {
            return Err(StoreError::Transport(format!("GET {db}: {status}")));
        }
        Ok(body.get("doc_count").and_then(|v| v.as_u64()).unwrap_or(0))
    }
}
