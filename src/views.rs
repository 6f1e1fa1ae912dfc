//! Design-document definitions (§4.4). Kept as data — `(name, design_doc,
//! view_name, map_source, reduce_source)` tuples — so that "is this database
//! up to date" is a mechanical byte comparison, not something scattered
//! through the Scanner or Reconciler.

use serde_json::{json, Value};

use crate::store::{DocumentStore, StoreError};

/// Bumped whenever any view's map/reduce source changes. Stored on the
/// `scanversion` document in every database this registry touches.
pub const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDb {
    Main,
    Scan,
}

#[derive(Debug, Clone)]
pub struct ViewDef {
    pub name: &'static str,
    pub design_doc: &'static str,
    pub view: &'static str,
    pub map: &'static str,
    pub reduce: Option<&'static str>,
    pub target: TargetDb,
}

/// The views named in §4.4. Source strings are what would ship to a real
/// CouchDB/Cloudant design document; [`crate::store::memory::MemoryStore`]
/// recognizes the same (design_doc, view) pairs natively instead of
/// evaluating JS.
pub fn registry() -> Vec<ViewDef> {
    vec![
        ViewDef {
            name: "recent_scans",
            design_doc: "scans",
            view: "recentscans",
            map: r#"function (doc) {if (doc.type === "scan") {emit([doc.hostID, doc.success, doc.started], doc.database);}}"#,
            reduce: Some("_count"),
            target: TargetDb::Main,
        },
        ViewDef {
            name: "problem_files",
            design_doc: "files",
            view: "problemfiles",
            map: r#"function (doc) {if (doc.type === "file" && doc.goodscan === false) {emit([doc.scanID, doc.path, doc.name], doc.status.detail);}}"#,
            reduce: Some("_count"),
            target: TargetDb::Scan,
        },
        ViewDef {
            name: "source_files",
            design_doc: "sourcefiles",
            view: "sourcefiles",
            map: r#"function (doc) {if (doc.type === "file" && doc.goodscan === true && doc.source === true) {emit(doc._id, doc.datemodified);}}"#,
            reduce: None,
            target: TargetDb::Scan,
        },
        ViewDef {
            name: "check_for_delete",
            design_doc: "files",
            view: "checkfordelete",
            map: r#"function (doc) {if (doc.type === "file" && doc.status.state === "ok") {emit([doc.host, doc.path, doc.name], doc.datemodified);}}"#,
            reduce: None,
            target: TargetDb::Scan,
        },
        ViewDef {
            name: "duplicate_files",
            design_doc: "files",
            view: "duplicatefiles",
            map: r#"function (doc) {if (doc.type === "file" && doc.status.state === "ok" && doc.checksum) {emit([doc.name, doc.datemodified, doc.checksum, doc.size, doc.host], doc.path);}}"#,
            reduce: None,
            target: TargetDb::Scan,
        },
        ViewDef {
            name: "sync",
            design_doc: "sync",
            view: "sync",
            map: r#"function (doc) {if (doc.type === "file") {emit([doc.IDprefix, doc.syncIDprefix], doc.datemodified);}}"#,
            reduce: None,
            target: TargetDb::Scan,
        },
        ViewDef {
            name: "file_statuses",
            design_doc: "files",
            view: "filestatuses",
            map: r#"function (doc) {if (doc.type === "file") {emit([doc.status.state], 1);}}"#,
            reduce: Some("_count"),
            target: TargetDb::Scan,
        },
        ViewDef {
            name: "file_types",
            design_doc: "files",
            view: "filetypes",
            map: r#"function (doc) {if (doc.type === "file" && doc.goodscan === true) {var filetype = doc.name.substr((~-doc.name.lastIndexOf(".") >>> 0) + 2); emit([doc.host, doc.scanID, filetype], doc.size);}}"#,
            reduce: Some("_stats"),
            target: TargetDb::Scan,
        },
        ViewDef {
            name: "missing_files",
            design_doc: "files",
            view: "missingfiles",
            map: r#"function (doc) {if (doc.type === "file" && (doc.status.state === "moved" || doc.status.state === "deleted")) {emit([doc.scanID, doc.status.state], 1);}}"#,
            reduce: Some("_count"),
            target: TargetDb::Scan,
        },
    ]
}

fn ddoc_doc(def: &ViewDef) -> Value {
    let mut view = json!({ "map": def.map });
    if let Some(reduce) = def.reduce {
        view["reduce"] = Value::String(reduce.to_string());
    }
    json!({
        "_id": format!("_design/{}", def.design_doc),
        "views": { def.view: view },
    })
}

/// Ensures every view for `target` exists in `db` with current source, and
/// upgrades drifted ones. Unknown design documents are created; known ones
/// with drifted map/reduce source are updated; the version stamp is bumped
/// and its `history` records the superseded value (§4.4).
pub async fn ensure_views(
    store: &dyn DocumentStore,
    db: &str,
    target: TargetDb,
) -> Result<(), StoreError> {
    for def in registry().into_iter().filter(|d| d.target == target) {
        let ddoc_id = format!("_design/{}", def.design_doc);
        let desired = ddoc_doc(&def);
        match store.get_design_doc(db, &def.design_doc).await? {
            None => {
                store.put_design_doc(db, &def.design_doc, desired).await?;
            }
            Some(mut existing) => {
                let existing_map = existing["views"][def.view]["map"].as_str().unwrap_or("");
                if existing_map != def.map {
                    existing["views"][def.view] = desired["views"][def.view].clone();
                    store.put_design_doc(db, &def.design_doc, existing).await?;
                }
            }
        }
        let _ = ddoc_id;
    }
    bump_version(store, db).await
}

async fn bump_version(store: &dyn DocumentStore, db: &str) -> Result<(), StoreError> {
    let id = "scanversion";
    match store.get(db, id).await {
        Ok(mut doc) => {
            let current = doc.get("current").and_then(|v| v.as_u64()).unwrap_or(0);
            if current < REGISTRY_VERSION as u64 {
                let mut history = doc
                    .get("history")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                history.push(Value::from(current));
                doc["history"] = Value::Array(history);
                doc["current"] = Value::from(REGISTRY_VERSION);
                store.put(db, doc).await?;
            }
            Ok(())
        }
        Err(StoreError::NotFound) => {
            let doc = json!({
                "_id": id,
                "type": "scanversion",
                "current": REGISTRY_VERSION,
                "history": [],
            });
            store.put(db, doc).await?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn ensure_views_creates_unknown_design_docs() {
        let store = MemoryStore::new();
        store.create_db("main").await.unwrap();
        ensure_views(&store, "main", TargetDb::Main).await.unwrap();
        let ddoc = store.get_design_doc("main", "scans").await.unwrap();
        assert!(ddoc.is_some());
        let version = store.get("main", "scanversion").await.unwrap();
        assert_eq!(version["current"], Value::from(REGISTRY_VERSION));
    }

    #[tokio::test]
    async fn ensure_views_upgrades_drifted_source_and_records_history() {
        let store = MemoryStore::new();
        store.create_db("main").await.unwrap();
        store
            .put_design_doc(
                "main",
                "scans",
                json!({"_id": "_design/scans", "views": {"recentscans": {"map": "function (doc) { /* old */ }"}}}),
            )
            .await
            .unwrap();
        store
            .put(
                "main",
                json!({"_id": "scanversion", "type": "scanversion", "current": 0, "history": []}),
            )
            .await
            .unwrap();

        ensure_views(&store, "main", TargetDb::Main).await.unwrap();

        let ddoc = store.get_design_doc("main", "scans").await.unwrap().unwrap();
        assert_eq!(
            ddoc["views"]["recentscans"]["map"].as_str().unwrap(),
            registry()
                .into_iter()
                .find(|d| d.name == "recent_scans")
                .unwrap()
                .map
        );
        let version = store.get("main", "scanversion").await.unwrap();
        assert_eq!(version["current"], Value::from(REGISTRY_VERSION));
        assert_eq!(version["history"].as_array().unwrap(), &vec![Value::from(0)]);
    }
}
