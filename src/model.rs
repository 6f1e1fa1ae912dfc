//! Document shapes shared by both hosts and the dashboard (§3).

use serde::{Deserialize, Serialize};

/// `{type:"host", hostname, ip4, ip6}` — immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub hostname: String,
    pub ip4: String,
    pub ip6: String,
}

impl Host {
    pub fn new(hostname: impl Into<String>, ip4: impl Into<String>, ip6: impl Into<String>) -> Self {
        Self {
            id: None,
            rev: None,
            doc_type: "host".to_string(),
            hostname: hostname.into(),
            ip4: ip4.into(),
            ip6: ip6.into(),
        }
    }
}

/// `{type:"relationship", name, active, sourcehost, targethost, sourcedir, targetdir, rsyncflags, excludedfiles}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub name: String,
    pub active: bool,
    pub sourcehost: String,
    pub targethost: String,
    pub sourcedir: String,
    pub targetdir: String,
    #[serde(default)]
    pub rsyncflags: Vec<String>,
    #[serde(default)]
    pub excludedfiles: Vec<String>,
}

/// `{type:"scan", hostID, relationship, source, started, ended, success, errorcount,
/// filecount, directorysize, directory, database, previousscanID, firstscan, deepscan}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(rename = "hostID")]
    pub host_id: String,
    pub relationship: String,
    pub source: bool,
    pub started: i64,
    pub ended: i64,
    pub success: bool,
    pub errorcount: u64,
    pub filecount: u64,
    pub directorysize: u64,
    pub directory: String,
    pub database: String,
    #[serde(rename = "previousscanID", skip_serializing_if = "Option::is_none")]
    pub previous_scan_id: Option<String>,
    pub firstscan: bool,
    pub deepscan: bool,
}

impl Run {
    pub fn started_now(
        host_id: impl Into<String>,
        relationship: impl Into<String>,
        source: bool,
        directory: impl Into<String>,
        database: impl Into<String>,
        previous_scan_id: Option<String>,
        firstscan: bool,
        deepscan: bool,
        started: i64,
    ) -> Self {
        Self {
            id: None,
            rev: None,
            doc_type: "scan".to_string(),
            host_id: host_id.into(),
            relationship: relationship.into(),
            source,
            started,
            ended: 0,
            success: false,
            errorcount: 0,
            filecount: 0,
            directorysize: 0,
            directory: directory.into(),
            database: database.into(),
            previous_scan_id,
            firstscan,
            deepscan,
        }
    }
}

/// `status.state ∈ {ok, error, moved, deleted}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Ok,
    Error,
    Moved,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileStatus {
    pub state: FileState,
    /// Peer id (moved), epoch stamp (deleted), or human string (error / corruption).
    pub detail: String,
}

impl FileStatus {
    pub fn ok() -> Self {
        Self {
            state: FileState::Ok,
            detail: String::new(),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            state: FileState::Error,
            detail: detail.into(),
        }
    }

    pub fn moved(new_id: impl Into<String>) -> Self {
        Self {
            state: FileState::Moved,
            detail: new_id.into(),
        }
    }

    pub fn deleted(now: i64) -> Self {
        Self {
            state: FileState::Deleted,
            detail: now.to_string(),
        }
    }

    pub fn possibly_corrupted() -> Self {
        Self {
            state: FileState::Ok,
            detail: "possibly corrupted".to_string(),
        }
    }
}

/// A file document (scan DB): the atomic unit of reconciliation (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDoc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(rename = "IDprefix")]
    pub id_prefix: String,
    #[serde(rename = "syncIDprefix")]
    pub sync_id_prefix: String,
    pub syncpath: String,
    pub host: String,
    pub relationship: String,
    #[serde(rename = "scanID")]
    pub scan_id: String,
    pub source: bool,
    pub path: String,
    pub name: String,
    pub datescanned: i64,
    pub size: u64,
    #[serde(rename = "permissionsUNIX")]
    pub permissions_unix: u32,
    pub datemodified: i64,
    pub owner: u32,
    pub group: u32,
    pub goodscan: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub status: FileStatus,
}
