//! Configuration file loading and path resolution (§4.9, §6). Every key is
//! required; a config with any missing key is fatal before any store I/O is
//! attempted.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::ScanError;
use crate::model::Relationship;
use crate::store::DocumentStore;

const DEFAULT_CONFIG_FILENAME: &str = "dirscansync.json";
const DEFAULT_THRESHOLD: u32 = 2000;

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    cloudant_account: Option<String>,
    cloudant_user: Option<String>,
    cloudant_auth: Option<String>,
    relationship: Option<String>,
    host_id: Option<String>,
    threshold: Option<u32>,
}

/// The six required keys from §6, nothing more. Additional keys in the file
/// are ignored.
#[derive(Debug, Clone)]
pub struct Config {
    pub cloudant_account: String,
    pub cloudant_user: String,
    pub cloudant_auth: String,
    pub relationship: String,
    pub host_id: String,
    pub threshold: u32,
}

impl Config {
    /// `-c` flag wins, then `DIRSCANSYNC_CONFIG`, then `./dirscansync.json`
    /// in the current directory (§4.9).
    pub fn resolve_path(flag_path: Option<&Path>) -> PathBuf {
        if let Some(p) = flag_path {
            return p.to_path_buf();
        }
        if let Ok(env_path) = std::env::var("DIRSCANSYNC_CONFIG") {
            let trimmed = env_path.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }
        PathBuf::from(DEFAULT_CONFIG_FILENAME)
    }

    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let data = std::fs::read_to_string(path).map_err(|e| ScanError::Config {
            detail: format!("read {}: {e}", path.display()),
        })?;
        let partial: PartialConfig = serde_json::from_str(&data).map_err(|e| ScanError::Config {
            detail: format!("parse {}: {e}", path.display()),
        })?;

        let missing = |field: &str| ScanError::Config {
            detail: format!("missing required key `{field}` in {}", path.display()),
        };

        let cloudant_auth = partial.cloudant_auth.ok_or_else(|| missing("cloudant_auth"))?;
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&cloudant_auth)
            .map_err(|e| ScanError::Config {
                detail: format!("cloudant_auth is not valid base64 in {}: {e}", path.display()),
            })?;

        Ok(Config {
            cloudant_account: partial.cloudant_account.ok_or_else(|| missing("cloudant_account"))?,
            cloudant_user: partial.cloudant_user.ok_or_else(|| missing("cloudant_user"))?,
            cloudant_auth,
            relationship: partial.relationship.ok_or_else(|| missing("relationship"))?,
            host_id: partial.host_id.ok_or_else(|| missing("host_id"))?,
            threshold: partial.threshold.ok_or_else(|| missing("threshold"))?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cloudant_account: String::new(),
            cloudant_user: String::new(),
            cloudant_auth: String::new(),
            relationship: String::new(),
            host_id: String::new(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Reads an exclusions file, one substring pattern per line, blank lines and
/// `#`-comments skipped. Used for the `-x` initial-setup flag (§6).
pub fn load_exclusions(path: &Path) -> Result<Vec<String>, ScanError> {
    let data = std::fs::read_to_string(path).map_err(|e| ScanError::Config {
        detail: format!("read exclusions {}: {e}", path.display()),
    })?;
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// The resolved relationship and hosts a run actually needs, fetched once
/// from the store and held immutably for the rest of the process (§4.9).
pub struct RuntimeConfig {
    pub config: Config,
    pub relationship: Relationship,
    pub is_source: bool,
    pub peer_host_id: String,
    pub local_dir: String,
    pub peer_dir: String,
}

pub async fn load_runtime_config(
    store: &dyn DocumentStore,
    main_db: &str,
    config: Config,
) -> Result<RuntimeConfig, ScanError> {
    let doc: Value = store
        .get(main_db, &config.relationship)
        .await
        .map_err(|e| ScanError::Run {
            detail: format!("fetch relationship {}: {e}", config.relationship),
        })?;
    let relationship: Relationship =
        serde_json::from_value(doc).map_err(|e| ScanError::Run {
            detail: format!("decode relationship {}: {e}", config.relationship),
        })?;

    let is_source = relationship.sourcehost == config.host_id;
    let (peer_host_id, local_dir, peer_dir) = if is_source {
        (
            relationship.targethost.clone(),
            relationship.sourcedir.clone(),
            relationship.targetdir.clone(),
        )
    } else {
        (
            relationship.sourcehost.clone(),
            relationship.targetdir.clone(),
            relationship.sourcedir.clone(),
        )
    };

    Ok(RuntimeConfig {
        config,
        relationship,
        is_source,
        peer_host_id,
        local_dir,
        peer_dir,
    })
}
