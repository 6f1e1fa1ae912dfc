//! A small leveled logger independent of any tracing subscriber, matching
//! the reference tool's `dirscan_log.txt` file target (§4.10, §6, §7).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use chrono::SecondsFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Level::Debug),
            "INFO" => Some(Level::Info),
            "WARNING" => Some(Level::Warning),
            "ERROR" => Some(Level::Error),
            "CRITICAL" => Some(Level::Critical),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

pub const DEFAULT_LOG_FILENAME: &str = "dirscan_log.txt";

pub fn init(path: &Path, min_level: Level, mirror_to_stdout: bool) -> Result<()> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = Logger::new(path, min_level, mirror_to_stdout)?;
    let _ = LOGGER.set(logger);
    Ok(())
}

pub fn default_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_FILENAME)
}

pub fn log(level: Level, msg: impl AsRef<str>) {
    if let Some(logger) = LOGGER.get() {
        logger.write(level, msg.as_ref());
    }
}

pub fn debug(msg: impl AsRef<str>) {
    log(Level::Debug, msg);
}

pub fn info(msg: impl AsRef<str>) {
    log(Level::Info, msg);
}

pub fn warning(msg: impl AsRef<str>) {
    log(Level::Warning, msg);
}

pub fn error(msg: impl AsRef<str>) {
    log(Level::Error, msg);
}

pub fn critical(msg: impl AsRef<str>) {
    log(Level::Critical, msg);
}

struct Logger {
    file: Mutex<std::fs::File>,
    min_level: Level,
    mirror_to_stdout: bool,
}

impl Logger {
    fn new(path: &Path, min_level: Level, mirror_to_stdout: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
            min_level,
            mirror_to_stdout,
        })
    }

    fn write(&self, level: Level, msg: &str) {
        if level < self.min_level {
            return;
        }
        let ts = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = format!("{ts} {} {msg}", level.label());
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
        if self.mirror_to_stdout {
            println!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_places_debug_below_critical() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Critical);
    }

    #[test]
    fn logger_drops_below_min_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let logger = Logger::new(&path, Level::Warning, false).unwrap();
        logger.write(Level::Info, "should be dropped");
        logger.write(Level::Debug, "should be dropped too");
        logger.write(Level::Warning, "kept warning");
        logger.write(Level::Error, "kept error");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("should be dropped"));
        assert!(contents.contains("kept warning"));
        assert!(contents.contains("kept error"));
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Level::parse("warning"), Some(Level::Warning));
        assert_eq!(Level::parse("CRITICAL"), Some(Level::Critical));
        assert_eq!(Level::parse("nonsense"), None);
    }
}
