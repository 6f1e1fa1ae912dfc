//! Structured error kinds (§7). Kept as a real enum rather than flowing
//! everything through `anyhow::Error` strings, because call sites need to
//! match on the kind to decide exit-code behavior, not just print it.

use std::fmt;

/// One errno/message pair from a failed `stat`, kept as data rather than
/// bubbling the raw `io::Error` so it can be embedded verbatim on a
/// [`crate::model::FileDoc`]'s status detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatError {
    pub errno: i32,
    pub message: String,
}

impl fmt::Display for StatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}: {}", self.errno, self.message)
    }
}

impl std::error::Error for StatError {}

/// Error classes from §7, in order of locality. Path-level failures never
/// reach this type — they are recorded on the file document and counted,
/// never raised.
#[derive(Debug)]
pub enum ScanError {
    /// A batch operation failed even after the single retry called for in §7.
    Batch { detail: String },
    /// The store is unreachable, or database creation failed after its
    /// bounded poll — the run is aborted.
    Run { detail: String },
    /// A required configuration key was missing, or the file was unreadable.
    Config { detail: String },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Batch { detail } => write!(f, "batch error: {detail}"),
            ScanError::Run { detail } => write!(f, "run error: {detail}"),
            ScanError::Config { detail } => write!(f, "configuration error: {detail}"),
        }
    }
}

impl std::error::Error for ScanError {}

impl ScanError {
    /// §6: configuration errors exit 2; everything else that aborts a run
    /// exits non-zero but distinctly (1), matching the reference tool's
    /// "fatal message" vs. "config/I-O error at startup" split.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::Config { .. } => 2,
            ScanError::Batch { .. } | ScanError::Run { .. } => 1,
        }
    }
}
