//! Stat a path and, when deep-scan is on, digest its contents (§4.2). The
//! probe never retries — the caller (the Scanner) decides whether a failure
//! is recorded as a path-level error or aborts the run.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::StatError;

/// 64 KiB chunks, matching the teacher's streaming-upload chunk size for
/// large blobs — small enough to bound peak memory, large enough to avoid
/// syscall overhead on typical file sizes.
const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub uid: u32,
    pub gid: u32,
}

/// Stats `path`. Returns `StatError` with the platform errno on failure,
/// never panics.
pub fn probe(path: &Path) -> Result<FileStat, StatError> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| to_stat_error(path, &e))?;
    Ok(from_std_metadata(&meta))
}

#[cfg(unix)]
fn from_std_metadata(meta: &std::fs::Metadata) -> FileStat {
    use std::os::unix::fs::MetadataExt;
    FileStat {
        size: meta.size(),
        mode: meta.mode(),
        mtime: meta.mtime(),
        uid: meta.uid(),
        gid: meta.gid(),
    }
}

#[cfg(not(unix))]
fn from_std_metadata(meta: &std::fs::Metadata) -> FileStat {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    FileStat {
        size: meta.len(),
        mode: 0,
        mtime,
        uid: 0,
        gid: 0,
    }
}

fn to_stat_error(path: &Path, err: &std::io::Error) -> StatError {
    StatError {
        errno: err.raw_os_error().unwrap_or(-1),
        message: format!("{}: {}", path.display(), err),
    }
}

/// Streams `path` through SHA-1 in fixed-size chunks, returning the hex
/// digest. Only called when deep-scan is enabled — plain scans compare by
/// size alone (§4.6 step 4).
pub fn digest(path: &Path) -> Result<String, StatError> {
    let mut file = File::open(path).map_err(|e| to_stat_error(path, &e))?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; DIGEST_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| to_stat_error(path, &e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let bytes = hasher.finalize();
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn probe_reads_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let stat = probe(&path).unwrap();
        assert_eq!(stat.size, 10);
    }

    #[test]
    fn probe_fails_on_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert!(probe(&path).is_err());
    }

    #[test]
    fn digest_is_deterministic_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![7u8; DIGEST_CHUNK_SIZE + 10]).unwrap();
        drop(f);

        let d1 = digest(&path).unwrap();
        let d2 = digest(&path).unwrap();
        assert_eq!(d1, d2);

        std::fs::write(&path, b"different contents").unwrap();
        let d3 = digest(&path).unwrap();
        assert_ne!(d1, d3);
    }
}
