//! Stable per-file identity (§4.1). Determinism across hosts and runs is the
//! data contract: never change the hash function or concatenation order here
//! without bumping every scan database's expected shape.

use sha1::{Digest, Sha1};

/// `sha1(host ‖ utf8(relative_path))` as 40 lowercase hex chars.
pub fn id_prefix(host: &str, relative_path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(host.as_bytes());
    hasher.update(relative_path.as_bytes());
    hex(&hasher.finalize())
}

/// `id_prefix || decimal(mtime)`, or `id_prefix || "-ERROR"` if `relative_path`
/// is not valid UTF-8 (encoded upstream, so this only ever sees valid UTF-8 —
/// callers that hit a non-UTF-8 path must not call this function at all and
/// should instead use [`error_id`]).
pub fn file_id(host: &str, relative_path: &str, mtime: i64) -> String {
    format!("{}{}", id_prefix(host, relative_path), mtime)
}

/// `_id` for a path that failed UTF-8 round-tripping: the prefix is computed
/// over the raw bytes so it still deduplicates repeated unreadable entries.
pub fn error_id(host: &str, raw_relative_path: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(host.as_bytes());
    hasher.update(raw_relative_path);
    format!("{}-ERROR", hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_prefix_is_deterministic() {
        let a = id_prefix("host-1", "a/b/c.txt");
        let b = id_prefix("host-1", "a/b/c.txt");
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn id_prefix_depends_on_host_and_path() {
        let a = id_prefix("host-1", "a.txt");
        let b = id_prefix("host-2", "a.txt");
        let c = id_prefix("host-1", "b.txt");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn file_id_appends_mtime_and_is_stable() {
        let first = file_id("host-1", "a.txt", 1000);
        let second = file_id("host-1", "a.txt", 1000);
        assert_eq!(first, second);
        assert!(first.ends_with("1000"));
        assert_eq!(&first[..40], id_prefix("host-1", "a.txt").as_str());
    }

    #[test]
    fn file_id_changes_when_mtime_changes() {
        let a = file_id("host-1", "a.txt", 1000);
        let b = file_id("host-1", "a.txt", 2000);
        assert_ne!(a, b);
        assert_eq!(&a[..40], &b[..40]);
    }

    #[test]
    fn same_relative_path_collides_across_hosts_is_false_by_construction() {
        // Invariant 2: two files on the SAME host at the same relative path
        // collide in IDprefix across all time — by design.
        let t1 = id_prefix("host-1", "a.txt");
        let t2 = id_prefix("host-1", "a.txt");
        assert_eq!(t1, t2);
    }

    #[test]
    fn error_id_is_stable_and_tagged() {
        let raw = b"bad\xffpath";
        let a = error_id("host-1", raw);
        let b = error_id("host-1", raw);
        assert_eq!(a, b);
        assert!(a.ends_with("-ERROR"));
    }
}
