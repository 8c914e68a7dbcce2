use crate::{MirrorSyncError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Reserved cache filename inside the replica root. The scanner skips it
/// unconditionally so it never appears in a snapshot or plan.
pub const CACHE_FILE_NAME: &str = ".mirrorsync-cache.json";

/// What was known about a replica file at its last copy or verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    pub modified_time: i64,
    pub content_hash: Option<String>,
}

/// Replica-scoped map of relative path to fingerprint, persisted as JSON
/// inside the replica root. An explicit value owned by the pass: loaded at
/// the start, mutated in memory, written back at the end of a real run.
#[derive(Debug, Default)]
pub struct HashCache {
    entries: BTreeMap<String, Fingerprint>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_path(replica_root: &Path) -> PathBuf {
        replica_root.join(CACHE_FILE_NAME)
    }

    /// Loads the cache for a replica root. A missing or unparsable cache
    /// file yields an empty cache with a warning, never an error.
    pub fn load(replica_root: &Path) -> Self {
        let path = Self::file_path(replica_root);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::new(),
            Err(e) => {
                warn!("cannot read hash cache {:?}: {}", path, e);
                return Self::new();
            }
        };
        match serde_json::from_str(&text) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!("hash cache {:?} is corrupt ({}), starting empty", path, e);
                Self::new()
            }
        }
    }

    /// Writes the cache atomically: a temp file beside the target, then a
    /// rename over it.
    pub fn save(&self, replica_root: &Path) -> Result<()> {
        let path = Self::file_path(replica_root);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| MirrorSyncError::Cache(format!("serialize hash cache: {e}")))?;
        fs::write(&tmp, text)
            .map_err(|e| MirrorSyncError::Cache(format!("write {:?}: {e}", tmp)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| MirrorSyncError::Cache(format!("rename {:?} to {:?}: {e}", tmp, path)))?;
        Ok(())
    }

    /// The cached hash for a path, honored only while the recorded size and
    /// mtime still match the file on disk. A stale entry is treated as
    /// absent, never as ground truth.
    pub fn cached_hash(&self, path: &str, size: u64, modified_time: i64) -> Option<&str> {
        let fp = self.entries.get(path)?;
        if fp.size == size && fp.modified_time == modified_time {
            fp.content_hash.as_deref()
        } else {
            None
        }
    }

    pub fn record(&mut self, path: &str, fingerprint: Fingerprint) {
        self.entries.insert(path.to_string(), fingerprint);
    }

    pub fn remove(&mut self, path: &str) {
        self.entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(size: u64, mtime: i64, hash: &str) -> Fingerprint {
        Fingerprint {
            size,
            modified_time: mtime,
            content_hash: Some(hash.to_string()),
        }
    }

    #[test]
    fn cached_hash_requires_matching_size_and_mtime() {
        let mut cache = HashCache::new();
        cache.record("a.txt", fingerprint(5, 100, "abc"));

        assert_eq!(cache.cached_hash("a.txt", 5, 100), Some("abc"));
        assert_eq!(cache.cached_hash("a.txt", 6, 100), None);
        assert_eq!(cache.cached_hash("a.txt", 5, 101), None);
        assert_eq!(cache.cached_hash("b.txt", 5, 100), None);
    }

    #[test]
    fn entry_without_hash_yields_nothing() {
        let mut cache = HashCache::new();
        cache.record(
            "a.txt",
            Fingerprint {
                size: 5,
                modified_time: 100,
                content_hash: None,
            },
        );
        assert_eq!(cache.cached_hash("a.txt", 5, 100), None);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HashCache::new();
        cache.record("x/y.txt", fingerprint(12, 42, "deadbeef"));
        cache.save(dir.path()).unwrap();

        let loaded = HashCache::load(dir.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.cached_hash("x/y.txt", 12, 42), Some("deadbeef"));
        // no temp file left behind
        assert!(!dir.path().join(".mirrorsync-cache.json.tmp").exists());
    }

    #[test]
    fn missing_cache_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HashCache::load(dir.path()).is_empty());
    }

    #[test]
    fn corrupt_cache_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(HashCache::file_path(dir.path()), b"{not json").unwrap();
        assert!(HashCache::load(dir.path()).is_empty());
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut cache = HashCache::new();
        cache.record("a", fingerprint(1, 1, "h"));
        cache.remove("a");
        assert!(cache.is_empty());
    }
}
