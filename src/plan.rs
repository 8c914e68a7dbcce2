use crate::cache::{Fingerprint, HashCache};
use crate::hash;
use crate::scanner::{Entry, Snapshot};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::warn;

/// How two files at the same relative path are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMode {
    /// Differ when sizes differ or mtimes differ beyond the tolerance.
    SizeMtime,
    /// Differ when BLAKE3 hashes differ; the replica side may come from the
    /// cache, the source side is always hashed fresh.
    ContentHash,
}

/// Filesystem timestamp resolution varies; mtimes within this many seconds
/// of each other count as equal.
pub const MTIME_TOLERANCE_SECS: i64 = 1;

/// One planned change against the replica. Create/update carry the owned
/// source entry to copy from, plus the source hash when one was computed,
/// so the executor can seed the cache without re-hashing.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateDirectory { path: String },
    CreateFile { entry: Entry, hash: Option<String> },
    UpdateFile { entry: Entry, hash: Option<String> },
    DeleteFile { path: String },
    DeleteDirectory { path: String },
}

impl Operation {
    pub fn path(&self) -> &str {
        match self {
            Operation::CreateDirectory { path }
            | Operation::DeleteFile { path }
            | Operation::DeleteDirectory { path } => path,
            Operation::CreateFile { entry, .. } | Operation::UpdateFile { entry, .. } => {
                &entry.path
            }
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Operation::CreateDirectory { .. } => "create directory",
            Operation::CreateFile { .. } => "create file",
            Operation::UpdateFile { .. } => "update file",
            Operation::DeleteFile { .. } => "delete file",
            Operation::DeleteDirectory { .. } => "delete directory",
        }
    }
}

/// Ordered operations for one pass. The phase order is the correctness
/// invariant: directory creations (shallowest first) precede file copies,
/// which precede file deletions, which precede directory deletions
/// (deepest first), so creations never target a missing parent and a
/// directory is emptied before it is removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub operations: Vec<Operation>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Diffs two snapshots into a `Plan`.
///
/// In `ContentHash` mode the comparison consults `cache` for replica-side
/// hashes (honored only while the cached size/mtime still match) and records
/// freshly verified replica fingerprints back into it. A hash read failure
/// counts the file as differing, so the copy is the safe fallback.
pub fn compute_plan(
    source: &Snapshot,
    replica: &Snapshot,
    cache: &mut HashCache,
    mode: CompareMode,
) -> Plan {
    let replica_files: HashMap<&str, &Entry> = replica
        .entries
        .iter()
        .filter(|e| !e.is_dir())
        .map(|e| (e.path.as_str(), e))
        .collect();
    let replica_dirs: HashSet<&str> = replica
        .entries
        .iter()
        .filter(|e| e.is_dir())
        .map(|e| e.path.as_str())
        .collect();
    let source_files: HashSet<&str> = source
        .entries
        .iter()
        .filter(|e| !e.is_dir())
        .map(|e| e.path.as_str())
        .collect();
    let source_dirs: HashSet<&str> = source
        .entries
        .iter()
        .filter(|e| e.is_dir())
        .map(|e| e.path.as_str())
        .collect();

    let mut mkdirs = Vec::new();
    let mut copies = Vec::new();
    let mut file_deletes = Vec::new();
    let mut dir_deletes = Vec::new();

    for entry in &source.entries {
        if entry.is_dir() {
            if !replica_dirs.contains(entry.path.as_str()) {
                mkdirs.push(Operation::CreateDirectory {
                    path: entry.path.clone(),
                });
            }
            continue;
        }
        match replica_files.get(entry.path.as_str()) {
            // A kind-flipped replica node counts as absent here; the per-kind
            // delete join below removes it and convergence completes on the
            // next pass.
            None => {
                let hash = match mode {
                    CompareMode::SizeMtime => None,
                    CompareMode::ContentHash => hash_source(&source.root, entry),
                };
                copies.push(Operation::CreateFile {
                    entry: entry.clone(),
                    hash,
                });
            }
            Some(replica_entry) => {
                let (differs, hash) = match mode {
                    CompareMode::SizeMtime => (
                        entry.size != replica_entry.size
                            || (entry.mtime - replica_entry.mtime).abs() > MTIME_TOLERANCE_SECS,
                        None,
                    ),
                    CompareMode::ContentHash => {
                        let source_hash = hash_source(&source.root, entry);
                        let replica_hash = hash_replica(&replica.root, replica_entry, cache);
                        let differs = match (&source_hash, &replica_hash) {
                            (Some(a), Some(b)) => a != b,
                            _ => true,
                        };
                        (differs, source_hash)
                    }
                };
                if differs {
                    copies.push(Operation::UpdateFile {
                        entry: entry.clone(),
                        hash,
                    });
                }
            }
        }
    }

    for entry in &replica.entries {
        if entry.is_dir() {
            if !source_dirs.contains(entry.path.as_str()) {
                dir_deletes.push(Operation::DeleteDirectory {
                    path: entry.path.clone(),
                });
            }
        } else if !source_files.contains(entry.path.as_str()) {
            file_deletes.push(Operation::DeleteFile {
                path: entry.path.clone(),
            });
        }
    }

    mkdirs.sort_by(|a, b| {
        (depth(a.path()), a.path()).cmp(&(depth(b.path()), b.path()))
    });
    copies.sort_by(|a, b| a.path().cmp(b.path()));
    file_deletes.sort_by(|a, b| a.path().cmp(b.path()));
    dir_deletes.sort_by(|a, b| {
        depth(b.path())
            .cmp(&depth(a.path()))
            .then_with(|| a.path().cmp(b.path()))
    });

    let mut operations = mkdirs;
    operations.append(&mut copies);
    operations.append(&mut file_deletes);
    operations.append(&mut dir_deletes);
    Plan { operations }
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// The source side is always hashed fresh; a stale cache must never mask a
/// real source change.
fn hash_source(root: &Path, entry: &Entry) -> Option<String> {
    match hash::hash_file(&root.join(&entry.path)) {
        Ok(h) => Some(h),
        Err(e) => {
            warn!("cannot hash source {}: {}", entry.path, e);
            None
        }
    }
}

fn hash_replica(root: &Path, entry: &Entry, cache: &mut HashCache) -> Option<String> {
    if let Some(hash) = cache.cached_hash(&entry.path, entry.size, entry.mtime) {
        return Some(hash.to_string());
    }
    match hash::hash_file(&root.join(&entry.path)) {
        Ok(hash) => {
            cache.record(
                &entry.path,
                Fingerprint {
                    size: entry.size,
                    modified_time: entry.mtime,
                    content_hash: Some(hash.clone()),
                },
            );
            Some(hash)
        }
        Err(e) => {
            warn!("cannot hash replica {}: {}", entry.path, e);
            None
        }
    }
}
