use crate::cache::CACHE_FILE_NAME;
use crate::filter::PathFilter;
use crate::{MirrorSyncError, Result};
use filetime::FileTime;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One filesystem node discovered during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Relative path (using / as separator); the join key between snapshots.
    pub path: String,
    pub kind: EntryKind,
    /// Byte length; 0 for directories.
    pub size: u64,
    /// Modification time in whole Unix seconds.
    pub mtime: i64,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Ordered view of one tree root: parents before children, sorted siblings.
/// Produced fresh each pass and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub root: PathBuf,
    pub entries: Vec<Entry>,
}

impl Snapshot {
    pub fn empty(root: PathBuf) -> Self {
        Self {
            root,
            entries: Vec::new(),
        }
    }
}

/// Read-only recursive walker producing a `Snapshot`.
///
/// Symbolic links are treated as leaf files by default. With
/// `follow_symlinks` set, directory symlinks are traversed while a set of
/// visited canonical paths guards against cycles and aliases; a revisit is
/// skipped with a warning instead of recursing again.
pub struct TreeScanner {
    follow_symlinks: bool,
}

impl TreeScanner {
    pub fn new(follow_symlinks: bool) -> Self {
        Self { follow_symlinks }
    }

    pub fn scan(&self, root: &Path, filter: &PathFilter) -> Result<Snapshot> {
        let root = root.canonicalize().map_err(|e| MirrorSyncError::Scan {
            path: root.to_path_buf(),
            source: e,
        })?;
        // An unreadable root is fatal to the pass; deeper read failures are
        // skipped with a warning below.
        fs::read_dir(&root).map_err(|e| MirrorSyncError::Scan {
            path: root.clone(),
            source: e,
        })?;

        let mut entries = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        if self.follow_symlinks {
            visited.insert(root.clone());
        }

        let mut walker = WalkDir::new(&root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();

        while let Some(item) = walker.next() {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    if err.loop_ancestor().is_some() {
                        warn!("symlink cycle at {:?}, skipping", err.path());
                    } else {
                        warn!("cannot read {:?}: {}, skipping", err.path(), err);
                    }
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let rel = match entry.path().strip_prefix(&root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if rel == CACHE_FILE_NAME {
                continue;
            }

            let is_dir = entry.file_type().is_dir();
            if filter.matches(&rel, is_dir) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }

            if is_dir && self.follow_symlinks {
                match entry.path().canonicalize() {
                    Ok(real) => {
                        if !visited.insert(real) {
                            warn!("directory {} aliases an already visited path, skipping", rel);
                            walker.skip_current_dir();
                            continue;
                        }
                    }
                    Err(e) => {
                        warn!("cannot resolve {}: {}, skipping", rel, e);
                        walker.skip_current_dir();
                        continue;
                    }
                }
            }

            // With follow_symlinks off this returns the link's own metadata,
            // so a symlink lands in the snapshot as a leaf file.
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("no metadata for {}: {}, skipping", rel, e);
                    if is_dir {
                        walker.skip_current_dir();
                    }
                    continue;
                }
            };

            entries.push(Entry {
                path: rel,
                kind: if is_dir {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size: if is_dir { 0 } else { metadata.len() },
                mtime: FileTime::from_last_modification_time(&metadata).unix_seconds(),
            });
        }

        Ok(Snapshot { root, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(root: &Path) -> Snapshot {
        TreeScanner::new(false)
            .scan(root, &PathFilter::empty())
            .expect("scan")
    }

    #[test]
    fn scan_orders_parents_before_children() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/inner")).unwrap();
        fs::write(dir.path().join("a.txt"), b"one").unwrap();
        fs::write(dir.path().join("b/inner/deep.txt"), b"two").unwrap();

        let snapshot = scan(dir.path());
        let paths: Vec<&str> = snapshot.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b", "b/inner", "b/inner/deep.txt"]);

        let file = &snapshot.entries[0];
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.size, 3);
        assert!(file.mtime > 0);
        assert_eq!(snapshot.entries[1].kind, EntryKind::Directory);
        assert_eq!(snapshot.entries[1].size, 0);
    }

    #[test]
    fn no_duplicate_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x/y")).unwrap();
        fs::write(dir.path().join("x/a"), b"").unwrap();
        fs::write(dir.path().join("x/y/a"), b"").unwrap();

        let snapshot = scan(dir.path());
        let mut paths: Vec<&str> = snapshot.entries.iter().map(|e| e.path.as_str()).collect();
        let before = paths.len();
        paths.dedup();
        assert_eq!(before, paths.len());
    }

    #[test]
    fn filtered_directory_is_pruned_with_its_subtree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("logs/archive")).unwrap();
        fs::write(dir.path().join("logs/app.log"), b"log").unwrap();
        fs::write(dir.path().join("keep.txt"), b"keep").unwrap();

        let filter = PathFilter::new(&["logs/".to_string()]).unwrap();
        let snapshot = TreeScanner::new(false).scan(dir.path(), &filter).unwrap();
        let paths: Vec<&str> = snapshot.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[test]
    fn reserved_cache_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CACHE_FILE_NAME), b"{}").unwrap();
        fs::write(dir.path().join("real.txt"), b"data").unwrap();

        let snapshot = scan(dir.path());
        let paths: Vec<&str> = snapshot.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["real.txt"]);
    }

    #[test]
    fn missing_root_is_a_scan_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        let err = TreeScanner::new(false)
            .scan(&gone, &PathFilter::empty())
            .unwrap_err();
        assert!(matches!(err, MirrorSyncError::Scan { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_a_leaf_file_by_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/inside.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("target"), dir.path().join("link")).unwrap();

        let snapshot = scan(dir.path());
        let link = snapshot.entries.iter().find(|e| e.path == "link").unwrap();
        assert_eq!(link.kind, EntryKind::File);
        assert!(!snapshot.entries.iter().any(|e| e.path == "link/inside.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_is_skipped_when_following() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/file.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("a/loop")).unwrap();

        let snapshot = TreeScanner::new(true)
            .scan(dir.path(), &PathFilter::empty())
            .expect("cycle must not be fatal");
        assert!(snapshot.entries.iter().any(|e| e.path == "a/file.txt"));
        assert!(!snapshot.entries.iter().any(|e| e.path == "a/loop/a"));
    }
}
