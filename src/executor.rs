use crate::cache::{Fingerprint, HashCache};
use crate::plan::{Operation, Plan};
use crate::scanner::Entry;
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// One operation that could not be applied; the pass continues past it.
#[derive(Debug, Clone)]
pub struct OperationFailure {
    pub path: String,
    pub action: &'static str,
    pub error: String,
}

/// Outcome of one pass: successful changes per operation kind, the failures
/// that were skipped over, and whether the pass was cut short.
#[derive(Debug, Default)]
pub struct Report {
    pub dirs_created: usize,
    pub files_created: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
    pub dirs_deleted: usize,
    pub failures: Vec<OperationFailure>,
    pub dry_run: bool,
    pub interrupted: bool,
}

impl Report {
    pub fn changes(&self) -> usize {
        self.dirs_created
            + self.files_created
            + self.files_updated
            + self.files_deleted
            + self.dirs_deleted
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }
}

/// Applies a `Plan` strictly in order, one operation at a time. Under
/// dry-run nothing is touched; every operation is still classified, counted
/// and logged as "would ..." so the output predicts a real run exactly.
pub struct Executor<'a> {
    source_root: &'a Path,
    replica_root: &'a Path,
    dry_run: bool,
}

impl<'a> Executor<'a> {
    pub fn new(source_root: &'a Path, replica_root: &'a Path, dry_run: bool) -> Self {
        Self {
            source_root,
            replica_root,
            dry_run,
        }
    }

    pub fn apply(&self, plan: Plan, cache: &mut HashCache, cancel: &AtomicBool) -> Report {
        let mut report = Report {
            dry_run: self.dry_run,
            ..Report::default()
        };
        let total = plan.len();

        for (index, op) in plan.operations.into_iter().enumerate() {
            // Cancellation takes effect between operations, never mid-copy.
            if cancel.load(Ordering::Relaxed) {
                warn!(
                    "cancelled with {} of {} operations remaining",
                    total - index,
                    total
                );
                report.interrupted = true;
                break;
            }

            if self.dry_run {
                info!("would {}: {}", op.action(), op.path());
                count(&op, &mut report);
                continue;
            }

            match self.execute(&op, cache) {
                Ok(()) => count(&op, &mut report),
                Err(e) => {
                    error!("{} failed for {}: {}", op.action(), op.path(), e);
                    report.failures.push(OperationFailure {
                        path: op.path().to_string(),
                        action: op.action(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    fn execute(&self, op: &Operation, cache: &mut HashCache) -> io::Result<()> {
        match op {
            Operation::CreateDirectory { path } => {
                fs::create_dir_all(self.replica_root.join(path))?;
                info!("created directory: {}", path);
            }
            Operation::CreateFile { entry, hash } => {
                self.copy_file(entry, hash.clone(), cache)?;
                info!("copied file: {}", entry.path);
            }
            Operation::UpdateFile { entry, hash } => {
                self.copy_file(entry, hash.clone(), cache)?;
                info!("updated file: {}", entry.path);
            }
            Operation::DeleteFile { path } => {
                fs::remove_file(self.replica_root.join(path))?;
                cache.remove(path);
                info!("deleted file: {}", path);
            }
            Operation::DeleteDirectory { path } => {
                // Never recursive: plan ordering has already emptied the
                // directory, unless ignored replica files still live in it,
                // in which case this fails and the data survives.
                fs::remove_dir(self.replica_root.join(path))?;
                info!("deleted directory: {}", path);
            }
        }
        Ok(())
    }

    fn copy_file(
        &self,
        entry: &Entry,
        hash: Option<String>,
        cache: &mut HashCache,
    ) -> io::Result<()> {
        let src = self.source_root.join(&entry.path);
        let dst = self.replica_root.join(&entry.path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &dst)?;
        // Restore the source mtime in whole seconds so the size/mtime
        // comparison of the next pass sees the file as unchanged.
        filetime::set_file_mtime(&dst, FileTime::from_unix_time(entry.mtime, 0))?;
        cache.record(
            &entry.path,
            Fingerprint {
                size: entry.size,
                modified_time: entry.mtime,
                content_hash: hash,
            },
        );
        Ok(())
    }
}

fn count(op: &Operation, report: &mut Report) {
    match op {
        Operation::CreateDirectory { .. } => report.dirs_created += 1,
        Operation::CreateFile { .. } => report.files_created += 1,
        Operation::UpdateFile { .. } => report.files_updated += 1,
        Operation::DeleteFile { .. } => report.files_deleted += 1,
        Operation::DeleteDirectory { .. } => report.dirs_deleted += 1,
    }
}
