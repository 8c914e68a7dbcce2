use crate::cache::HashCache;
use crate::config::Settings;
use crate::executor::{Executor, Report};
use crate::filter::PathFilter;
use crate::plan::{compute_plan, CompareMode};
use crate::scanner::{Snapshot, TreeScanner};
use crate::Result;
use std::fs;
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tracing::{info, warn};

/// Orchestrates one full pass: scan both trees, load the cache, diff,
/// apply, persist the cache, log a summary. Holds no state between calls
/// beyond what the cache file durably records.
pub struct SyncEngine {
    settings: Settings,
    filter: PathFilter,
    scanner: TreeScanner,
}

impl SyncEngine {
    /// Builds the engine. A malformed ignore pattern set falls back to an
    /// empty filter with a warning rather than refusing to run.
    pub fn new(settings: Settings) -> Self {
        let filter = match PathFilter::new(&settings.ignore_patterns) {
            Ok(filter) => filter,
            Err(e) => {
                warn!("invalid ignore pattern ({}), continuing without ignore rules", e);
                PathFilter::empty()
            }
        };
        let scanner = TreeScanner::new(settings.follow_symlinks);
        Self {
            settings,
            filter,
            scanner,
        }
    }

    pub fn run_once(&self, cancel: &AtomicBool) -> Result<Report> {
        let started = Instant::now();
        let settings = &self.settings;

        if !settings.dry_run {
            fs::create_dir_all(&settings.replica)?;
        }

        let source = self.scanner.scan(&settings.source, &self.filter)?;
        info!("scanned source {:?}: {} entries", settings.source, source.entries.len());

        // Under dry-run a missing replica root stands in as an empty tree so
        // the predicted plan matches what a real run would do.
        let replica = if settings.dry_run && !settings.replica.exists() {
            Snapshot::empty(settings.replica.clone())
        } else {
            self.scanner.scan(&settings.replica, &self.filter)?
        };
        info!("scanned replica {:?}: {} entries", settings.replica, replica.entries.len());

        let mut cache = if settings.use_hash_cache {
            HashCache::load(&settings.replica)
        } else {
            HashCache::new()
        };

        let mode = if settings.use_content_hash {
            CompareMode::ContentHash
        } else {
            CompareMode::SizeMtime
        };
        let plan = compute_plan(&source, &replica, &mut cache, mode);
        info!("{} operations planned", plan.len());

        let executor = Executor::new(&source.root, &replica.root, settings.dry_run);
        let report = executor.apply(plan, &mut cache, cancel);

        // The cache must never reflect operations that did not really happen.
        if settings.use_hash_cache && !settings.dry_run {
            if let Err(e) = cache.save(&settings.replica) {
                warn!("could not persist hash cache: {}", e);
            }
        }

        info!(
            "pass finished in {:.2?}: {} dirs created, {} files copied, {} updated, \
             {} files deleted, {} dirs deleted, {} errors",
            started.elapsed(),
            report.dirs_created,
            report.files_created,
            report.files_updated,
            report.files_deleted,
            report.dirs_deleted,
            report.failures.len(),
        );

        Ok(report)
    }
}
