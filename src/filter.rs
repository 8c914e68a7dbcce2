use crate::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Ignore filter compiled from glob-style patterns.
///
/// Patterns are matched against the full slash-separated relative path. A
/// pattern with a trailing `/` names a directory and everything beneath it;
/// any other pattern matches files and directories alike. A path is ignored
/// when the path itself or any ancestor directory matches, so excluding a
/// directory excludes its whole subtree. The filter never touches the
/// filesystem.
#[derive(Debug, Clone)]
pub struct PathFilter {
    names: GlobSet,
    dirs: GlobSet,
    empty: bool,
}

impl PathFilter {
    /// A filter with no patterns; accepts everything.
    pub fn empty() -> Self {
        Self {
            names: GlobSet::empty(),
            dirs: GlobSet::empty(),
            empty: true,
        }
    }

    pub fn new(patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::empty());
        }
        let mut names = GlobSetBuilder::new();
        let mut dirs = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.replace('\\', "/");
            if let Some(dir) = pattern.strip_suffix('/') {
                dirs.add(Glob::new(dir)?);
            } else {
                names.add(Glob::new(&pattern)?);
            }
        }
        Ok(Self {
            names: names.build()?,
            dirs: dirs.build()?,
            empty: false,
        })
    }

    /// Whether `relative_path` should be excluded from a snapshot.
    pub fn matches(&self, relative_path: &str, is_directory: bool) -> bool {
        if self.empty {
            return false;
        }
        if self.names.is_match(relative_path) {
            return true;
        }
        // A trailing-slash pattern matches the named node only when it is a
        // directory, but matches everything beneath it regardless of kind.
        if is_directory && self.dirs.is_match(relative_path) {
            return true;
        }
        let mut prefix = relative_path;
        while let Some(idx) = prefix.rfind('/') {
            prefix = &prefix[..idx];
            if self.names.is_match(prefix) || self.dirs.is_match(prefix) {
                return true;
            }
        }
        false
    }
}
