use crate::{MirrorSyncError, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{warn, Level};

pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_LOG_FILE: &str = "mirrorsync.log";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Source folder to mirror from
    #[arg(value_name = "SOURCE", required_unless_present = "config_file")]
    pub source: Option<PathBuf>,

    /// Replica folder to mirror into
    #[arg(value_name = "REPLICA", required_unless_present = "config_file")]
    pub replica: Option<PathBuf>,

    /// Seconds between synchronization passes
    #[arg(value_name = "INTERVAL")]
    pub interval: Option<u64>,

    /// Log file path
    #[arg(value_name = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Perform a trial run with no changes made
    #[arg(short = 'n', long, default_value_t = false)]
    pub dry_run: bool,

    /// File with ignore patterns, one glob per line
    #[arg(long, value_name = "PATH")]
    pub ignore_file: Option<PathBuf>,

    /// Compare files by content hash instead of size and mtime
    #[arg(short = 'c', long, default_value_t = false)]
    pub use_content_hash: bool,

    /// Keep a hash cache in the replica to avoid re-hashing unchanged files
    #[arg(long, default_value_t = false)]
    pub use_hash_cache: bool,

    /// JSON configuration file to load parameters from
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Run a single pass and exit
    #[arg(long, default_value_t = false)]
    pub once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Follow directory symlinks while scanning
    #[arg(long, default_value_t = false)]
    pub follow_symlinks: bool,
}

/// JSON configuration file; every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub source_folder: Option<PathBuf>,
    pub replica_folder: Option<PathBuf>,
    pub sync_interval: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub ignore_patterns: Vec<String>,
    pub ignore_file: Option<PathBuf>,
    pub use_content_hash: bool,
    pub use_hash_cache: bool,
    pub dry_run: bool,
    pub log_level: Option<String>,
}

/// Fully layered settings, resolved once before the first pass.
/// Precedence: CLI arguments > config file > defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub source: PathBuf,
    pub replica: PathBuf,
    pub interval_secs: u64,
    pub log_file: PathBuf,
    pub ignore_patterns: Vec<String>,
    pub ignore_file: Option<PathBuf>,
    pub use_content_hash: bool,
    pub use_hash_cache: bool,
    pub dry_run: bool,
    pub once: bool,
    pub log_level: Level,
    pub follow_symlinks: bool,
}

impl Settings {
    /// Settings for a source/replica pair with everything else defaulted.
    pub fn new(source: impl Into<PathBuf>, replica: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            replica: replica.into(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            ignore_patterns: Vec::new(),
            ignore_file: None,
            use_content_hash: false,
            use_hash_cache: false,
            dry_run: false,
            once: false,
            log_level: Level::INFO,
            follow_symlinks: false,
        }
    }

    pub fn resolve(args: Args) -> Result<Self> {
        let file = match &args.config_file {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    MirrorSyncError::Config(format!("cannot read config file {:?}: {e}", path))
                })?;
                serde_json::from_str::<ConfigFile>(&text).map_err(|e| {
                    MirrorSyncError::Config(format!("invalid config file {:?}: {e}", path))
                })?
            }
            None => ConfigFile::default(),
        };

        let source = args.source.or(file.source_folder).ok_or_else(|| {
            MirrorSyncError::Config("source folder is required (argument or config file)".into())
        })?;
        let replica = args.replica.or(file.replica_folder).ok_or_else(|| {
            MirrorSyncError::Config("replica folder is required (argument or config file)".into())
        })?;

        let interval_secs = args
            .interval
            .or(file.sync_interval)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        if interval_secs == 0 {
            return Err(MirrorSyncError::Config(
                "sync interval must be a positive number of seconds".into(),
            ));
        }

        let level_str = args
            .log_level
            .or(file.log_level)
            .unwrap_or_else(|| "info".into());
        let log_level = Level::from_str(&level_str)
            .map_err(|_| MirrorSyncError::Config(format!("invalid log level: {level_str}")))?;

        Ok(Self {
            source,
            replica,
            interval_secs,
            log_file: args
                .log_file
                .or(file.log_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            ignore_patterns: file.ignore_patterns,
            ignore_file: args.ignore_file.or(file.ignore_file),
            use_content_hash: args.use_content_hash || file.use_content_hash,
            use_hash_cache: args.use_hash_cache || file.use_hash_cache,
            dry_run: args.dry_run || file.dry_run,
            once: args.once,
            log_level,
            follow_symlinks: args.follow_symlinks,
        })
    }

    /// Appends the patterns from the ignore file (if any) to the inline set.
    /// A missing or unreadable ignore file is a warning, never fatal.
    pub fn load_ignore_patterns(&mut self) {
        let Some(path) = &self.ignore_file else {
            return;
        };
        match fs::read_to_string(path) {
            Ok(text) => {
                for line in text.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    self.ignore_patterns.push(line.to_string());
                }
            }
            Err(e) => {
                warn!(
                    "ignore file {:?} not readable ({}), continuing without it",
                    path, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args() -> Args {
        Args {
            source: None,
            replica: None,
            interval: None,
            log_file: None,
            dry_run: false,
            ignore_file: None,
            use_content_hash: false,
            use_hash_cache: false,
            config_file: None,
            once: false,
            log_level: None,
            follow_symlinks: false,
        }
    }

    #[test]
    fn arguments_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{
                "source_folder": "/cfg/src",
                "replica_folder": "/cfg/dst",
                "sync_interval": 60,
                "use_content_hash": true
            }"#,
        )
        .unwrap();

        let mut args = bare_args();
        args.source = Some(PathBuf::from("/cli/src"));
        args.interval = Some(10);
        args.config_file = Some(config_path);

        let settings = Settings::resolve(args).unwrap();
        assert_eq!(settings.source, PathBuf::from("/cli/src"));
        assert_eq!(settings.replica, PathBuf::from("/cfg/dst"));
        assert_eq!(settings.interval_secs, 10);
        assert!(settings.use_content_hash);
    }

    #[test]
    fn defaults_fill_the_gaps() {
        let mut args = bare_args();
        args.source = Some(PathBuf::from("/s"));
        args.replica = Some(PathBuf::from("/r"));

        let settings = Settings::resolve(args).unwrap();
        assert_eq!(settings.interval_secs, DEFAULT_INTERVAL_SECS);
        assert_eq!(settings.log_file, PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(settings.log_level, Level::INFO);
        assert!(!settings.use_content_hash);
    }

    #[test]
    fn missing_source_is_a_config_error() {
        let mut args = bare_args();
        args.replica = Some(PathBuf::from("/r"));
        assert!(matches!(
            Settings::resolve(args),
            Err(MirrorSyncError::Config(_))
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut args = bare_args();
        args.source = Some(PathBuf::from("/s"));
        args.replica = Some(PathBuf::from("/r"));
        args.interval = Some(0);
        assert!(matches!(
            Settings::resolve(args),
            Err(MirrorSyncError::Config(_))
        ));
    }

    #[test]
    fn malformed_config_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, b"{oops").unwrap();

        let mut args = bare_args();
        args.config_file = Some(config_path);
        assert!(matches!(
            Settings::resolve(args),
            Err(MirrorSyncError::Config(_))
        ));
    }

    #[test]
    fn ignore_file_lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let ignore_path = dir.path().join("ignore.txt");
        fs::write(&ignore_path, "*.tmp\n\n# comment\nbuild/\n").unwrap();

        let mut settings = Settings::new("/s", "/r");
        settings.ignore_patterns.push("inline".into());
        settings.ignore_file = Some(ignore_path);
        settings.load_ignore_patterns();

        assert_eq!(settings.ignore_patterns, vec!["inline", "*.tmp", "build/"]);
    }

    #[test]
    fn missing_ignore_file_is_not_fatal() {
        let mut settings = Settings::new("/s", "/r");
        settings.ignore_file = Some(PathBuf::from("/nonexistent/ignore.txt"));
        settings.load_ignore_patterns();
        assert!(settings.ignore_patterns.is_empty());
    }
}
