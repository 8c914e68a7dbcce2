use thiserror::Error;
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum MirrorSyncError {
    #[error("scan failed for {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pattern error: {0}")]
    Pattern(#[from] globset::Error),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
