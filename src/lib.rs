pub mod config;
pub mod filter;
pub mod scanner;
pub mod hash;
pub mod cache;
pub mod plan;
pub mod executor;
pub mod engine;
pub mod error;

pub use error::MirrorSyncError;
pub type Result<T> = std::result::Result<T, MirrorSyncError>;
