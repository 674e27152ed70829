use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the analyzer. A malformed log is never one of them.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to read log file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read log stream: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DigestError>;
