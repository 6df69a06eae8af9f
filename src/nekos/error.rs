use std::io;

use thiserror::Error;

/// Errors raised while talking to the image API or managing a session.
#[derive(Error, Debug)]
pub(crate) enum NekosError {
    #[error("illegal category: {0}")]
    IllegalCategory(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("no images are downloaded or planned for download, run `ensure_ready` first")]
    NothingScheduled,
}

/// Result type for session level operations.
pub(crate) type NekosResult<T> = Result<T, NekosError>;

/// Why a single download produced no file.
#[derive(Error, Debug)]
pub(crate) enum DownloadError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("download cancelled by a session reset")]
    Cancelled,
}

impl DownloadError {
    /// Whether the download was abandoned on purpose rather than failing.
    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}
