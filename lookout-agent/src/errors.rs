use std::path::PathBuf;

use lookout_protocol::protocol::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no complete line in {scanned} bytes at offset {offset} of {path}")]
    IncompleteLine {
        path: PathBuf,
        offset: u64,
        scanned: u64,
    },

    #[error("{path} shrank while reading at offset {offset}")]
    Truncated { path: PathBuf, offset: u64 },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CursorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CursorError::Open { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// Whether retrying the same read later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CursorError::IncompleteLine { .. } | CursorError::Truncated { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_not_found() {
            ErrorKind::NotFound
        } else {
            ErrorKind::Io
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error("{0} is outside the log root")]
    OutsideLogRoot(PathBuf),

    #[error("page of {requested} bytes exceeds the {max} byte limit")]
    PageTooLarge { requested: i64, max: i64 },

    #[error("log root {path} is unusable: {source}")]
    LogRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read task failed: {0}")]
    Join(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Cursor(e) => e.kind(),
            ServiceError::OutsideLogRoot(_) | ServiceError::PageTooLarge { .. } => {
                ErrorKind::InvalidRequest
            }
            ServiceError::LogRoot { .. } | ServiceError::Join(_) => ErrorKind::Internal,
        }
    }
}
