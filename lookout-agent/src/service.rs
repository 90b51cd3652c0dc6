//! Stateless read service exposing the cursor engine over the wire.

use std::path::{Component, Path, PathBuf};

use lookout_protocol::protocol::{
    ErrorKind, LogPage, MAX_PAGE_BYTES, ReadDirection, ReadRequest, Request, Response, ResponseData,
};
use tracing::{debug, warn};

use crate::cursor::LogCursor;
use crate::errors::{CursorError, ServiceError};

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Serves `ReadLog` for files under one log root.
///
/// Each read opens the file fresh from the caller's cursor; nothing is
/// kept between calls.
#[derive(Debug, Clone)]
pub struct LogTailService {
    log_root: PathBuf,
    canonical_root: PathBuf,
}

impl LogTailService {
    pub fn new(log_root: impl Into<PathBuf>) -> Result<Self> {
        let log_root = log_root.into();
        let canonical_root =
            std::fs::canonicalize(&log_root).map_err(|source| ServiceError::LogRoot {
                path: log_root.clone(),
                source,
            })?;
        Ok(Self {
            log_root,
            canonical_root,
        })
    }

    pub fn log_root(&self) -> &Path {
        &self.log_root
    }

    /// Read one page synchronously
    pub fn read(&self, request: &ReadRequest) -> Result<LogPage> {
        if request.bytes > MAX_PAGE_BYTES {
            return Err(ServiceError::PageTooLarge {
                requested: request.bytes,
                max: MAX_PAGE_BYTES,
            });
        }
        let path = self.confine(&request.file)?;
        let mut cursor = LogCursor::open(&path, request.forward_index, request.backward_index)?;

        let page = match request.direction {
            ReadDirection::Forward => {
                let chunk = cursor.read_forward(request.bytes)?;
                LogPage {
                    logs: chunk.text,
                    forward_index: chunk.position as i64,
                    backward_index: cursor.backward_position() as i64,
                }
            }
            ReadDirection::Backward => {
                let chunk = cursor.read_backward(request.bytes)?;
                LogPage {
                    logs: chunk.text,
                    forward_index: cursor.forward_position() as i64,
                    backward_index: chunk.position as i64,
                }
            }
        };
        Ok(page)
    }

    /// Read one page on the blocking pool
    pub async fn read_blocking(&self, request: ReadRequest) -> Result<LogPage> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.read(&request))
            .await
            .map_err(|e| ServiceError::Join(e.to_string()))?
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::ok_with_message("pong"),

            Request::ReadLog(read) => {
                debug!(
                    "ReadLog {} {} bytes={} fwd={} bwd={}",
                    read.file, read.direction, read.bytes, read.forward_index, read.backward_index
                );
                match self.read_blocking(read).await {
                    Ok(page) => Response::ok_with_data(ResponseData::Page(page)),
                    Err(e) => {
                        warn!("Read failed: {}", e);
                        Response::error(e.kind(), e.to_string())
                    }
                }
            }

            other => Response::error(
                ErrorKind::InvalidRequest,
                format!("{} is not served by the log agent", other.variant_name()),
            ),
        }
    }

    /// Resolve `file` and make sure it lives under the log root
    fn confine(&self, file: &str) -> Result<PathBuf> {
        let requested = Path::new(file);
        match std::fs::canonicalize(requested) {
            Ok(resolved) if resolved.starts_with(&self.canonical_root) => Ok(resolved),
            Ok(_) => Err(ServiceError::OutsideLogRoot(requested.to_path_buf())),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                // Missing files are reported as such only when the path
                // could have pointed into the root
                if self.lexically_inside(requested) {
                    Err(CursorError::Open {
                        path: requested.to_path_buf(),
                        source,
                    }
                    .into())
                } else {
                    Err(ServiceError::OutsideLogRoot(requested.to_path_buf()))
                }
            }
            Err(source) => Err(CursorError::Open {
                path: requested.to_path_buf(),
                source,
            }
            .into()),
        }
    }

    fn lexically_inside(&self, path: &Path) -> bool {
        let escapes = path.components().any(|c| matches!(c, Component::ParentDir));
        !escapes && (path.starts_with(&self.log_root) || path.starts_with(&self.canonical_root))
    }
}

#[cfg(test)]
mod tests;
