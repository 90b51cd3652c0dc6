use std::path::PathBuf;
use std::time::Duration;

use lookout_protocol::errors::ClientError;
use lookout_protocol::protocol::{ErrorKind, FunctionId};
use thiserror::Error;

/// Format a YAML error for user-friendly display, including the field path
fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = if let Some(loc) = inner.location() {
        format!("Line {}, Column {}: {}", loc.line(), loc.column(), msg)
    } else {
        msg
    };

    if path.is_empty() || path == "." {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}':\n  {}", format_yaml_error(.source))]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Failure talking to the authoritative status endpoint
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("no admin endpoint configured")]
    NotConfigured,

    #[error("cannot build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("status request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("status request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("function {0} not found")]
    FunctionNotFound(FunctionId),

    #[error("instance {instance} of function {function} not found")]
    InstanceNotFound { function: FunctionId, instance: u32 },

    #[error("cannot query status of {function}: {source}")]
    StatusQuery {
        function: FunctionId,
        #[source]
        source: StatusError,
    },
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("cannot connect to metadata stream at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to metadata stream at {address} after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("metadata stream read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("undecodable metadata event {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{0}")]
    Validation(&'static str),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("worker {address} returned {kind} error: {message}")]
    Remote {
        address: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("worker {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: ClientError,
    },

    #[error("worker {address} sent an unexpected response")]
    UnexpectedResponse { address: String },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Validation(_) => ErrorKind::InvalidRequest,
            FetchError::Resolve(_) => ErrorKind::NotFound,
            FetchError::Remote { kind, .. } => *kind,
            FetchError::Transport { .. } => ErrorKind::Unavailable,
            FetchError::UnexpectedResponse { .. } => ErrorKind::Internal,
        }
    }

    /// Status an HTTP front end should answer with
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidRequest => 400,
            _ => 500,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Transport { source, .. } if source.is_timeout())
    }
}
