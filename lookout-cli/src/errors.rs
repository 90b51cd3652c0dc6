use lookout_protocol::protocol::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid function '{0}', expected tenant/namespace/name")]
    InvalidFunction(String),

    #[error("Gateway error ({kind}): {message}")]
    Server { kind: ErrorKind, message: String },

    #[error("Unexpected response from gateway: {0}")]
    UnexpectedResponse(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] lookout_protocol::errors::ClientError),
}

pub type Result<T> = std::result::Result<T, CliError>;
