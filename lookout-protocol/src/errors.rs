use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),

    #[error("message exceeds maximum size")]
    MessageTooLarge,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {address} after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("connection closed before a response arrived")]
    Disconnected,

    #[error("{request} request timed out after {timeout:?}")]
    RequestTimeout {
        request: &'static str,
        timeout: Duration,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// Whether the failure is a deadline expiry rather than a refusal
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectTimeout { .. } | ClientError::RequestTimeout { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read local address of listener: {0}")]
    LocalAddr(#[source] std::io::Error),

    #[error("failed to receive request from {peer}: {source}")]
    Receive {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("request from {peer} exceeds maximum message size")]
    MessageTooLarge { peer: SocketAddr },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
