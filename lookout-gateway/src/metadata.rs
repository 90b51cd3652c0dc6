//! Function metadata change events and the stream they arrive on.
//!
//! The relay sends one JSON object per line:
//!
//! ```text
//! {"tenant":"acme","namespace":"prod","name":"ingest","parallelism":2,"component":"function"}
//! {"tenant":"acme","namespace":"prod","name":"ingest","kind":"delete"}
//! ```

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use lookout_protocol::protocol::FunctionId;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::errors::MetadataError;
use crate::registry::{ComponentType, FunctionRegistry};

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Stream of decoded events; ends when the relay closes the connection
pub type EventStream = BoxStream<'static, Result<MetadataEvent>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[default]
    Upsert,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEvent {
    pub tenant: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub parallelism: u32,
    #[serde(default)]
    pub component: ComponentType,
    #[serde(default)]
    pub kind: EventKind,
}

impl MetadataEvent {
    pub fn function_id(&self) -> FunctionId {
        FunctionId::new(&self.tenant, &self.namespace, &self.name)
    }

    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|source| MetadataError::Decode {
            line: line.to_string(),
            source,
        })
    }
}

/// Somewhere metadata events can be subscribed to
pub trait MetadataSource: Send + Sync + 'static {
    /// Open a fresh subscription
    fn subscribe(&self) -> impl Future<Output = Result<EventStream>> + Send;
}

/// Reads newline-delimited JSON events from a TCP relay
#[derive(Debug, Clone)]
pub struct TcpMetadataSource {
    address: String,
    connect_timeout: Duration,
}

impl TcpMetadataSource {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl MetadataSource for TcpMetadataSource {
    async fn subscribe(&self) -> Result<EventStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| MetadataError::ConnectTimeout {
                address: self.address.clone(),
                timeout: self.connect_timeout,
            })?
            .map_err(|source| MetadataError::Connect {
                address: self.address.clone(),
                source,
            })?;
        info!("Subscribed to metadata stream at {}", self.address);

        let lines = BufReader::new(stream).lines();
        let events = futures::stream::unfold(lines, |mut lines| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => return Some((MetadataEvent::parse(&line), lines)),
                    Ok(None) => return None,
                    Err(e) => return Some((Err(MetadataError::Io(e)), lines)),
                }
            }
        });
        Ok(events.boxed())
    }
}

/// How a subscriber run ended
#[derive(Debug)]
pub struct SubscriberExit {
    /// Events applied to the registry before the run ended
    pub consumed: u64,
    /// `None` when the stream simply ended
    pub error: Option<MetadataError>,
}

/// Apply events to `registry` until the stream ends or yields an error
pub async fn consume(registry: &FunctionRegistry, mut events: EventStream) -> SubscriberExit {
    let mut consumed = 0;
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                registry.apply(&event);
                consumed += 1;
            }
            Err(error) => {
                return SubscriberExit {
                    consumed,
                    error: Some(error),
                };
            }
        }
    }
    debug!("Metadata stream ended after {} events", consumed);
    SubscriberExit {
        consumed,
        error: None,
    }
}

/// Subscribe once and consume until the subscription ends
pub async fn run_subscriber<S: MetadataSource>(
    source: &S,
    registry: &FunctionRegistry,
) -> SubscriberExit {
    match source.subscribe().await {
        Ok(events) => consume(registry, events).await,
        Err(error) => SubscriberExit {
            consumed: 0,
            error: Some(error),
        },
    }
}
