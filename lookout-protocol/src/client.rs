use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::debug;

use crate::{
    errors::ClientError,
    frame::{Frame, read_frame, spawn_writer},
    protocol::{
        FunctionId, LogQuery, ReadRequest, Request, RequestEnvelope, Response, decode_response,
        encode_envelope,
    },
};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Bounded channel capacity for the client writer task.
const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Connection to a lookout node (agent or gateway).
///
/// Requests are multiplexed over one TCP stream: each carries an id and the
/// reader task routes the matching response back to the waiting caller.
pub struct Client {
    address: String,
    writer_tx: mpsc::Sender<Vec<u8>>,
    pending: Arc<DashMap<u64, oneshot::Sender<Response>>>,
    next_id: AtomicU64,
    reader_handle: JoinHandle<()>,
    _writer_handle: JoinHandle<()>,
}

impl Client {
    /// Connect to `address` (`host:port`), giving up after `dial_timeout`.
    pub async fn connect(address: &str, dial_timeout: Duration) -> Result<Self> {
        let stream = match tokio::time::timeout(dial_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    address: address.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(ClientError::ConnectTimeout {
                    address: address.to_string(),
                    timeout: dial_timeout,
                });
            }
        };
        let _ = stream.set_nodelay(true);

        let (mut read_half, write_half) = stream.into_split();
        let (writer_tx, writer_handle) = spawn_writer(write_half, WRITER_CHANNEL_CAPACITY);

        let pending: Arc<DashMap<u64, oneshot::Sender<Response>>> = Arc::new(DashMap::new());
        let routes = Arc::clone(&pending);
        let peer = address.to_string();
        let reader_handle = tokio::spawn(async move {
            loop {
                let payload = match read_frame(&mut read_half).await {
                    Ok(Frame::Payload(payload)) => payload,
                    Ok(Frame::Closed) => {
                        debug!("{} closed the connection", peer);
                        break;
                    }
                    Ok(Frame::Oversized(len)) => {
                        debug!("{} sent an oversized frame ({} bytes)", peer, len);
                        break;
                    }
                    Err(e) => {
                        debug!("Read from {} failed: {}", peer, e);
                        break;
                    }
                };
                match decode_response(&payload) {
                    Ok(envelope) => match routes.remove(&envelope.id) {
                        Some((_, waiter)) => {
                            let _ = waiter.send(envelope.response);
                        }
                        None => debug!("No caller waiting for response id={}", envelope.id),
                    },
                    Err(e) => debug!("Undecodable response from {}: {}", peer, e),
                }
            }
            // Waiters see their sender dropped and report Disconnected
            routes.clear();
        });

        Ok(Self {
            address: address.to_string(),
            writer_tx,
            pending,
            next_id: AtomicU64::new(1),
            reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Address this client is connected to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queue a request and return its id together with a future resolving
    /// to the response. Takes `&self`, so several requests can be in flight.
    pub fn send_request(
        &self,
        request: Request,
    ) -> Result<(u64, impl Future<Output = Result<Response>> + use<>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let envelope = RequestEnvelope { id, request };
        let bytes = encode_envelope(&envelope)?;

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.insert(id, response_tx);

        let writer_tx = self.writer_tx.clone();
        let response_future = async move {
            writer_tx
                .send(bytes)
                .await
                .map_err(|_| ClientError::Disconnected)?;
            response_rx.await.map_err(|_| ClientError::Disconnected)
        };

        Ok((id, response_future))
    }

    /// Send a request and wait at most `timeout` for its response.
    pub async fn request(&self, request: Request, timeout: Duration) -> Result<Response> {
        let name = request.variant_name();
        let (id, response) = self.send_request(request)?;
        match tokio::time::timeout(timeout, response).await {
            Ok(result) => result,
            Err(_) => {
                self.pending.remove(&id);
                Err(ClientError::RequestTimeout {
                    request: name,
                    timeout,
                })
            }
        }
    }

    /// Check that the node answers
    pub async fn ping(&self, timeout: Duration) -> Result<Response> {
        self.request(Request::Ping, timeout).await
    }

    /// Read one page from a log file on an agent
    pub async fn read_log(&self, request: ReadRequest, timeout: Duration) -> Result<Response> {
        self.request(Request::ReadLog(request), timeout).await
    }

    /// Fetch one page of a function instance's log through a gateway
    pub async fn fetch_log(
        &self,
        function: FunctionId,
        instance: u32,
        worker_id: Option<String>,
        query: LogQuery,
        timeout: Duration,
    ) -> Result<Response> {
        self.request(
            Request::FetchLog {
                function,
                instance,
                worker_id,
                query,
            },
            timeout,
        )
        .await
    }

    /// Describe a function cached by a gateway
    pub async fn describe_function(
        &self,
        function: FunctionId,
        timeout: Duration,
    ) -> Result<Response> {
        self.request(Request::DescribeFunction { function }, timeout)
            .await
    }

    /// Count functions a gateway knows under `tenant`
    pub async fn count_functions(&self, tenant: String, timeout: Duration) -> Result<Response> {
        self.request(Request::CountFunctions { tenant }, timeout).await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

#[cfg(test)]
mod tests;
