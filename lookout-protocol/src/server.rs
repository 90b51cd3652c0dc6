use std::{future::Future, net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tracing::{debug, error, info, warn};

use crate::{
    errors::ServerError,
    frame::{Frame, read_frame, spawn_writer},
    protocol::{
        ErrorKind, MAX_MESSAGE_SIZE, Request, Response, ResponseEnvelope, decode_envelope,
        encode_response,
    },
};

pub type Result<T> = std::result::Result<T, ServerError>;
pub type ShutdownTx = mpsc::Sender<()>;

/// Bounded channel capacity for the per-connection writer task.
const WRITER_CHANNEL_CAPACITY: usize = 256;

/// TCP request/response server.
///
/// Every request on every connection is handed to `handler` on its own task;
/// the server keeps no state between requests.
pub struct Server<F, Fut>
where
    F: Fn(Request, ShutdownTx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send,
{
    listener: TcpListener,
    handler: Arc<F>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<F, Fut> Server<F, Fut>
where
    F: Fn(Request, ShutdownTx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    /// Bind the listener. Use port 0 to let the OS pick one.
    pub async fn bind(address: &str, handler: F) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.to_string(),
                source,
            })?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Ok(Self {
            listener,
            handler: Arc::new(handler),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Sender that stops the accept loop when signalled
    pub fn shutdown_handle(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let shutdown_tx = self.shutdown_tx.clone();
                            let handler = Arc::clone(&self.handler);

                            tokio::spawn(async move {
                                if let Err(e) = handle_client(handler, stream, peer, shutdown_tx).await {
                                    debug!("Client handler error: {}", e);
                                }
                            });
                        },
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        },
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Server shutdown!");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_client<F, Fut>(
    handler: Arc<F>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
) -> Result<()>
where
    F: Fn(Request, ShutdownTx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    debug!("Client connected: {}", peer);
    let _ = stream.set_nodelay(true);

    let (mut read_half, write_half) = stream.into_split();
    let (replies, writer_task) = spawn_writer(write_half, WRITER_CHANNEL_CAPACITY);

    let outcome = loop {
        let payload = match read_frame(&mut read_half).await {
            Ok(Frame::Payload(payload)) => payload,
            Ok(Frame::Closed) => {
                debug!("Client disconnected: {}", peer);
                break Ok(());
            }
            Ok(Frame::Oversized(len)) => {
                debug!("{} sent a {} byte request", peer, len);
                let message = format!(
                    "Request exceeds maximum message size of {} bytes",
                    MAX_MESSAGE_SIZE
                );
                reply(&replies, 0, Response::error(ErrorKind::InvalidRequest, message)).await;
                break Err(ServerError::MessageTooLarge { peer });
            }
            Err(source) => break Err(ServerError::Receive { peer, source }),
        };

        let envelope = match decode_envelope(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // The id is unreadable too; 0 is never issued by clients
                warn!("Undecodable request from {}: {}", peer, e);
                let response = Response::error(ErrorKind::InvalidRequest, "Invalid request format");
                reply(&replies, 0, response).await;
                continue;
            }
        };

        let id = envelope.id;
        debug!("Request id={} from {}: {}", id, peer, envelope.request.variant_name());

        let handler = Arc::clone(&handler);
        let shutdown_tx = shutdown_tx.clone();
        let replies = replies.clone();
        tokio::spawn(async move {
            let response = handler(envelope.request, shutdown_tx).await;
            reply(&replies, id, response).await;
        });
    };

    // In-flight handlers hold their own sender; the writer ends after them
    drop(replies);
    let _ = writer_task.await;
    outcome
}

/// Encode and queue one response. An unencodable response is replaced by an
/// `Internal` error carrying the same id.
async fn reply(replies: &mpsc::Sender<Vec<u8>>, id: u64, response: Response) {
    let frame = match encode_response(&ResponseEnvelope { id, response }) {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to encode response id={}: {}", id, e);
            let fallback = ResponseEnvelope {
                id,
                response: Response::error(ErrorKind::Internal, e.to_string()),
            };
            match encode_response(&fallback) {
                Ok(frame) => frame,
                Err(_) => return,
            }
        }
    };
    if replies.send(frame).await.is_err() {
        debug!("Connection closed before response id={} was sent", id);
    }
}
