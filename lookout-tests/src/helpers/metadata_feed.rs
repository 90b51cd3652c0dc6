//! Loopback stand-in for the metadata relay

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lookout_gateway::metadata::MetadataEvent;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Forwards queued lines to the most recent subscriber.
///
/// Lines queued while nobody is connected are held for the next subscriber.
/// [`MetadataFeed::disconnect`] drops the current subscriber so the gateway
/// has to reconnect.
pub struct MetadataFeed {
    address: SocketAddr,
    commands_tx: mpsc::UnboundedSender<FeedCommand>,
    connections: Arc<AtomicUsize>,
}

enum FeedCommand {
    Line(String),
    Disconnect,
}

impl MetadataFeed {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&connections);

        tokio::spawn(async move {
            let mut current: Option<TcpStream> = None;
            let mut pending: VecDeque<String> = VecDeque::new();
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { break };
                        accepted.fetch_add(1, Ordering::SeqCst);
                        current = Some(stream);
                    }
                    command = commands_rx.recv() => match command {
                        Some(FeedCommand::Line(line)) => pending.push_back(line),
                        Some(FeedCommand::Disconnect) => current = None,
                        None => break,
                    },
                }

                while let Some(stream) = current.as_mut()
                    && let Some(line) = pending.pop_front()
                {
                    if stream.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                        current = None;
                    }
                }
            }
        });

        Ok(Self {
            address,
            commands_tx,
            connections,
        })
    }

    pub fn address(&self) -> String {
        self.address.to_string()
    }

    /// Subscribers accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn send_line(&self, line: impl Into<String>) {
        let _ = self.commands_tx.send(FeedCommand::Line(line.into()));
    }

    pub fn send_event(&self, event: &MetadataEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            self.send_line(line);
        }
    }

    /// Close the current subscriber's connection
    pub fn disconnect(&self) {
        let _ = self.commands_tx.send(FeedCommand::Disconnect);
    }
}
