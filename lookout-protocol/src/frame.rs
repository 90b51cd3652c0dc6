//! Length-prefixed frames on a byte stream.
//!
//! Encoding lives in [`crate::protocol`]; this module only moves frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::protocol::MAX_MESSAGE_SIZE;

/// One read from the stream
#[derive(Debug)]
pub enum Frame {
    Payload(Vec<u8>),
    /// The peer announced a frame above [`MAX_MESSAGE_SIZE`]; its payload was
    /// not read, so the stream can no longer be trusted.
    Oversized(usize),
    /// Clean end of stream between frames
    Closed,
}

pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Ok(Frame::Oversized(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Frame::Payload(payload))
}

/// Move `writer` onto a task that writes every queued frame in order.
///
/// The task shuts the writer down once all senders are dropped or a write
/// fails.
pub fn spawn_writer<W>(mut writer: W, capacity: usize) -> (mpsc::Sender<Vec<u8>>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (frames_tx, mut frames_rx) = mpsc::channel::<Vec<u8>>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!("Frame write failed: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });
    (frames_tx, handle)
}
