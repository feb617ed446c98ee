use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use partysync_proto::{ProtoError, encode_raw_line};
use thiserror::Error;
use tokio::sync::mpsc;

/// Outbound queue of encoded lines, terminator included.
pub type OutboundTx = mpsc::Sender<Bytes>;

/// Outbound queue depth per connection.
pub const OUTBOUND_QUEUE_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Encode(#[from] ProtoError),
}

/// Spawn a writer task draining `rx` into `write`.
///
/// Exits when every sender is dropped or a socket write fails. Dropping the
/// sink closes the write half of the socket.
pub fn spawn_writer<S>(
    mut write: S,
    mut rx: mpsc::Receiver<Bytes>,
) -> tokio::task::JoinHandle<anyhow::Result<()>>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            write.send(line).await?;
        }
        write.close().await?;
        Ok(())
    })
}

/// Queue an already encoded line.
///
/// Fails once the writer task is gone, which means the peer is unreachable.
pub async fn send_bytes(tx: &OutboundTx, line: Bytes) -> Result<(), SendError> {
    tx.send(line).await.map_err(|_| SendError::Closed)
}

/// Queue a bare text line (code, member count, error reply).
pub async fn send_text(tx: &OutboundTx, text: &str) -> Result<(), SendError> {
    send_bytes(tx, encode_raw_line(text)?).await
}
