use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use partysync_proto::constants::ERROR_RATE_LIMITED;
use partysync_proto::encode_raw_line;
use partysync_proto::limits::MAX_LINE_LEN;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

use super::next_conn_id;
use super::outbound::{OUTBOUND_QUEUE_LEN, spawn_writer};
use super::rate_limit::IpRateLimiter;
use crate::RelayContext;
use crate::session::{self, Connection};

/// How long a closing connection may take to flush its queued lines.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the accept loop on an existing listener.
pub async fn run_tcp_listener_with_listener(
    listener: TcpListener,
    ctx: Arc<RelayContext>,
) -> anyhow::Result<()> {
    let ip_rate_limiter = ctx.config.rate_limit.as_ref().map(IpRateLimiter::new);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };

        if let Some(ref limiter) = ip_rate_limiter
            && !limiter.check(peer.ip())
        {
            warn!(%peer, "Connection rejected: IP rate limit exceeded");
            tokio::spawn(reject_with_rate_limit(stream));
            continue;
        }

        let ctx = ctx.clone();
        tokio::spawn(async move {
            handle_tcp_connection(stream, peer, ctx).await;
        });
    }
}

async fn reject_with_rate_limit(mut stream: TcpStream) {
    if let Ok(line) = encode_raw_line(ERROR_RATE_LIMITED) {
        let _ = stream.write_all(&line).await;
    }
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

/// Serve a single connection until it closes. Public to allow embedding the
/// relay in other crates.
pub async fn handle_tcp_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<RelayContext>) {
    let _ = stream.set_nodelay(true);
    let conn_id = next_conn_id();
    debug!(conn_id, %peer, "Client connected");

    let (read, write) = stream.into_split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
    let mut writer = spawn_writer(FramedWrite::new(write, BytesCodec::new()), out_rx);

    let conn = Connection {
        id: conn_id,
        peer,
        lines: FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_LEN)),
        outbound: out_tx,
    };
    let reason = session::serve(conn, &ctx).await;
    info!(conn_id, %peer, %reason, "Client disconnected");

    // The writer exits once the last sender clone (possibly held by a party)
    // is dropped. A peer that stopped reading must not pin this task.
    match timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
        Ok(Ok(Err(e))) => debug!(conn_id, error = %e, "Writer ended with error"),
        Ok(_) => {}
        Err(_) => {
            debug!(conn_id, "Writer did not drain in time, aborting");
            writer.abort();
        }
    }
}
