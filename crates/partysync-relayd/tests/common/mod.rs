//! Helpers shared by the relay integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use partysync_relayd::{RelayConfig, RelayContext, run_server};
use partysync_sync::ClockSynchronizer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Start a relay on an ephemeral loopback port.
pub async fn start_relay(ctx: RelayContext) -> anyhow::Result<(SocketAddr, Arc<RelayContext>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let ctx = Arc::new(ctx);
    let server_ctx = ctx.clone();
    tokio::spawn(async move {
        let _ = run_server(listener, server_ctx).await;
    });
    Ok((addr, ctx))
}

pub fn default_context() -> RelayContext {
    RelayContext::new(RelayConfig::default(), Arc::new(ClockSynchronizer::system()))
}

/// Line-oriented raw client.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let (read, write) = TcpStream::connect(addr).await?.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    pub async fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Next line without its terminator, `None` on EOF.
    pub async fn recv_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        let n = timeout(READ_TIMEOUT, self.reader.read_line(&mut line)).await??;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end().to_string()))
    }

    pub async fn expect_line(&mut self) -> anyhow::Result<String> {
        self.recv_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))
    }

    /// Read lines until one equals `expected`.
    pub async fn wait_for_line(&mut self, expected: &str) -> anyhow::Result<()> {
        loop {
            let line = self.expect_line().await?;
            if line == expected {
                return Ok(());
            }
        }
    }

    pub async fn expect_eof(&mut self) -> anyhow::Result<()> {
        match self.recv_line().await? {
            None => Ok(()),
            Some(line) => anyhow::bail!("expected EOF, got {line:?}"),
        }
    }

    pub async fn create(addr: SocketAddr, token: &str) -> anyhow::Result<(Self, String)> {
        let mut client = Self::connect(addr).await?;
        client
            .send_line(&format!(
                r#"{{"create":true,"id":null,"accessToken":"{token}"}}"#
            ))
            .await?;
        let code = client.expect_line().await?;
        Ok((client, code))
    }

    pub async fn join(addr: SocketAddr, code: &str, token: &str) -> anyhow::Result<Self> {
        let mut client = Self::connect(addr).await?;
        client
            .send_line(&format!(
                r#"{{"create":false,"id":"{code}","accessToken":"{token}"}}"#
            ))
            .await?;
        let echoed = client.expect_line().await?;
        anyhow::ensure!(echoed == code, "expected {code}, got {echoed}");
        Ok(client)
    }
}
