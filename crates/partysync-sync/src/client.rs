//! Host and member sessions against a relay.
//!
//! A connection sends one [`InitialRequest`] line and reads back the party
//! code. After that:
//! - the host writes one snapshot line per tick and reads member counts;
//! - the member reads snapshot lines and reconciles its own player.

use std::time::Duration;

use futures_util::StreamExt;
use partysync_proto::codec::parse_member_count;
use partysync_proto::limits::MAX_LINE_LEN;
use partysync_proto::{
    InitialRequest, PartyCode, PlaybackSnapshot, ServerReply, decode_line, encode_line,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::PartyError;
use crate::reconcile::{MemberState, ReconciliationEngine};
use crate::sampler::PlaybackSampler;

/// How long to wait for the relay to answer the initial request.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;

struct Connection {
    reader: LineReader,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open<A: ToSocketAddrs>(addr: A) -> Result<Self, PartyError> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_LEN)),
            writer: write,
        })
    }

    async fn handshake(&mut self, req: &InitialRequest) -> Result<PartyCode, PartyError> {
        self.writer.write_all(&encode_line(req)?).await?;
        let line = timeout(HANDSHAKE_TIMEOUT, self.reader.next())
            .await
            .map_err(|_| PartyError::Timeout)?
            .ok_or_else(|| PartyError::ConnectionLost("closed during handshake".into()))??;
        match ServerReply::parse(&line)? {
            ServerReply::Accepted(code) => Ok(code),
            ServerReply::Rejected(reason) => Err(PartyError::Rejected(reason)),
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>, PartyError> {
        match self.reader.next().await {
            Some(line) => Ok(Some(line?)),
            None => Ok(None),
        }
    }
}

/// Create a party. `access_token` may be empty when the host pushes its own
/// snapshots.
pub async fn create_party<A: ToSocketAddrs>(
    addr: A,
    access_token: &str,
) -> Result<HostSession, PartyError> {
    let mut conn = Connection::open(addr).await?;
    let code = conn
        .handshake(&InitialRequest::create(access_token))
        .await?;
    info!(code = %code, "Party created");
    let (members_tx, _) = watch::channel(0);
    Ok(HostSession {
        code,
        conn,
        members: members_tx,
    })
}

/// Join an existing party. Pass an empty `access_token` to reconcile locally
/// with [`MemberSession::run`].
pub async fn join_party<A: ToSocketAddrs>(
    addr: A,
    code: &PartyCode,
    access_token: &str,
) -> Result<MemberSession, PartyError> {
    let mut conn = Connection::open(addr).await?;
    let echoed = conn
        .handshake(&InitialRequest::join(code, access_token))
        .await?;
    if &echoed != code {
        return Err(PartyError::CodeMismatch {
            expected: code.to_string(),
            got: echoed.to_string(),
        });
    }
    info!(code = %code, "Joined party");
    Ok(MemberSession {
        code: echoed,
        conn,
        state: MemberState::default(),
    })
}

/// The host's side of a party.
pub struct HostSession {
    code: PartyCode,
    conn: Connection,
    members: watch::Sender<usize>,
}

impl HostSession {
    pub fn code(&self) -> &PartyCode {
        &self.code
    }

    /// Live member count as last reported by the relay.
    pub fn member_count(&self) -> watch::Receiver<usize> {
        self.members.subscribe()
    }

    /// Send one snapshot line.
    pub async fn push(&mut self, snapshot: &PlaybackSnapshot) -> Result<(), PartyError> {
        self.conn.writer.write_all(&encode_line(snapshot)?).await?;
        Ok(())
    }

    /// Wait for the next member-count report. `None` once the relay closed.
    pub async fn next_member_count(&mut self) -> Result<Option<usize>, PartyError> {
        let Some(line) = self.conn.next_line().await? else {
            return Ok(None);
        };
        let count = parse_member_count(&line)?;
        self.members.send_replace(count);
        Ok(Some(count))
    }

    /// Sample and push every `interval` until cancelled or the relay closes.
    ///
    /// Sampling failures skip the tick; the relay closing ends the session
    /// with [`PartyError::ConnectionLost`].
    pub async fn run(
        mut self,
        sampler: PlaybackSampler,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<(), PartyError> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(code = %self.code, "Host session cancelled");
                    let _ = self.conn.writer.shutdown().await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match sampler.sample().await {
                        Ok(Some(snapshot)) => self.push(&snapshot).await?,
                        Ok(None) => trace!("No active playback, skipping tick"),
                        Err(e) => warn!(error = %e, "Failed to sample host playback"),
                    }
                }
                count = self.next_member_count() => {
                    match count {
                        Ok(Some(n)) => info!(code = %self.code, members = n, "Member count changed"),
                        Ok(None) => return Err(PartyError::ConnectionLost("relay closed".into())),
                        Err(PartyError::Protocol(e)) => warn!(error = %e, "Ignoring unexpected line from relay"),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}

/// A member's side of a party.
pub struct MemberSession {
    code: PartyCode,
    conn: Connection,
    state: MemberState,
}

impl MemberSession {
    pub fn code(&self) -> &PartyCode {
        &self.code
    }

    pub fn state(&self) -> &MemberState {
        &self.state
    }

    /// Next snapshot from the host. `None` once the party ended.
    pub async fn next_snapshot(&mut self) -> Result<Option<PlaybackSnapshot>, PartyError> {
        loop {
            let Some(line) = self.conn.next_line().await? else {
                return Ok(None);
            };
            match decode_line::<PlaybackSnapshot>(&line) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => warn!(error = %e, "Ignoring malformed snapshot line"),
            }
        }
    }

    /// Follow the host until the party ends or `cancel` fires.
    ///
    /// Actuator failures are logged; the next snapshot re-attempts the
    /// correction.
    pub async fn run(
        mut self,
        sampler: PlaybackSampler,
        engine: ReconciliationEngine,
        cancel: CancellationToken,
    ) -> Result<(), PartyError> {
        loop {
            let snapshot = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(code = %self.code, "Member session cancelled");
                    let _ = self.conn.writer.shutdown().await;
                    return Ok(());
                }
                next = self.next_snapshot() => match next? {
                    Some(snapshot) => snapshot,
                    None => {
                        info!(code = %self.code, "Party ended");
                        return Ok(());
                    }
                },
            };

            match engine.drive(&sampler, &mut self.state, &snapshot).await {
                Ok(correction) if !correction.is_none() => {
                    debug!(?correction, "Applied correction");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Correction failed"),
            }
        }
    }
}
