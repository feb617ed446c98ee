//! Connection negotiation: the first line decides whether a connection hosts
//! a new party or joins an existing one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use partysync_proto::constants::ERROR_BAD_REQUEST;
use partysync_proto::{InitialRequest, PartyCode, ProtoError, decode_line, encode_raw_line};
use partysync_sync::PlaybackSampler;
use thiserror::Error;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{info, warn};

use crate::RelayContext;
use crate::net::ConnId;
use crate::net::outbound::{OutboundTx, SendError, send_text};
use crate::party::host::run_host;
use crate::party::member::run_member;
use crate::party::state::{Member, Party};

pub type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;

/// One accepted connection, split into a line reader and an outbound queue.
pub struct Connection {
    pub id: ConnId,
    pub peer: SocketAddr,
    pub lines: LineReader,
    pub outbound: OutboundTx,
}

/// Why a connection never made it into a party. Every variant is answered
/// with the same `ERROR 400` line.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("connection closed before the initial request")]
    Closed,
    #[error("no initial request within {0:?}")]
    Timeout(Duration),
    #[error("read failed: {0}")]
    Read(#[from] LinesCodecError),
    #[error("malformed initial request: {0}")]
    Malformed(#[from] ProtoError),
    #[error("join request without a party code")]
    MissingId,
    #[error("no live party with code {0:?}")]
    UnknownParty(String),
    #[error("party {0} is shutting down")]
    PartyClosed(PartyCode),
    #[error("reply failed: {0}")]
    Reply(#[from] SendError),
}

impl NegotiationError {
    pub fn reply(&self) -> &'static str {
        ERROR_BAD_REQUEST
    }
}

/// What a connection became after negotiation.
enum Role {
    Host {
        party: Arc<Party>,
        sampler: Option<PlaybackSampler>,
    },
    Member {
        party: Arc<Party>,
        member: Arc<Member>,
    },
}

/// Negotiate and run the connection's role. Returns the disconnect reason.
pub async fn serve(mut conn: Connection, ctx: &RelayContext) -> String {
    match negotiate(&mut conn, ctx).await {
        Ok(Role::Host { party, sampler }) => run_host(conn, party, sampler, ctx).await,
        Ok(Role::Member { party, member }) => run_member(conn, party, member).await,
        Err(e) => {
            warn!(conn_id = conn.id, peer = %conn.peer, error = %e, "Negotiation failed");
            let _ = send_text(&conn.outbound, e.reply()).await;
            format!("negotiation failed: {e}")
        }
    }
}

async fn read_initial_request(
    lines: &mut LineReader,
    limit: Duration,
) -> Result<InitialRequest, NegotiationError> {
    let line = timeout(limit, lines.next())
        .await
        .map_err(|_| NegotiationError::Timeout(limit))?
        .ok_or(NegotiationError::Closed)??;
    Ok(decode_line(&line)?)
}

async fn negotiate(conn: &mut Connection, ctx: &RelayContext) -> Result<Role, NegotiationError> {
    let req = read_initial_request(&mut conn.lines, ctx.config.negotiate_timeout).await?;
    let sampler = ctx
        .actuator_for(&req.access_token)
        .map(|actuator| PlaybackSampler::new(actuator, ctx.clock.clone()));

    if req.create {
        let party = ctx.registry.create_party(conn.id);
        if let Err(e) = send_text(&conn.outbound, party.code().as_str()).await {
            ctx.registry.remove(party.code());
            return Err(e.into());
        }
        info!(
            code = %party.code(),
            conn_id = conn.id,
            peer = %conn.peer,
            relay_driven = sampler.is_some(),
            "Party created"
        );
        return Ok(Role::Host { party, sampler });
    }

    let raw = req.id.ok_or(NegotiationError::MissingId)?;
    let party = PartyCode::parse(&raw)
        .ok()
        .and_then(|code| ctx.registry.get(&code))
        .ok_or(NegotiationError::UnknownParty(raw))?;

    let reply = encode_raw_line(party.code().as_str())?;
    let member = Arc::new(Member::new(
        conn.id,
        conn.peer,
        conn.outbound.clone(),
        sampler,
        party.cancel_token().child_token(),
    ));
    let members = party
        .add_member(member.clone(), reply)
        .ok_or_else(|| NegotiationError::PartyClosed(party.code().clone()))?;
    info!(
        code = %party.code(),
        conn_id = conn.id,
        peer = %conn.peer,
        members,
        relay_driven = member.sampler().is_some(),
        "Member joined"
    );
    Ok(Role::Member { party, member })
}
