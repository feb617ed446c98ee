use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{info, trace};

use crate::party::state::{Member, Party};
use crate::session::Connection;

/// Hold a member's connection open until it is closed by the peer, evicted,
/// or the party ends. Returns the disconnect reason.
///
/// Members never send anything meaningful; reading only detects EOF.
pub async fn run_member(mut conn: Connection, party: Arc<Party>, member: Arc<Member>) -> String {
    let reason = loop {
        tokio::select! {
            _ = member.cancel_token().cancelled() => {
                let why = if party.is_closed() { "party ended" } else { "evicted" };
                break why.to_string();
            }
            line = conn.lines.next() => match line {
                None => break "eof".to_string(),
                Some(Err(e)) => break format!("read error: {e}"),
                Some(Ok(_)) => trace!(conn_id = conn.id, "Ignoring line from member"),
            },
        }
    };

    if party.remove_member(conn.id).is_some() {
        info!(
            code = %party.code(),
            conn_id = conn.id,
            members = party.member_count(),
            "Member left"
        );
    }
    reason
}
