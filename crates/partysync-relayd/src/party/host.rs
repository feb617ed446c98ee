//! The host connection's loop.

use std::sync::Arc;

use futures_util::StreamExt;
use partysync_proto::{PlaybackSnapshot, decode_line};
use partysync_sync::PlaybackSampler;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::RelayContext;
use crate::net::outbound::send_text;
use crate::party::broadcast::fan_out;
use crate::party::state::Party;
use crate::session::Connection;

/// Run the host's side of `party` until the host goes away, then tear the
/// party down. Returns the disconnect reason.
///
/// Snapshot lines from the host are fanned out as they arrive. With a
/// `sampler` the relay also samples the host's player on every interval tick.
///
/// A fan-out runs inline, so host EOF is noticed once it returns. That wait is
/// bounded by `member_call_timeout`. Party cancellation interrupts both a
/// fan-out and a host sample.
pub async fn run_host(
    mut conn: Connection,
    party: Arc<Party>,
    sampler: Option<PlaybackSampler>,
    ctx: &RelayContext,
) -> String {
    let mut count = party.subscribe_count();
    let mut ticker = tokio::time::interval(ctx.config.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let per_call = ctx.config.member_call_timeout;

    let reason = loop {
        tokio::select! {
            _ = party.cancel_token().cancelled() => break "party cancelled".to_string(),

            line = conn.lines.next() => match line {
                None => break "eof".to_string(),
                Some(Err(e)) => break format!("read error: {e}"),
                Some(Ok(line)) => match decode_line::<PlaybackSnapshot>(&line) {
                    Ok(snapshot) => {
                        fan_out(&party, &snapshot, &ctx.engine, per_call).await;
                    }
                    Err(e) => warn!(code = %party.code(), error = %e, "Ignoring host line"),
                },
            },

            _ = ticker.tick(), if sampler.is_some() => {
                let Some(sampler) = sampler.as_ref() else { continue };
                let sampled = tokio::select! {
                    _ = party.cancel_token().cancelled() => break "party cancelled".to_string(),
                    sampled = sampler.sample() => sampled,
                };
                match sampled {
                    Ok(Some(snapshot)) => {
                        fan_out(&party, &snapshot, &ctx.engine, per_call).await;
                    }
                    Ok(None) => trace!(code = %party.code(), "Host has no active playback"),
                    Err(e) => warn!(code = %party.code(), error = %e, "Failed to sample host"),
                }
            }

            changed = count.changed() => {
                if changed.is_err() {
                    break "party dropped".to_string();
                }
                let n = *count.borrow_and_update();
                debug!(code = %party.code(), members = n, "Pushing member count");
                if let Err(e) = send_text(&conn.outbound, &n.to_string()).await {
                    break format!("host write failed: {e}");
                }
            }
        }
    };

    let members = party.close();
    ctx.registry.remove(party.code());
    info!(
        code = %party.code(),
        host_conn_id = party.host_conn_id(),
        members = members.len(),
        %reason,
        "Party closed"
    );
    reason
}
