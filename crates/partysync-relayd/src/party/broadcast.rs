//! Snapshot fan-out to party members.
//!
//! Every member gets its own future: write the snapshot line, then (in
//! relay-driven mode) reconcile its player. All futures run concurrently under
//! a per-call bound, and a failing member is evicted without affecting the
//! rest.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use partysync_proto::{PlaybackSnapshot, encode_line};
use partysync_sync::{ActuatorError, ReconciliationEngine};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::net::ConnId;
use crate::net::outbound::{SendError, send_bytes};
use crate::party::state::{Member, Party};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("snapshot write failed: {0}")]
    Transport(#[from] SendError),
    #[error("correction failed: {0}")]
    Actuator(#[from] ActuatorError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub evicted: Vec<ConnId>,
}

/// Deliver `snapshot` to every current member and evict those that failed.
///
/// Returns within `per_call`, or as soon as the party is cancelled: every
/// member token is a child of the party token.
pub async fn fan_out(
    party: &Party,
    snapshot: &PlaybackSnapshot,
    engine: &ReconciliationEngine,
    per_call: Duration,
) -> FanOutReport {
    let line = match encode_line(snapshot) {
        Ok(line) => line,
        Err(e) => {
            warn!(code = %party.code(), error = %e, "Dropping unencodable snapshot");
            return FanOutReport::default();
        }
    };
    let change = party.record_host_playback(snapshot);
    if change.track_changed {
        info!(code = %party.code(), track = %snapshot.track_uri, "Host changed track");
    }
    match change.pause_changed {
        Some(true) => info!(code = %party.code(), progress_ms = snapshot.progress_ms, "Host paused"),
        Some(false) => info!(code = %party.code(), progress_ms = snapshot.progress_ms, "Host resumed"),
        None => {}
    }

    let members = party.members();
    let results = join_all(
        members
            .iter()
            .map(|m| deliver(m, line.clone(), snapshot, engine, per_call)),
    )
    .await;

    let mut report = FanOutReport::default();
    for (member, result) in members.iter().zip(results) {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(
                    code = %party.code(),
                    conn_id = member.conn_id(),
                    peer = %member.peer(),
                    error = %e,
                    "Evicting member"
                );
                report.evicted.push(member.conn_id());
            }
        }
    }
    let removed = party.evict(&report.evicted);
    if removed > 0 {
        info!(code = %party.code(), removed, members = party.member_count(), "Members evicted");
    }
    report
}

async fn deliver(
    member: &Arc<Member>,
    line: Bytes,
    snapshot: &PlaybackSnapshot,
    engine: &ReconciliationEngine,
    per_call: Duration,
) -> Result<(), DeliveryError> {
    let work = async {
        send_bytes(member.outbound(), line).await?;
        if let Some(sampler) = member.sampler() {
            let mut state = member.state();
            let correction = engine.drive(sampler, &mut state, snapshot).await?;
            member.set_state(state);
            if !correction.is_none() {
                debug!(conn_id = member.conn_id(), ?correction, "Applied correction");
            }
        }
        Ok::<_, DeliveryError>(())
    };

    tokio::select! {
        // Already leaving (EOF or party teardown); not a delivery failure.
        _ = member.cancel_token().cancelled() => Ok(()),
        res = timeout(per_call, work) => res.map_err(|_| DeliveryError::Timeout(per_call))?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use partysync_sync::testing::{ActuatorCall, ManualTimeSource, RecordingActuator};
    use partysync_sync::{ClockSynchronizer, PlaybackSampler, SyncConfig};
    use tokio::sync::mpsc;

    use crate::party::state::PartyRegistry;

    const PER_CALL: Duration = Duration::from_millis(200);
    const REPLY: &[u8] = b"ABC123\n";

    fn snap(capture: i64, track: &str) -> PlaybackSnapshot {
        PlaybackSnapshot {
            capture_timestamp: capture,
            progress_ms: 5_000,
            paused: false,
            track_uri: track.into(),
        }
    }

    fn member_with_queue(
        party: &Party,
        conn_id: ConnId,
        capacity: usize,
        sampler: Option<PlaybackSampler>,
    ) -> (Arc<Member>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let member = Arc::new(Member::new(
            conn_id,
            SocketAddr::from(([127, 0, 0, 1], 4000)),
            tx,
            sampler,
            party.cancel_token().child_token(),
        ));
        assert!(party.add_member(member.clone(), Bytes::from_static(REPLY)).is_some());
        (member, rx)
    }

    fn join(
        party: &Party,
        conn_id: ConnId,
        actuator: Option<Arc<RecordingActuator>>,
        clock: &Arc<ClockSynchronizer>,
    ) -> (Arc<Member>, mpsc::Receiver<Bytes>) {
        let sampler = actuator.map(|a| PlaybackSampler::new(a, clock.clone()));
        member_with_queue(party, conn_id, 8, sampler)
    }

    /// The join reply fills a one-slot queue, so the next write blocks.
    fn stalled(party: &Party, conn_id: ConnId) -> (Arc<Member>, mpsc::Receiver<Bytes>) {
        member_with_queue(party, conn_id, 1, None)
    }

    fn clock() -> Arc<ClockSynchronizer> {
        Arc::new(ClockSynchronizer::new(Arc::new(ManualTimeSource::new(1_000))))
    }

    #[tokio::test]
    async fn every_member_receives_the_line() {
        let registry = PartyRegistry::new();
        let party = registry.create_party(1);
        let clock = clock();
        let (_a, mut rx_a) = join(&party, 2, None, &clock);
        let (_b, mut rx_b) = join(&party, 3, None, &clock);

        let engine = ReconciliationEngine::default();
        let report = fan_out(&party, &snap(1_000, "spotify:track:X"), &engine, PER_CALL).await;

        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());
        let expected = encode_line(&snap(1_000, "spotify:track:X")).unwrap();
        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(REPLY));
            assert_eq!(rx.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn failing_member_is_evicted_and_others_corrected() {
        let registry = PartyRegistry::new();
        let party = registry.create_party(1);
        let clock = clock();
        let good_a = Arc::new(RecordingActuator::default());
        let bad = Arc::new(RecordingActuator::default());
        bad.fail_corrections(true);
        let good_b = Arc::new(RecordingActuator::default());
        let (_a, _rx_a) = join(&party, 2, Some(good_a.clone()), &clock);
        let (bad_member, _rx_bad) = join(&party, 3, Some(bad.clone()), &clock);
        let (_b, _rx_b) = join(&party, 4, Some(good_b.clone()), &clock);
        let mut count = party.subscribe_count();

        let engine = ReconciliationEngine::new(SyncConfig::default());
        let report = fan_out(&party, &snap(1_000, "spotify:track:X"), &engine, PER_CALL).await;

        assert_eq!(report.evicted, vec![3]);
        assert_eq!(report.delivered, 2);
        assert!(bad_member.cancel_token().is_cancelled());
        assert_eq!(*count.borrow_and_update(), 2);
        for actuator in [&good_a, &good_b] {
            assert_eq!(
                actuator.corrections(),
                vec![ActuatorCall::PlayAt {
                    track_uri: "spotify:track:X".into(),
                    position_ms: 5_000,
                }]
            );
        }
    }

    #[tokio::test]
    async fn closed_connection_is_evicted() {
        let registry = PartyRegistry::new();
        let party = registry.create_party(1);
        let clock = clock();
        let (_gone, rx) = join(&party, 2, None, &clock);
        drop(rx);
        let (_alive, _rx) = join(&party, 3, None, &clock);

        let report = fan_out(
            &party,
            &snap(1_000, "spotify:track:X"),
            &ReconciliationEngine::default(),
            PER_CALL,
        )
        .await;
        assert_eq!(report.evicted, vec![2]);
        assert_eq!(party.member_count(), 1);
    }

    #[tokio::test]
    async fn stalled_member_times_out() {
        let registry = PartyRegistry::new();
        let party = registry.create_party(1);
        let (_stuck, _rx) = stalled(&party, 2);

        let report = fan_out(
            &party,
            &snap(1_000, "spotify:track:X"),
            &ReconciliationEngine::default(),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(report.evicted, vec![2]);
    }

    #[tokio::test]
    async fn leaving_member_is_not_a_failure() {
        let registry = PartyRegistry::new();
        let party = registry.create_party(1);
        let (member, _rx) = stalled(&party, 2);
        member.cancel_token().cancel();

        let report = fan_out(
            &party,
            &snap(1_000, "spotify:track:X"),
            &ReconciliationEngine::default(),
            PER_CALL,
        )
        .await;
        assert!(report.evicted.is_empty());
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn party_cancel_cuts_a_stalled_fan_out_short() {
        let registry = PartyRegistry::new();
        let party = registry.create_party(1);
        let (_stuck, _rx) = stalled(&party, 2);

        let token = party.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let report = tokio::time::timeout(
            Duration::from_secs(1),
            fan_out(
                &party,
                &snap(1_000, "spotify:track:X"),
                &ReconciliationEngine::default(),
                Duration::from_secs(10),
            ),
        )
        .await
        .expect("fan-out outlived the party");
        assert!(report.evicted.is_empty());
    }
}
