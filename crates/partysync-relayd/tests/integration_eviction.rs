//! Relay-driven mode: the relay samples the host and corrects members itself.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{TestClient, start_relay};
use partysync_relayd::{RelayConfig, RelayContext};
use partysync_sync::testing::{ActuatorCall, RecordingActuator, RecordingFactory};
use partysync_sync::{ClockSynchronizer, PlaybackState, SyncConfig};

const TRACK: &str = "spotify:track:X";

fn relay_driven(factory: Arc<RecordingFactory>) -> RelayContext {
    let config = RelayConfig {
        sample_interval: Duration::from_millis(50),
        member_call_timeout: Duration::from_millis(500),
        sync: SyncConfig {
            pause_guard: Duration::ZERO,
            ..SyncConfig::default()
        },
        ..RelayConfig::default()
    };
    RelayContext::new(config, Arc::new(ClockSynchronizer::system())).with_factory(factory)
}

async fn read_until_eof(client: &mut TestClient) -> anyhow::Result<()> {
    while client.recv_line().await?.is_some() {}
    Ok(())
}

#[tokio::test]
async fn failing_member_is_evicted_others_still_corrected() -> anyhow::Result<()> {
    let factory = Arc::new(RecordingFactory::new());
    let host_player = Arc::new(RecordingActuator::default());
    let good_a = Arc::new(RecordingActuator::default());
    let bad = Arc::new(RecordingActuator::default());
    bad.fail_corrections(true);
    let good_b = Arc::new(RecordingActuator::default());
    factory.register("host", host_player.clone());
    factory.register("a", good_a.clone());
    factory.register("bad", bad.clone());
    factory.register("b", good_b.clone());

    let (addr, _ctx) = start_relay(relay_driven(factory)).await?;
    let (mut host, code) = TestClient::create(addr, "host").await?;
    let _a = TestClient::join(addr, &code, "a").await?;
    let mut bad_client = TestClient::join(addr, &code, "bad").await?;
    let _b = TestClient::join(addr, &code, "b").await?;
    host.wait_for_line("3").await?;

    // Nothing was playing so far; start the host.
    host_player.set_state(Some(PlaybackState {
        progress_ms: 5_000,
        playing: true,
        track_uri: TRACK.into(),
        reported_timestamp: None,
    }));

    host.wait_for_line("2").await?;
    read_until_eof(&mut bad_client).await?;

    for player in [&good_a, &good_b] {
        let corrections = player.corrections();
        assert_eq!(corrections.len(), 1, "{corrections:?}");
        assert!(matches!(
            &corrections[0],
            ActuatorCall::PlayAt { track_uri, position_ms }
                if track_uri == TRACK && (5_000..5_200).contains(position_ms)
        ));
    }
    assert_eq!(bad.corrections().len(), 1);

    // Steady state: further ticks neither correct nor evict anyone.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(good_a.corrections().len(), 1);
    assert_eq!(good_b.corrections().len(), 1);
    assert!(host.recv_line().await.is_err(), "unexpected count change");
    Ok(())
}

#[tokio::test]
async fn host_pause_pauses_members() -> anyhow::Result<()> {
    let factory = Arc::new(RecordingFactory::new());
    let host_player = Arc::new(RecordingActuator::playing(TRACK, 10_000));
    let member_player = Arc::new(RecordingActuator::playing(TRACK, 10_000));
    factory.register("host", host_player.clone());
    factory.register("m", member_player.clone());

    let (addr, _ctx) = start_relay(relay_driven(factory)).await?;
    let (mut host, code) = TestClient::create(addr, "host").await?;
    let _m = TestClient::join(addr, &code, "m").await?;
    host.wait_for_line("1").await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    host_player.set_state(Some(PlaybackState {
        progress_ms: 10_000,
        playing: false,
        track_uri: TRACK.into(),
        reported_timestamp: None,
    }));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let state = member_player.state().expect("member session");
    assert!(!state.playing);
    let pauses = member_player
        .corrections()
        .into_iter()
        .filter(|c| *c == ActuatorCall::Pause)
        .count();
    assert_eq!(pauses, 1);
    Ok(())
}

#[tokio::test]
async fn members_without_token_only_receive_lines() -> anyhow::Result<()> {
    let factory = Arc::new(RecordingFactory::new());
    let host_player = Arc::new(RecordingActuator::playing(TRACK, 1_000));
    factory.register("host", host_player);

    let (addr, _ctx) = start_relay(relay_driven(factory)).await?;
    let (mut host, code) = TestClient::create(addr, "host").await?;
    let mut member = TestClient::join(addr, &code, "").await?;
    host.wait_for_line("1").await?;

    let line = member.expect_line().await?;
    let snapshot: partysync_proto::PlaybackSnapshot = partysync_proto::decode_line(&line)?;
    assert_eq!(snapshot.track_uri, TRACK);
    assert_eq!(snapshot.progress_ms, 1_000);
    Ok(())
}
