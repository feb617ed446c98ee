//! Negotiation and membership over real loopback sockets.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{TestClient, default_context, start_relay};
use partysync_proto::{PartyCode, PlaybackSnapshot, decode_line};
use partysync_relayd::net::rate_limit::RateLimitConfig;
use partysync_relayd::{RelayConfig, RelayContext};
use partysync_sync::ClockSynchronizer;

#[tokio::test]
async fn create_returns_code_that_join_resolves() -> anyhow::Result<()> {
    let (addr, ctx) = start_relay(default_context()).await?;

    let (mut host, code) = TestClient::create(addr, "").await?;
    assert!(PartyCode::parse(&code).is_ok(), "bad code {code:?}");
    assert_eq!(ctx.registry.len(), 1);

    let _member = TestClient::join(addr, &code, "").await?;
    host.wait_for_line("1").await?;
    Ok(())
}

#[tokio::test]
async fn join_is_case_insensitive() -> anyhow::Result<()> {
    let (addr, _ctx) = start_relay(default_context()).await?;
    let (mut host, code) = TestClient::create(addr, "").await?;

    let mut member = TestClient::connect(addr).await?;
    member
        .send_line(&format!(r#"{{"create":false,"id":"{}"}}"#, code.to_lowercase()))
        .await?;
    assert_eq!(member.expect_line().await?, code);
    host.wait_for_line("1").await?;
    Ok(())
}

#[tokio::test]
async fn unknown_code_is_rejected_and_closed() -> anyhow::Result<()> {
    let (addr, _ctx) = start_relay(default_context()).await?;

    let mut client = TestClient::connect(addr).await?;
    client
        .send_line(r#"{"create":false,"id":"ZZZZZZ","accessToken":""}"#)
        .await?;
    assert_eq!(client.expect_line().await?, "ERROR 400");
    client.expect_eof().await?;
    Ok(())
}

#[tokio::test]
async fn closing_party_rejects_join_without_code() -> anyhow::Result<()> {
    let (addr, ctx) = start_relay(default_context()).await?;
    let party = ctx.registry.create_party(9_999);
    party.close();

    let mut client = TestClient::connect(addr).await?;
    client
        .send_line(&format!(r#"{{"create":false,"id":"{}"}}"#, party.code()))
        .await?;
    assert_eq!(client.expect_line().await?, "ERROR 400");
    client.expect_eof().await?;
    Ok(())
}

#[tokio::test]
async fn malformed_request_is_rejected()-> anyhow::Result<()> {
    let (addr, _ctx) = start_relay(default_context()).await?;

    for bad in ["not json", r#"{"create":false}"#, r#"{"create":false,"id":null}"#] {
        let mut client = TestClient::connect(addr).await?;
        client.send_line(bad).await?;
        assert_eq!(client.expect_line().await?, "ERROR 400", "request {bad:?}");
        client.expect_eof().await?;
    }
    Ok(())
}

#[tokio::test]
async fn silent_connection_times_out() -> anyhow::Result<()> {
    let config = RelayConfig {
        negotiate_timeout: Duration::from_millis(100),
        ..RelayConfig::default()
    };
    let ctx = RelayContext::new(config, std::sync::Arc::new(ClockSynchronizer::system()));
    let (addr, _ctx) = start_relay(ctx).await?;

    let mut client = TestClient::connect(addr).await?;
    assert_eq!(client.expect_line().await?, "ERROR 400");
    client.expect_eof().await?;
    Ok(())
}

#[tokio::test]
async fn codes_are_unique_among_live_parties() -> anyhow::Result<()> {
    let (addr, ctx) = start_relay(default_context()).await?;

    let mut hosts = Vec::new();
    let mut codes = HashSet::new();
    for _ in 0..20 {
        let (host, code) = TestClient::create(addr, "").await?;
        assert!(codes.insert(code));
        hosts.push(host);
    }
    assert_eq!(ctx.registry.len(), 20);
    Ok(())
}

#[tokio::test]
async fn member_count_tracks_joins_and_leaves() -> anyhow::Result<()> {
    let (addr, _ctx) = start_relay(default_context()).await?;
    let (mut host, code) = TestClient::create(addr, "").await?;

    let first = TestClient::join(addr, &code, "").await?;
    host.wait_for_line("1").await?;
    let _second = TestClient::join(addr, &code, "").await?;
    host.wait_for_line("2").await?;

    drop(first);
    host.wait_for_line("1").await?;
    Ok(())
}

#[tokio::test]
async fn host_snapshots_reach_every_member() -> anyhow::Result<()> {
    let (addr, _ctx) = start_relay(default_context()).await?;
    let (mut host, code) = TestClient::create(addr, "").await?;
    let mut a = TestClient::join(addr, &code, "").await?;
    host.wait_for_line("1").await?;
    let mut b = TestClient::join(addr, &code, "").await?;
    host.wait_for_line("2").await?;

    host.send_line(
        r#"{"captureTimestamp":1000,"progressMs":5000,"paused":false,"trackURI":"spotify:track:X"}"#,
    )
    .await?;
    // Garbage from the host is ignored.
    host.send_line("hello").await?;
    host.send_line(
        r#"{"captureTimestamp":1500,"progressMs":5500,"paused":true,"trackURI":"spotify:track:X"}"#,
    )
    .await?;

    for member in [&mut a, &mut b] {
        let first: PlaybackSnapshot = decode_line(&member.expect_line().await?)?;
        assert_eq!(first.capture_timestamp, 1000);
        assert_eq!(first.progress_ms, 5000);
        assert!(!first.paused);
        assert_eq!(first.track_uri, "spotify:track:X");

        let second: PlaybackSnapshot = decode_line(&member.expect_line().await?)?;
        assert_eq!(second.capture_timestamp, 1500);
        assert!(second.paused);
    }
    Ok(())
}

#[tokio::test]
async fn host_disconnect_closes_party() -> anyhow::Result<()> {
    let (addr, ctx) = start_relay(default_context()).await?;
    let (mut host, code) = TestClient::create(addr, "").await?;
    let mut a = TestClient::join(addr, &code, "").await?;
    host.wait_for_line("1").await?;
    let mut b = TestClient::join(addr, &code, "").await?;
    host.wait_for_line("2").await?;

    drop(host);
    a.expect_eof().await?;
    b.expect_eof().await?;

    // Registry removal happens right after members are closed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(ctx.registry.is_empty());

    let mut late = TestClient::connect(addr).await?;
    late.send_line(&format!(r#"{{"create":false,"id":"{code}"}}"#))
        .await?;
    assert_eq!(late.expect_line().await?, "ERROR 400");
    Ok(())
}

#[tokio::test]
async fn rate_limited_connections_get_429() -> anyhow::Result<()> {
    let config = RelayConfig {
        rate_limit: Some(RateLimitConfig {
            conn_per_ip_per_sec: 1,
            burst_multiplier: 1,
        }),
        ..RelayConfig::default()
    };
    let ctx = RelayContext::new(config, std::sync::Arc::new(ClockSynchronizer::system()));
    let (addr, _ctx) = start_relay(ctx).await?;

    let (_host, _code) = TestClient::create(addr, "").await?;
    let mut rejected = TestClient::connect(addr).await?;
    assert_eq!(rejected.expect_line().await?, "ERROR 429");
    rejected.expect_eof().await?;
    Ok(())
}
