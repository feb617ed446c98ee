use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use partysync_proto::constants::DEFAULT_PORT;
use partysync_relayd::net::rate_limit::RateLimitConfig;
use partysync_relayd::{RelayConfig, RelayContext, run_server};
use partysync_sync::clock::DEFAULT_REFERENCE_HOST;
use partysync_sync::spotify::SpotifyActuatorFactory;
use partysync_sync::{ClockSynchronizer, SntpClock, SyncConfig};
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Listening-party relay server
#[derive(Parser, Debug)]
#[command(name = "partysync-relayd")]
#[command(about = "Keeps members' playback in step with a host", long_about = None)]
struct Args {
    /// TCP bind address
    #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    bind: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    /// Host sampling period in relay-driven mode
    #[arg(long, default_value_t = 500)]
    sample_interval_ms: u64,

    /// Per-member bound on delivering one snapshot
    #[arg(long, default_value_t = 2000)]
    member_call_timeout_ms: u64,

    /// Time a new connection has to send its initial request
    #[arg(long, default_value_t = 10_000)]
    negotiate_timeout_ms: u64,

    /// Drift tolerated before a member is re-seeked
    #[arg(long, default_value_t = 250)]
    drift_threshold_ms: u64,

    /// Grace window after a track change (0 disables)
    #[arg(long, default_value_t = 1500)]
    pause_guard_ms: u64,

    /// Control participants' players through the Spotify Web API when they
    /// send an access token
    #[arg(long)]
    remote_control: bool,

    /// Max new connections per IP per second (0 disables)
    #[arg(long, default_value_t = 10)]
    conn_per_ip_per_sec: u32,

    /// SNTP server used to align the relay's clock
    #[arg(long, default_value = DEFAULT_REFERENCE_HOST)]
    reference_host: String,

    /// Skip the startup SNTP query and use the local clock as-is
    #[arg(long)]
    skip_clock_sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let clock = Arc::new(ClockSynchronizer::system());
    if !args.skip_clock_sync {
        let offset = clock
            .estimate_offset(&SntpClock::default(), &args.reference_host)
            .await;
        info!(host = %args.reference_host, offset_ms = offset, "Clock aligned");
    }

    let config = RelayConfig {
        sample_interval: Duration::from_millis(args.sample_interval_ms),
        member_call_timeout: Duration::from_millis(args.member_call_timeout_ms),
        negotiate_timeout: Duration::from_millis(args.negotiate_timeout_ms),
        sync: SyncConfig {
            drift_threshold: Duration::from_millis(args.drift_threshold_ms),
            pause_guard: Duration::from_millis(args.pause_guard_ms),
        },
        rate_limit: (args.conn_per_ip_per_sec > 0).then(|| RateLimitConfig {
            conn_per_ip_per_sec: args.conn_per_ip_per_sec,
            ..RateLimitConfig::default()
        }),
    };

    let mut ctx = RelayContext::new(config, clock);
    if args.remote_control {
        ctx = ctx.with_factory(Arc::new(SpotifyActuatorFactory::default()));
    }

    info!("Log level: {}", args.log_level);
    let listener = TcpListener::bind(args.bind).await?;
    run_server(listener, Arc::new(ctx)).await
}
