//! Reference-clock offset estimation and request bracketing.
//!
//! Two participants only agree on "when" a snapshot was taken if both map
//! their local clocks onto a shared reference. The offset is estimated once
//! per connection with an SNTP query; latency to the actuator is measured on
//! every call by bracketing it with two reference timestamps.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::net::{UdpSocket, lookup_host};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::ClockError;

/// Default SNTP server used for offset estimation.
pub const DEFAULT_REFERENCE_HOST: &str = "pool.ntp.org:123";

/// Source of local wall-clock time in unix milliseconds.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Offset between local time and the reference clock, plus the one-way
/// latency measured by the query that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockEstimate {
    pub offset_ms: i64,
    pub one_way_latency_ms: i64,
}

/// Result of a bracketed call.
#[derive(Debug, Clone)]
pub struct Bracketed<T> {
    pub result: T,
    /// Midpoint of the call in reference-clock milliseconds.
    pub capture_timestamp: i64,
    /// Half the measured round trip.
    pub one_way_latency_ms: i64,
    pub offset_ms: i64,
}

impl<T> Bracketed<T> {
    pub fn estimate(&self) -> ClockEstimate {
        ClockEstimate {
            offset_ms: self.offset_ms,
            one_way_latency_ms: self.one_way_latency_ms,
        }
    }
}

/// A shared time reference reachable over the network.
#[async_trait]
pub trait ReferenceClock: Send + Sync {
    /// Milliseconds to add to local time to obtain reference time.
    async fn offset_from(&self, host: &str) -> Result<i64, ClockError>;
}

/// Maps local time onto the reference clock.
pub struct ClockSynchronizer {
    source: Arc<dyn TimeSource>,
    offset_ms: AtomicI64,
}

impl ClockSynchronizer {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Synchronizer over the system clock with a zero offset.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemTimeSource))
    }

    /// Query `reference` once and adopt the measured offset.
    ///
    /// Best effort: any failure leaves the offset at zero.
    pub async fn estimate_offset(&self, reference: &dyn ReferenceClock, host: &str) -> i64 {
        let offset = match reference.offset_from(host).await {
            Ok(offset) => {
                debug!(host, offset_ms = offset, "Reference clock offset estimated");
                offset
            }
            Err(e) => {
                warn!(host, error = %e, "Reference clock query failed, assuming zero offset");
                0
            }
        };
        self.offset_ms.store(offset, Ordering::Relaxed);
        offset
    }

    pub fn set_offset_ms(&self, offset_ms: i64) {
        self.offset_ms.store(offset_ms, Ordering::Relaxed);
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Current reference-clock time in milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.source.now_ms() + self.offset_ms()
    }

    /// Run `call`, timestamping it on both sides.
    ///
    /// The midpoint stands in for the instant the remote side observed the
    /// request, since the remote's own timestamp cannot be trusted.
    pub async fn bracket<F>(&self, call: F) -> Bracketed<F::Output>
    where
        F: Future,
    {
        let before = self.now_ms();
        let result = call.await;
        let after = self.now_ms();
        let half_rtt = (after - before).max(0) / 2;
        Bracketed {
            result,
            capture_timestamp: before + half_rtt,
            one_way_latency_ms: half_rtt,
            offset_ms: self.offset_ms(),
        }
    }
}

/// Seconds between the NTP epoch (1900) and the unix epoch (1970).
const NTP_UNIX_DELTA_SECS: i64 = 2_208_988_800;
const SNTP_PACKET_LEN: usize = 48;

/// Single-shot SNTPv3 client.
pub struct SntpClock {
    source: Arc<dyn TimeSource>,
    timeout: Duration,
}

impl Default for SntpClock {
    fn default() -> Self {
        Self::new(Arc::new(SystemTimeSource), Duration::from_secs(2))
    }
}

impl SntpClock {
    pub fn new(source: Arc<dyn TimeSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }
}

#[async_trait]
impl ReferenceClock for SntpClock {
    async fn offset_from(&self, host: &str) -> Result<i64, ClockError> {
        let addr = lookup_host(host)
            .await?
            .next()
            .ok_or_else(|| ClockError::Unresolved(host.to_string()))?;
        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(addr).await?;

        let mut request = [0u8; SNTP_PACKET_LEN];
        // LI = 0, VN = 3, Mode = 3 (client).
        request[0] = 0x1B;

        let t0 = self.source.now_ms();
        socket.send(&request).await?;
        let mut reply = [0u8; SNTP_PACKET_LEN];
        let n = timeout(self.timeout, socket.recv(&mut reply))
            .await
            .map_err(|_| ClockError::Timeout)??;
        let t3 = self.source.now_ms();

        parse_sntp_reply(&reply[..n], t0, t3)
    }
}

/// Compute the clock offset from an SNTP reply.
///
/// `t0` and `t3` are local send and receive times in unix milliseconds.
pub fn parse_sntp_reply(reply: &[u8], t0: i64, t3: i64) -> Result<i64, ClockError> {
    if reply.len() < SNTP_PACKET_LEN {
        return Err(ClockError::Malformed("short packet"));
    }
    let mode = reply[0] & 0x07;
    if mode != 4 && mode != 5 {
        return Err(ClockError::Malformed("not a server reply"));
    }
    if reply[1] == 0 {
        return Err(ClockError::Malformed("kiss-o'-death"));
    }
    let t1 = ntp_timestamp_to_unix_ms(&reply[32..40]);
    let t2 = ntp_timestamp_to_unix_ms(&reply[40..48]);
    if t2 <= 0 {
        return Err(ClockError::Malformed("missing transmit timestamp"));
    }
    Ok(((t1 - t0) + (t2 - t3)) / 2)
}

fn ntp_timestamp_to_unix_ms(raw: &[u8]) -> i64 {
    let secs = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64;
    let frac = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]) as i64;
    (secs - NTP_UNIX_DELTA_SECS) * 1000 + ((frac * 1000) >> 32)
}
