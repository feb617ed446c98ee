//! Per-IP connection rate limiting at accept time.

use std::net::IpAddr;
use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type SimpleRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Tracked IPs before stale entries are dropped.
const MAX_TRACKED_IPS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Max new connections per IP per second (0 = disabled).
    pub conn_per_ip_per_sec: u32,
    /// How many seconds worth of connections may arrive in one burst.
    pub burst_multiplier: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            conn_per_ip_per_sec: 10,
            burst_multiplier: 3,
        }
    }
}

impl RateLimitConfig {
    fn quota(&self) -> Option<Quota> {
        let rate = NonZeroU32::new(self.conn_per_ip_per_sec)?;
        let burst = NonZeroU32::new(self.conn_per_ip_per_sec.saturating_mul(self.burst_multiplier))
            .unwrap_or(rate);
        Some(Quota::per_second(rate).allow_burst(burst))
    }
}

/// Tracks connection attempts per IP and rejects those over quota.
pub struct IpRateLimiter {
    limiters: DashMap<IpAddr, SimpleRateLimiter>,
    quota: Option<Quota>,
}

impl IpRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limiters: DashMap::new(),
            quota: config.quota(),
        }
    }

    /// `true` if a connection from `ip` is allowed.
    pub fn check(&self, ip: IpAddr) -> bool {
        let Some(quota) = self.quota else {
            return true;
        };
        if self.limiters.len() > MAX_TRACKED_IPS {
            self.cleanup_stale(MAX_TRACKED_IPS / 2);
        }
        let limiter = self
            .limiters
            .entry(ip)
            .or_insert_with(|| RateLimiter::direct(quota));
        limiter.check().is_ok()
    }

    /// Shrink the map to `max_entries`. DashMap has no insertion order, so
    /// arbitrary entries go.
    fn cleanup_stale(&self, max_entries: usize) {
        let excess = self.limiters.len().saturating_sub(max_entries);
        let keys: Vec<_> = self
            .limiters
            .iter()
            .take(excess)
            .map(|e| *e.key())
            .collect();
        for key in keys {
            self.limiters.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn allows_burst_then_rejects() {
        let limiter = IpRateLimiter::new(&RateLimitConfig {
            conn_per_ip_per_sec: 2,
            burst_multiplier: 1,
        });
        assert!(limiter.check(LOCAL));
        assert!(limiter.check(LOCAL));
        assert!(!limiter.check(LOCAL));
    }

    #[test]
    fn ips_are_tracked_separately() {
        let limiter = IpRateLimiter::new(&RateLimitConfig {
            conn_per_ip_per_sec: 1,
            burst_multiplier: 1,
        });
        assert!(limiter.check(LOCAL));
        assert!(!limiter.check(LOCAL));
        assert!(limiter.check(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }

    #[test]
    fn zero_rate_disables() {
        let limiter = IpRateLimiter::new(&RateLimitConfig {
            conn_per_ip_per_sec: 0,
            burst_multiplier: 3,
        });
        for _ in 0..1000 {
            assert!(limiter.check(LOCAL));
        }
    }
}
