//! Relay server: groups connections into parties and forwards the host's
//! playback snapshots to its members.
//!
//! Each accepted connection gets its own task (see [`net::tcp`]). The first
//! line negotiates a role ([`session`]); hosts then drive the fan-out loop and
//! members are held open until they leave ([`party`]).

use std::sync::Arc;
use std::time::Duration;

use partysync_sync::{
    ActuatorFactory, ClockSynchronizer, ControlActuator, ReconciliationEngine, SyncConfig,
};
use tokio::net::TcpListener;
use tracing::info;

pub mod net;
pub mod party;
pub mod session;

use crate::net::rate_limit::RateLimitConfig;
use crate::party::state::PartyRegistry;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host sampling period in relay-driven mode.
    pub sample_interval: Duration,
    /// Upper bound on delivering one snapshot to one member.
    pub member_call_timeout: Duration,
    /// How long a new connection may take to send its initial request.
    pub negotiate_timeout: Duration,
    pub sync: SyncConfig,
    /// `None` disables accept-time rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            member_call_timeout: Duration::from_secs(2),
            negotiate_timeout: Duration::from_secs(10),
            sync: SyncConfig::default(),
            rate_limit: None,
        }
    }
}

/// Everything a connection task needs. Shared by all connections.
pub struct RelayContext {
    pub config: RelayConfig,
    pub registry: PartyRegistry,
    pub engine: ReconciliationEngine,
    pub clock: Arc<ClockSynchronizer>,
    factory: Option<Arc<dyn ActuatorFactory>>,
}

impl RelayContext {
    pub fn new(config: RelayConfig, clock: Arc<ClockSynchronizer>) -> Self {
        Self {
            engine: ReconciliationEngine::new(config.sync),
            config,
            registry: PartyRegistry::new(),
            clock,
            factory: None,
        }
    }

    /// Enable relay-driven mode for participants that send an access token.
    pub fn with_factory(mut self, factory: Arc<dyn ActuatorFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Actuator for a participant's token, if relay-driven mode applies.
    pub fn actuator_for(&self, access_token: &str) -> Option<Arc<dyn ControlActuator>> {
        if access_token.is_empty() {
            return None;
        }
        self.factory.as_ref()?.for_token(access_token)
    }
}

/// Serve connections from `listener` until it fails.
pub async fn run_server(listener: TcpListener, ctx: Arc<RelayContext>) -> anyhow::Result<()> {
    info!(
        addr = %listener.local_addr()?,
        relay_driven = ctx.factory.is_some(),
        "Relay listening"
    );
    net::tcp::run_tcp_listener_with_listener(listener, ctx).await
}
