//! Player-control seam.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ActuatorError;

/// What the player reports about its current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    pub progress_ms: i64,
    pub playing: bool,
    pub track_uri: String,
    /// Timestamp reported by the player service. Not trusted for timing;
    /// kept for diagnostics only.
    pub reported_timestamp: Option<i64>,
}

/// Issues playback intents to an external player.
///
/// Every call is a network round trip and may fail; callers decide what a
/// failure means (skip a tick, evict a member).
#[async_trait]
pub trait ControlActuator: Send + Sync {
    /// `None` when the participant has no active playback session.
    async fn current_playback(&self) -> Result<Option<PlaybackState>, ActuatorError>;

    /// Start `track_uri` at `position_ms` and resume playback.
    async fn play_at(&self, track_uri: &str, position_ms: i64) -> Result<(), ActuatorError>;

    async fn pause(&self) -> Result<(), ActuatorError>;

    async fn seek_to(&self, position_ms: i64) -> Result<(), ActuatorError>;
}

/// Binds an actuator to a participant's access token.
pub trait ActuatorFactory: Send + Sync {
    /// `None` when the token cannot drive a player (e.g. empty).
    fn for_token(&self, access_token: &str) -> Option<Arc<dyn ControlActuator>>;
}
