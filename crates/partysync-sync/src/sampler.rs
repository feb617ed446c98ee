//! Timestamped readings of a participant's player.

use std::sync::Arc;

use partysync_proto::PlaybackSnapshot;

use crate::actuator::{ControlActuator, PlaybackState};
use crate::clock::ClockSynchronizer;
use crate::error::ActuatorError;

/// A member's own player as seen at `now_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalObservation {
    /// Reference-clock time of the reading (bracket midpoint).
    pub now_ms: i64,
    pub one_way_latency_ms: i64,
    /// `None` when nothing is playing on the member's device.
    pub playback: Option<PlaybackState>,
}

/// Reads a player through the clock synchronizer.
#[derive(Clone)]
pub struct PlaybackSampler {
    actuator: Arc<dyn ControlActuator>,
    clock: Arc<ClockSynchronizer>,
}

impl PlaybackSampler {
    pub fn new(actuator: Arc<dyn ControlActuator>, clock: Arc<ClockSynchronizer>) -> Self {
        Self { actuator, clock }
    }

    pub fn actuator(&self) -> &Arc<dyn ControlActuator> {
        &self.actuator
    }

    pub fn clock(&self) -> &Arc<ClockSynchronizer> {
        &self.clock
    }

    /// Snapshot of the player, or `None` if no session is active.
    ///
    /// The capture time is the bracket midpoint; the timestamp reported by
    /// the player service is ignored.
    pub async fn sample(&self) -> Result<Option<PlaybackSnapshot>, ActuatorError> {
        let bracketed = self.clock.bracket(self.actuator.current_playback()).await;
        let Some(state) = bracketed.result? else {
            return Ok(None);
        };
        Ok(Some(PlaybackSnapshot {
            capture_timestamp: bracketed.capture_timestamp,
            progress_ms: state.progress_ms,
            paused: !state.playing,
            track_uri: state.track_uri,
        }))
    }

    /// Reading used on the member side of reconciliation.
    pub async fn observe(&self) -> Result<LocalObservation, ActuatorError> {
        let bracketed = self.clock.bracket(self.actuator.current_playback()).await;
        Ok(LocalObservation {
            now_ms: bracketed.capture_timestamp,
            one_way_latency_ms: bracketed.one_way_latency_ms,
            playback: bracketed.result?,
        })
    }
}
