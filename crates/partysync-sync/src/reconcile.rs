//! Member-side reconciliation.
//!
//! Given the latest host snapshot and a fresh reading of the member's own
//! player, decide which single corrective command (if any) brings the member
//! back in line. Decision order:
//!
//! 1. Host paused: pause the member. Position is left alone.
//! 2. Track differs from the member's last known track: play the host's track
//!    at the projected position and open the pause guard.
//! 3. Pause guard open: the host is treated as paused.
//! 4. Member was paused (or is idle): resume at the projected position.
//!    Member playing but drifted past the threshold: seek to the projected
//!    position. Otherwise nothing.
//!
//! Projected position is `progress + (now - capture) + one_way_latency`,
//! clamped at zero.

use partysync_proto::PlaybackSnapshot;
use tracing::{debug, trace};

use crate::actuator::ControlActuator;
use crate::config::SyncConfig;
use crate::error::ActuatorError;
use crate::sampler::{LocalObservation, PlaybackSampler};

/// What the engine remembers about one member between snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberState {
    pub last_track_uri: Option<String>,
    pub paused: bool,
    /// Capture timestamp of the newest snapshot applied so far.
    pub last_applied_capture: Option<i64>,
    /// Reference time until which the host is treated as paused.
    pub guard_until: Option<i64>,
}

/// A single corrective command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    None,
    Pause,
    PlayAt { track_uri: String, position_ms: i64 },
    Seek { position_ms: i64 },
}

impl Correction {
    pub fn is_none(&self) -> bool {
        matches!(self, Correction::None)
    }

    /// Issue the command. `Correction::None` makes no call.
    pub async fn apply(&self, actuator: &dyn ControlActuator) -> Result<(), ActuatorError> {
        match self {
            Correction::None => Ok(()),
            Correction::Pause => actuator.pause().await,
            Correction::PlayAt {
                track_uri,
                position_ms,
            } => actuator.play_at(track_uri, *position_ms).await,
            Correction::Seek { position_ms } => actuator.seek_to(*position_ms).await,
        }
    }
}

/// Outcome of one reconciliation step.
///
/// `next_state` should only be committed once `correction` was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub correction: Correction,
    pub next_state: MemberState,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine {
    config: SyncConfig,
}

impl ReconciliationEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// `true` if `snapshot` is older than one already applied.
    pub fn is_stale(snapshot: &PlaybackSnapshot, state: &MemberState) -> bool {
        state
            .last_applied_capture
            .is_some_and(|last| snapshot.capture_timestamp < last)
    }

    /// Host position projected to when a command issued now takes effect.
    pub fn projected_position(snapshot: &PlaybackSnapshot, obs: &LocalObservation) -> i64 {
        snapshot
            .progress_at(obs.now_ms)
            .saturating_add(obs.one_way_latency_ms)
            .max(0)
    }

    pub fn reconcile(
        &self,
        snapshot: &PlaybackSnapshot,
        state: &MemberState,
        obs: &LocalObservation,
    ) -> Reconciliation {
        let mut next = state.clone();

        if Self::is_stale(snapshot, state) {
            trace!(
                capture = snapshot.capture_timestamp,
                "Ignoring snapshot older than the last applied one"
            );
            return Reconciliation {
                correction: Correction::None,
                next_state: next,
            };
        }
        next.last_applied_capture = Some(snapshot.capture_timestamp);

        let guard_open = state.guard_until.is_some_and(|until| obs.now_ms < until);
        if !guard_open {
            next.guard_until = None;
        }
        let live = obs.playback.as_ref();
        let member_playing = live.is_some_and(|p| p.playing);

        if snapshot.paused {
            let correction = pause_unless_idle(state, member_playing);
            next.paused = true;
            return Reconciliation {
                correction,
                next_state: next,
            };
        }

        let projected = Self::projected_position(snapshot, obs);

        let known_track_differs =
            state.last_track_uri.as_deref() != Some(snapshot.track_uri.as_str());
        let live_track_differs =
            !guard_open && live.is_some_and(|p| p.track_uri != snapshot.track_uri);
        if known_track_differs || live_track_differs {
            debug!(
                track = %snapshot.track_uri,
                position_ms = projected,
                "Track change, repositioning member"
            );
            next.last_track_uri = Some(snapshot.track_uri.clone());
            next.paused = false;
            let guard_ms = self.config.pause_guard_ms();
            next.guard_until = (guard_ms > 0).then_some(obs.now_ms.saturating_add(guard_ms));
            return Reconciliation {
                correction: Correction::PlayAt {
                    track_uri: snapshot.track_uri.clone(),
                    position_ms: projected,
                },
                next_state: next,
            };
        }

        if guard_open {
            let correction = pause_unless_idle(state, member_playing);
            next.paused = true;
            return Reconciliation {
                correction,
                next_state: next,
            };
        }

        let correction = match live {
            Some(live) if !state.paused && live.playing => {
                let drift = live.progress_ms.abs_diff(snapshot.progress_at(obs.now_ms));
                if drift > self.config.drift_threshold_ms().unsigned_abs() {
                    debug!(drift_ms = drift, position_ms = projected, "Drift past threshold");
                    Correction::Seek {
                        position_ms: projected,
                    }
                } else {
                    Correction::None
                }
            }
            // Paused or idle: a seek would not resume playback.
            _ => Correction::PlayAt {
                track_uri: snapshot.track_uri.clone(),
                position_ms: projected,
            },
        };
        next.paused = false;
        Reconciliation {
            correction,
            next_state: next,
        }
    }

    /// Observe the member's player, reconcile and apply the correction.
    ///
    /// `state` is only updated when every call succeeded.
    pub async fn drive(
        &self,
        sampler: &PlaybackSampler,
        state: &mut MemberState,
        snapshot: &PlaybackSnapshot,
    ) -> Result<Correction, ActuatorError> {
        if Self::is_stale(snapshot, state) {
            return Ok(Correction::None);
        }
        let obs = sampler.observe().await?;
        let Reconciliation {
            correction,
            next_state,
        } = self.reconcile(snapshot, state, &obs);
        correction.apply(sampler.actuator().as_ref()).await?;
        *state = next_state;
        Ok(correction)
    }
}

fn pause_unless_idle(state: &MemberState, member_playing: bool) -> Correction {
    if state.paused && !member_playing {
        Correction::None
    } else {
        Correction::Pause
    }
}
