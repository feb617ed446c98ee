//! Deterministic doubles for clocks and actuators.
//!
//! Used by this crate's tests and by the relay's integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::actuator::{ActuatorFactory, ControlActuator, PlaybackState};
use crate::clock::{ReferenceClock, TimeSource};
use crate::error::{ActuatorError, ClockError};

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Reference clock that answers with a fixed offset, or always fails.
pub struct FixedReferenceClock {
    offset: Option<i64>,
}

impl FixedReferenceClock {
    pub fn new(offset_ms: i64) -> Self {
        Self {
            offset: Some(offset_ms),
        }
    }

    pub fn failing() -> Self {
        Self { offset: None }
    }
}

#[async_trait]
impl ReferenceClock for FixedReferenceClock {
    async fn offset_from(&self, _host: &str) -> Result<i64, ClockError> {
        self.offset.ok_or(ClockError::Timeout)
    }
}

/// One recorded actuator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorCall {
    CurrentPlayback,
    PlayAt { track_uri: String, position_ms: i64 },
    Pause,
    SeekTo { position_ms: i64 },
}

impl ActuatorCall {
    pub fn is_correction(&self) -> bool {
        !matches!(self, ActuatorCall::CurrentPlayback)
    }
}

/// Actuator that records every call and simulates a player.
///
/// Corrective calls update the simulated state so that a follow-up
/// `current_playback` reflects them. When a [`ManualTimeSource`] is attached,
/// each `current_playback` advances it by `rtt_ms` to model a round trip.
pub struct RecordingActuator {
    calls: Mutex<Vec<ActuatorCall>>,
    state: Mutex<Option<PlaybackState>>,
    time: Option<Arc<ManualTimeSource>>,
    rtt_ms: i64,
    fail_reads: AtomicBool,
    fail_corrections: AtomicBool,
}

impl Default for RecordingActuator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RecordingActuator {
    pub fn new(state: Option<PlaybackState>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(state),
            time: None,
            rtt_ms: 0,
            fail_reads: AtomicBool::new(false),
            fail_corrections: AtomicBool::new(false),
        }
    }

    /// Advance `time` by `rtt_ms` on every playback read.
    pub fn with_round_trip(mut self, time: Arc<ManualTimeSource>, rtt_ms: i64) -> Self {
        self.time = Some(time);
        self.rtt_ms = rtt_ms;
        self
    }

    pub fn playing(track_uri: &str, progress_ms: i64) -> Self {
        Self::new(Some(PlaybackState {
            progress_ms,
            playing: true,
            track_uri: track_uri.to_string(),
            reported_timestamp: None,
        }))
    }

    pub fn set_state(&self, state: Option<PlaybackState>) {
        *self.state.lock() = state;
    }

    pub fn state(&self) -> Option<PlaybackState> {
        self.state.lock().clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_corrections(&self, fail: bool) {
        self.fail_corrections.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.calls.lock().clone()
    }

    /// Recorded calls other than playback reads.
    pub fn corrections(&self) -> Vec<ActuatorCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.is_correction())
            .cloned()
            .collect()
    }

    fn record(&self, call: ActuatorCall) -> Result<(), ActuatorError> {
        let correction = call.is_correction();
        self.calls.lock().push(call);
        if correction && self.fail_corrections.load(Ordering::SeqCst) {
            return Err(ActuatorError::Status(502));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlActuator for RecordingActuator {
    async fn current_playback(&self) -> Result<Option<PlaybackState>, ActuatorError> {
        self.calls.lock().push(ActuatorCall::CurrentPlayback);
        if let Some(time) = &self.time {
            time.advance(self.rtt_ms);
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ActuatorError::Transport("simulated read failure".into()));
        }
        Ok(self.state.lock().clone())
    }

    async fn play_at(&self, track_uri: &str, position_ms: i64) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::PlayAt {
            track_uri: track_uri.to_string(),
            position_ms,
        })?;
        *self.state.lock() = Some(PlaybackState {
            progress_ms: position_ms,
            playing: true,
            track_uri: track_uri.to_string(),
            reported_timestamp: None,
        });
        Ok(())
    }

    async fn pause(&self) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::Pause)?;
        if let Some(state) = self.state.lock().as_mut() {
            state.playing = false;
        }
        Ok(())
    }

    async fn seek_to(&self, position_ms: i64) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::SeekTo { position_ms })?;
        if let Some(state) = self.state.lock().as_mut() {
            state.progress_ms = position_ms;
        }
        Ok(())
    }
}

/// Factory handing out pre-registered actuators by token.
#[derive(Default)]
pub struct RecordingFactory {
    actuators: Mutex<HashMap<String, Arc<RecordingActuator>>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: &str, actuator: Arc<RecordingActuator>) {
        self.actuators.lock().insert(token.to_string(), actuator);
    }
}

impl ActuatorFactory for RecordingFactory {
    fn for_token(&self, access_token: &str) -> Option<Arc<dyn ControlActuator>> {
        self.actuators
            .lock()
            .get(access_token)
            .map(|a| a.clone() as Arc<dyn ControlActuator>)
    }
}
