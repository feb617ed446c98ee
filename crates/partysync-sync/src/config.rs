use std::time::Duration;

/// Tunables for the reconciliation engine.
///
/// Neither value is fixed by any invariant; both are deployment choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Steady-state drift tolerated before a member is re-seeked.
    pub drift_threshold: Duration,
    /// After a track change the host is treated as paused for this long so
    /// members can load the track. Zero disables the guard.
    pub pause_guard: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_threshold: Duration::from_millis(250),
            pause_guard: Duration::from_millis(1500),
        }
    }
}

impl SyncConfig {
    pub fn drift_threshold_ms(&self) -> i64 {
        i64::try_from(self.drift_threshold.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn pause_guard_ms(&self) -> i64 {
        i64::try_from(self.pause_guard.as_millis()).unwrap_or(i64::MAX)
    }
}
