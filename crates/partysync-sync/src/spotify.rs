//! Spotify Web API player endpoints as a [`ControlActuator`].
//!
//! `ureq` is blocking, so every request runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use ureq::Agent;

use crate::actuator::{ActuatorFactory, ControlActuator, PlaybackState};
use crate::auth::{AuthProvider, StaticToken};
use crate::error::ActuatorError;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, Deserialize)]
struct CurrentPlayback {
    timestamp: Option<i64>,
    progress_ms: Option<i64>,
    #[serde(default)]
    is_playing: bool,
    item: Option<PlaybackItem>,
}

#[derive(Debug, Deserialize)]
struct PlaybackItem {
    uri: String,
}

impl CurrentPlayback {
    /// A session without an item (ad, podcast gap) counts as inactive.
    fn into_state(self) -> Option<PlaybackState> {
        let item = self.item?;
        Some(PlaybackState {
            progress_ms: self.progress_ms.unwrap_or(0),
            playing: self.is_playing,
            track_uri: item.uri,
            reported_timestamp: self.timestamp,
        })
    }
}

fn status_error(status: u16) -> ActuatorError {
    match status {
        401 => ActuatorError::Unauthorized,
        429 => ActuatorError::RateLimited,
        other => ActuatorError::Status(other),
    }
}

pub struct SpotifyActuator {
    agent: Agent,
    auth: Arc<dyn AuthProvider>,
    api_base: String,
}

impl SpotifyActuator {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self::with_api_base(auth, DEFAULT_API_BASE)
    }

    pub fn with_api_base(auth: Arc<dyn AuthProvider>, api_base: impl Into<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(5)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            auth,
            api_base: api_base.into(),
        }
    }

    /// Run a blocking request off the async runtime and classify its status.
    ///
    /// A 401 triggers a token refresh; the call itself is not retried.
    async fn request<T, F>(&self, what: &'static str, f: F) -> Result<T, ActuatorError>
    where
        T: Send + 'static,
        F: FnOnce(&Agent, &str, &str) -> Result<(u16, Option<T>), ureq::Error> + Send + 'static,
    {
        let agent = self.agent.clone();
        let base = self.api_base.clone();
        let bearer = format!("Bearer {}", self.auth.access_token());

        let joined = tokio::task::spawn_blocking(move || f(&agent, &base, &bearer))
            .await
            .map_err(|e| ActuatorError::Internal(e.to_string()))?;
        let (status, value) = joined.map_err(|e| match e {
            ureq::Error::Json(e) => ActuatorError::Malformed(e.to_string()),
            other => ActuatorError::Transport(other.to_string()),
        })?;

        if status == 401 {
            match self.auth.refresh() {
                Ok(_) => debug!(what, "Access token refreshed after 401"),
                Err(e) => warn!(what, error = %e, "Access token rejected and refresh failed"),
            }
        }
        if !(200..300).contains(&status) {
            return Err(status_error(status));
        }
        value.ok_or(ActuatorError::Malformed(what.to_string()))
    }
}

#[async_trait]
impl ControlActuator for SpotifyActuator {
    async fn current_playback(&self) -> Result<Option<PlaybackState>, ActuatorError> {
        self.request("current playback", |agent, base, bearer| {
            let mut resp = agent
                .get(&format!("{base}/me/player"))
                .header("Authorization", bearer)
                .call()?;
            let status = resp.status().as_u16();
            if status == 204 {
                return Ok((status, Some(None)));
            }
            if status != 200 {
                return Ok((status, None));
            }
            let body: CurrentPlayback = resp.body_mut().read_json()?;
            Ok((status, Some(body.into_state())))
        })
        .await
    }

    async fn play_at(&self, track_uri: &str, position_ms: i64) -> Result<(), ActuatorError> {
        let body = json!({ "uris": [track_uri], "position_ms": position_ms });
        self.request("play", move |agent, base, bearer| {
            let resp = agent
                .put(&format!("{base}/me/player/play"))
                .header("Authorization", bearer)
                .send_json(&body)?;
            Ok((resp.status().as_u16(), Some(())))
        })
        .await
    }

    async fn pause(&self) -> Result<(), ActuatorError> {
        self.request("pause", |agent, base, bearer| {
            let resp = agent
                .put(&format!("{base}/me/player/pause"))
                .header("Authorization", bearer)
                .send_empty()?;
            Ok((resp.status().as_u16(), Some(())))
        })
        .await
    }

    async fn seek_to(&self, position_ms: i64) -> Result<(), ActuatorError> {
        let position = position_ms.max(0).to_string();
        self.request("seek", move |agent, base, bearer| {
            let resp = agent
                .put(&format!("{base}/me/player/seek"))
                .query("position_ms", &position)
                .header("Authorization", bearer)
                .send_empty()?;
            Ok((resp.status().as_u16(), Some(())))
        })
        .await
    }
}

/// Binds a [`SpotifyActuator`] to each participant's token.
pub struct SpotifyActuatorFactory {
    api_base: String,
}

impl Default for SpotifyActuatorFactory {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl SpotifyActuatorFactory {
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
        }
    }
}

impl ActuatorFactory for SpotifyActuatorFactory {
    fn for_token(&self, access_token: &str) -> Option<Arc<dyn ControlActuator>> {
        if access_token.trim().is_empty() {
            return None;
        }
        let auth = Arc::new(StaticToken::new(access_token));
        Some(Arc::new(SpotifyActuator::with_api_base(
            auth,
            self.api_base.clone(),
        )))
    }
}
