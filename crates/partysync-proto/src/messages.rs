use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{PARTY_CODE_ALPHABET, PARTY_CODE_LEN};
use crate::error::ProtoError;

/// Opaque identifier of a live party.
///
/// Codes are matched case-insensitively; the canonical form is upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartyCode(String);

impl PartyCode {
    /// Parse a code typed by a user or received on the wire.
    pub fn parse(raw: &str) -> Result<Self, ProtoError> {
        let code = raw.trim().to_ascii_uppercase();
        let valid = code.len() == PARTY_CODE_LEN
            && code.bytes().all(|b| PARTY_CODE_ALPHABET.contains(&b));
        if !valid {
            return Err(ProtoError::InvalidPartyCode(raw.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First line sent by every client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitialRequest {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub id: Option<String>,
    /// Token the relay may use to drive this participant's player directly.
    /// Empty when the participant reconciles locally.
    #[serde(rename = "accessToken", default)]
    pub access_token: String,
}

impl InitialRequest {
    pub fn create(access_token: impl Into<String>) -> Self {
        Self {
            create: true,
            id: None,
            access_token: access_token.into(),
        }
    }

    pub fn join(code: &PartyCode, access_token: impl Into<String>) -> Self {
        Self {
            create: false,
            id: Some(code.to_string()),
            access_token: access_token.into(),
        }
    }
}

/// Host playback state as of `capture_timestamp`.
///
/// `capture_timestamp` is in reference-clock milliseconds and marks the
/// sampling instant, not the send time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    #[serde(rename = "captureTimestamp")]
    pub capture_timestamp: i64,
    #[serde(rename = "progressMs")]
    pub progress_ms: i64,
    pub paused: bool,
    #[serde(rename = "trackURI")]
    pub track_uri: String,
}

impl PlaybackSnapshot {
    /// Host progress extrapolated to `at_ms` (reference clock).
    ///
    /// A paused host does not advance. Saturates on out-of-range input.
    pub fn progress_at(&self, at_ms: i64) -> i64 {
        if self.paused {
            self.progress_ms
        } else {
            self.progress_ms
                .saturating_add(at_ms.saturating_sub(self.capture_timestamp))
        }
    }
}
