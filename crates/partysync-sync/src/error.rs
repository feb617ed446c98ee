//! Error types for the sync client.

use thiserror::Error;

/// A player-control call failed.
#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("access token rejected")]
    Unauthorized,

    #[error("rate limited by player service")]
    RateLimited,

    #[error("player service returned status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed player response: {0}")]
    Malformed(String),

    #[error("actuator task failed: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("reference host {0:?} did not resolve")]
    Unresolved(String),

    #[error("reference clock timed out")]
    Timeout,

    #[error("malformed reference reply: {0}")]
    Malformed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token refresh not supported by this provider")]
    RefreshUnsupported,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Failure talking to the relay.
#[derive(Error, Debug)]
pub enum PartyError {
    #[error("relay rejected request: {0}")]
    Rejected(String),

    #[error("relay answered with code {got}, expected {expected}")]
    CodeMismatch { expected: String, got: String },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("timed out waiting for relay")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] partysync_proto::ProtoError),

    #[error("line error: {0}")]
    Lines(#[from] tokio_util::codec::LinesCodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
