//! Playback synchronization client library.
//!
//! # Architecture
//!
//! - [`clock`]: reference-clock offset estimation and request bracketing
//! - [`actuator`]: the player-control seam ([`ControlActuator`])
//! - [`sampler`]: turns actuator readings into timestamped snapshots
//! - [`reconcile`]: decides the corrective command for a member
//! - [`client`]: host and member sessions against a relay
//! - [`spotify`]: Web API implementation of the actuator seam
//! - [`testing`]: deterministic doubles for clocks and actuators

pub mod actuator;
pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod sampler;
pub mod spotify;
pub mod testing;

pub use actuator::{ActuatorFactory, ControlActuator, PlaybackState};
pub use auth::{AuthProvider, StaticToken};
pub use client::{HostSession, MemberSession, create_party, join_party};
pub use clock::{Bracketed, ClockEstimate, ClockSynchronizer, ReferenceClock, SntpClock};
pub use config::SyncConfig;
pub use error::{ActuatorError, AuthError, ClockError, PartyError};
pub use partysync_proto::{PartyCode, PlaybackSnapshot};
pub use reconcile::{Correction, MemberState, Reconciliation, ReconciliationEngine};
pub use sampler::{LocalObservation, PlaybackSampler};
