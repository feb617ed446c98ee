//! Parties: registry, membership, and the per-role connection loops.

pub mod broadcast;
pub mod host;
pub mod member;
pub mod state;
