//! Connection plumbing: accept loop, per-connection writer, rate limiting.

pub mod outbound;
pub mod rate_limit;
pub mod tcp;

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique connection identifier assigned by the server.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}
