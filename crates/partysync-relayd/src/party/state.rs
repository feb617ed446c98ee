//! Party registry and membership.
//!
//! A [`Party`] is shared between its host task, its member tasks and the
//! registry. Membership lives behind a `parking_lot::Mutex` that is never
//! held across an await; callers iterate over [`Party::members`], a cloned
//! snapshot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use partysync_proto::constants::{PARTY_CODE_ALPHABET, PARTY_CODE_LEN};
use partysync_proto::{PartyCode, PlaybackSnapshot};
use partysync_sync::{MemberState, PlaybackSampler};
use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::net::ConnId;
use crate::net::outbound::OutboundTx;

/// A joined participant as seen by the relay.
pub struct Member {
    conn_id: ConnId,
    peer: SocketAddr,
    outbound: OutboundTx,
    /// Present in relay-driven mode.
    sampler: Option<PlaybackSampler>,
    state: Mutex<MemberState>,
    cancel: CancellationToken,
}

impl Member {
    pub fn new(
        conn_id: ConnId,
        peer: SocketAddr,
        outbound: OutboundTx,
        sampler: Option<PlaybackSampler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn_id,
            peer,
            outbound,
            sampler,
            state: Mutex::new(MemberState::default()),
            cancel,
        }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn outbound(&self) -> &OutboundTx {
        &self.outbound
    }

    pub fn sampler(&self) -> Option<&PlaybackSampler> {
        self.sampler.as_ref()
    }

    pub fn state(&self) -> MemberState {
        self.state.lock().clone()
    }

    pub fn set_state(&self, state: MemberState) {
        *self.state.lock() = state;
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Last state the host reported.
#[derive(Default)]
struct HostPlayback {
    last_track_uri: Option<String>,
    paused: Option<bool>,
}

/// How a host snapshot differs from the one before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackChange {
    pub track_changed: bool,
    /// `Some(paused)` when the pause state flipped. The first snapshot only
    /// establishes it.
    pub pause_changed: Option<bool>,
}

#[derive(Default)]
struct Members {
    closed: bool,
    by_conn: HashMap<ConnId, Arc<Member>>,
}

pub struct Party {
    code: PartyCode,
    host_conn_id: ConnId,
    members: Mutex<Members>,
    count: watch::Sender<usize>,
    host_playback: Mutex<HostPlayback>,
    cancel: CancellationToken,
}

impl Party {
    fn new(code: PartyCode, host_conn_id: ConnId) -> Self {
        Self {
            code,
            host_conn_id,
            members: Mutex::new(Members::default()),
            count: watch::channel(0).0,
            host_playback: Mutex::new(HostPlayback::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn code(&self) -> &PartyCode {
        &self.code
    }

    pub fn host_conn_id(&self) -> ConnId {
        self.host_conn_id
    }

    /// Cancelled when the party is torn down. Member tokens are its children.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queue `reply` to the member and add it. Returns the new member count,
    /// or `None` if the party is closed or the member's queue is unusable; in
    /// that case nothing was queued.
    ///
    /// Both happen under the membership lock, so `reply` precedes any
    /// snapshot line and a closed party never sends it.
    pub fn add_member(&self, member: Arc<Member>, reply: Bytes) -> Option<usize> {
        let mut members = self.members.lock();
        if members.closed || member.outbound.try_send(reply).is_err() {
            return None;
        }
        members.by_conn.insert(member.conn_id, member);
        let n = members.by_conn.len();
        self.count.send_replace(n);
        Some(n)
    }

    /// Remove and cancel one member. `None` if it was already gone.
    pub fn remove_member(&self, conn_id: ConnId) -> Option<Arc<Member>> {
        let mut members = self.members.lock();
        let member = members.by_conn.remove(&conn_id)?;
        self.count.send_replace(members.by_conn.len());
        member.cancel.cancel();
        Some(member)
    }

    /// Remove and cancel every listed member still present. Returns how
    /// many were removed.
    pub fn evict(&self, conn_ids: &[ConnId]) -> usize {
        if conn_ids.is_empty() {
            return 0;
        }
        let mut members = self.members.lock();
        let mut evicted = 0;
        for conn_id in conn_ids {
            if let Some(member) = members.by_conn.remove(conn_id) {
                member.cancel.cancel();
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.count.send_replace(members.by_conn.len());
        }
        evicted
    }

    /// Snapshot of the current members.
    pub fn members(&self) -> Vec<Arc<Member>> {
        self.members.lock().by_conn.values().cloned().collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().by_conn.len()
    }

    /// Receiver that sees every membership change.
    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Record the host's latest snapshot and report what changed.
    pub fn record_host_playback(&self, snapshot: &PlaybackSnapshot) -> PlaybackChange {
        let mut playback = self.host_playback.lock();
        let track_changed =
            playback.last_track_uri.as_deref() != Some(snapshot.track_uri.as_str());
        if track_changed {
            playback.last_track_uri = Some(snapshot.track_uri.clone());
        }
        let pause_changed = match playback.paused.replace(snapshot.paused) {
            Some(was) if was != snapshot.paused => Some(snapshot.paused),
            _ => None,
        };
        PlaybackChange {
            track_changed,
            pause_changed,
        }
    }

    /// Refuse further joins, cancel every member and return them.
    pub fn close(&self) -> Vec<Arc<Member>> {
        let drained: Vec<_> = {
            let mut members = self.members.lock();
            members.closed = true;
            members.by_conn.drain().map(|(_, m)| m).collect()
        };
        self.cancel.cancel();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.members.lock().closed
    }
}

/// Live parties by code.
///
/// Codes are unique among live parties; a code is reusable once its party is
/// removed.
#[derive(Default)]
pub struct PartyRegistry {
    parties: DashMap<PartyCode, Arc<Party>>,
}

impl PartyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new party hosted by `host_conn_id` under a fresh code.
    pub fn create_party(&self, host_conn_id: ConnId) -> Arc<Party> {
        loop {
            let Ok(code) = PartyCode::parse(&random_code()) else {
                continue;
            };
            if let Entry::Vacant(slot) = self.parties.entry(code.clone()) {
                let party = Arc::new(Party::new(code, host_conn_id));
                slot.insert(party.clone());
                return party;
            }
        }
    }

    pub fn get(&self, code: &PartyCode) -> Option<Arc<Party>> {
        self.parties.get(code).map(|p| p.value().clone())
    }

    pub fn remove(&self, code: &PartyCode) -> Option<Arc<Party>> {
        self.parties.remove(code).map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }
}

fn random_code() -> String {
    let mut rng = rand::rng();
    (0..PARTY_CODE_LEN)
        .map(|_| PARTY_CODE_ALPHABET[rng.random_range(0..PARTY_CODE_ALPHABET.len())] as char)
        .collect()
}
