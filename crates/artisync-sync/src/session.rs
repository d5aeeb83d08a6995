//! Per-session state threaded through the engines.
//!
//! Nothing here is global: the handler or the client loop owns one
//! [`Session`] value and lends it mutably to every send and receive
//! call.

use std::collections::HashSet;
use std::time::Instant;

use artisync_core::ArtifactName;

/// Protocol version this implementation announces.
pub const CLIENT_VERSION: u32 = 21000;
/// Numeric build date announced alongside the version.
pub const CLIENT_VERSION_DATE: u32 = 20260115;
/// Numeric build time announced alongside the version.
pub const CLIENT_VERSION_TIME: u32 = 93000;

/// Oldest peer version that can store SHA-3-256 names.
pub const MIN_SHA3_PEER_VERSION: u32 = 20000;
/// Oldest peer edition that tolerates a private `have` teaser when it is
/// not syncing private content.
pub const MIN_PRIVATE_TEASER_DATE: u32 = 20200413;

/// The two scratch sets scoped to one request/reply cycle.
///
/// `have` holds names the remote side has announced or that we have just
/// sent; `need` holds names requested and not yet satisfied, in either
/// direction. Both are torn down between cycles; they are never
/// persistent state.
#[derive(Debug, Default)]
pub struct EphemeralIndex {
    have: HashSet<ArtifactName>,
    need: HashSet<ArtifactName>,
}

impl EphemeralIndex {
    /// Record that the peer holds `name`. Idempotent; returns true when
    /// the name was not yet recorded.
    pub fn mark_have(&mut self, name: &ArtifactName) -> bool {
        self.have.insert(name.clone())
    }

    pub fn peer_has(&self, name: &ArtifactName) -> bool {
        self.have.contains(name)
    }

    /// Record an outstanding request for `name`.
    pub fn mark_need(&mut self, name: &ArtifactName) -> bool {
        self.need.insert(name.clone())
    }

    pub fn is_needed(&self, name: &ArtifactName) -> bool {
        self.need.contains(name)
    }

    pub fn clear(&mut self) {
        self.have.clear();
        self.need.clear();
    }
}

/// Per-cycle card and artifact counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub files_sent: u32,
    pub deltas_sent: u32,
    pub igots_sent: u32,
    pub priv_igots_sent: u32,
    pub gimmes_sent: u32,
    pub files_rcvd: u32,
    pub deltas_rcvd: u32,
    pub dangling_rcvd: u32,
}

impl Counters {
    /// Artifacts that arrived this cycle in any form.
    pub fn artifacts_rcvd(&self) -> u32 {
        self.files_rcvd + self.deltas_rcvd + self.dangling_rcvd
    }

    /// Artifacts queued for the wire this cycle.
    pub fn artifacts_sent(&self) -> u32 {
        self.files_sent + self.deltas_sent
    }
}

/// State for one side of a sync session.
#[derive(Debug)]
pub struct Session {
    pub index: EphemeralIndex,
    pub counters: Counters,
    /// Transfer private artifacts too. Requires the Private capability on
    /// the server side.
    pub sync_private: bool,
    /// Stop emitting artifact bodies once the outbound buffer reaches
    /// this size.
    pub mx_send: usize,
    /// Wall-clock deadline; past it, sends degrade to announcements.
    pub deadline: Option<Instant>,
    /// Have-sweep cursor for resync mode: the highest id still to be
    /// announced, 0 when off. Monotonically non-increasing.
    pub resync: u64,
    /// Peer's announced protocol version and edition date.
    pub peer_version: u32,
    pub peer_date: u32,
    /// A `private` modifier card has been seen and not yet consumed.
    pub pending_private: bool,
    /// Version from the peer's `clone` card, when this is a clone.
    pub clone_version: Option<u32>,
}

impl Session {
    pub fn new(mx_send: usize, deadline: Option<Instant>) -> Self {
        Self {
            index: EphemeralIndex::default(),
            counters: Counters::default(),
            sync_private: false,
            mx_send,
            deadline,
            resync: 0,
            peer_version: 0,
            peer_date: 0,
            pending_private: false,
            clone_version: None,
        }
    }

    /// Reset the per-cycle scratch state. Policy knobs and peer
    /// capabilities survive across cycles.
    pub fn begin_cycle(&mut self) {
        self.index.clear();
        self.counters = Counters::default();
        self.pending_private = false;
    }

    /// True once the outbound buffer or the clock says to stop sending
    /// bodies and fall back to `have` announcements.
    pub fn out_of_budget(&self, out: &[u8]) -> bool {
        if out.len() >= self.mx_send {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// Consume the pending `private` modifier.
    pub fn take_pending_private(&mut self) -> bool {
        std::mem::take(&mut self.pending_private)
    }

    /// Whether the peer accepts private `have` teasers.
    pub fn peer_accepts_private_teaser(&self) -> bool {
        self.peer_date >= MIN_PRIVATE_TEASER_DATE
    }

    /// Whether the peer can store SHA-3-256 names.
    pub fn peer_supports_sha3(&self) -> bool {
        self.peer_version >= MIN_SHA3_PEER_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisync_core::{hash_one_shot, HashAlgorithm};

    #[test]
    fn index_is_idempotent() {
        let mut index = EphemeralIndex::default();
        let name = hash_one_shot(b"x", HashAlgorithm::Sha1);
        assert!(index.mark_have(&name));
        assert!(!index.mark_have(&name));
        assert!(index.peer_has(&name));
        index.clear();
        assert!(!index.peer_has(&name));
    }

    #[test]
    fn pending_private_is_consumed_once() {
        let mut sess = Session::new(1024, None);
        sess.pending_private = true;
        assert!(sess.take_pending_private());
        assert!(!sess.take_pending_private());
    }

    #[test]
    fn budget_trips_on_buffer_size() {
        let sess = Session::new(8, None);
        assert!(!sess.out_of_budget(b"short"));
        assert!(sess.out_of_budget(b"well past it"));
    }
}
