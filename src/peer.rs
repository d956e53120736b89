//! Peer: a remote node we can exchange packets with.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::demarc::Demarc;
use crate::identity::{Address, Identity, IdentityHash, PairKeys, PeerIdentity};
use crate::path::Path;

/// Latency value meaning "never measured".
pub const LATENCY_UNKNOWN: u32 = 0xffff_ffff;

/// Minimum interval between HELLOs to one peer (reply rate limit).
pub const MIN_HELLO_INTERVAL: i64 = 2_500;

/// A long-lived record for one remote node.
///
/// Owned by the topology and shared (via `Arc`) with the switch queues and
/// I/O threads; all mutable state is interior and individually synchronized,
/// so a `Peer` is safe to use while holding no switch or topology lock.
pub struct Peer {
    identity: PeerIdentity,
    keys: PairKeys,
    paths: Mutex<Vec<Arc<Path>>>,
    latency: AtomicU32,
    last_receive: AtomicI64,
    last_hello_sent: AtomicI64,
    last_hello_received: AtomicI64,
    /// Set when state changed since the last cache write-back.
    dirty: AtomicBool,
}

impl Peer {
    /// Create a peer record, deriving the shared pair keys.
    pub fn new(local: &Identity, identity: PeerIdentity) -> Self {
        let keys = local.agree(&identity);
        Self {
            identity,
            keys,
            paths: Mutex::new(Vec::new()),
            latency: AtomicU32::new(LATENCY_UNKNOWN),
            last_receive: AtomicI64::new(0),
            last_hello_sent: AtomicI64::new(0),
            last_hello_received: AtomicI64::new(0),
            dirty: AtomicBool::new(true),
        }
    }

    /// This peer's identity.
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// This peer's overlay address.
    pub fn address(&self) -> Address {
        self.identity.address()
    }

    /// This peer's identity hash.
    pub fn identity_hash(&self) -> &IdentityHash {
        self.identity.hash()
    }

    /// Symmetric keys shared with this peer.
    pub fn keys(&self) -> &PairKeys {
        &self.keys
    }

    /// Probe value for short inbound-probe packets.
    pub fn probe(&self) -> u64 {
        self.keys.probe()
    }

    // === Paths ===

    /// Adopt a canonical path, if not already known.
    ///
    /// Liveness is stamped separately (see [`Peer::received`]); merely
    /// knowing a path does not make it active.
    pub fn learn_path(&self, path: Arc<Path>) {
        let mut paths = self.paths.lock().expect("peer paths lock");
        if !paths.iter().any(|p| Arc::ptr_eq(p, &path)) {
            trace!(peer = %self.address(), path = %path, "Learned path");
            paths.push(path);
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    /// Snapshot of this peer's known paths.
    pub fn paths(&self) -> Vec<Arc<Path>> {
        self.paths.lock().expect("peer paths lock").clone()
    }

    /// Drop paths that went quiet (periodic maintenance). Paths never used
    /// at all — configured bootstrap endpoints — are kept.
    pub fn prune_dead_paths(&self, now: i64) {
        self.paths
            .lock()
            .expect("peer paths lock")
            .retain(|p| p.recently_active(now) || (p.last_send() == 0 && p.last_receive() == 0));
    }

    /// The most recently receiving live direct path, if any.
    pub fn best_direct_path(&self, now: i64) -> Option<Arc<Path>> {
        self.paths
            .lock()
            .expect("peer paths lock")
            .iter()
            .filter(|p| p.alive(now))
            .max_by_key(|p| p.last_receive())
            .cloned()
    }

    /// True if this peer can be reached without a relay right now.
    pub fn has_active_direct_path(&self, now: i64) -> bool {
        self.best_direct_path(now).is_some()
    }

    /// The remote address of the best direct path, for rendezvous.
    pub fn best_direct_address(&self, now: i64) -> Option<SocketAddr> {
        self.best_direct_path(now).map(|p| p.address())
    }

    /// Mutual apparent addresses for NAT traversal.
    ///
    /// Returns `(other's apparent address, this peer's apparent address)` —
    /// the pair a rendezvous broker sends to each side — or None unless both
    /// peers currently have an active direct path.
    pub fn find_common_ground(&self, other: &Peer, now: i64) -> Option<(SocketAddr, SocketAddr)> {
        let other_addr = other.best_direct_address(now)?;
        let self_addr = self.best_direct_address(now)?;
        Some((other_addr, self_addr))
    }

    // === Transmission ===

    /// Send a datagram to this peer over its best available path.
    ///
    /// Falls back to the most recently used path when nothing is currently
    /// alive (the datagram may itself revive the path). Returns false when no
    /// path is known or the demarcation layer refuses the datagram.
    pub fn send(&self, demarc: &dyn Demarc, data: &[u8], now: i64) -> bool {
        let path = self.best_direct_path(now).or_else(|| {
            self.paths
                .lock()
                .expect("peer paths lock")
                .iter()
                .max_by_key(|p| p.last_send().max(p.last_receive()))
                .cloned()
        });
        let Some(path) = path else {
            return false;
        };
        if demarc.send(path.local_socket(), path.address(), data) {
            path.sent(now);
            true
        } else {
            false
        }
    }

    // === Liveness and latency ===

    /// Record receipt of an authenticated packet from this peer.
    pub fn received(&self, path: &Arc<Path>, now: i64) {
        path.received(now);
        self.last_receive.store(now, Ordering::Relaxed);
    }

    /// Timestamp of the last authenticated packet from this peer.
    pub fn last_receive(&self) -> i64 {
        self.last_receive.load(Ordering::Relaxed)
    }

    /// Record that we sent this peer a HELLO.
    pub fn hello_sent(&self, now: i64) {
        self.last_hello_sent.store(now, Ordering::Relaxed);
    }

    /// Record a HELLO from this peer, sampling latency if one of ours was
    /// outstanding. Returns true if courtesy demands we answer (rate-limited
    /// so two nodes don't volley HELLOs forever).
    pub fn hello_received(&self, now: i64) -> bool {
        let sent = self.last_hello_sent.load(Ordering::Relaxed);
        let prev = self.last_hello_received.swap(now, Ordering::Relaxed);
        if sent > 0 && prev < sent {
            let rtt = (now - sent).clamp(1, i64::from(u16::MAX)) as u32;
            self.latency.store(rtt, Ordering::Relaxed);
            self.dirty.store(true, Ordering::Relaxed);
        }
        now - sent >= MIN_HELLO_INTERVAL
    }

    /// Apparent round-trip latency in milliseconds ([`LATENCY_UNKNOWN`] if
    /// never measured). Root ranking sorts ascending on this.
    pub fn latency(&self) -> u32 {
        self.latency.load(Ordering::Relaxed)
    }

    // === Cache write-back ===

    /// True if this record changed since the last cache write-back.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Clear the dirty flag after a successful write-back.
    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Relaxed);
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("address", &self.address())
            .field("paths", &self.paths.lock().expect("peer paths lock").len())
            .finish()
    }
}
