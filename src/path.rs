//! Physical path: a (local socket, remote address) pair.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};

/// A path with no traffic for this long is no longer considered alive.
pub const PATH_ACTIVITY_TIMEOUT: i64 = 45_000;

/// Local socket wildcard: let the demarcation layer pick any bound socket.
pub const LOCAL_SOCKET_ANY: i64 = -1;

/// A physical transmission path to some remote node.
///
/// Paths are canonicalized by the topology: one live instance exists per
/// (local socket, remote address) pair, shared by every peer using it.
/// Liveness state is interior and atomic so paths can be stamped from any
/// I/O thread without locks.
pub struct Path {
    local_socket: i64,
    address: SocketAddr,
    last_send: AtomicI64,
    last_receive: AtomicI64,
}

impl Path {
    /// Create a new path. Prefer [`Topology::path`](crate::topology::Topology::path),
    /// which canonicalizes.
    pub fn new(local_socket: i64, address: SocketAddr) -> Self {
        Self {
            local_socket,
            address,
            last_send: AtomicI64::new(0),
            last_receive: AtomicI64::new(0),
        }
    }

    /// Demarcation-layer socket ID on our side.
    pub fn local_socket(&self) -> i64 {
        self.local_socket
    }

    /// Remote socket address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Record an outbound datagram on this path.
    pub fn sent(&self, now: i64) {
        self.last_send.store(now, Ordering::Relaxed);
    }

    /// Record an inbound datagram on this path.
    pub fn received(&self, now: i64) {
        self.last_receive.store(now, Ordering::Relaxed);
    }

    /// Timestamp of the last outbound datagram (0 = never).
    pub fn last_send(&self) -> i64 {
        self.last_send.load(Ordering::Relaxed)
    }

    /// Timestamp of the last inbound datagram (0 = never).
    pub fn last_receive(&self) -> i64 {
        self.last_receive.load(Ordering::Relaxed)
    }

    /// True if traffic has been received recently enough to trust the path.
    pub fn alive(&self, now: i64) -> bool {
        let lr = self.last_receive.load(Ordering::Relaxed);
        lr > 0 && now - lr < PATH_ACTIVITY_TIMEOUT
    }

    /// True if this path has seen any activity in either direction recently.
    pub fn recently_active(&self, now: i64) -> bool {
        let stamp = self
            .last_send
            .load(Ordering::Relaxed)
            .max(self.last_receive.load(Ordering::Relaxed));
        stamp > 0 && now - stamp < PATH_ACTIVITY_TIMEOUT
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("local_socket", &self.local_socket)
            .field("address", &self.address)
            .finish()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_socket, self.address)
    }
}
