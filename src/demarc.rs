//! Demarcation layer: the boundary between the switch and raw datagram I/O.
//!
//! The switch hands outbound datagrams to a [`Demarc`] and receives inbound
//! ones through [`Switch::on_remote_packet`](crate::switch::Switch::on_remote_packet).
//! [`UdpDemarc`] is the standard implementation: one blocking UDP socket per
//! bound port with a dedicated reader thread.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::packet::PROTO_MAX_PACKET_LENGTH;
use crate::path::LOCAL_SOCKET_ANY;
use crate::switch::Switch;

/// Errors from the UDP demarcation layer.
#[derive(Debug, Error)]
pub enum DemarcError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("no sockets bound")]
    NoSockets,
}

/// Outbound datagram transmission.
///
/// `local_socket` selects which bound socket transmits;
/// [`LOCAL_SOCKET_ANY`] lets the implementation pick. Returns false when the
/// datagram could not be handed to the network.
pub trait Demarc: Send + Sync {
    fn send(&self, local_socket: i64, remote: SocketAddr, data: &[u8]) -> bool;
}

struct BoundSocket {
    id: i64,
    socket: UdpSocket,
}

/// Blocking-UDP demarcation layer.
pub struct UdpDemarc {
    sockets: Vec<Arc<BoundSocket>>,
    by_id: HashMap<i64, usize>,
}

impl UdpDemarc {
    /// Bind one UDP socket per address. Socket IDs are assigned in order
    /// starting from 1.
    pub fn bind(addrs: &[SocketAddr]) -> Result<Self, DemarcError> {
        let mut sockets = Vec::new();
        let mut by_id = HashMap::new();
        for (i, addr) in addrs.iter().enumerate() {
            let socket = UdpSocket::bind(addr).map_err(|e| DemarcError::Bind {
                addr: *addr,
                source: e,
            })?;
            let id = (i + 1) as i64;
            info!(socket_id = id, addr = %addr, "Bound UDP socket");
            by_id.insert(id, sockets.len());
            sockets.push(Arc::new(BoundSocket { id, socket }));
        }
        if sockets.is_empty() {
            return Err(DemarcError::NoSockets);
        }
        Ok(Self { sockets, by_id })
    }

    /// The IDs of all bound sockets.
    pub fn socket_ids(&self) -> Vec<i64> {
        self.sockets.iter().map(|s| s.id).collect()
    }

    /// The local address a socket is bound to.
    pub fn local_addr(&self, socket_id: i64) -> Option<SocketAddr> {
        self.by_id
            .get(&socket_id)
            .and_then(|&i| self.sockets[i].socket.local_addr().ok())
    }

    /// Spawn one reader thread per socket, feeding the switch.
    ///
    /// Threads run until the process exits; the demarcation layer owns no
    /// shutdown protocol of its own.
    pub fn run(&self, switch: Arc<Switch>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for bound in &self.sockets {
            let bound = Arc::clone(bound);
            let switch = Arc::clone(&switch);
            let handle = std::thread::Builder::new()
                .name(format!("weft-udp-{}", bound.id))
                .spawn(move || {
                    let mut buf = [0u8; PROTO_MAX_PACKET_LENGTH];
                    loop {
                        match bound.socket.recv_from(&mut buf) {
                            Ok((len, from)) => {
                                switch.on_remote_packet(bound.id, from, &buf[..len]);
                            }
                            Err(e) => {
                                warn!(socket_id = bound.id, error = %e, "UDP receive error");
                            }
                        }
                    }
                })
                .expect("thread spawn");
            handles.push(handle);
        }
        handles
    }
}

impl Demarc for UdpDemarc {
    fn send(&self, local_socket: i64, remote: SocketAddr, data: &[u8]) -> bool {
        let bound = if local_socket == LOCAL_SOCKET_ANY {
            self.sockets.first()
        } else {
            self.by_id.get(&local_socket).map(|&i| &self.sockets[i])
        };
        let Some(bound) = bound else {
            debug!(socket_id = local_socket, "Send on unknown socket");
            return false;
        };
        match bound.socket.send_to(data, remote) {
            Ok(n) => n == data.len(),
            Err(e) => {
                debug!(remote = %remote, error = %e, "UDP send failed");
                false
            }
        }
    }
}
