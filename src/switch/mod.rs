//! The packet switch: all inbound and outbound dispatch.
//!
//! The switch ingests local Ethernet frames and remote datagrams, performs
//! fragmentation and reassembly, relays unaddressed traffic toward its
//! destination, parks traffic that is waiting on identity resolution, drives
//! NAT-traversal rendezvous, and fans out multicasts.
//!
//! ## Locking
//!
//! Each queue has its own mutex and no two queue locks are ever held at
//! once: work is swapped out under one lock, processed lock-free, and
//! survivors are pushed back. Topology and peer state have their own
//! interior synchronization, so the switch can be re-entered concurrently
//! from any number of I/O threads plus the timer thread.

mod decoder;
mod defrag;
mod inbound;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, trace, warn};

use crate::demarc::Demarc;
use crate::ethernet::{derive_broadcast_group, is_supported_ether_type, Mac, MulticastGroup};
use crate::identity::{Address, Identity};
use crate::multicast::{
    sign_multicast_frame, Multicaster, MULTICAST_PROPAGATION_BREADTH,
};
use crate::network::Network;
use crate::packet::{
    Fragment, Packet, Verb, MAX_PACKET_FRAGMENTS, MIN_FRAGMENT_LENGTH, PACKET_MAC_LENGTH,
    UDP_DEFAULT_PAYLOAD_MTU,
};
use crate::peer::Peer;
use crate::topology::Topology;
use crate::util::now_ms;

pub use decoder::IncomingPacket;
pub use defrag::DefragQueue;

/// Delay between Whois retries.
pub const WHOIS_RETRY_DELAY: i64 = 500;

/// Retries before an outstanding Whois is abandoned.
pub const MAX_WHOIS_RETRIES: u32 = 4;

/// Parked outbound traffic is dropped after this long.
pub const TRANSMIT_QUEUE_TIMEOUT: i64 = 5_000;

/// Parked inbound traffic is dropped after this long.
pub const RECEIVE_QUEUE_TIMEOUT: i64 = 5_000;

/// Incomplete fragment sets are purged after this long.
pub const FRAGMENTED_PACKET_RECEIVE_TIMEOUT: i64 = 1_000;

/// Minimum interval between rendezvous attempts for one peer pair.
pub const MIN_UNITE_INTERVAL: i64 = 30_000;

/// Floor on the delay returned by [`Switch::do_timer_tasks`].
pub const TIMER_TASK_MIN_DELAY: i64 = 10;

/// Ceiling on the delay returned by [`Switch::do_timer_tasks`].
pub const TIMER_TASK_MAX_DELAY: i64 = 60_000;

/// Whois payload subtype: query for an address.
pub(crate) const WHOIS_TYPE_QUERY: u8 = 0;
/// Whois payload subtype: identity response.
pub(crate) const WHOIS_TYPE_RESPONSE: u8 = 1;

/// Outbound packet parked until its destination peer becomes reachable.
struct TxQueueEntry {
    creation_time: i64,
    dest: Address,
    packet: Packet,
    encrypt: bool,
}

/// Scheduled NAT-traversal HELLO.
struct RendezvousEntry {
    fire_at: i64,
    local_socket: i64,
    address: SocketAddr,
}

/// An outstanding Whois for an unknown address.
struct WhoisRequest {
    last_sent: i64,
    retries: u32,
    peers_consulted: Vec<Address>,
}

/// The packet switching core.
pub struct Switch {
    identity: Arc<Identity>,
    topology: Arc<Topology>,
    demarc: Arc<dyn Demarc>,
    multicaster: Arc<Multicaster>,
    networks: RwLock<HashMap<u64, Arc<Network>>>,
    tx_queue: Mutex<Vec<TxQueueEntry>>,
    rx_queue: Mutex<Vec<IncomingPacket>>,
    defrag_queue: Mutex<DefragQueue>,
    rendezvous_queue: Mutex<HashMap<Address, RendezvousEntry>>,
    outstanding_whois: Mutex<HashMap<Address, WhoisRequest>>,
    last_unite_attempt: Mutex<HashMap<(Address, Address), i64>>,
}

impl Switch {
    /// Create a switch.
    pub fn new(
        identity: Arc<Identity>,
        topology: Arc<Topology>,
        demarc: Arc<dyn Demarc>,
        multicaster: Arc<Multicaster>,
    ) -> Self {
        Self {
            identity,
            topology,
            demarc,
            multicaster,
            networks: RwLock::new(HashMap::new()),
            tx_queue: Mutex::new(Vec::new()),
            rx_queue: Mutex::new(Vec::new()),
            defrag_queue: Mutex::new(DefragQueue::new()),
            rendezvous_queue: Mutex::new(HashMap::new()),
            outstanding_whois: Mutex::new(HashMap::new()),
            last_unite_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// The local node's overlay address.
    pub fn address(&self) -> Address {
        self.identity.address()
    }

    /// The local identity.
    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// The topology this switch routes with.
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// The multicaster consulted for propagation decisions.
    pub fn multicaster(&self) -> &Arc<Multicaster> {
        &self.multicaster
    }

    /// Join an overlay network.
    pub fn join_network(&self, network: Arc<Network>) {
        self.networks
            .write()
            .expect("switch networks lock")
            .insert(network.id(), network);
    }

    /// Leave an overlay network.
    pub fn leave_network(&self, network_id: u64) -> bool {
        self.networks
            .write()
            .expect("switch networks lock")
            .remove(&network_id)
            .is_some()
    }

    /// Look up a joined network.
    pub(crate) fn network(&self, network_id: u64) -> Option<Arc<Network>> {
        self.networks
            .read()
            .expect("switch networks lock")
            .get(&network_id)
            .cloned()
    }

    // === Local Ethernet egress ===

    /// Ingest a frame read from a network's tap.
    pub fn on_local_ethernet(
        &self,
        network: &Arc<Network>,
        from: Mac,
        to: Mac,
        ether_type: u16,
        frame: &[u8],
    ) {
        self.on_local_ethernet_at(network, from, to, ether_type, frame, now_ms());
    }

    fn on_local_ethernet_at(
        &self,
        network: &Arc<Network>,
        from: Mac,
        to: Mac,
        ether_type: u16,
        frame: &[u8],
        now: i64,
    ) {
        if from != network.tap().mac() {
            debug!(%from, %to, "Ignored tap frame: bridging is not supported");
            return;
        }

        if to == network.tap().mac() {
            // Frame addressed to ourselves; reflect it back for diagnostics.
            trace!("Reflecting self-addressed frame");
            network.tap().put(from, to, ether_type, frame);
            return;
        }

        if !is_supported_ether_type(ether_type) {
            debug!(%from, %to, ether_type, "Ignored tap frame: unsupported etherType");
            return;
        }

        if to.is_multicast() {
            let group = if to.is_broadcast() {
                derive_broadcast_group(ether_type, frame)
            } else {
                MulticastGroup::new(to, 0)
            };
            self.multicast_local_frame(network, from, group, ether_type, frame, now);
        } else if let Some(dest) = to.to_address() {
            if network.is_allowed(dest) {
                let mut packet = Packet::new(dest, self.address(), Verb::Frame);
                packet.append_u64(network.id());
                packet.append_u16(ether_type);
                packet.append_bytes(frame);
                packet.compress();
                self.send_at(packet, true, now);
            } else {
                trace!(%to, network = network.id(), "Dropped unicast: not a member");
            }
        } else {
            trace!(%to, "Dropped unicast: destination MAC is not on the overlay");
        }
    }

    /// Fan a locally originated multicast out to propagation peers.
    fn multicast_local_frame(
        &self,
        network: &Arc<Network>,
        from: Mac,
        group: MulticastGroup,
        ether_type: u16,
        frame: &[u8],
        now: i64,
    ) {
        let mut bloom = crate::bloom::MulticastBloom::new();
        let peers = self.multicaster.pick_next_propagation_peers(
            &self.topology,
            network.id(),
            group,
            self.address(),
            &mut bloom,
            MULTICAST_PROPAGATION_BREADTH,
            now,
        );
        if peers.is_empty() {
            trace!(%group, "Multicast with no propagation peers");
            return;
        }

        let signature =
            sign_multicast_frame(&self.identity, network.id(), from, group, ether_type, frame);
        let sig_bytes: &[u8] = signature.as_ref();

        let mut template = Packet::new(peers[0].address(), self.address(), Verb::MulticastFrame);
        template.append_u8(0); // flags
        template.append_u64(network.id());
        template.append_bytes(self.address().as_bytes());
        template.append_bytes(from.as_bytes());
        template.append_bytes(group.mac().as_bytes());
        template.append_u32(group.adi());
        template.append_bytes(bloom.as_bytes());
        template.append_u8(0); // propagation depth
        template.append_u16(ether_type);
        template.append_u16(frame.len() as u16);
        template.append_u16(sig_bytes.len() as u16);
        template.append_bytes(frame);
        template.append_bytes(sig_bytes);
        template.compress();

        // First copy goes out as-is; each further copy is re-addressed under
        // a fresh packet ID so it encrypts under its own IV.
        for (i, peer) in peers.iter().enumerate() {
            let mut copy = template.clone();
            if i > 0 {
                copy.new_packet_id();
                copy.set_destination(peer.address());
            }
            self.send_at(copy, true, now);
        }
    }

    // === Unicast send path ===

    /// Send a packet, parking it on the Tx queue if it cannot go out now.
    pub fn send(&self, packet: Packet, encrypt: bool) {
        self.send_at(packet, encrypt, now_ms());
    }

    fn send_at(&self, packet: Packet, encrypt: bool, now: i64) {
        if !self.try_send(&packet, encrypt, now) {
            let dest = packet.destination();
            trace!(%dest, "Parked packet awaiting peer");
            self.tx_queue
                .lock()
                .expect("switch tx lock")
                .push(TxQueueEntry {
                    creation_time: now,
                    dest,
                    packet,
                    encrypt,
                });
        }
    }

    /// Attempt to transmit now. False means: unknown peer (a Whois was
    /// issued), no route, or the demarcation layer refused a chunk.
    fn try_send(&self, packet: &Packet, encrypt: bool, now: i64) -> bool {
        let dest = packet.destination();
        let Some(peer) = self.topology.peer(dest, true) else {
            self.request_whois_at(dest, now);
            return false;
        };

        // Direct when the destination is a root or has a live direct path;
        // otherwise through the best root.
        let via = if self.topology.is_root_address(dest) || peer.has_active_direct_path(now) {
            Arc::clone(&peer)
        } else {
            match self.topology.root() {
                Some(root) => root,
                None => return false,
            }
        };
        let direct = Arc::ptr_eq(&via, &peer);

        let phys = via.best_direct_address(now).or_else(|| {
            via.paths()
                .iter()
                .max_by_key(|p| p.last_send().max(p.last_receive()))
                .map(|p| p.address())
        });
        let (mtu, trusted_path_id) = match phys {
            Some(addr) => self.topology.get_outbound_path_info(addr),
            None => (UDP_DEFAULT_PAYLOAD_MTU, 0),
        };

        let mut work = packet.clone();
        let armored_len = work.len() + PACKET_MAC_LENGTH;
        work.set_fragmented(armored_len > mtu);
        if direct && trusted_path_id != 0 {
            work.armor_trusted(trusted_path_id);
        } else {
            work.armor(peer.keys(), encrypt);
        }

        let data = work.data();
        let first_chunk = data.len().min(mtu);
        if !via.send(self.demarc.as_ref(), &data[..first_chunk], now) {
            return false;
        }
        if first_chunk == data.len() {
            return true;
        }

        // Fragment the remainder. The head is already on the wire; a failed
        // later fragment leaves the receiver's defrag timeout to clean up.
        let frag_chunk = mtu - MIN_FRAGMENT_LENGTH;
        let remaining = data.len() - first_chunk;
        let total = 1 + remaining.div_ceil(frag_chunk);
        if total > MAX_PACKET_FRAGMENTS as usize {
            warn!(len = data.len(), mtu, "Dropped packet: too large to fragment");
            return true;
        }
        let mut at = first_chunk;
        for index in 1..total {
            let end = (at + frag_chunk).min(data.len());
            let fragment = Fragment::new(
                work.packet_id(),
                dest,
                index as u8,
                total as u8,
                &data[at..end],
            );
            if !via.send(self.demarc.as_ref(), fragment.data(), now) {
                warn!(%dest, index, "Packet send failed on a later fragment");
                return false;
            }
            at = end;
        }
        true
    }

    // === HELLO ===

    fn build_hello(&self, dest: Address, now: i64) -> Packet {
        let mut packet = Packet::new(dest, self.address(), Verb::Hello);
        packet.append_u8(crate::packet::PROTO_VERSION);
        packet.append_u8(crate::VERSION_MAJOR);
        packet.append_u8(crate::VERSION_MINOR);
        packet.append_u16(crate::VERSION_REVISION);
        packet.append_u64(now as u64);
        let mut identity = Vec::new();
        self.identity.public().marshal(&mut identity);
        packet.append_bytes(&identity);
        packet
    }

    /// Introduce ourselves to an overlay address through normal routing.
    pub fn send_hello(&self, dest: Address) {
        let now = now_ms();
        let packet = self.build_hello(dest, now);
        if let Some(peer) = self.topology.peer(dest, false) {
            peer.hello_sent(now);
        }
        // HELLO carries our identity in the clear; it is authenticated but
        // never encrypted, since the receiver may not know us yet.
        self.send_at(packet, false, now);
    }

    /// Send a HELLO straight to a physical endpoint (rendezvous, pings).
    pub fn send_hello_direct(
        &self,
        peer: &Arc<Peer>,
        local_socket: i64,
        address: SocketAddr,
        now: i64,
    ) -> bool {
        let mut packet = self.build_hello(peer.address(), now);
        packet.armor(peer.keys(), false);
        let path = self.topology.path(local_socket, address);
        peer.learn_path(Arc::clone(&path));
        peer.hello_sent(now);
        if self.demarc.send(local_socket, address, packet.data()) {
            path.sent(now);
            true
        } else {
            false
        }
    }

    // === Rendezvous ===

    /// Encourage two peers to establish a direct link.
    ///
    /// Sends each a RENDEZVOUS naming the other and its apparent physical
    /// address. Debounced per unordered pair unless `force`.
    pub fn unite(&self, a: Address, b: Address, force: bool) -> bool {
        self.unite_at(a, b, force, now_ms())
    }

    fn unite_at(&self, a: Address, b: Address, force: bool, now: i64) -> bool {
        if a == b {
            return false;
        }
        let Some(peer_a) = self.topology.peer(a, false) else {
            return false;
        };
        let Some(peer_b) = self.topology.peer(b, false) else {
            return false;
        };
        let Some((b_at, a_at)) = peer_a.find_common_ground(&peer_b, now) else {
            return false;
        };

        // Canonical unordered key: both relays throttle the same pair the
        // same way regardless of packet direction.
        let key = if a <= b { (a, b) } else { (b, a) };
        {
            let mut attempts = self.last_unite_attempt.lock().expect("switch unite lock");
            if !force {
                if let Some(&last) = attempts.get(&key) {
                    if now - last < MIN_UNITE_INTERVAL {
                        return false;
                    }
                }
            }
            attempts.insert(key, now);
        }

        debug!(a = %a, b = %b, "Sending rendezvous pair");
        self.send_rendezvous(a, b, b_at, now);
        self.send_rendezvous(b, a, a_at, now);
        true
    }

    /// Tell `to` that `other` can be reached at `other_at`.
    fn send_rendezvous(&self, to: Address, other: Address, other_at: SocketAddr, now: i64) {
        let mut packet = Packet::new(to, self.address(), Verb::Rendezvous);
        packet.append_bytes(other.as_bytes());
        packet.append_u16(other_at.port());
        match other_at.ip() {
            IpAddr::V4(ip) => {
                packet.append_u8(4);
                packet.append_bytes(&ip.octets());
            }
            IpAddr::V6(ip) => {
                packet.append_u8(16);
                packet.append_bytes(&ip.octets());
            }
        }
        self.send_at(packet, true, now);
    }

    /// Schedule the rendezvous HELLO a RENDEZVOUS verb asked for.
    pub(crate) fn schedule_rendezvous(
        &self,
        with: Address,
        local_socket: i64,
        address: SocketAddr,
        now: i64,
    ) {
        self.rendezvous_queue
            .lock()
            .expect("switch rendezvous lock")
            .insert(
                with,
                RendezvousEntry {
                    fire_at: now,
                    local_socket,
                    address,
                },
            );
    }

    // === Whois ===

    /// Register an outstanding Whois for `addr` and consult the best root.
    pub fn request_whois(&self, addr: Address) {
        self.request_whois_at(addr, now_ms());
    }

    pub(crate) fn request_whois_at(&self, addr: Address, now: i64) {
        {
            let mut outstanding = self.outstanding_whois.lock().expect("switch whois lock");
            let entry = outstanding.entry(addr).or_insert(WhoisRequest {
                last_sent: now,
                retries: 0,
                peers_consulted: Vec::new(),
            });
            entry.last_sent = now;
            entry.retries = 0;
        }
        self.send_whois_request(addr, &[], now);
    }

    /// Issue one Whois query to the best root not yet consulted.
    fn send_whois_request(&self, addr: Address, consulted: &[Address], now: i64) -> Option<Address> {
        let root = self.topology.best_root_excluding(consulted)?;
        trace!(%addr, root = %root.address(), "Whois");
        let mut packet = Packet::new(root.address(), self.address(), Verb::Whois);
        packet.append_u8(WHOIS_TYPE_QUERY);
        packet.append_bytes(addr.as_bytes());
        self.try_send(&packet, true, now);
        Some(root.address())
    }

    /// A peer just became available: cancel its Whois, retry parked inbound
    /// decodes, and drain parked outbound traffic bound for it.
    pub fn do_anything_waiting_for_peer(&self, peer: &Arc<Peer>) {
        self.do_anything_waiting_for_peer_at(peer, now_ms());
    }

    fn do_anything_waiting_for_peer_at(&self, peer: &Arc<Peer>, now: i64) {
        self.outstanding_whois
            .lock()
            .expect("switch whois lock")
            .remove(&peer.address());

        // Retry every parked decode, not just this peer's: identity arrival
        // may unblock more than one of them.
        let parked = std::mem::take(&mut *self.rx_queue.lock().expect("switch rx lock"));
        let mut still_parked = Vec::new();
        for incoming in parked {
            if !incoming.try_decode(self, now) {
                still_parked.push(incoming);
            }
        }
        self.rx_queue
            .lock()
            .expect("switch rx lock")
            .extend(still_parked);

        // Drain this peer's Tx backlog in FIFO order.
        let mine: Vec<TxQueueEntry> = {
            let mut tx = self.tx_queue.lock().expect("switch tx lock");
            let (mine, rest): (Vec<_>, Vec<_>) = tx
                .drain(..)
                .partition(|entry| entry.dest == peer.address());
            *tx = rest;
            mine
        };
        for entry in mine {
            if !self.try_send(&entry.packet, entry.encrypt, now) {
                self.tx_queue.lock().expect("switch tx lock").push(entry);
            }
        }
    }

    // === Multicast announcements ===

    /// Announce multicast group memberships to every directly connected
    /// peer allowed to hear them, bin-packing 18-byte records under the MTU.
    pub fn announce_multicast_groups(&self, memberships: &[(Arc<Network>, Vec<MulticastGroup>)]) {
        let now = now_ms();
        let mut peers = Vec::new();
        self.topology.get_all_peers(&mut peers);
        peers.retain(|p| p.has_active_direct_path(now));

        for peer in &peers {
            let mut packet = Packet::new(peer.address(), self.address(), Verb::MulticastLike);
            for (network, groups) in memberships {
                let allowed = network.is_allowed(peer.address())
                    || self.topology.is_root_address(peer.address());
                if !allowed {
                    continue;
                }
                for group in groups {
                    if packet.len() + 18 + PACKET_MAC_LENGTH > UDP_DEFAULT_PAYLOAD_MTU {
                        self.send_at(packet, true, now);
                        packet = Packet::new(peer.address(), self.address(), Verb::MulticastLike);
                    }
                    packet.append_u64(network.id());
                    packet.append_bytes(group.mac().as_bytes());
                    packet.append_u32(group.adi());
                }
            }
            if !packet.is_empty() {
                self.send_at(packet, true, now);
            }
        }
    }

    // === Timers ===

    /// Run queue maintenance and return the delay until the next deadline.
    ///
    /// Never returns less than [`TIMER_TASK_MIN_DELAY`] milliseconds.
    pub fn do_timer_tasks(&self) -> i64 {
        self.do_timer_tasks_at(now_ms())
    }

    fn do_timer_tasks_at(&self, now: i64) -> i64 {
        let mut next_delay = TIMER_TASK_MAX_DELAY;

        // Rendezvous: fire due HELLOs.
        let due: Vec<(Address, RendezvousEntry)> = {
            let mut queue = self.rendezvous_queue.lock().expect("switch rendezvous lock");
            let fired: Vec<Address> = queue
                .iter()
                .filter(|(_, e)| now >= e.fire_at)
                .map(|(addr, _)| *addr)
                .collect();
            for (_, entry) in queue.iter() {
                if entry.fire_at > now {
                    next_delay = next_delay.min(entry.fire_at - now);
                }
            }
            fired
                .into_iter()
                .filter_map(|addr| queue.remove_entry(&addr))
                .collect()
        };
        for (with, entry) in due {
            if let Some(peer) = self.topology.peer(with, false) {
                debug!(peer = %with, addr = %entry.address, "Sending rendezvous HELLO");
                self.send_hello_direct(&peer, entry.local_socket, entry.address, now);
            }
        }

        // Whois: retry or abandon.
        let retries: Vec<(Address, Vec<Address>)> = {
            let mut outstanding = self.outstanding_whois.lock().expect("switch whois lock");
            let mut to_send = Vec::new();
            outstanding.retain(|addr, request| {
                let since = now - request.last_sent;
                if since >= WHOIS_RETRY_DELAY {
                    if request.retries >= MAX_WHOIS_RETRIES {
                        debug!(%addr, "Whois timed out");
                        return false;
                    }
                    request.last_sent = now;
                    request.retries += 1;
                    to_send.push((*addr, request.peers_consulted.clone()));
                    next_delay = next_delay.min(WHOIS_RETRY_DELAY);
                } else {
                    next_delay = next_delay.min(WHOIS_RETRY_DELAY - since);
                }
                true
            });
            to_send
        };
        for (addr, consulted) in retries {
            let consulted_root = self.send_whois_request(addr, &consulted, now);
            if let Some(root) = consulted_root {
                let mut outstanding = self.outstanding_whois.lock().expect("switch whois lock");
                if let Some(request) = outstanding.get_mut(&addr) {
                    request.peers_consulted.push(root);
                }
            }
        }

        // Tx queue: retry everything, drop the expired.
        let entries = std::mem::take(&mut *self.tx_queue.lock().expect("switch tx lock"));
        let mut keep = Vec::new();
        for entry in entries {
            if self.try_send(&entry.packet, entry.encrypt, now) {
                continue;
            }
            let age = now - entry.creation_time;
            if age > TRANSMIT_QUEUE_TIMEOUT {
                debug!(dest = %entry.dest, "Parked packet timed out");
            } else {
                next_delay = next_delay.min(TRANSMIT_QUEUE_TIMEOUT - age);
                keep.push(entry);
            }
        }
        self.tx_queue.lock().expect("switch tx lock").extend(keep);

        // Rx queue: drop stale parked decodes.
        {
            let mut rx = self.rx_queue.lock().expect("switch rx lock");
            rx.retain(|incoming| {
                let age = now - incoming.receive_time();
                if age > RECEIVE_QUEUE_TIMEOUT {
                    debug!(src = %incoming.source(), "Parked inbound packet timed out");
                    false
                } else {
                    next_delay = next_delay.min(RECEIVE_QUEUE_TIMEOUT - age);
                    true
                }
            });
        }

        // Defrag: purge incomplete fragment sets.
        if let Some(deadline) = self
            .defrag_queue
            .lock()
            .expect("switch defrag lock")
            .expire(now, FRAGMENTED_PACKET_RECEIVE_TIMEOUT)
        {
            next_delay = next_delay.min(deadline);
        }

        self.multicaster.clean(now);

        next_delay.clamp(TIMER_TASK_MIN_DELAY, TIMER_TASK_MAX_DELAY)
    }

    // === Introspection (used by maintenance and tests) ===

    /// Number of packets parked on the Tx queue.
    pub fn tx_queue_len(&self) -> usize {
        self.tx_queue.lock().expect("switch tx lock").len()
    }

    /// Number of packets parked on the Rx queue.
    pub fn rx_queue_len(&self) -> usize {
        self.rx_queue.lock().expect("switch rx lock").len()
    }

    /// Number of incomplete fragment sets.
    pub fn defrag_queue_len(&self) -> usize {
        self.defrag_queue.lock().expect("switch defrag lock").len()
    }

    /// Number of outstanding Whois requests.
    pub fn outstanding_whois_len(&self) -> usize {
        self.outstanding_whois.lock().expect("switch whois lock").len()
    }

    /// Park an inbound packet whose decode is blocked on identity
    /// resolution.
    pub(crate) fn park_rx(&self, incoming: IncomingPacket) {
        self.rx_queue.lock().expect("switch rx lock").push(incoming);
    }

    /// Decode an inbound packet, parking it when blocked.
    ///
    /// The blocking identity can arrive between the failed decode and the
    /// park (its Whois may resolve synchronously); re-check afterwards so
    /// the packet is never stranded waiting on a peer that already exists.
    pub(crate) fn decode_or_park(&self, incoming: IncomingPacket, now: i64) {
        if incoming.try_decode(self, now) {
            return;
        }
        let blocked = incoming.blocked_on();
        self.park_rx(incoming);
        if let Some(addr) = blocked {
            if let Some(peer) = self.topology.peer(addr, false) {
                self.do_anything_waiting_for_peer_at(&peer, now);
            }
        }
    }
}

impl std::fmt::Debug for Switch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switch")
            .field("address", &self.address())
            .field("tx_parked", &self.tx_queue_len())
            .field("rx_parked", &self.rx_queue_len())
            .field("defrag_pending", &self.defrag_queue_len())
            .finish()
    }
}
