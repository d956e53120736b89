//! Inbound packet decoding and protocol verb handling.
//!
//! An [`IncomingPacket`] is a received (or reassembled) packet head plus its
//! arrival metadata. Decoding may block on identity resolution — the source
//! or a multicast originator we have never heard of — in which case the
//! packet parks on the switch's Rx queue and is retried when a Whois
//! resolves or a peer arrives.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::bloom::MulticastBloom;
use crate::ethernet::{is_supported_ether_type, Mac, MulticastGroup};
use crate::identity::{Address, PeerIdentity, IDENTITY_MARSHAL_SIZE};
use crate::multicast::{verify_multicast_frame, MULTICAST_PROPAGATION_BREADTH, MULTICAST_PROPAGATION_DEPTH};
use crate::packet::{Cipher, Packet, Verb, PACKET_HEADER_LENGTH, PACKET_MAC_LENGTH};
use crate::peer::Peer;

use super::{Switch, WHOIS_TYPE_QUERY, WHOIS_TYPE_RESPONSE};

/// Fixed-size prefix of a MULTICAST_FRAME payload:
/// flags, network ID, originator, source MAC, group MAC, ADI, bloom filter,
/// propagation depth, etherType, frame length, signature length.
const MULTICAST_FRAME_FIXED_LEN: usize =
    1 + 8 + 5 + 6 + 6 + 4 + crate::bloom::MULTICAST_BLOOM_SIZE_BYTES + 1 + 2 + 2 + 2;

/// A received packet head awaiting or undergoing decode.
pub struct IncomingPacket {
    packet: Packet,
    local_socket: i64,
    from: SocketAddr,
    receive_time: i64,
    /// Address a Whois was already issued for on behalf of this packet, so
    /// parked retries do not spam the roots (0 = none yet).
    whois_requested_for: AtomicU64,
}

impl IncomingPacket {
    /// Wrap a received packet head.
    pub fn new(packet: Packet, local_socket: i64, from: SocketAddr, receive_time: i64) -> Self {
        Self {
            packet,
            local_socket,
            from,
            receive_time,
            whois_requested_for: AtomicU64::new(0),
        }
    }

    /// The (possibly still armored) packet.
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// Mutable packet access (fragment reassembly appends payload).
    pub(crate) fn packet_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }

    /// Arrival timestamp.
    pub fn receive_time(&self) -> i64 {
        self.receive_time
    }

    /// Claimed source address.
    pub fn source(&self) -> Address {
        self.packet.source()
    }

    /// The address this packet's decode last blocked on, if any.
    pub(crate) fn blocked_on(&self) -> Option<Address> {
        let raw = self.whois_requested_for.load(Ordering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(Address::from_u64(raw))
        }
    }

    /// Issue a Whois for `addr` once per blocking address.
    fn request_whois_once(&self, switch: &Switch, addr: Address, now: i64) {
        let previous = self
            .whois_requested_for
            .swap(addr.to_u64(), Ordering::Relaxed);
        if previous != addr.to_u64() {
            switch.request_whois_at(addr, now);
        }
    }

    /// Attempt to fully decode and consume this packet.
    ///
    /// Returns true when the packet is finished with — handled, or dropped
    /// as invalid. False means decoding is blocked on identity resolution
    /// and the packet should stay parked.
    pub fn try_decode(&self, switch: &Switch, now: i64) -> bool {
        let Some(verb) = self.packet.verb() else {
            trace!(from = %self.from, "Dropped packet with unknown verb");
            return true;
        };

        // HELLO is self-introducing: the identity rides in the payload and
        // authentication uses keys derived from it.
        if verb == Verb::Hello {
            return self.decode_hello(switch, now);
        }

        let source = self.packet.source();
        let Some(peer) = switch.topology().peer(source, true) else {
            self.request_whois_once(switch, source, now);
            return false;
        };

        let Some(cipher) = self.packet.cipher() else {
            trace!(from = %self.from, "Dropped packet with unknown cipher");
            return true;
        };
        if cipher == Cipher::TrustedPath {
            let trusted = self
                .packet
                .trusted_path_id()
                .map(|id| switch.topology().should_inbound_path_be_trusted(self.from, id))
                .unwrap_or(false);
            if !trusted {
                debug!(from = %self.from, "Dropped packet claiming untrusted path");
                return true;
            }
        }

        let mut work = self.packet.clone();
        if let Err(e) = work.dearmor(peer.keys()) {
            debug!(src = %source, from = %self.from, error = %e, "Dropped unauthentic packet");
            return true;
        }
        self.credit_direct(switch, &peer, now);

        match verb {
            Verb::Nop | Verb::Hello => true,
            Verb::Whois => {
                switch.handle_whois(&peer, &work, now);
                true
            }
            Verb::Rendezvous => {
                switch.handle_rendezvous(self, &peer, &work, now);
                true
            }
            Verb::Frame => {
                switch.handle_frame(&peer, work, now);
                true
            }
            Verb::MulticastFrame => switch.handle_multicast_frame(self, &peer, work, now),
            Verb::MulticastLike => {
                switch.handle_multicast_like(&peer, &work, now);
                true
            }
        }
    }

    /// Stamp the receiving path when the packet arrived directly.
    fn credit_direct(&self, switch: &Switch, peer: &Arc<Peer>, now: i64) {
        if self.packet.hops() == 0 {
            let path = switch.topology().path(self.local_socket, self.from);
            peer.learn_path(Arc::clone(&path));
            peer.received(&path, now);
        }
    }

    /// HELLO: protocol version, software version, timestamp, identity.
    fn decode_hello(&self, switch: &Switch, now: i64) -> bool {
        let data = self.packet.data();
        if data.len() < PACKET_HEADER_LENGTH + 13 + IDENTITY_MARSHAL_SIZE + PACKET_MAC_LENGTH {
            trace!(from = %self.from, "Dropped short HELLO");
            return true;
        }
        let body = &data[PACKET_HEADER_LENGTH..data.len() - PACKET_MAC_LENGTH];
        let proto_version = body[0];
        let Ok((identity, _)) = PeerIdentity::unmarshal(&body[13..]) else {
            trace!(from = %self.from, "Dropped HELLO with malformed identity");
            return true;
        };

        if identity.address() != self.packet.source() {
            debug!(from = %self.from, "Dropped HELLO: identity does not match source");
            return true;
        }
        if identity.address() == switch.address() {
            debug!(from = %self.from, "Dropped HELLO claiming our own address");
            return true;
        }

        let existing = switch.topology().peer(identity.address(), true);
        if let Some(known) = &existing {
            if known.identity() != &identity {
                debug!(src = %identity.address(), "Dropped HELLO: identity conflict");
                return true;
            }
        }
        let peer = match &existing {
            Some(known) => Arc::clone(known),
            None => Arc::new(Peer::new(switch.identity(), identity)),
        };

        let mut work = self.packet.clone();
        if work.dearmor(peer.keys()).is_err() {
            debug!(src = %identity.address(), from = %self.from, "Dropped unauthentic HELLO");
            return true;
        }

        trace!(src = %identity.address(), proto_version, "HELLO");
        let is_new = existing.is_none();
        let peer = if is_new {
            switch.topology().add(peer)
        } else {
            peer
        };
        self.credit_direct(switch, &peer, now);
        let should_reply = peer.hello_received(now);
        if is_new {
            switch.do_anything_waiting_for_peer_at(&peer, now);
        }
        if should_reply && self.packet.hops() == 0 {
            switch.send_hello_direct(&peer, self.local_socket, self.from, now);
        }
        true
    }
}

impl Switch {
    /// WHOIS: identity lookup query or response.
    fn handle_whois(&self, peer: &Arc<Peer>, work: &Packet, now: i64) {
        let payload = work.payload();
        match payload.first() {
            Some(&WHOIS_TYPE_QUERY) if payload.len() >= 6 => {
                let Ok(addr) = Address::from_slice(&payload[1..6]) else {
                    return;
                };
                match self.topology().peer(addr, true) {
                    Some(found) => {
                        let mut response =
                            Packet::new(peer.address(), self.address(), Verb::Whois);
                        response.append_u8(WHOIS_TYPE_RESPONSE);
                        let mut identity = Vec::new();
                        found.identity().marshal(&mut identity);
                        response.append_bytes(&identity);
                        self.send_at(response, true, now);
                    }
                    None => trace!(%addr, "Whois miss"),
                }
            }
            Some(&WHOIS_TYPE_RESPONSE) => {
                let Ok((identity, _)) = PeerIdentity::unmarshal(&payload[1..]) else {
                    trace!(from = %peer.address(), "Malformed Whois response");
                    return;
                };
                if identity.address() == self.address() {
                    return;
                }
                let resolved = match self.topology().peer(identity.address(), true) {
                    Some(known) => known,
                    None => self
                        .topology()
                        .add(Arc::new(Peer::new(self.identity(), identity))),
                };
                debug!(resolved = %resolved.address(), "Whois resolved");
                self.do_anything_waiting_for_peer_at(&resolved, now);
            }
            _ => trace!(from = %peer.address(), "Malformed Whois"),
        }
    }

    /// RENDEZVOUS: a root asks us to meet another peer at an address.
    fn handle_rendezvous(
        &self,
        incoming: &IncomingPacket,
        peer: &Arc<Peer>,
        work: &Packet,
        now: i64,
    ) {
        if !self.topology().is_root(peer.identity()) {
            debug!(from = %peer.address(), "Ignored rendezvous from non-root");
            return;
        }
        let payload = work.payload();
        if payload.len() < 8 {
            return;
        }
        let Ok(with) = Address::from_slice(&payload[0..5]) else {
            return;
        };
        if with == self.address() {
            return;
        }
        let port = u16::from_be_bytes([payload[5], payload[6]]);
        let ip = match (payload[7], &payload[8..]) {
            (4, rest) if rest.len() >= 4 => {
                IpAddr::V4(Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]))
            }
            (16, rest) if rest.len() >= 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&rest[..16]);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => {
                trace!(from = %peer.address(), "Malformed rendezvous");
                return;
            }
        };
        // We can only HELLO a peer whose keys we hold.
        if self.topology().peer(with, true).is_none() {
            trace!(%with, "Rendezvous with unknown peer ignored");
            return;
        }
        debug!(%with, addr = %SocketAddr::new(ip, port), "Rendezvous scheduled");
        self.schedule_rendezvous(
            with,
            incoming.local_socket,
            SocketAddr::new(ip, port),
            now,
        );
    }

    /// FRAME: a unicast Ethernet frame for one of our networks.
    fn handle_frame(&self, peer: &Arc<Peer>, mut work: Packet, _now: i64) {
        if work.uncompress().is_err() {
            debug!(src = %peer.address(), "Dropped frame: decompression failed");
            return;
        }
        let payload = work.payload();
        if payload.len() < 10 {
            return;
        }
        let network_id = u64::from_be_bytes(payload[0..8].try_into().expect("length checked"));
        let ether_type = u16::from_be_bytes([payload[8], payload[9]]);
        let frame = &payload[10..];

        let Some(network) = self.network(network_id) else {
            trace!(network = %format_args!("{:016x}", network_id), "Frame for unjoined network");
            return;
        };
        if !network.is_allowed(peer.address()) {
            debug!(src = %peer.address(), "Dropped frame: not a member");
            return;
        }
        if !is_supported_ether_type(ether_type) {
            trace!(ether_type, "Dropped frame: unsupported etherType");
            return;
        }
        network.tap().put(
            Mac::from_address(peer.address()),
            network.tap().mac(),
            ether_type,
            frame,
        );
    }

    /// MULTICAST_FRAME: deliver locally and propagate onward.
    ///
    /// Returns false (park) when the originator's identity is unknown — the
    /// signature cannot be checked until Whois resolves it.
    fn handle_multicast_frame(
        &self,
        incoming: &IncomingPacket,
        via: &Arc<Peer>,
        mut work: Packet,
        now: i64,
    ) -> bool {
        if work.uncompress().is_err() {
            debug!(src = %via.address(), "Dropped multicast: decompression failed");
            return true;
        }
        let payload = work.payload();
        if payload.len() < MULTICAST_FRAME_FIXED_LEN {
            trace!(src = %via.address(), "Dropped short multicast");
            return true;
        }

        let mut at = 1; // flags byte reserved
        let network_id = u64::from_be_bytes(payload[at..at + 8].try_into().expect("fixed"));
        at += 8;
        let Ok(originator) = Address::from_slice(&payload[at..at + 5]) else {
            return true;
        };
        at += 5;
        let from_mac = Mac::from_slice(&payload[at..at + 6]);
        at += 6;
        let group_mac = Mac::from_slice(&payload[at..at + 6]);
        at += 6;
        let adi = u32::from_be_bytes(payload[at..at + 4].try_into().expect("fixed"));
        at += 4;
        let bloom_bytes = &payload[at..at + crate::bloom::MULTICAST_BLOOM_SIZE_BYTES];
        at += crate::bloom::MULTICAST_BLOOM_SIZE_BYTES;
        let depth = payload[at];
        at += 1;
        let ether_type = u16::from_be_bytes([payload[at], payload[at + 1]]);
        at += 2;
        let frame_len = u16::from_be_bytes([payload[at], payload[at + 1]]) as usize;
        at += 2;
        let sig_len = u16::from_be_bytes([payload[at], payload[at + 1]]) as usize;
        at += 2;
        if payload.len() < at + frame_len + sig_len {
            trace!(src = %via.address(), "Dropped truncated multicast");
            return true;
        }
        let frame = &payload[at..at + frame_len];
        let sig_bytes = &payload[at + frame_len..at + frame_len + sig_len];
        let group = MulticastGroup::new(group_mac, adi);

        if originator == self.address() {
            return true; // our own frame came back around
        }
        let Some(origin_peer) = self.topology().peer(originator, true) else {
            incoming.request_whois_once(self, originator, now);
            return false;
        };

        let Ok(signature) = secp256k1::schnorr::Signature::from_slice(sig_bytes) else {
            debug!(%originator, "Dropped multicast: malformed signature");
            return true;
        };
        if !verify_multicast_frame(
            origin_peer.identity(),
            network_id,
            from_mac,
            group,
            ether_type,
            frame,
            &signature,
        ) {
            debug!(%originator, "Dropped multicast: bad signature");
            return true;
        }

        if let Some(network) = self.network(network_id) {
            if network.subscribed(&group)
                && network.is_allowed(originator)
                && is_supported_ether_type(ether_type)
                && from_mac != network.tap().mac()
            {
                network.tap().put(from_mac, group.mac(), ether_type, frame);
            }
        }

        // Propagate onward, depth- and bloom-bounded.
        if depth + 1 >= MULTICAST_PROPAGATION_DEPTH {
            return true;
        }
        let Ok(mut bloom) = MulticastBloom::from_slice(bloom_bytes) else {
            return true;
        };
        let next_hops = self.multicaster().pick_next_propagation_peers(
            self.topology(),
            network_id,
            group,
            originator,
            &mut bloom,
            MULTICAST_PROPAGATION_BREADTH,
            now,
        );
        for next in next_hops {
            if next.address() == via.address() || next.address() == originator {
                continue;
            }
            let mut onward = Packet::new(next.address(), self.address(), Verb::MulticastFrame);
            onward.append_u8(0);
            onward.append_u64(network_id);
            onward.append_bytes(originator.as_bytes());
            onward.append_bytes(from_mac.as_bytes());
            onward.append_bytes(group.mac().as_bytes());
            onward.append_u32(group.adi());
            onward.append_bytes(bloom.as_bytes());
            onward.append_u8(depth + 1);
            onward.append_u16(ether_type);
            onward.append_u16(frame_len as u16);
            onward.append_u16(sig_len as u16);
            onward.append_bytes(frame);
            onward.append_bytes(sig_bytes);
            onward.compress();
            self.send_at(onward, true, now);
        }
        true
    }

    /// MULTICAST_LIKE: record group subscriptions, 18 bytes per record.
    fn handle_multicast_like(&self, peer: &Arc<Peer>, work: &Packet, now: i64) {
        for record in work.payload().chunks_exact(18) {
            let network_id = u64::from_be_bytes(record[0..8].try_into().expect("fixed"));
            let mac = Mac::from_slice(&record[8..14]);
            let adi = u32::from_be_bytes(record[14..18].try_into().expect("fixed"));
            let allowed = match self.network(network_id) {
                Some(network) => {
                    network.is_allowed(peer.address())
                        || self.topology().is_root_address(peer.address())
                }
                // Likes for networks we have not joined are kept so we can
                // still propagate multicasts for them.
                None => true,
            };
            if allowed {
                self.multicaster().add_like(
                    network_id,
                    MulticastGroup::new(mac, adi),
                    peer.address(),
                    now,
                );
            }
        }
    }
}
