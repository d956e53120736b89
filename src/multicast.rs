//! Multicast subscription tracking and propagation peer selection.
//!
//! Nodes announce the multicast groups they want with MULTICAST_LIKE; the
//! `Multicaster` remembers who likes what and picks the next hops for an
//! outgoing or re-propagated MULTICAST_FRAME, consulting the frame's Bloom
//! filter so no peer is visited twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use secp256k1::schnorr::Signature;

use crate::bloom::MulticastBloom;
use crate::ethernet::{Mac, MulticastGroup};
use crate::identity::{Address, Identity, PeerIdentity};
use crate::peer::Peer;
use crate::topology::Topology;

/// Maximum next-hop peers per multicast emission.
pub const MULTICAST_PROPAGATION_BREADTH: usize = 4;

/// Maximum depth a multicast frame may propagate.
pub const MULTICAST_PROPAGATION_DEPTH: u8 = 5;

/// A subscription goes stale if not re-announced within this interval.
pub const MULTICAST_LIKE_EXPIRE: i64 = 600_000;

type GroupKey = (u64, MulticastGroup);

/// Registry of multicast subscriptions and next-hop selection policy.
pub struct Multicaster {
    /// (network, group) -> member -> last LIKE timestamp.
    likes: Mutex<HashMap<GroupKey, HashMap<Address, i64>>>,
}

impl Default for Multicaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Multicaster {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            likes: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `member` wants frames for `group` on `network_id`.
    pub fn add_like(&self, network_id: u64, group: MulticastGroup, member: Address, now: i64) {
        self.likes
            .lock()
            .expect("multicaster likes lock")
            .entry((network_id, group))
            .or_default()
            .insert(member, now);
    }

    /// Current (unexpired) subscribers of a group.
    pub fn subscribers(&self, network_id: u64, group: MulticastGroup, now: i64) -> Vec<Address> {
        self.likes
            .lock()
            .expect("multicaster likes lock")
            .get(&(network_id, group))
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, &ts)| now - ts < MULTICAST_LIKE_EXPIRE)
                    .map(|(addr, _)| *addr)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Choose up to `breadth` peers to carry a multicast frame onward.
    ///
    /// Subscribed peers with an active direct path come first; root servers
    /// are the fallback when nobody local wants the group (they can reach
    /// subscribers we cannot). Every chosen peer and the local node are added
    /// to `bloom`, so a returned peer will never be picked again for the same
    /// frame anywhere in the fabric.
    pub fn pick_next_propagation_peers(
        &self,
        topology: &Topology,
        network_id: u64,
        group: MulticastGroup,
        originator: Address,
        bloom: &mut MulticastBloom,
        breadth: usize,
        now: i64,
    ) -> Vec<Arc<Peer>> {
        bloom.insert(topology.local_address());

        let mut picked: Vec<Arc<Peer>> = Vec::new();
        for member in self.subscribers(network_id, group, now) {
            if picked.len() >= breadth {
                break;
            }
            if member == originator || bloom.contains(member) {
                continue;
            }
            let Some(peer) = topology.peer(member, false) else {
                continue;
            };
            if !peer.has_active_direct_path(now) {
                continue;
            }
            bloom.insert(member);
            picked.push(peer);
        }

        if picked.is_empty() {
            if let Some(root) = topology.root() {
                let addr = root.address();
                if addr != originator && !bloom.contains(addr) {
                    bloom.insert(addr);
                    picked.push(root);
                }
            }
        }

        picked
    }

    /// Drop expired subscriptions and empty groups.
    pub fn clean(&self, now: i64) {
        let mut likes = self.likes.lock().expect("multicaster likes lock");
        for members in likes.values_mut() {
            members.retain(|_, &mut ts| now - ts < MULTICAST_LIKE_EXPIRE);
        }
        likes.retain(|_, members| !members.is_empty());
    }
}

/// Canonical signing body of a multicast frame.
///
/// Signature and verification must agree on these bytes exactly:
/// `[network id:8][from mac:6][group mac:6][adi:4][ether type:2][frame]`.
pub fn multicast_signing_body(
    network_id: u64,
    from: Mac,
    group: MulticastGroup,
    ether_type: u16,
    frame: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(26 + frame.len());
    body.extend_from_slice(&network_id.to_be_bytes());
    body.extend_from_slice(from.as_bytes());
    body.extend_from_slice(group.mac().as_bytes());
    body.extend_from_slice(&group.adi().to_be_bytes());
    body.extend_from_slice(&ether_type.to_be_bytes());
    body.extend_from_slice(frame);
    body
}

/// Sign a multicast frame body with the local identity.
pub fn sign_multicast_frame(
    identity: &Identity,
    network_id: u64,
    from: Mac,
    group: MulticastGroup,
    ether_type: u16,
    frame: &[u8],
) -> Signature {
    identity.sign(&multicast_signing_body(
        network_id, from, group, ether_type, frame,
    ))
}

/// Verify a multicast frame signature against the originator's identity.
pub fn verify_multicast_frame(
    originator: &PeerIdentity,
    network_id: u64,
    from: Mac,
    group: MulticastGroup,
    ether_type: u16,
    frame: &[u8],
    signature: &Signature,
) -> bool {
    originator.verify(
        &multicast_signing_body(network_id, from, group, ether_type, frame),
        signature,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> MulticastGroup {
        MulticastGroup::new(Mac::BROADCAST, 0x0a000005)
    }

    #[test]
    fn test_likes_recorded_and_expired() {
        let mc = Multicaster::new();
        let member = Address::from_u64(0x1111111111);
        mc.add_like(1, group(), member, 1_000);

        assert_eq!(mc.subscribers(1, group(), 2_000), vec![member]);
        // Different network or group sees nothing.
        assert!(mc.subscribers(2, group(), 2_000).is_empty());

        // Past the expiry horizon the subscription is gone.
        assert!(mc
            .subscribers(1, group(), 1_000 + MULTICAST_LIKE_EXPIRE)
            .is_empty());

        mc.clean(1_000 + MULTICAST_LIKE_EXPIRE);
        assert!(mc.likes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_signature_roundtrip() {
        let identity = Identity::from_secret_bytes(&[7u8; 32]).unwrap();
        let from = Mac::from_bytes([0x32, 1, 2, 3, 4, 5]);
        let sig = sign_multicast_frame(&identity, 42, from, group(), 0x0806, b"arp body");
        assert!(verify_multicast_frame(
            identity.public(),
            42,
            from,
            group(),
            0x0806,
            b"arp body",
            &sig
        ));
        // Any field change invalidates the signature.
        assert!(!verify_multicast_frame(
            identity.public(),
            43,
            from,
            group(),
            0x0806,
            b"arp body",
            &sig
        ));
        assert!(!verify_multicast_frame(
            identity.public(),
            42,
            from,
            group(),
            0x0806,
            b"other body",
            &sig
        ));
    }
}
