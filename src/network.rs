//! Overlay network membership and policy.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::ethernet::{Mac, MulticastGroup};
use crate::identity::Address;
use crate::tap::EthernetTap;

/// One joined overlay network: a 64-bit ID, the tap it feeds, and the
/// membership policy gating unicast and multicast delivery.
pub struct Network {
    id: u64,
    tap: Arc<dyn EthernetTap>,
    policy: RwLock<MembershipPolicy>,
    multicast_groups: Mutex<HashSet<MulticastGroup>>,
}

/// Who may exchange frames on a network.
#[derive(Clone, Debug, Default)]
pub struct MembershipPolicy {
    /// Open networks admit any overlay address.
    pub open: bool,
    /// Closed networks admit only listed members.
    pub members: HashSet<Address>,
}

impl Network {
    /// Create a network bound to a tap.
    pub fn new(id: u64, tap: Arc<dyn EthernetTap>, policy: MembershipPolicy) -> Self {
        Self {
            id,
            tap,
            policy: RwLock::new(policy),
            multicast_groups: Mutex::new(HashSet::new()),
        }
    }

    /// The 64-bit network ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The tap this network delivers frames to.
    pub fn tap(&self) -> &Arc<dyn EthernetTap> {
        &self.tap
    }

    /// True for open networks.
    pub fn is_open(&self) -> bool {
        self.policy.read().expect("network policy lock").open
    }

    /// True if the address may exchange frames on this network.
    pub fn is_allowed(&self, addr: Address) -> bool {
        let policy = self.policy.read().expect("network policy lock");
        policy.open || policy.members.contains(&addr)
    }

    /// Replace the membership policy.
    pub fn set_policy(&self, policy: MembershipPolicy) {
        *self.policy.write().expect("network policy lock") = policy;
    }

    /// Add a member to a closed network.
    pub fn add_member(&self, addr: Address) {
        self.policy
            .write()
            .expect("network policy lock")
            .members
            .insert(addr);
    }

    /// Subscribe this network to a multicast group.
    pub fn subscribe(&self, group: MulticastGroup) {
        self.multicast_groups
            .lock()
            .expect("network groups lock")
            .insert(group);
    }

    /// True if this network wants frames for the group.
    ///
    /// Broadcast always passes; the tap is the one device on the segment.
    pub fn subscribed(&self, group: &MulticastGroup) -> bool {
        group.mac() == Mac::BROADCAST
            || self
                .multicast_groups
                .lock()
                .expect("network groups lock")
                .contains(group)
    }

    /// Snapshot of subscribed groups (for MULTICAST_LIKE announcements).
    pub fn multicast_groups(&self) -> Vec<MulticastGroup> {
        self.multicast_groups
            .lock()
            .expect("network groups lock")
            .iter()
            .copied()
            .collect()
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("id", &format_args!("{:016x}", self.id))
            .finish()
    }
}
