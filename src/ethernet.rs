//! Ethernet-layer types: MAC addresses, etherTypes, multicast groups.

use std::fmt;

use crate::identity::Address;

/// ARP etherType.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// IPv4 etherType.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// IPv6 etherType.
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

/// First octet of overlay-derived MACs: locally administered, unicast.
pub const OVERLAY_MAC_PREFIX: u8 = 0x32;

/// True for the etherTypes the switch will carry (ARP, IPv4, IPv6).
pub fn is_supported_ether_type(ether_type: u16) -> bool {
    matches!(ether_type, ETHERTYPE_ARP | ETHERTYPE_IPV4 | ETHERTYPE_IPV6)
}

/// 48-bit Ethernet MAC address.
///
/// Overlay MACs embed the 40-bit overlay address behind a fixed
/// locally-administered prefix octet, so a unicast tap frame names its
/// destination node directly.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mac([u8; 6]);

impl Mac {
    /// The broadcast MAC, ff:ff:ff:ff:ff:ff.
    pub const BROADCAST: Mac = Mac([0xff; 6]);

    /// Create a Mac from a 6-byte array.
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Create a Mac from a slice; panics if not 6 bytes.
    pub fn from_slice(slice: &[u8]) -> Self {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(slice);
        Self(bytes)
    }

    /// Derive the overlay MAC for an overlay address.
    pub fn from_address(addr: Address) -> Self {
        let a = addr.as_bytes();
        Self([OVERLAY_MAC_PREFIX, a[0], a[1], a[2], a[3], a[4]])
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Return the MAC packed into the low 48 bits of a u64.
    pub fn to_u64(self) -> u64 {
        let b = self.0;
        ((b[0] as u64) << 40)
            | ((b[1] as u64) << 32)
            | ((b[2] as u64) << 24)
            | ((b[3] as u64) << 16)
            | ((b[4] as u64) << 8)
            | (b[5] as u64)
    }

    /// Create a Mac from the low 48 bits of a u64.
    pub fn from_u64(v: u64) -> Self {
        let b = v.to_be_bytes();
        Self([b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    /// True for group (multicast/broadcast) MACs.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// True for the all-ones broadcast MAC.
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    /// True if this MAC carries an embedded overlay address.
    pub fn is_overlay(&self) -> bool {
        self.0[0] == OVERLAY_MAC_PREFIX
    }

    /// Extract the embedded overlay address, if this is an overlay MAC.
    pub fn to_address(&self) -> Option<Address> {
        if !self.is_overlay() {
            return None;
        }
        Address::from_slice(&self.0[1..6]).ok()
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({})", self)
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// A multicast channel: group MAC plus additional distinguishing information.
///
/// The ADI scopes broadcast-like channels to a target resource so that e.g.
/// IPv4 ARP traffic for different addresses travels on different channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MulticastGroup {
    mac: Mac,
    adi: u32,
}

impl MulticastGroup {
    /// Create a multicast group from a group MAC and ADI.
    pub fn new(mac: Mac, adi: u32) -> Self {
        Self { mac, adi }
    }

    /// Return the group MAC.
    pub fn mac(&self) -> Mac {
        self.mac
    }

    /// Return the additional distinguishing information word.
    pub fn adi(&self) -> u32 {
        self.adi
    }
}

impl fmt::Display for MulticastGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:08x}", self.mac, self.adi)
    }
}

/// Derive the ARP-scoped multicast group for a broadcast frame.
///
/// For the canonical 28-byte IPv4 ARP request (Ethernet/IPv4, hlen 6,
/// plen 4, opcode 1) the ADI becomes the target IPv4 address, splitting the
/// broadcast channel per queried address. Anything else stays on the plain
/// broadcast group.
pub fn derive_broadcast_group(ether_type: u16, frame: &[u8]) -> MulticastGroup {
    if ether_type == ETHERTYPE_ARP
        && frame.len() == 28
        && frame[2] == 0x08
        && frame[3] == 0x00
        && frame[4] == 6
        && frame[5] == 4
        && frame[7] == 0x01
    {
        let adi = u32::from_be_bytes([frame[24], frame[25], frame[26], frame[27]]);
        return MulticastGroup::new(Mac::BROADCAST, adi);
    }
    MulticastGroup::new(Mac::BROADCAST, 0)
}
