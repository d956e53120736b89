//! Packet Wire Format
//!
//! Every overlay datagram is either a packet head or a fragment. The head
//! carries the full header and the start of payload; fragments carry payload
//! slices keyed by the same 64-bit packet ID.
//!
//! ## Packet head
//!
//! ```text
//! [packet id:8][dest:5][src:5][flags:1][cipher|verb:1][payload…][mac:8]
//! ```
//!
//! - flags: bit 7 = fragmented, bit 6 = compressed, bits 0-2 = hops
//! - cipher (high nibble): 0 = plaintext+HMAC, 1 = ChaCha20+HMAC,
//!   2 = trusted path (MAC field carries the trusted path ID)
//! - verb (low nibble): see [`Verb`]
//! - mac: HMAC-SHA-384 truncated to 8 bytes, computed with the hops bits
//!   zeroed so relays can increment hops without re-authenticating
//!
//! The packet ID doubles as the encryption IV; a fresh ID is a fresh IV.
//!
//! ## Fragment
//!
//! ```text
//! [packet id:8][dest:5][0xff:1][(index<<4)|total:1][hops:1][payload…]
//! ```
//!
//! Byte 13 of a head is the first source-address byte, which is never `0xff`
//! (that prefix is reserved); the indicator is therefore unambiguous.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hmac::{Hmac, Mac as HmacMac};
use sha2::Sha384;
use thiserror::Error;

use crate::identity::{Address, PairKeys};

type HmacSha384 = Hmac<Sha384>;

/// Overlay protocol version.
pub const PROTO_VERSION: u8 = 1;

/// Byte offset of the destination address.
pub const PACKET_IDX_DEST: usize = 8;
/// Byte offset of the source address.
pub const PACKET_IDX_SRC: usize = 13;
/// Byte offset of the flags byte.
pub const PACKET_IDX_FLAGS: usize = 18;
/// Byte offset of the cipher/verb byte.
pub const PACKET_IDX_VERB: usize = 19;
/// Length of the packet header (payload starts here).
pub const PACKET_HEADER_LENGTH: usize = 20;
/// Length of the trailing MAC (or trusted path ID) field.
pub const PACKET_MAC_LENGTH: usize = 8;
/// Minimum length of a whole packet head: header plus trailing MAC.
pub const MIN_PACKET_LENGTH: usize = PACKET_HEADER_LENGTH + PACKET_MAC_LENGTH;

/// Byte offset of the fragment indicator in both wire layouts.
pub const FRAGMENT_INDICATOR_IDX: usize = 13;
/// Sentinel marking a datagram as a fragment (a reserved address prefix).
pub const FRAGMENT_INDICATOR: u8 = 0xff;
/// Length of a fragment header; also the minimum fragment length.
pub const MIN_FRAGMENT_LENGTH: usize = 16;

/// Maximum fragments per packet, head included. The per-packet presence
/// bitmask (bit 0 = head) must fit in a u16, and both the index and the
/// total ride in one nibble each.
pub const MAX_PACKET_FRAGMENTS: u8 = 15;

/// Hop cap for relayed traffic.
pub const RELAY_MAX_HOPS: u8 = 7;

/// Default UDP payload MTU used when no physical path config applies.
pub const UDP_DEFAULT_PAYLOAD_MTU: usize = 1444;

/// Largest packet the switch will build or reassemble.
pub const PROTO_MAX_PACKET_LENGTH: usize = 4096;

/// Flags bit: packet continues in fragments.
pub const FLAG_FRAGMENTED: u8 = 0x80;
/// Flags bit: payload is LZ4-compressed.
pub const FLAG_COMPRESSED: u8 = 0x40;
/// Flags mask for the hop counter.
pub const HOPS_MASK: u8 = 0x07;

/// Errors from packet parsing and authentication.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),

    #[error("malformed packet field")]
    Malformed,

    #[error("packet authentication failed")]
    AuthenticationFailed,

    #[error("invalid fragment numbering: {index}/{total}")]
    BadFragmentNumbering { index: u8, total: u8 },

    #[error("payload decompression failed")]
    DecompressionFailed,
}

/// Packet verbs (low nibble of the cipher/verb byte).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Verb {
    Nop = 0,
    Hello = 1,
    Whois = 2,
    Rendezvous = 3,
    Frame = 4,
    MulticastFrame = 5,
    MulticastLike = 6,
}

impl Verb {
    /// Decode a verb nibble.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble & 0x0f {
            0 => Some(Verb::Nop),
            1 => Some(Verb::Hello),
            2 => Some(Verb::Whois),
            3 => Some(Verb::Rendezvous),
            4 => Some(Verb::Frame),
            5 => Some(Verb::MulticastFrame),
            6 => Some(Verb::MulticastLike),
            _ => None,
        }
    }
}

/// Cipher suite (high nibble of the cipher/verb byte).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Cipher {
    /// Plaintext payload, trailing HMAC.
    NoneHmac = 0,
    /// ChaCha20-encrypted payload, trailing HMAC.
    ChaChaHmac = 1,
    /// No cryptography; the MAC field carries the trusted path ID.
    TrustedPath = 2,
}

impl Cipher {
    /// Decode a cipher nibble.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble & 0x0f {
            0 => Some(Cipher::NoneHmac),
            1 => Some(Cipher::ChaChaHmac),
            2 => Some(Cipher::TrustedPath),
            _ => None,
        }
    }
}

/// An in-flight packet buffer with header accessors.
///
/// A freshly built packet is plaintext and unauthenticated; [`Packet::armor`]
/// encrypts (optionally) and appends the trailing MAC, [`Packet::dearmor`]
/// reverses it. Relays forward armored bytes untouched apart from the hops
/// field, which the MAC deliberately excludes.
#[derive(Clone)]
pub struct Packet {
    data: Vec<u8>,
}

impl Packet {
    /// Start a new packet with a random ID (the IV) and zero hops.
    pub fn new(dest: Address, src: Address, verb: Verb) -> Self {
        let mut data = vec![0u8; PACKET_HEADER_LENGTH];
        let id: u64 = rand::Rng::random(&mut rand::rng());
        data[..8].copy_from_slice(&id.to_be_bytes());
        data[PACKET_IDX_DEST..PACKET_IDX_DEST + 5].copy_from_slice(dest.as_bytes());
        data[PACKET_IDX_SRC..PACKET_IDX_SRC + 5].copy_from_slice(src.as_bytes());
        data[PACKET_IDX_VERB] = verb as u8;
        Self { data }
    }

    /// Wrap received bytes. The caller has already checked the length floor.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, PacketError> {
        if data.len() < MIN_PACKET_LENGTH {
            return Err(PacketError::TooShort(data.len()));
        }
        Ok(Self { data })
    }

    /// Raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if only the header is present.
    pub fn is_empty(&self) -> bool {
        self.data.len() <= PACKET_HEADER_LENGTH
    }

    /// 64-bit packet ID (also the IV).
    pub fn packet_id(&self) -> u64 {
        u64::from_be_bytes(self.data[..8].try_into().expect("header is present"))
    }

    /// Replace the packet ID with a fresh random one (a fresh IV).
    ///
    /// Used when re-addressing one multicast template to several peers so
    /// every copy encrypts under a distinct IV.
    pub fn new_packet_id(&mut self) {
        let id: u64 = rand::Rng::random(&mut rand::rng());
        self.data[..8].copy_from_slice(&id.to_be_bytes());
    }

    /// Destination overlay address.
    pub fn destination(&self) -> Address {
        Address::from_slice(&self.data[PACKET_IDX_DEST..PACKET_IDX_DEST + 5])
            .unwrap_or(Address::NIL)
    }

    /// Re-address the packet (multicast fan-out).
    pub fn set_destination(&mut self, dest: Address) {
        self.data[PACKET_IDX_DEST..PACKET_IDX_DEST + 5].copy_from_slice(dest.as_bytes());
    }

    /// Source overlay address.
    pub fn source(&self) -> Address {
        Address::from_slice(&self.data[PACKET_IDX_SRC..PACKET_IDX_SRC + 5])
            .unwrap_or(Address::NIL)
    }

    /// Hop counter (0..=7).
    pub fn hops(&self) -> u8 {
        self.data[PACKET_IDX_FLAGS] & HOPS_MASK
    }

    /// Increment the hop counter, saturating at the field width.
    pub fn increment_hops(&mut self) {
        let flags = self.data[PACKET_IDX_FLAGS];
        let hops = (flags & HOPS_MASK).saturating_add(1).min(HOPS_MASK);
        self.data[PACKET_IDX_FLAGS] = (flags & !HOPS_MASK) | hops;
    }

    /// True if the fragmented flag is set.
    pub fn fragmented(&self) -> bool {
        self.data[PACKET_IDX_FLAGS] & FLAG_FRAGMENTED != 0
    }

    /// Set or clear the fragmented flag.
    pub fn set_fragmented(&mut self, fragmented: bool) {
        if fragmented {
            self.data[PACKET_IDX_FLAGS] |= FLAG_FRAGMENTED;
        } else {
            self.data[PACKET_IDX_FLAGS] &= !FLAG_FRAGMENTED;
        }
    }

    /// True if the compressed flag is set.
    pub fn compressed(&self) -> bool {
        self.data[PACKET_IDX_FLAGS] & FLAG_COMPRESSED != 0
    }

    /// Verb, if the nibble is known.
    pub fn verb(&self) -> Option<Verb> {
        Verb::from_nibble(self.data[PACKET_IDX_VERB])
    }

    /// Cipher suite, if the nibble is known.
    pub fn cipher(&self) -> Option<Cipher> {
        Cipher::from_nibble(self.data[PACKET_IDX_VERB] >> 4)
    }

    /// Payload region (everything after the header).
    ///
    /// On an armored packet this still includes the trailing MAC; call
    /// [`Packet::dearmor`] first when receiving.
    pub fn payload(&self) -> &[u8] {
        &self.data[PACKET_HEADER_LENGTH..]
    }

    // === Payload building ===

    /// Append a byte.
    pub fn append_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    /// Append a big-endian u16.
    pub fn append_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    /// Append a big-endian u32.
    pub fn append_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    /// Append a big-endian u64.
    pub fn append_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    /// Append raw bytes.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Compress the payload in place if that makes it smaller.
    ///
    /// Must run before [`Packet::armor`]; sets the compressed flag only when
    /// compression won.
    pub fn compress(&mut self) {
        let payload = &self.data[PACKET_HEADER_LENGTH..];
        if payload.is_empty() {
            return;
        }
        let compressed = lz4_flex::block::compress_prepend_size(payload);
        if compressed.len() < payload.len() {
            self.data.truncate(PACKET_HEADER_LENGTH);
            self.data.extend_from_slice(&compressed);
            self.data[PACKET_IDX_FLAGS] |= FLAG_COMPRESSED;
        }
    }

    /// Decompress the payload in place if the compressed flag is set.
    ///
    /// Must run after [`Packet::dearmor`].
    pub fn uncompress(&mut self) -> Result<(), PacketError> {
        if !self.compressed() {
            return Ok(());
        }
        let payload = &self.data[PACKET_HEADER_LENGTH..];
        let plain = lz4_flex::block::decompress_size_prepended(payload)
            .map_err(|_| PacketError::DecompressionFailed)?;
        if PACKET_HEADER_LENGTH + plain.len() > PROTO_MAX_PACKET_LENGTH {
            return Err(PacketError::DecompressionFailed);
        }
        self.data.truncate(PACKET_HEADER_LENGTH);
        self.data.extend_from_slice(&plain);
        self.data[PACKET_IDX_FLAGS] &= !FLAG_COMPRESSED;
        Ok(())
    }

    // === Armor ===

    /// Encrypt (optionally) and append the trailing MAC.
    pub fn armor(&mut self, keys: &PairKeys, encrypt: bool) {
        let cipher = if encrypt {
            self.crypt_payload(&keys.crypt);
            Cipher::ChaChaHmac
        } else {
            Cipher::NoneHmac
        };
        self.set_cipher(cipher);
        let tag = self.compute_hmac(&keys.mac);
        self.data.extend_from_slice(&tag);
    }

    /// Mark as trusted-path and append the trusted path ID in the MAC field.
    pub fn armor_trusted(&mut self, trusted_path_id: u64) {
        self.set_cipher(Cipher::TrustedPath);
        self.data.extend_from_slice(&trusted_path_id.to_be_bytes());
    }

    /// Read the trusted path ID from the MAC field of a trusted-path packet.
    pub fn trusted_path_id(&self) -> Result<u64, PacketError> {
        if self.data.len() < MIN_PACKET_LENGTH {
            return Err(PacketError::TooShort(self.data.len()));
        }
        let tail = &self.data[self.data.len() - PACKET_MAC_LENGTH..];
        Ok(u64::from_be_bytes(tail.try_into().expect("8-byte tail")))
    }

    /// Verify the trailing MAC, strip it, and decrypt the payload.
    ///
    /// For trusted-path packets the caller has already validated the path ID;
    /// this just strips the ID field.
    pub fn dearmor(&mut self, keys: &PairKeys) -> Result<(), PacketError> {
        if self.data.len() < MIN_PACKET_LENGTH {
            return Err(PacketError::TooShort(self.data.len()));
        }
        let cipher = self.cipher().ok_or(PacketError::Malformed)?;
        if cipher == Cipher::TrustedPath {
            self.data.truncate(self.data.len() - PACKET_MAC_LENGTH);
            return Ok(());
        }

        let body_len = self.data.len() - PACKET_MAC_LENGTH;
        let claimed: [u8; PACKET_MAC_LENGTH] = self.data[body_len..]
            .try_into()
            .expect("8-byte tail");
        self.data.truncate(body_len);
        let expected = self.compute_hmac(&keys.mac);
        if claimed != expected {
            return Err(PacketError::AuthenticationFailed);
        }
        if cipher == Cipher::ChaChaHmac {
            self.crypt_payload(&keys.crypt);
        }
        Ok(())
    }

    fn set_cipher(&mut self, cipher: Cipher) {
        let verb = self.data[PACKET_IDX_VERB] & 0x0f;
        self.data[PACKET_IDX_VERB] = ((cipher as u8) << 4) | verb;
    }

    /// ChaCha20 the payload region in place. The first 12 header bytes
    /// (packet ID plus the destination prefix) are the nonce.
    fn crypt_payload(&mut self, key: &[u8; 32]) {
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&self.data[..12]);
        let mut cipher = ChaCha20::new(key.into(), &nonce.into());
        cipher.apply_keystream(&mut self.data[PACKET_HEADER_LENGTH..]);
    }

    /// HMAC over the packet with the hop bits zeroed.
    fn compute_hmac(&self, key: &[u8; 32]) -> [u8; PACKET_MAC_LENGTH] {
        let mut mac = HmacSha384::new_from_slice(key).expect("hmac accepts any key length");
        mac.update(&self.data[..PACKET_IDX_FLAGS]);
        mac.update(&[self.data[PACKET_IDX_FLAGS] & !HOPS_MASK]);
        mac.update(&self.data[PACKET_IDX_FLAGS + 1..]);
        let digest = mac.finalize().into_bytes();
        let mut tag = [0u8; PACKET_MAC_LENGTH];
        tag.copy_from_slice(&digest[..PACKET_MAC_LENGTH]);
        tag
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("id", &format_args!("{:016x}", self.packet_id()))
            .field("dest", &self.destination())
            .field("src", &self.source())
            .field("verb", &self.verb())
            .field("hops", &self.hops())
            .field("len", &self.len())
            .finish()
    }
}

/// A single fragment of a larger packet.
#[derive(Clone)]
pub struct Fragment {
    data: Vec<u8>,
}

impl Fragment {
    /// Build a fragment carrying a payload slice of an armored packet.
    pub fn new(packet_id: u64, dest: Address, index: u8, total: u8, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(MIN_FRAGMENT_LENGTH + payload.len());
        data.extend_from_slice(&packet_id.to_be_bytes());
        data.extend_from_slice(dest.as_bytes());
        data.push(FRAGMENT_INDICATOR);
        data.push((index << 4) | (total & 0x0f));
        data.push(0); // hops
        data.extend_from_slice(payload);
        Self { data }
    }

    /// Wrap received fragment bytes, checking the length floor and sentinel.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, PacketError> {
        if data.len() < MIN_FRAGMENT_LENGTH {
            return Err(PacketError::TooShort(data.len()));
        }
        if data[FRAGMENT_INDICATOR_IDX] != FRAGMENT_INDICATOR {
            return Err(PacketError::Malformed);
        }
        Ok(Self { data })
    }

    /// Raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// ID of the packet this fragment belongs to.
    pub fn packet_id(&self) -> u64 {
        u64::from_be_bytes(self.data[..8].try_into().expect("header is present"))
    }

    /// Destination overlay address.
    pub fn destination(&self) -> Address {
        Address::from_slice(&self.data[PACKET_IDX_DEST..PACKET_IDX_DEST + 5])
            .unwrap_or(Address::NIL)
    }

    /// Fragment index (1-based; the head is index 0).
    pub fn fragment_number(&self) -> u8 {
        self.data[14] >> 4
    }

    /// Total fragment count, head included.
    pub fn total_fragments(&self) -> u8 {
        self.data[14] & 0x0f
    }

    /// Hop counter.
    pub fn hops(&self) -> u8 {
        self.data[15] & HOPS_MASK
    }

    /// Increment the hop counter, saturating at the field width.
    pub fn increment_hops(&mut self) {
        let hops = (self.data[15] & HOPS_MASK).saturating_add(1).min(HOPS_MASK);
        self.data[15] = (self.data[15] & !HOPS_MASK) | hops;
    }

    /// Payload slice carried by this fragment.
    pub fn payload(&self) -> &[u8] {
        &self.data[MIN_FRAGMENT_LENGTH..]
    }
}

impl std::fmt::Debug for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fragment")
            .field("id", &format_args!("{:016x}", self.packet_id()))
            .field("dest", &self.destination())
            .field("index", &self.fragment_number())
            .field("total", &self.total_fragments())
            .field("hops", &self.hops())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> PairKeys {
        PairKeys {
            crypt: [0x11; 32],
            mac: [0x22; 32],
        }
    }

    fn addr(v: u64) -> Address {
        Address::from_u64(v)
    }

    #[test]
    fn test_header_fields() {
        let mut pkt = Packet::new(addr(0x2222222222), addr(0x1111111111), Verb::Frame);
        assert_eq!(pkt.destination(), addr(0x2222222222));
        assert_eq!(pkt.source(), addr(0x1111111111));
        assert_eq!(pkt.verb(), Some(Verb::Frame));
        assert_eq!(pkt.hops(), 0);
        assert!(!pkt.fragmented());

        pkt.set_destination(addr(0x3333333333));
        assert_eq!(pkt.destination(), addr(0x3333333333));

        pkt.set_fragmented(true);
        assert!(pkt.fragmented());
        pkt.set_fragmented(false);
        assert!(!pkt.fragmented());
    }

    #[test]
    fn test_hops_saturate_at_field_width() {
        let mut pkt = Packet::new(addr(2), addr(1), Verb::Nop);
        for _ in 0..20 {
            pkt.increment_hops();
        }
        assert_eq!(pkt.hops(), RELAY_MAX_HOPS);
        assert!(!pkt.fragmented()); // hops never bleed into flag bits
    }

    #[test]
    fn test_armor_dearmor_encrypted() {
        let keys = test_keys();
        let mut pkt = Packet::new(addr(2), addr(1), Verb::Frame);
        pkt.append_bytes(b"hello overlay");
        let plain = pkt.payload().to_vec();

        pkt.armor(&keys, true);
        assert_eq!(pkt.cipher(), Some(Cipher::ChaChaHmac));
        assert_ne!(&pkt.data()[PACKET_HEADER_LENGTH..pkt.len() - PACKET_MAC_LENGTH], &plain[..]);

        pkt.dearmor(&keys).unwrap();
        assert_eq!(pkt.payload(), &plain[..]);
    }

    #[test]
    fn test_armor_dearmor_plaintext() {
        let keys = test_keys();
        let mut pkt = Packet::new(addr(2), addr(1), Verb::Hello);
        pkt.append_bytes(b"introduce me");
        pkt.armor(&keys, false);
        assert_eq!(pkt.cipher(), Some(Cipher::NoneHmac));
        assert_eq!(
            &pkt.data()[PACKET_HEADER_LENGTH..pkt.len() - PACKET_MAC_LENGTH],
            b"introduce me"
        );
        pkt.dearmor(&keys).unwrap();
        assert_eq!(pkt.payload(), b"introduce me");
    }

    #[test]
    fn test_dearmor_detects_tampering() {
        let keys = test_keys();
        let mut pkt = Packet::new(addr(2), addr(1), Verb::Frame);
        pkt.append_bytes(b"payload");
        pkt.armor(&keys, true);

        let mut bytes = pkt.data().to_vec();
        bytes[PACKET_HEADER_LENGTH] ^= 0x01;
        let mut tampered = Packet::from_bytes(bytes).unwrap();
        assert!(matches!(
            tampered.dearmor(&keys),
            Err(PacketError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_dearmor_rejects_wrong_keys() {
        let mut pkt = Packet::new(addr(2), addr(1), Verb::Frame);
        pkt.append_bytes(b"payload");
        pkt.armor(&test_keys(), true);
        let wrong = PairKeys {
            crypt: [9; 32],
            mac: [9; 32],
        };
        assert!(pkt.dearmor(&wrong).is_err());
    }

    #[test]
    fn test_hop_increment_preserves_authentication() {
        // A relay bumps hops on armored bytes; the MAC must still verify.
        let keys = test_keys();
        let mut pkt = Packet::new(addr(2), addr(1), Verb::Frame);
        pkt.append_bytes(b"relayed payload");
        pkt.armor(&keys, true);

        pkt.increment_hops();
        pkt.increment_hops();
        assert_eq!(pkt.hops(), 2);
        pkt.dearmor(&keys).unwrap();
        assert_eq!(pkt.payload(), b"relayed payload");
    }

    #[test]
    fn test_fresh_packet_id_changes_ciphertext() {
        let keys = test_keys();
        let mut a = Packet::new(addr(2), addr(1), Verb::MulticastFrame);
        a.append_bytes(b"same multicast body");
        let mut b = a.clone();
        b.new_packet_id();
        assert_ne!(a.packet_id(), b.packet_id());

        a.armor(&keys, true);
        b.armor(&keys, true);
        assert_ne!(
            &a.data()[PACKET_HEADER_LENGTH..],
            &b.data()[PACKET_HEADER_LENGTH..]
        );
    }

    #[test]
    fn test_trusted_path_armor() {
        let mut pkt = Packet::new(addr(2), addr(1), Verb::Frame);
        pkt.append_bytes(b"trusted lan traffic");
        pkt.armor_trusted(0xdeadbeef);
        assert_eq!(pkt.cipher(), Some(Cipher::TrustedPath));
        assert_eq!(pkt.trusted_path_id().unwrap(), 0xdeadbeef);

        let keys = test_keys();
        pkt.dearmor(&keys).unwrap(); // strips the ID field only
        assert_eq!(pkt.payload(), b"trusted lan traffic");
    }

    #[test]
    fn test_compress_roundtrip() {
        let keys = test_keys();
        let mut pkt = Packet::new(addr(2), addr(1), Verb::Frame);
        pkt.append_bytes(&[0x55u8; 1200]); // compressible
        pkt.compress();
        assert!(pkt.compressed());
        assert!(pkt.len() < PACKET_HEADER_LENGTH + 1200);

        pkt.armor(&keys, true);
        pkt.dearmor(&keys).unwrap();
        pkt.uncompress().unwrap();
        assert!(!pkt.compressed());
        assert_eq!(pkt.payload(), &[0x55u8; 1200][..]);
    }

    #[test]
    fn test_incompressible_payload_left_alone() {
        use rand::RngCore;
        let mut body = [0u8; 64];
        rand::rng().fill_bytes(&mut body);
        let mut pkt = Packet::new(addr(2), addr(1), Verb::Frame);
        pkt.append_bytes(&body);
        pkt.compress();
        assert!(!pkt.compressed());
        assert_eq!(pkt.payload(), &body[..]);
    }

    #[test]
    fn test_fragment_roundtrip() {
        let frag = Fragment::new(0x0123456789abcdef, addr(0x2222222222), 2, 3, b"slice two");
        let parsed = Fragment::from_bytes(frag.data().to_vec()).unwrap();
        assert_eq!(parsed.packet_id(), 0x0123456789abcdef);
        assert_eq!(parsed.destination(), addr(0x2222222222));
        assert_eq!(parsed.fragment_number(), 2);
        assert_eq!(parsed.total_fragments(), 3);
        assert_eq!(parsed.hops(), 0);
        assert_eq!(parsed.payload(), b"slice two");
    }

    #[test]
    fn test_fragment_rejects_runt_and_missing_sentinel() {
        assert!(Fragment::from_bytes(vec![0u8; MIN_FRAGMENT_LENGTH - 1]).is_err());
        let mut bytes = Fragment::new(1, addr(2), 1, 2, b"x").data().to_vec();
        bytes[FRAGMENT_INDICATOR_IDX] = 0x00;
        assert!(Fragment::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_fragment_hops_increment() {
        let mut frag = Fragment::new(1, addr(2), 1, 2, b"x");
        for _ in 0..10 {
            frag.increment_hops();
        }
        assert_eq!(frag.hops(), RELAY_MAX_HOPS);
        // numbering is untouched by hop bumps
        assert_eq!(frag.fragment_number(), 1);
        assert_eq!(frag.total_fragments(), 2);
    }

    #[test]
    fn test_packet_head_never_looks_like_fragment() {
        // Byte 13 of a head is the first source byte, which is never 0xff.
        let pkt = Packet::new(addr(0x2222222222), addr(0x1111111111), Verb::Frame);
        assert_ne!(pkt.data()[FRAGMENT_INDICATOR_IDX], FRAGMENT_INDICATOR);
    }
}
