//! Remote peer identity (public key only, no signing capability).

use secp256k1::{PublicKey, Secp256k1};
use std::fmt;

use super::address::RESERVED_ADDRESS_PREFIX;
use super::{sha256, sha384, Address, IdentityError, IdentityHash};

/// Wire size of a marshaled identity: type byte plus compressed public key.
pub const IDENTITY_MARSHAL_SIZE: usize = 1 + 33;

/// Identity wire type for secp256k1 keys.
const IDENTITY_TYPE_SECP256K1: u8 = 1;

/// A known peer's identity (public key only, no signing capability).
///
/// Carried in HELLO introductions and Whois responses. The overlay address
/// and 384-bit identity hash are derived once at construction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PeerIdentity {
    pubkey: PublicKey,
    address: Address,
    hash: IdentityHash,
}

impl PeerIdentity {
    /// Create a PeerIdentity from a full public key.
    pub fn from_pubkey(pubkey: PublicKey) -> Self {
        let serialized = pubkey.serialize();
        let hash = IdentityHash::from_bytes(sha384(&serialized));
        let address = derive_address(&hash);
        Self {
            pubkey,
            address,
            hash,
        }
    }

    /// Create a PeerIdentity from a `wpub1...` string.
    ///
    /// X-only keys from config files are lifted to full keys assuming even
    /// parity, matching how they were exported.
    pub fn from_wpub(wpub: &str) -> Result<Self, IdentityError> {
        let xonly = super::decode_wpub(wpub)?;
        Ok(Self::from_pubkey(xonly.public_key(secp256k1::Parity::Even)))
    }

    /// Return the full public key (ECDH input).
    pub fn pubkey(&self) -> PublicKey {
        self.pubkey
    }

    /// Return the overlay address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Return the 384-bit identity hash.
    pub fn hash(&self) -> &IdentityHash {
        &self.hash
    }

    /// Return the public key as a `wpub1...` string.
    pub fn wpub(&self) -> String {
        super::encode_wpub(&self.pubkey.x_only_public_key().0)
    }

    /// Append the wire form to a buffer: `[type:1][compressed pubkey:33]`.
    pub fn marshal(&self, buf: &mut Vec<u8>) -> usize {
        buf.push(IDENTITY_TYPE_SECP256K1);
        buf.extend_from_slice(&self.pubkey.serialize());
        IDENTITY_MARSHAL_SIZE
    }

    /// Parse the wire form, returning the identity and bytes consumed.
    pub fn unmarshal(data: &[u8]) -> Result<(Self, usize), IdentityError> {
        if data.len() < IDENTITY_MARSHAL_SIZE || data[0] != IDENTITY_TYPE_SECP256K1 {
            return Err(IdentityError::MalformedIdentity);
        }
        let pubkey = PublicKey::from_slice(&data[1..IDENTITY_MARSHAL_SIZE])?;
        Ok((Self::from_pubkey(pubkey), IDENTITY_MARSHAL_SIZE))
    }

    /// Verify a Schnorr signature from this peer.
    pub fn verify(&self, data: &[u8], signature: &secp256k1::schnorr::Signature) -> bool {
        let secp = Secp256k1::new();
        let digest = sha256(data);
        let (xonly, _parity) = self.pubkey.x_only_public_key();
        secp.verify_schnorr(signature, &digest, &xonly).is_ok()
    }
}

/// Derive a 40-bit address from an identity hash.
///
/// Takes the first five digest bytes, re-hashing while the candidate would
/// be invalid on the wire (reserved 0xff prefix or all-zero).
fn derive_address(hash: &IdentityHash) -> Address {
    let mut digest = *hash.as_bytes();
    loop {
        let candidate = &digest[..5];
        if candidate[0] != RESERVED_ADDRESS_PREFIX && candidate != [0u8; 5] {
            return Address::from_slice(candidate).expect("candidate was checked valid");
        }
        digest = sha384(&digest);
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerIdentity")
            .field("address", &self.address)
            .finish()
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wpub())
    }
}
