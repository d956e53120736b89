//! 384-bit identity hash.

use std::fmt;

use super::IdentityError;

/// 48-byte SHA-384 digest of a peer's serialized public key.
///
/// The 40-bit [`Address`](super::Address) is short enough that collisions
/// are conceivable; the identity hash is the full-strength disambiguator
/// carried by Overlay endpoints and indexed by the topology.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityHash([u8; 48]);

impl IdentityHash {
    /// Create an IdentityHash from a 48-byte array.
    pub fn from_bytes(bytes: [u8; 48]) -> Self {
        Self(bytes)
    }

    /// Create an IdentityHash from a slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self, IdentityError> {
        if slice.len() != 48 {
            return Err(IdentityError::InvalidHashLength(slice.len()));
        }
        let mut bytes = [0u8; 48];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }
}

impl fmt::Debug for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityHash({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for IdentityHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
