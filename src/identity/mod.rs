//! WEFT Identity System
//!
//! Node identity based on secp256k1 keypairs. The 40-bit overlay address is
//! derived from the public key via iterated SHA-384, and the 384-bit
//! identity hash disambiguates addresses against collision or spoofing.

mod address;
mod encoding;
mod hash;
mod local;
mod peer;

use sha2::{Digest, Sha256, Sha384};
use thiserror::Error;

pub use address::Address;
pub use encoding::{decode_secret, decode_wpub, decode_wsec, encode_wpub, encode_wsec};
pub use hash::IdentityHash;
pub use local::{Identity, PairKeys};
pub use peer::{PeerIdentity, IDENTITY_MARSHAL_SIZE};

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(#[from] secp256k1::Error),

    #[error("invalid address length: expected 5, got {0}")]
    InvalidAddressLength(usize),

    #[error("reserved address prefix: 0x{0:02x}")]
    ReservedAddressPrefix(u8),

    #[error("invalid identity hash length: expected 48, got {0}")]
    InvalidHashLength(usize),

    #[error("malformed identity encoding")]
    MalformedIdentity,

    #[error("bech32 encoding error: {0}")]
    Bech32Encode(#[from] bech32::EncodeError),

    #[error("bech32 decoding error: {0}")]
    Bech32Decode(#[from] bech32::DecodeError),

    #[error("invalid wpub: expected 'wpub' prefix, got '{0}'")]
    InvalidWpubPrefix(String),

    #[error("invalid wpub: expected 32 bytes, got {0}")]
    InvalidWpubLength(usize),

    #[error("invalid wsec: expected 'wsec' prefix, got '{0}'")]
    InvalidWsecPrefix(String),

    #[error("invalid wsec: expected 32 bytes, got {0}")]
    InvalidWsecLength(usize),

    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Compute SHA-256 hash of data (signing digest).
pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute SHA-384 hash of data (identity hash digest).
pub(crate) fn sha384(data: &[u8]) -> [u8; 48] {
    let mut hasher = Sha384::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 48];
    hash.copy_from_slice(&result);
    hash
}

#[cfg(test)]
mod tests;
