//! Local node identity with signing and key-agreement capability.

use hkdf::Hkdf;
use secp256k1::ecdh::SharedSecret;
use secp256k1::{Keypair, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use sha2::Sha384;
use std::fmt;

use super::encoding::{decode_secret, encode_wpub, encode_wsec};
use super::peer::PeerIdentity;
use super::{sha256, Address, IdentityError};

/// Symmetric key material shared with one peer.
///
/// Both sides of a pair derive identical keys from ECDH, so either node can
/// encrypt to and authenticate traffic from the other.
#[derive(Clone, Copy)]
pub struct PairKeys {
    /// ChaCha20 payload encryption key.
    pub crypt: [u8; 32],
    /// HMAC packet authentication key.
    pub mac: [u8; 32],
}

impl PairKeys {
    /// Probe value identifying this pair: the first 8 bytes of the MAC key.
    pub fn probe(&self) -> u64 {
        u64::from_be_bytes([
            self.mac[0], self.mac[1], self.mac[2], self.mac[3],
            self.mac[4], self.mac[5], self.mac[6], self.mac[7],
        ])
    }
}

impl fmt::Debug for PairKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log key material.
        f.debug_struct("PairKeys").finish_non_exhaustive()
    }
}

/// A local node identity: keypair plus derived public identifiers.
pub struct Identity {
    keypair: Keypair,
    public: PeerIdentity,
}

impl Identity {
    /// Create a new random identity.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut secret_bytes);
        let secret_key =
            SecretKey::from_slice(&secret_bytes).expect("32 random bytes is a valid secret key");
        Self::from_secret_key(secret_key)
    }

    /// Create an identity from a secret key.
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let public = PeerIdentity::from_pubkey(keypair.public_key());
        Self { keypair, public }
    }

    /// Create an identity from secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, IdentityError> {
        let secret_key = SecretKey::from_slice(bytes)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Create an identity from a `wsec1...` or hex-encoded secret string.
    pub fn from_secret_str(s: &str) -> Result<Self, IdentityError> {
        let secret_key = decode_secret(s)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Return the public half of this identity.
    pub fn public(&self) -> &PeerIdentity {
        &self.public
    }

    /// Return this node's overlay address.
    pub fn address(&self) -> Address {
        self.public.address()
    }

    /// Return the full public key.
    pub fn pubkey(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Return the x-only public key.
    pub fn pubkey_xonly(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    /// Return the public key as a `wpub1...` string.
    pub fn wpub(&self) -> String {
        encode_wpub(&self.pubkey_xonly())
    }

    /// Return the secret key as a `wsec1...` string.
    pub fn wsec(&self) -> String {
        encode_wsec(&self.keypair.secret_key())
    }

    /// Sign arbitrary data with this identity's secret key.
    pub fn sign(&self, data: &[u8]) -> secp256k1::schnorr::Signature {
        let secp = Secp256k1::new();
        let digest = sha256(data);
        secp.sign_schnorr(&digest, &self.keypair)
    }

    /// Derive the symmetric pair keys shared with a remote peer.
    ///
    /// ECDH over the two keys, then HKDF-SHA-384 expansion into separate
    /// encryption and authentication keys. Symmetric: both sides compute the
    /// same result.
    pub fn agree(&self, other: &PeerIdentity) -> PairKeys {
        let shared = SharedSecret::new(&other.pubkey(), &self.keypair.secret_key());
        let hk = Hkdf::<Sha384>::new(None, shared.as_ref());
        let mut crypt = [0u8; 32];
        let mut mac = [0u8; 32];
        hk.expand(b"weft-crypt", &mut crypt)
            .expect("32 bytes is a valid hkdf output length");
        hk.expand(b"weft-mac", &mut mac)
            .expect("32 bytes is a valid hkdf output length");
        PairKeys { crypt, mac }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.public.address())
            .finish_non_exhaustive()
    }
}
