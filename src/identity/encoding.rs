//! Bech32 encoding of public and secret keys.
//!
//! Public keys render as `wpub1...` strings for config files and peer
//! exchange; secret keys as `wsec1...`. Hex is accepted as a fallback
//! secret encoding.

use bech32::{Bech32, Hrp};
use secp256k1::{SecretKey, XOnlyPublicKey};

use super::IdentityError;

const WPUB_HRP: &str = "wpub";
const WSEC_HRP: &str = "wsec";

/// Encode an x-only public key as a `wpub1...` string.
pub fn encode_wpub(pubkey: &XOnlyPublicKey) -> String {
    let hrp = Hrp::parse(WPUB_HRP).expect("static hrp is valid");
    bech32::encode::<Bech32>(hrp, &pubkey.serialize()).expect("32 bytes always encodes")
}

/// Decode a `wpub1...` string into an x-only public key.
pub fn decode_wpub(s: &str) -> Result<XOnlyPublicKey, IdentityError> {
    let (hrp, data) = bech32::decode(s)?;
    if hrp.as_str() != WPUB_HRP {
        return Err(IdentityError::InvalidWpubPrefix(hrp.as_str().to_string()));
    }
    if data.len() != 32 {
        return Err(IdentityError::InvalidWpubLength(data.len()));
    }
    Ok(XOnlyPublicKey::from_slice(&data)?)
}

/// Encode a secret key as a `wsec1...` string.
pub fn encode_wsec(secret: &SecretKey) -> String {
    let hrp = Hrp::parse(WSEC_HRP).expect("static hrp is valid");
    bech32::encode::<Bech32>(hrp, &secret.secret_bytes()).expect("32 bytes always encodes")
}

/// Decode a `wsec1...` string into a secret key.
pub fn decode_wsec(s: &str) -> Result<SecretKey, IdentityError> {
    let (hrp, data) = bech32::decode(s)?;
    if hrp.as_str() != WSEC_HRP {
        return Err(IdentityError::InvalidWsecPrefix(hrp.as_str().to_string()));
    }
    if data.len() != 32 {
        return Err(IdentityError::InvalidWsecLength(data.len()));
    }
    Ok(SecretKey::from_slice(&data)?)
}

/// Decode a secret key from either `wsec1...` or 64-char hex form.
pub fn decode_secret(s: &str) -> Result<SecretKey, IdentityError> {
    if s.starts_with(WSEC_HRP) {
        decode_wsec(s)
    } else {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(IdentityError::InvalidWsecLength(bytes.len()));
        }
        Ok(SecretKey::from_slice(&bytes)?)
    }
}
