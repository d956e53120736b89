use super::*;

fn fixed_identity(fill: u8) -> Identity {
    let mut bytes = [fill; 32];
    bytes[0] = 1; // keep within curve order
    Identity::from_secret_bytes(&bytes).unwrap()
}

#[test]
fn test_generate_identity() {
    let identity = Identity::generate();
    assert!(identity.address().is_valid());
    assert!(!identity.wpub().is_empty());
}

#[test]
fn test_identity_deterministic_from_secret() {
    let a = fixed_identity(0x42);
    let b = fixed_identity(0x42);
    assert_eq!(a.address(), b.address());
    assert_eq!(a.public().hash(), b.public().hash());
}

#[test]
fn test_distinct_secrets_distinct_addresses() {
    let a = fixed_identity(0x42);
    let b = fixed_identity(0x43);
    assert_ne!(a.address(), b.address());
}

#[test]
fn test_address_from_u64_roundtrip() {
    let addr = Address::from_u64(0x1122334455);
    assert_eq!(addr.to_u64(), 0x1122334455);
    assert_eq!(addr.as_bytes(), &[0x11, 0x22, 0x33, 0x44, 0x55]);
}

#[test]
fn test_address_reserved_prefix_rejected() {
    assert!(Address::from_bytes([0xff, 0, 0, 0, 1]).is_err());
    assert!(Address::from_slice(&[0xff, 1, 2, 3, 4]).is_err());
}

#[test]
fn test_address_nil() {
    assert!(Address::NIL.is_nil());
    assert!(!Address::NIL.is_valid());
    assert!(Address::from_u64(1).is_valid());
}

#[test]
fn test_address_display() {
    let addr = Address::from_u64(0x0a000005ff);
    assert_eq!(addr.to_string(), "0a000005ff");
}

#[test]
fn test_identity_hash_is_sha384_of_pubkey() {
    let identity = fixed_identity(7);
    let expected = sha384(&identity.pubkey().serialize());
    assert_eq!(identity.public().hash().as_bytes(), &expected);
}

#[test]
fn test_derived_address_never_reserved() {
    // Address derivation grinds past reserved prefixes; whatever the key,
    // the result must be valid on the wire.
    for fill in 1..64u8 {
        let identity = fixed_identity(fill);
        assert!(identity.address().is_valid(), "fill {}", fill);
    }
}

#[test]
fn test_wpub_roundtrip() {
    let identity = fixed_identity(9);
    let wpub = identity.wpub();
    assert!(wpub.starts_with("wpub1"));
    let peer = PeerIdentity::from_wpub(&wpub).unwrap();
    assert_eq!(peer.address(), identity.address());
}

#[test]
fn test_wsec_roundtrip() {
    let identity = fixed_identity(11);
    let wsec = identity.wsec();
    assert!(wsec.starts_with("wsec1"));
    let restored = Identity::from_secret_str(&wsec).unwrap();
    assert_eq!(restored.address(), identity.address());
}

#[test]
fn test_hex_secret_accepted() {
    let hex = "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20";
    let identity = Identity::from_secret_str(hex).unwrap();
    assert!(identity.address().is_valid());
}

#[test]
fn test_decode_wpub_rejects_wrong_hrp() {
    let identity = fixed_identity(3);
    let wsec = identity.wsec();
    assert!(decode_wpub(&wsec).is_err());
}

#[test]
fn test_identity_marshal_roundtrip() {
    let identity = fixed_identity(5);
    let mut buf = Vec::new();
    let written = identity.public().marshal(&mut buf);
    assert_eq!(written, IDENTITY_MARSHAL_SIZE);
    assert_eq!(buf.len(), IDENTITY_MARSHAL_SIZE);

    let (parsed, consumed) = PeerIdentity::unmarshal(&buf).unwrap();
    assert_eq!(consumed, IDENTITY_MARSHAL_SIZE);
    assert_eq!(parsed.address(), identity.address());
    assert_eq!(parsed.hash(), identity.public().hash());
}

#[test]
fn test_identity_unmarshal_rejects_short_and_bad_type() {
    assert!(PeerIdentity::unmarshal(&[1, 2, 3]).is_err());
    let identity = fixed_identity(5);
    let mut buf = Vec::new();
    identity.public().marshal(&mut buf);
    buf[0] = 0x7f;
    assert!(PeerIdentity::unmarshal(&buf).is_err());
}

#[test]
fn test_sign_verify() {
    let identity = fixed_identity(13);
    let sig = identity.sign(b"frame body");
    assert!(identity.public().verify(b"frame body", &sig));
    assert!(!identity.public().verify(b"other body", &sig));
}

#[test]
fn test_verify_rejects_wrong_signer() {
    let a = fixed_identity(13);
    let b = fixed_identity(14);
    let sig = a.sign(b"frame body");
    assert!(!b.public().verify(b"frame body", &sig));
}

#[test]
fn test_agree_is_symmetric() {
    let a = fixed_identity(21);
    let b = fixed_identity(22);
    let ab = a.agree(b.public());
    let ba = b.agree(a.public());
    assert_eq!(ab.crypt, ba.crypt);
    assert_eq!(ab.mac, ba.mac);
    assert_eq!(ab.probe(), ba.probe());
}

#[test]
fn test_agree_distinct_pairs_distinct_keys() {
    let a = fixed_identity(21);
    let b = fixed_identity(22);
    let c = fixed_identity(23);
    let ab = a.agree(b.public());
    let ac = a.agree(c.public());
    assert_ne!(ab.crypt, ac.crypt);
    assert_ne!(ab.mac, ac.mac);
}

#[test]
fn test_crypt_and_mac_keys_differ() {
    let a = fixed_identity(21);
    let b = fixed_identity(22);
    let keys = a.agree(b.public());
    assert_ne!(keys.crypt, keys.mac);
}
