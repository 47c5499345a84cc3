use super::*;

const A: ConnectionId = ConnectionId(1);
const B: ConnectionId = ConnectionId(2);

/// Initiator on `A`, responder on `B`, as if `A` and `B` were the two ends
/// of one socket.
fn handshake() -> (SecureChannelManager, SecureChannelManager) {
    let initiator = SecureChannelManager::new();
    let responder = SecureChannelManager::new();

    let request = initiator.initiate(A, Uuid::new_v4());
    let response = responder.respond(B, &request).unwrap();
    initiator.complete(A, &response).unwrap();

    (initiator, responder)
}

// =============================================================================
// HANDSHAKE
// =============================================================================

#[test]
fn test_handshake_is_symmetric() {
    let (initiator, responder) = handshake();

    let i = initiator.channel(A).unwrap();
    let r = responder.channel(B).unwrap();

    assert_eq!(i.key.as_bytes(), r.key.as_bytes());
    assert_eq!(i.own_public(), r.peer_public());
    assert_eq!(i.peer_public(), r.own_public());
    assert_eq!(i.own_salt(), r.peer_salt());
    assert!(!initiator.has_pending(A));
}

#[test]
fn test_request_shape() {
    let manager = SecureChannelManager::new();
    let id = Uuid::new_v4();
    let request = manager.initiate(A, id);

    assert_eq!(request.pub_key.len(), 33);
    assert_eq!(request.salt.len(), 32);
    assert_eq!(request.correlation_id, id);
    assert!(manager.has_pending(A));
    assert!(!manager.has_key(A));
}

#[test]
fn test_malformed_key_stores_nothing() {
    let responder = SecureChannelManager::new();
    let request = KeyExchangeRequest {
        pub_key: vec![0x04; 20],
        salt: vec![0; 32],
        correlation_id: Uuid::new_v4(),
    };
    assert_eq!(
        responder.respond(B, &request),
        Err(SecureChannelError::InvalidPublicKey)
    );
    assert!(!responder.has_key(B));
}

#[test]
fn test_short_salt_rejected() {
    let initiator = SecureChannelManager::new();
    let responder = SecureChannelManager::new();
    let mut request = initiator.initiate(A, Uuid::new_v4());
    request.salt.truncate(16);

    assert_eq!(
        responder.respond(B, &request),
        Err(SecureChannelError::InvalidSaltLength {
            expected: 32,
            actual: 16
        })
    );
    assert!(!responder.has_key(B));
}

#[test]
fn test_response_without_pending_initiator() {
    let responder = SecureChannelManager::new();
    let stray = SecureChannelManager::new();
    let request = stray.initiate(A, Uuid::new_v4());
    let response = responder.respond(B, &request).unwrap();

    let other = SecureChannelManager::new();
    assert_eq!(
        other.complete(A, &response),
        Err(SecureChannelError::NoPendingHandshake(A))
    );
}

#[test]
fn test_established_channel_cannot_be_rekeyed() {
    let (initiator, responder) = handshake();
    let before = responder.channel(B).unwrap().key.as_bytes().to_vec();

    let intruder = SecureChannelManager::new();
    let forged = intruder.initiate(ConnectionId(9), Uuid::new_v4());
    assert!(matches!(
        responder.respond(B, &forged),
        Err(SecureChannelError::ChannelAlreadyEstablished(c)) if c == B
    ));
    assert_eq!(responder.channel(B).unwrap().key.as_bytes(), before.as_slice());

    // The real peer's traffic still opens
    let sealed = initiator.seal(A, "Block", b"still mine").unwrap();
    assert_eq!(responder.open(B, "Block", &sealed).unwrap(), b"still mine");
}

// =============================================================================
// SEAL / OPEN
// =============================================================================

#[test]
fn test_seal_open_both_directions() {
    let (initiator, responder) = handshake();

    let ct = initiator.seal(A, "Block", b"block bytes").unwrap();
    assert_eq!(responder.open(B, "Block", &ct).unwrap(), b"block bytes");

    let ct = responder.seal(B, "Vote", b"vote bytes").unwrap();
    assert_eq!(initiator.open(A, "Vote", &ct).unwrap(), b"vote bytes");
}

#[test]
fn test_relabelled_type_fails() {
    let (initiator, responder) = handshake();
    let ct = initiator.seal(A, "Block", b"payload").unwrap();
    assert_eq!(
        responder.open(B, "Transaction", &ct),
        Err(SecureChannelError::DecryptionFailed)
    );
}

#[test]
fn test_tampered_ciphertext_tag_and_iv_fail() {
    let (initiator, responder) = handshake();
    let ct = initiator.seal(A, "Block", b"payload").unwrap();

    let mut bad = ct.clone();
    bad.ciphertext[0] ^= 1;
    assert!(responder.open(B, "Block", &bad).is_err());

    let mut bad = ct.clone();
    bad.aes_tag[15] ^= 1;
    assert!(responder.open(B, "Block", &bad).is_err());

    let mut bad = ct;
    bad.aes_iv[0] ^= 1;
    assert!(responder.open(B, "Block", &bad).is_err());
}

#[test]
fn test_token_checked_before_aead() {
    let (initiator, responder) = handshake();
    let mut ct = initiator.seal(A, "Block", b"payload").unwrap();
    ct.token.salt[0] ^= 0xFF;
    ct.token.hmac[0] ^= 0xFF;
    assert_eq!(
        responder.open(B, "Block", &ct),
        Err(SecureChannelError::TokenMismatch)
    );
}

#[test]
fn test_field_lengths_validated() {
    let (initiator, responder) = handshake();
    let ct = initiator.seal(A, "Block", b"payload").unwrap();

    let mut bad = ct.clone();
    bad.aes_iv.push(0);
    assert!(matches!(
        responder.open(B, "Block", &bad),
        Err(SecureChannelError::InvalidFieldLength { field: "aes_iv", .. })
    ));

    let mut bad = ct.clone();
    bad.aes_tag.pop();
    assert!(matches!(
        responder.open(B, "Block", &bad),
        Err(SecureChannelError::InvalidFieldLength { field: "aes_tag", .. })
    ));

    let mut bad = ct;
    bad.cipher_version = 9;
    assert_eq!(
        responder.open(B, "Block", &bad),
        Err(SecureChannelError::UnsupportedCipher(9))
    );
}

#[test]
fn test_no_channel_and_remove() {
    let (initiator, _) = handshake();
    assert!(matches!(
        initiator.seal(B, "Block", b"x"),
        Err(SecureChannelError::NoChannel(_))
    ));

    assert!(initiator.has_key(A));
    assert!(initiator.remove(A));
    assert!(!initiator.has_key(A));
    assert!(!initiator.remove(A));
}

#[test]
fn test_handshake_types() {
    assert!(is_handshake_type("KeyExchangeRequest"));
    assert!(is_handshake_type("KeyExchangeResponse"));
    assert!(!is_handshake_type("Block"));
}
