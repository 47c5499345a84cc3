//! # Ephemeral ECDH (secp256k1)
//!
//! Per-connection key agreement. Each side generates a fresh key pair,
//! exchanges compressed public keys, and computes the same 32-byte shared
//! secret from its own private scalar and the peer's point.

use k256::ecdh::diffie_hellman;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey as K256SecretKey};
use zeroize::Zeroizing;

use crate::CryptoError;

/// Length of a compressed SEC1 public key.
pub const EPHEMERAL_PUBLIC_KEY_LEN: usize = 33;

/// Raw ECDH output (x-coordinate of the shared point).
pub type SharedSecret = Zeroizing<[u8; 32]>;

/// Ephemeral secp256k1 key pair used for one connection's handshake.
pub struct EphemeralKeyPair {
    secret: K256SecretKey,
    public: [u8; EPHEMERAL_PUBLIC_KEY_LEN],
}

impl EphemeralKeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let secret = K256SecretKey::random(&mut rand::thread_rng());
        let mut public = [0u8; EPHEMERAL_PUBLIC_KEY_LEN];
        public.copy_from_slice(secret.public_key().to_encoded_point(true).as_bytes());
        Self { secret, public }
    }

    /// Compressed public key to send to the peer.
    pub fn public_bytes(&self) -> &[u8; EPHEMERAL_PUBLIC_KEY_LEN] {
        &self.public
    }

    /// Compute the shared secret with a peer's compressed public key.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if `peer_public` is not 33 bytes
    /// - `InvalidPublicKey` if it is not a valid curve point
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        let peer = parse_public_key(peer_public)?;
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Validate and decode a compressed SEC1 public key.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if bytes.len() != EPHEMERAL_PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: EPHEMERAL_PUBLIC_KEY_LEN,
            actual: bytes.len(),
        });
    }
    PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_agree() {
        let alice = EphemeralKeyPair::generate();
        let bob = EphemeralKeyPair::generate();

        let ab = alice.shared_secret(bob.public_bytes()).unwrap();
        let ba = bob.shared_secret(alice.public_bytes()).unwrap();

        assert_eq!(*ab, *ba);
    }

    #[test]
    fn test_different_peers_different_secrets() {
        let alice = EphemeralKeyPair::generate();
        let bob = EphemeralKeyPair::generate();
        let carol = EphemeralKeyPair::generate();

        let ab = alice.shared_secret(bob.public_bytes()).unwrap();
        let ac = alice.shared_secret(carol.public_bytes()).unwrap();

        assert_ne!(*ab, *ac);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let alice = EphemeralKeyPair::generate();
        let result = alice.shared_secret(&[0x02; 32]);
        assert_eq!(
            result.unwrap_err(),
            CryptoError::InvalidKeyLength {
                expected: 33,
                actual: 32
            }
        );
    }

    #[test]
    fn test_invalid_point_rejected() {
        let alice = EphemeralKeyPair::generate();
        // 0x05 is not a valid SEC1 tag
        let result = alice.shared_secret(&[0x05; 33]);
        assert_eq!(result.unwrap_err(), CryptoError::InvalidPublicKey);
    }

    #[test]
    fn test_public_key_is_compressed() {
        let pair = EphemeralKeyPair::generate();
        let tag = pair.public_bytes()[0];
        assert!(tag == 0x02 || tag == 0x03);
    }
}
