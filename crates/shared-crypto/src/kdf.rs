//! # Channel Key Derivation
//!
//! HKDF-SHA256 over the ECDH shared secret. The HKDF salt is the XOR of
//! both sides' handshake salts, so initiator and responder derive the same
//! key regardless of which salt is "own" and which is "peer".

use hkdf::Hkdf;
use sha2::Sha256;

use crate::symmetric::SecretKey;
use crate::CryptoError;

/// Handshake salt length in bytes.
pub const CHANNEL_SALT_LEN: usize = 32;

/// HKDF info label, binds derived keys to this protocol and cipher.
const CHANNEL_KEY_INFO: &[u8] = b"quantum-chain/p2p/aes-256-gcm/v1";

/// Generate a random handshake salt.
pub fn random_salt() -> [u8; CHANNEL_SALT_LEN] {
    let mut salt = [0u8; CHANNEL_SALT_LEN];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
    salt
}

/// Derive the AES-256 channel key.
///
/// # Errors
///
/// - `InvalidSaltLength` if either salt is not `CHANNEL_SALT_LEN` bytes
/// - `KeyDerivationFailed` if HKDF expansion fails
pub fn derive_channel_key(
    shared_secret: &[u8; 32],
    own_salt: &[u8],
    peer_salt: &[u8],
) -> Result<SecretKey, CryptoError> {
    for salt in [own_salt, peer_salt] {
        if salt.len() != CHANNEL_SALT_LEN {
            return Err(CryptoError::InvalidSaltLength {
                expected: CHANNEL_SALT_LEN,
                actual: salt.len(),
            });
        }
    }

    let mut mixed = [0u8; CHANNEL_SALT_LEN];
    for (i, byte) in mixed.iter_mut().enumerate() {
        *byte = own_salt[i] ^ peer_salt[i];
    }

    let hk = Hkdf::<Sha256>::new(Some(&mixed), shared_secret);
    let mut key = [0u8; 32];
    hk.expand(CHANNEL_KEY_INFO, &mut key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    Ok(SecretKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salt_order_does_not_matter() {
        let secret = [7u8; 32];
        let a = random_salt();
        let b = random_salt();

        let k1 = derive_channel_key(&secret, &a, &b).unwrap();
        let k2 = derive_channel_key(&secret, &b, &a).unwrap();

        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_different_secret_different_key() {
        let a = random_salt();
        let b = random_salt();

        let k1 = derive_channel_key(&[1u8; 32], &a, &b).unwrap();
        let k2 = derive_channel_key(&[2u8; 32], &a, &b).unwrap();

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_short_salt_rejected() {
        let result = derive_channel_key(&[0u8; 32], &[0u8; 16], &random_salt());
        assert_eq!(
            result.err(),
            Some(CryptoError::InvalidSaltLength {
                expected: 32,
                actual: 16
            })
        );
    }

    #[test]
    fn test_known_vector_is_stable() {
        let k1 = derive_channel_key(&[0xAB; 32], &[0x01; 32], &[0x10; 32]).unwrap();
        let k2 = derive_channel_key(&[0xAB; 32], &[0x11; 32], &[0x00; 32]).unwrap();
        // Same XOR of salts -> same key
        assert_eq!(hex::encode(k1.as_bytes()), hex::encode(k2.as_bytes()));
    }
}
