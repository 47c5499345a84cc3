//! # Node Identity Signatures (secp256k1 ECDSA)
//!
//! Long-lived node identity keys. Discovery signs node-list payloads with
//! these keys; the receiver verifies against the identity public key it
//! already knows for the responding peer.
//!
//! - RFC 6979 deterministic nonces
//! - Node address = SHA-256 of the compressed public key

use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use sha2::{Digest, Sha256};

use crate::CryptoError;

/// Length of a compressed identity public key.
pub const IDENTITY_PUBLIC_KEY_LEN: usize = 33;

/// Length of a compact (r || s) signature.
pub const SIGNATURE_LEN: usize = 64;

/// Compressed secp256k1 public key (33 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Secp256k1PublicKey([u8; IDENTITY_PUBLIC_KEY_LEN]);

impl Secp256k1PublicKey {
    /// Parse from a byte slice received off the wire.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != IDENTITY_PUBLIC_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: IDENTITY_PUBLIC_KEY_LEN,
                actual: bytes.len(),
            });
        }
        VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        let mut out = [0u8; IDENTITY_PUBLIC_KEY_LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; IDENTITY_PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Verify `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Secp256k1Signature) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = Signature::from_slice(&signature.0).map_err(|_| CryptoError::InvalidSignature)?;

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// 32-byte node address: SHA-256 of the compressed key.
    pub fn node_address(&self) -> [u8; 32] {
        Sha256::digest(self.0).into()
    }
}

/// ECDSA signature (64 bytes, r || s).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Secp256k1Signature([u8; SIGNATURE_LEN]);

impl Secp256k1Signature {
    /// Parse from a byte slice received off the wire.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(CryptoError::InvalidSignature);
        }
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

/// Node identity key pair.
pub struct Secp256k1KeyPair {
    signing_key: SigningKey,
}

impl Secp256k1KeyPair {
    /// Generate a random identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Load from 32 secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Load from a hex string (as found in config or environment).
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let trimmed = hex_key.trim().trim_start_matches("0x");
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(trimmed, &mut bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Self::from_bytes(bytes)
    }

    /// Compressed public key.
    pub fn public_key(&self) -> Secp256k1PublicKey {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; IDENTITY_PUBLIC_KEY_LEN];
        bytes.copy_from_slice(point.as_bytes());
        Secp256k1PublicKey(bytes)
    }

    /// Sign a message (deterministic RFC 6979).
    pub fn sign(&self, message: &[u8]) -> Secp256k1Signature {
        let sig: Signature = self.signing_key.sign(message);
        Secp256k1Signature(sig.to_bytes().into())
    }
}

impl std::fmt::Debug for Secp256k1KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secp256k1KeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = Secp256k1KeyPair::generate();
        let signature = keypair.sign(b"node list");
        assert!(keypair.public_key().verify(b"node list", &signature).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let keypair = Secp256k1KeyPair::generate();
        let signature = keypair.sign(b"message1");
        assert_eq!(
            keypair.public_key().verify(b"message2", &signature),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_other_key_fails() {
        let signer = Secp256k1KeyPair::generate();
        let other = Secp256k1KeyPair::generate();
        let signature = signer.sign(b"payload");
        assert!(other.public_key().verify(b"payload", &signature).is_err());
    }

    #[test]
    fn test_deterministic_signatures() {
        let keypair = Secp256k1KeyPair::from_bytes([0xABu8; 32]).unwrap();
        assert_eq!(keypair.sign(b"x"), keypair.sign(b"x"));
    }

    #[test]
    fn test_node_address_stable() {
        let keypair = Secp256k1KeyPair::from_bytes([0x11u8; 32]).unwrap();
        let pubkey = keypair.public_key();
        assert_eq!(pubkey.node_address(), pubkey.node_address());
        assert_ne!(
            pubkey.node_address(),
            Secp256k1KeyPair::generate().public_key().node_address()
        );
    }

    #[test]
    fn test_from_hex() {
        let hex_key = "ab".repeat(32);
        let a = Secp256k1KeyPair::from_hex(&hex_key).unwrap();
        let b = Secp256k1KeyPair::from_bytes([0xABu8; 32]).unwrap();
        assert_eq!(a.public_key(), b.public_key());

        assert!(Secp256k1KeyPair::from_hex("zz").is_err());
        assert!(Secp256k1KeyPair::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_public_key_from_slice() {
        let pubkey = Secp256k1KeyPair::generate().public_key();
        let parsed = Secp256k1PublicKey::from_slice(pubkey.as_bytes()).unwrap();
        assert_eq!(parsed, pubkey);

        assert!(Secp256k1PublicKey::from_slice(&[0x02; 32]).is_err());
        assert!(Secp256k1PublicKey::from_slice(&[0x07; 33]).is_err());
    }

    #[test]
    fn test_signature_from_slice_length() {
        assert!(Secp256k1Signature::from_slice(&[0u8; 63]).is_err());
        assert!(Secp256k1Signature::from_slice(&[0u8; 64]).is_ok());
    }
}
