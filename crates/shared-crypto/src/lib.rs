//! # Shared Crypto - Channel Cryptography
//!
//! Primitives used by the P2P secure channel and node identity.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `ecdh` | secp256k1 ECDH | Per-connection key agreement |
//! | `kdf` | HKDF-SHA256 | Channel key from shared secret + mixed salts |
//! | `symmetric` | AES-256-GCM (detached tag) | Message sealing |
//! | `token` | truncated HMAC-SHA256 | Cheap pre-AEAD forgery rejection |
//! | `ecdsa` | secp256k1 ECDSA | Node identity, signed peer records |
//!
//! ## Security Properties
//!
//! - Ephemeral ECDH keys per connection, never persisted
//! - Fresh random 96-bit IV per sealed message
//! - Secret material zeroized on drop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ecdh;
pub mod ecdsa;
pub mod errors;
pub mod kdf;
pub mod symmetric;
pub mod token;

// Re-exports
pub use ecdh::{EphemeralKeyPair, SharedSecret, EPHEMERAL_PUBLIC_KEY_LEN};
pub use ecdsa::{Secp256k1KeyPair, Secp256k1PublicKey, Secp256k1Signature};
pub use errors::CryptoError;
pub use kdf::{derive_channel_key, random_salt, CHANNEL_SALT_LEN};
pub use symmetric::{open, seal, Nonce, SealedMessage, SecretKey, AES_IV_LEN, AES_TAG_LEN};
pub use token::{issue_token, verify_token, ChannelToken, TOKEN_MAC_LEN, TOKEN_SALT_LEN};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
