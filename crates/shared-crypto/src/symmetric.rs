//! # Symmetric Encryption
//!
//! AES-256-GCM with a detached 16-byte tag and a random 12-byte IV per
//! message. The IV, tag and ciphertext travel as separate fields so the
//! receiver can validate their lengths before touching the cipher.
//!
//! ## Security Properties
//!
//! - Never reuse (key, IV): every `seal` draws a fresh random IV
//! - Any bit flip in IV, tag, ciphertext or associated data fails closed

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce as GcmNonce, Tag};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// AES-GCM IV length in bytes.
pub const AES_IV_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const AES_TAG_LEN: usize = 16;

/// Secret key (256-bit).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Get inner bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Nonce (IV) for encryption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; AES_IV_LEN]);

impl Nonce {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; AES_IV_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_IV_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Get inner bytes.
    pub fn as_bytes(&self) -> &[u8; AES_IV_LEN] {
        &self.0
    }
}

/// Output of [`seal`]: IV, detached tag and ciphertext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedMessage {
    /// Random IV used for this message
    pub iv: [u8; AES_IV_LEN],
    /// GCM authentication tag
    pub tag: [u8; AES_TAG_LEN],
    /// Ciphertext (same length as the plaintext)
    pub ciphertext: Vec<u8>,
}

fn cipher(key: &SecretKey) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 32,
        actual: key.as_bytes().len(),
    })
}

/// Encrypt plaintext with AES-256-GCM.
///
/// `aad` is authenticated but not encrypted.
///
/// # Errors
///
/// Returns `CryptoError::EncryptionFailed` if encryption fails.
pub fn seal(key: &SecretKey, aad: &[u8], plaintext: &[u8]) -> Result<SealedMessage, CryptoError> {
    let nonce = Nonce::generate();
    let mut buffer = plaintext.to_vec();

    let tag = cipher(key)?
        .encrypt_in_place_detached(GcmNonce::from_slice(nonce.as_bytes()), aad, &mut buffer)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut tag_bytes = [0u8; AES_TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(SealedMessage {
        iv: *nonce.as_bytes(),
        tag: tag_bytes,
        ciphertext: buffer,
    })
}

/// Decrypt and authenticate a sealed message.
///
/// Lengths of `iv` and `tag` are validated before any cipher work.
///
/// # Errors
///
/// - `InvalidNonceLength` / `InvalidTagLength` on malformed fields
/// - `DecryptionFailed` if authentication fails
pub fn open(
    key: &SecretKey,
    aad: &[u8],
    iv: &[u8],
    tag: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != AES_IV_LEN {
        return Err(CryptoError::InvalidNonceLength {
            expected: AES_IV_LEN,
            actual: iv.len(),
        });
    }
    if tag.len() != AES_TAG_LEN {
        return Err(CryptoError::InvalidTagLength {
            expected: AES_TAG_LEN,
            actual: tag.len(),
        });
    }

    let mut buffer = ciphertext.to_vec();
    cipher(key)?
        .decrypt_in_place_detached(
            GcmNonce::from_slice(iv),
            aad,
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    Ok(buffer)
}
