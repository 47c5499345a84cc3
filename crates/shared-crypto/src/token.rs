//! # Channel Tokens
//!
//! A 6-byte token attached to every sealed message: 3 random salt bytes and
//! the first 3 bytes of `HMAC-SHA256(channel_key, salt || sender_pubkey)`.
//! The receiver recomputes it with the peer key it stored at handshake time
//! and drops mismatches before paying for AEAD verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::symmetric::SecretKey;
use crate::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Token salt length in bytes.
pub const TOKEN_SALT_LEN: usize = 3;

/// Truncated MAC length in bytes.
pub const TOKEN_MAC_LEN: usize = 3;

/// Short HMAC token bound to the sender's channel public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelToken {
    /// Random per-message salt
    pub salt: [u8; TOKEN_SALT_LEN],
    /// Truncated HMAC
    pub mac: [u8; TOKEN_MAC_LEN],
}

fn keyed_mac(key: &SecretKey, salt: &[u8], sender_public: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail for a 32-byte key.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(salt);
    mac.update(sender_public);
    mac
}

/// Issue a token for a message sent by the holder of `sender_public`.
pub fn issue_token(key: &SecretKey, sender_public: &[u8]) -> ChannelToken {
    let mut salt = [0u8; TOKEN_SALT_LEN];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);

    let digest = keyed_mac(key, &salt, sender_public).finalize().into_bytes();
    let mut mac = [0u8; TOKEN_MAC_LEN];
    mac.copy_from_slice(&digest[..TOKEN_MAC_LEN]);

    ChannelToken { salt, mac }
}

/// Verify a token claimed to come from the holder of `sender_public`.
///
/// # Errors
///
/// Returns `CryptoError::TokenMismatch` if the token does not verify.
pub fn verify_token(
    key: &SecretKey,
    sender_public: &[u8],
    token: &ChannelToken,
) -> Result<(), CryptoError> {
    keyed_mac(key, &token.salt, sender_public)
        .verify_truncated_left(&token.mac)
        .map_err(|_| CryptoError::TokenMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_verify() {
        let key = SecretKey::generate();
        let sender = [0x02u8; 33];
        let token = issue_token(&key, &sender);
        assert!(verify_token(&key, &sender, &token).is_ok());
    }

    #[test]
    fn test_wrong_sender_rejected() {
        let key = SecretKey::generate();
        let token = issue_token(&key, &[0x02u8; 33]);
        assert_eq!(
            verify_token(&key, &[0x03u8; 33], &token),
            Err(CryptoError::TokenMismatch)
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sender = [0x02u8; 33];
        let token = issue_token(&SecretKey::generate(), &sender);
        assert!(verify_token(&SecretKey::generate(), &sender, &token).is_err());
    }

    #[test]
    fn test_tampered_salt_rejected() {
        let key = SecretKey::generate();
        let sender = [0x02u8; 33];
        let mut token = issue_token(&key, &sender);
        token.salt[0] ^= 0x01;
        assert!(verify_token(&key, &sender, &token).is_err());
    }
}
