//! # Secure Channel Manager
//!
//! Per-connection ECDH handshake and message sealing.
//!
//! ## Handshake
//!
//! ```text
//! Initiator                                   Responder
//!   | KeyExchangeRequest{pub_I, salt_I, id} -->  |  derive, store
//!   | <-- KeyExchangeResponse{pub_R, salt_R, id} |
//!   | derive, store                              |
//! ```
//!
//! Key = HKDF-SHA256(ikm = ECDH(priv, peer_pub), salt = salt_I ^ salt_R).
//!
//! ## Sealed messages
//!
//! AES-256-GCM with a fresh IV per message and the envelope type name as
//! associated data, plus a 6-byte token proving knowledge of the channel
//! key. The token is checked before any AEAD work.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared_crypto::{
    derive_channel_key, issue_token, open, random_salt, seal, verify_token, ChannelToken,
    CryptoError, EphemeralKeyPair, SecretKey, AES_IV_LEN, AES_TAG_LEN, CHANNEL_SALT_LEN,
    EPHEMERAL_PUBLIC_KEY_LEN,
};
use tracing::debug;
use uuid::Uuid;

use crate::domain::envelope::{Ciphertext, NetMessage, WireToken, CIPHER_VERSION};
use crate::domain::errors::SecureChannelError;
use crate::domain::node::ConnectionId;

// =============================================================================
// HANDSHAKE MESSAGES
// =============================================================================

/// First handshake message, sent unencrypted by the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeRequest {
    pub pub_key: Vec<u8>,
    pub salt: Vec<u8>,
    pub correlation_id: Uuid,
}

impl NetMessage for KeyExchangeRequest {
    const TYPE_NAME: &'static str = "KeyExchangeRequest";
}

/// Responder's half of the handshake, sent unencrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeResponse {
    pub pub_key: Vec<u8>,
    pub salt: Vec<u8>,
    pub correlation_id: Uuid,
}

impl NetMessage for KeyExchangeResponse {
    const TYPE_NAME: &'static str = "KeyExchangeResponse";
}

/// Type names allowed to travel unencrypted.
pub fn is_handshake_type(type_name: &str) -> bool {
    type_name == KeyExchangeRequest::TYPE_NAME || type_name == KeyExchangeResponse::TYPE_NAME
}

// =============================================================================
// KEY STATE
// =============================================================================

struct PendingHandshake {
    keypair: EphemeralKeyPair,
    salt: [u8; CHANNEL_SALT_LEN],
}

/// Established channel for one connection.
pub struct EcdhKeyState {
    own_public: [u8; EPHEMERAL_PUBLIC_KEY_LEN],
    own_salt: [u8; CHANNEL_SALT_LEN],
    peer_public: [u8; EPHEMERAL_PUBLIC_KEY_LEN],
    peer_salt: [u8; CHANNEL_SALT_LEN],
    key: SecretKey,
}

impl EcdhKeyState {
    fn establish(
        keypair: &EphemeralKeyPair,
        own_salt: [u8; CHANNEL_SALT_LEN],
        peer_public: &[u8],
        peer_salt: &[u8],
    ) -> Result<Self, SecureChannelError> {
        if peer_salt.len() != CHANNEL_SALT_LEN {
            return Err(SecureChannelError::InvalidSaltLength {
                expected: CHANNEL_SALT_LEN,
                actual: peer_salt.len(),
            });
        }
        let shared = keypair
            .shared_secret(peer_public)
            .map_err(|_| SecureChannelError::InvalidPublicKey)?;
        let key = derive_channel_key(&shared, &own_salt, peer_salt).map_err(map_crypto)?;

        let mut peer_pub = [0u8; EPHEMERAL_PUBLIC_KEY_LEN];
        peer_pub.copy_from_slice(peer_public);
        let mut peer_salt_arr = [0u8; CHANNEL_SALT_LEN];
        peer_salt_arr.copy_from_slice(peer_salt);

        Ok(Self {
            own_public: *keypair.public_bytes(),
            own_salt,
            peer_public: peer_pub,
            peer_salt: peer_salt_arr,
            key,
        })
    }

    pub fn own_public(&self) -> &[u8; EPHEMERAL_PUBLIC_KEY_LEN] {
        &self.own_public
    }

    pub fn peer_public(&self) -> &[u8; EPHEMERAL_PUBLIC_KEY_LEN] {
        &self.peer_public
    }

    pub fn own_salt(&self) -> &[u8; CHANNEL_SALT_LEN] {
        &self.own_salt
    }

    pub fn peer_salt(&self) -> &[u8; CHANNEL_SALT_LEN] {
        &self.peer_salt
    }
}

impl std::fmt::Debug for EcdhKeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyState")
            .field("own_public", &hex::encode(self.own_public))
            .field("peer_public", &hex::encode(self.peer_public))
            .finish_non_exhaustive()
    }
}

fn map_crypto(err: CryptoError) -> SecureChannelError {
    match err {
        CryptoError::InvalidPublicKey | CryptoError::InvalidKeyLength { .. } => {
            SecureChannelError::InvalidPublicKey
        }
        CryptoError::InvalidSaltLength { expected, actual } => {
            SecureChannelError::InvalidSaltLength { expected, actual }
        }
        CryptoError::InvalidNonceLength { expected, actual } => {
            SecureChannelError::InvalidFieldLength {
                field: "aes_iv",
                expected,
                actual,
            }
        }
        CryptoError::InvalidTagLength { expected, actual } => {
            SecureChannelError::InvalidFieldLength {
                field: "aes_tag",
                expected,
                actual,
            }
        }
        CryptoError::TokenMismatch => SecureChannelError::TokenMismatch,
        CryptoError::DecryptionFailed => SecureChannelError::DecryptionFailed,
        other => SecureChannelError::Crypto(other.to_string()),
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Owns every connection's handshake and key state.
#[derive(Default)]
pub struct SecureChannelManager {
    pending: RwLock<HashMap<ConnectionId, PendingHandshake>>,
    channels: RwLock<HashMap<ConnectionId, Arc<EcdhKeyState>>>,
}

impl SecureChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a handshake as initiator.
    pub fn initiate(&self, conn: ConnectionId, correlation_id: Uuid) -> KeyExchangeRequest {
        let keypair = EphemeralKeyPair::generate();
        let salt = random_salt();
        let request = KeyExchangeRequest {
            pub_key: keypair.public_bytes().to_vec(),
            salt: salt.to_vec(),
            correlation_id,
        };
        self.pending
            .write()
            .insert(conn, PendingHandshake { keypair, salt });
        request
    }

    /// Answer a handshake as responder. The channel is usable on return.
    ///
    /// A connection is keyed once; a second request on an established
    /// channel is refused and the existing key is kept.
    pub fn respond(
        &self,
        conn: ConnectionId,
        request: &KeyExchangeRequest,
    ) -> Result<KeyExchangeResponse, SecureChannelError> {
        if self.has_key(conn) {
            return Err(SecureChannelError::ChannelAlreadyEstablished(conn));
        }
        let keypair = EphemeralKeyPair::generate();
        let salt = random_salt();
        let state = EcdhKeyState::establish(&keypair, salt, &request.pub_key, &request.salt)?;

        match self.channels.write().entry(conn) {
            Entry::Occupied(_) => return Err(SecureChannelError::ChannelAlreadyEstablished(conn)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(state));
            }
        }
        debug!(%conn, "channel established as responder");

        Ok(KeyExchangeResponse {
            pub_key: keypair.public_bytes().to_vec(),
            salt: salt.to_vec(),
            correlation_id: request.correlation_id,
        })
    }

    /// Finish a handshake this side initiated.
    pub fn complete(
        &self,
        conn: ConnectionId,
        response: &KeyExchangeResponse,
    ) -> Result<(), SecureChannelError> {
        let pending = self
            .pending
            .write()
            .remove(&conn)
            .ok_or(SecureChannelError::NoPendingHandshake(conn))?;

        let state =
            EcdhKeyState::establish(&pending.keypair, pending.salt, &response.pub_key, &response.salt)?;

        self.channels.write().insert(conn, Arc::new(state));
        debug!(%conn, "channel established as initiator");
        Ok(())
    }

    fn channel(&self, conn: ConnectionId) -> Result<Arc<EcdhKeyState>, SecureChannelError> {
        self.channels
            .read()
            .get(&conn)
            .cloned()
            .ok_or(SecureChannelError::NoChannel(conn))
    }

    /// Seal a plaintext body for `conn`.
    pub fn seal(
        &self,
        conn: ConnectionId,
        type_name: &str,
        plaintext: &[u8],
    ) -> Result<Ciphertext, SecureChannelError> {
        let state = self.channel(conn)?;
        let sealed = seal(&state.key, type_name.as_bytes(), plaintext).map_err(map_crypto)?;
        let token = issue_token(&state.key, &state.own_public);

        Ok(Ciphertext {
            cipher_version: CIPHER_VERSION,
            aes_iv: sealed.iv.to_vec(),
            aes_tag: sealed.tag.to_vec(),
            ciphertext: sealed.ciphertext,
            token: WireToken {
                salt: token.salt,
                hmac: token.mac,
            },
        })
    }

    /// Check the token, then authenticate and decrypt.
    pub fn open(
        &self,
        conn: ConnectionId,
        type_name: &str,
        ciphertext: &Ciphertext,
    ) -> Result<Vec<u8>, SecureChannelError> {
        if ciphertext.cipher_version != CIPHER_VERSION {
            return Err(SecureChannelError::UnsupportedCipher(ciphertext.cipher_version));
        }
        if ciphertext.aes_iv.len() != AES_IV_LEN {
            return Err(SecureChannelError::InvalidFieldLength {
                field: "aes_iv",
                expected: AES_IV_LEN,
                actual: ciphertext.aes_iv.len(),
            });
        }
        if ciphertext.aes_tag.len() != AES_TAG_LEN {
            return Err(SecureChannelError::InvalidFieldLength {
                field: "aes_tag",
                expected: AES_TAG_LEN,
                actual: ciphertext.aes_tag.len(),
            });
        }

        let state = self.channel(conn)?;
        let token = ChannelToken {
            salt: ciphertext.token.salt,
            mac: ciphertext.token.hmac,
        };
        verify_token(&state.key, &state.peer_public, &token).map_err(map_crypto)?;

        open(
            &state.key,
            type_name.as_bytes(),
            &ciphertext.aes_iv,
            &ciphertext.aes_tag,
            &ciphertext.ciphertext,
        )
        .map_err(map_crypto)
    }

    pub fn has_key(&self, conn: ConnectionId) -> bool {
        self.channels.read().contains_key(&conn)
    }

    pub fn has_pending(&self, conn: ConnectionId) -> bool {
        self.pending.read().contains_key(&conn)
    }

    /// Forget all state for `conn`. Returns whether anything was removed.
    pub fn remove(&self, conn: ConnectionId) -> bool {
        let had_pending = self.pending.write().remove(&conn).is_some();
        let had_channel = self.channels.write().remove(&conn).is_some();
        had_pending || had_channel
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

#[cfg(test)]
mod tests;
