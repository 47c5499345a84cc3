//! Discovery wire messages and record signatures.
//!
//! Signatures are secp256k1 ECDSA over the bincode encoding of
//! `(type name, signed fields)`, checked against the identity key carried in
//! the signer's record.

use serde::{Deserialize, Serialize};
use shared_crypto::{Secp256k1KeyPair, Secp256k1Signature};
use uuid::Uuid;

use crate::domain::envelope::{encode, NetMessage};
use crate::domain::errors::{DiscoveryError, EnvelopeError};
use crate::domain::node::NodeRecord;
use crate::secure::KeyExchangeResponse;

/// Ask to be admitted into the responder's registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub msg_id: Uuid,
    pub record: NodeRecord,
    pub signature: Vec<u8>,
}

impl NetMessage for RegisterNodeRequest {
    const TYPE_NAME: &'static str = "RegisterNodeRequest";
}

/// Admission result plus the responder's own record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterNodeResponse {
    pub msg_id: Uuid,
    pub accepted: bool,
    pub record: NodeRecord,
    pub signature: Vec<u8>,
}

impl NetMessage for RegisterNodeResponse {
    const TYPE_NAME: &'static str = "RegisterNodeResponse";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeListRequest {
    pub msg_id: Uuid,
}

impl NetMessage for NodeListRequest {
    const TYPE_NAME: &'static str = "NodeListRequest";
}

/// Signed peer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeListResponse {
    pub msg_id: Uuid,
    pub responder: NodeRecord,
    pub nodes: Vec<NodeRecord>,
    pub signature: Vec<u8>,
}

impl NetMessage for NodeListResponse {
    const TYPE_NAME: &'static str = "NodeListResponse";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    pub msg_id: Uuid,
    pub height: u64,
}

impl NetMessage for PingRequest {
    const TYPE_NAME: &'static str = "PingRequest";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub msg_id: Uuid,
    pub record: NodeRecord,
}

impl NetMessage for PingResponse {
    const TYPE_NAME: &'static str = "PingResponse";
}

/// Explicit leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeregisterNode {
    pub record: NodeRecord,
    pub signature: Vec<u8>,
}

impl NetMessage for DeregisterNode {
    const TYPE_NAME: &'static str = "DeregisterNode";
}

/// Correlated replies collected by [`crate::domain::PendingRequests`].
#[derive(Debug, Clone)]
pub enum Reply {
    Handshake(KeyExchangeResponse),
    Register(RegisterNodeResponse),
    NodeList(NodeListResponse),
}

// =============================================================================
// SIGNING
// =============================================================================

fn signing_bytes<T: Serialize + ?Sized>(label: &str, content: &T) -> Result<Vec<u8>, EnvelopeError> {
    encode(&(label, content))
}

/// Sign `content` under `label`.
pub fn sign<T: Serialize + ?Sized>(
    identity: &Secp256k1KeyPair,
    label: &str,
    content: &T,
) -> Result<Vec<u8>, EnvelopeError> {
    let bytes = signing_bytes(label, content)?;
    Ok(identity.sign(&bytes).as_bytes().to_vec())
}

/// Check `signature` over `content` with the identity in `signer`.
///
/// Fails if the record's address is not derived from its identity key.
pub fn verify<T: Serialize + ?Sized>(
    signer: &NodeRecord,
    label: &str,
    content: &T,
    signature: &[u8],
) -> Result<(), DiscoveryError> {
    let key = signer
        .verified_identity()
        .ok_or(DiscoveryError::IdentityMismatch)?;
    let signature = Secp256k1Signature::from_slice(signature)
        .map_err(|_| DiscoveryError::InvalidSignature(signer.address))?;
    let bytes = signing_bytes(label, content).map_err(|_| DiscoveryError::InvalidSignature(signer.address))?;
    key.verify(&bytes, &signature)
        .map_err(|_| DiscoveryError::InvalidSignature(signer.address))
}

impl RegisterNodeRequest {
    pub fn signed(
        identity: &Secp256k1KeyPair,
        msg_id: Uuid,
        record: NodeRecord,
    ) -> Result<Self, EnvelopeError> {
        let signature = sign(identity, Self::TYPE_NAME, &(msg_id, &record))?;
        Ok(Self {
            msg_id,
            record,
            signature,
        })
    }

    pub fn verify(&self) -> Result<(), DiscoveryError> {
        verify(
            &self.record,
            Self::TYPE_NAME,
            &(self.msg_id, &self.record),
            &self.signature,
        )
    }
}

impl RegisterNodeResponse {
    pub fn signed(
        identity: &Secp256k1KeyPair,
        msg_id: Uuid,
        accepted: bool,
        record: NodeRecord,
    ) -> Result<Self, EnvelopeError> {
        let signature = sign(identity, Self::TYPE_NAME, &(msg_id, accepted, &record))?;
        Ok(Self {
            msg_id,
            accepted,
            record,
            signature,
        })
    }

    pub fn verify(&self) -> Result<(), DiscoveryError> {
        verify(
            &self.record,
            Self::TYPE_NAME,
            &(self.msg_id, self.accepted, &self.record),
            &self.signature,
        )
    }
}

impl NodeListResponse {
    pub fn signed(
        identity: &Secp256k1KeyPair,
        msg_id: Uuid,
        responder: NodeRecord,
        nodes: Vec<NodeRecord>,
    ) -> Result<Self, EnvelopeError> {
        let signature = sign(identity, Self::TYPE_NAME, &(msg_id, &responder, &nodes))?;
        Ok(Self {
            msg_id,
            responder,
            nodes,
            signature,
        })
    }

    pub fn verify(&self) -> Result<(), DiscoveryError> {
        verify(
            &self.responder,
            Self::TYPE_NAME,
            &(self.msg_id, &self.responder, &self.nodes),
            &self.signature,
        )
    }
}

impl DeregisterNode {
    pub fn signed(identity: &Secp256k1KeyPair, record: NodeRecord) -> Result<Self, EnvelopeError> {
        let signature = sign(identity, Self::TYPE_NAME, &record)?;
        Ok(Self { record, signature })
    }

    pub fn verify(&self) -> Result<(), DiscoveryError> {
        verify(&self.record, Self::TYPE_NAME, &self.record, &self.signature)
    }
}
