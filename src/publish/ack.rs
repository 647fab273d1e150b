//! Write acknowledgments and certificates.
//!
//! A storage node that has durably stored a blob returns a [`WriteAck`]: an
//! Ed25519 signature over `(blob_id, node_id, epoch)` made with the node's
//! key. The writer only counts acknowledgments that verify against the
//! node's published public key. The certifier aggregates the acknowledgments
//! of one blob into a [`Certificate`] which the ledger checks before marking
//! the blob certified.
//!
//! ## Message Format
//!
//! ```text
//! "blobsite-write-ack-v1" || blob_id (32) || len(node_id) (u32 le) || node_id || epoch (u64 le)
//! ```

use super::blob::BlobId;
use crate::network::traits::NodeId;
use crate::serialization::hex_bytes;
use ring::signature::{Ed25519KeyPair, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

const ACK_DOMAIN: &[u8] = b"blobsite-write-ack-v1";

/// Errors that can occur while checking acknowledgments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AckError {
    #[error("Signature verification failed for node {0}")]
    SignatureVerificationFailed(NodeId),

    #[error("Acknowledgment from {node} is for blob {actual}, expected {expected}")]
    BlobMismatch {
        node: NodeId,
        expected: BlobId,
        actual: BlobId,
    },

    #[error("Acknowledgment from {node} is for epoch {actual}, expected {expected}")]
    EpochMismatch {
        node: NodeId,
        expected: u64,
        actual: u64,
    },

    #[error("Certificate has no signers")]
    EmptyCertificate,
}

/// Signed receipt from a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    pub blob_id: BlobId,

    pub node_id: NodeId,

    pub epoch: u64,

    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl WriteAck {
    /// Create an acknowledgment on the node side.
    pub fn sign(blob_id: BlobId, node_id: NodeId, epoch: u64, key_pair: &Ed25519KeyPair) -> Self {
        let message = ack_message(&blob_id, &node_id, epoch);
        let signature = key_pair.sign(&message).as_ref().to_vec();
        Self {
            blob_id,
            node_id,
            epoch,
            signature,
        }
    }

    /// Verify the signature with the node's Ed25519 public key.
    pub fn verify(&self, public_key: &[u8]) -> Result<(), AckError> {
        let message = ack_message(&self.blob_id, &self.node_id, self.epoch);
        UnparsedPublicKey::new(&ED25519, public_key)
            .verify(&message, &self.signature)
            .map_err(|_| AckError::SignatureVerificationFailed(self.node_id.clone()))
    }
}

fn ack_message(blob_id: &BlobId, node_id: &NodeId, epoch: u64) -> Vec<u8> {
    let node = node_id.0.as_bytes();
    let mut message = Vec::with_capacity(ACK_DOMAIN.len() + 32 + 4 + node.len() + 8);
    message.extend_from_slice(ACK_DOMAIN);
    message.extend_from_slice(blob_id.as_bytes());
    message.extend_from_slice(&(node.len() as u32).to_le_bytes());
    message.extend_from_slice(node);
    message.extend_from_slice(&epoch.to_le_bytes());
    message
}

/// Aggregated proof that a set of nodes stored a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub blob_id: BlobId,

    pub epoch: u64,

    pub acks: Vec<WriteAck>,
}

impl Certificate {
    /// Aggregate the acknowledgments of one blob.
    ///
    /// Every ack must name `blob_id` and `epoch`; duplicates from the same
    /// node are collapsed.
    pub fn aggregate<'a>(
        blob_id: BlobId,
        epoch: u64,
        acks: impl IntoIterator<Item = &'a WriteAck>,
    ) -> Result<Self, AckError> {
        let mut seen = BTreeSet::new();
        let mut collected = Vec::new();

        for ack in acks {
            if ack.blob_id != blob_id {
                return Err(AckError::BlobMismatch {
                    node: ack.node_id.clone(),
                    expected: blob_id,
                    actual: ack.blob_id,
                });
            }
            if ack.epoch != epoch {
                return Err(AckError::EpochMismatch {
                    node: ack.node_id.clone(),
                    expected: epoch,
                    actual: ack.epoch,
                });
            }
            if seen.insert(ack.node_id.clone()) {
                collected.push(ack.clone());
            }
        }

        if collected.is_empty() {
            return Err(AckError::EmptyCertificate);
        }

        Ok(Self {
            blob_id,
            epoch,
            acks: collected,
        })
    }

    pub fn signers(&self) -> impl Iterator<Item = &NodeId> {
        self.acks.iter().map(|a| &a.node_id)
    }

    /// Number of signers whose acknowledgment verifies with the key returned
    /// by `public_key`.
    pub fn valid_signers<'a, F>(&self, public_key: F) -> usize
    where
        F: Fn(&NodeId) -> Option<&'a [u8]>,
    {
        self.acks
            .iter()
            .filter(|ack| {
                public_key(&ack.node_id)
                    .map(|pk| ack.verify(pk).is_ok())
                    .unwrap_or(false)
            })
            .count()
    }
}
