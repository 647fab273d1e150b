//! Trait abstractions for the ledger, the storage nodes and the signer.
//!
//! The publication pipeline only talks to these traits, so every stage can
//! be driven by the in-memory collaborators in `network::mock`.

use crate::publish::ack::{Certificate, WriteAck};
use crate::publish::blob::BlobId;
use crate::publish::site::SiteManifest;
use crate::serialization::{hex_bytes, to_cbor};
use async_trait::async_trait;
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Ledger object identifier (32 bytes), displayed as `0x`-prefixed hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Base36 rendering used as the site subdomain.
    pub fn to_base36(&self) -> String {
        const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

        // Big-endian base conversion by repeated division.
        let mut number: Vec<u8> = self.0.iter().copied().skip_while(|b| *b == 0).collect();
        if number.is_empty() {
            return "0".to_string();
        }

        let mut digits = Vec::new();
        while !number.is_empty() {
            let mut remainder = 0u32;
            let mut quotient = Vec::with_capacity(number.len());
            for byte in &number {
                let acc = (remainder << 8) | u32::from(*byte);
                let q = acc / 36;
                remainder = acc % 36;
                if !(quotient.is_empty() && q == 0) {
                    quotient.push(q as u8);
                }
            }
            digits.push(ALPHABET[remainder as usize]);
            number = quotient;
        }

        digits.reverse();
        String::from_utf8(digits).unwrap_or_default()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Error parsing an [`ObjectId`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object id '{0}': expected 0x-prefixed 32-byte hex")]
pub struct ObjectIdParseError(pub String);

impl FromStr for ObjectId {
    type Err = ObjectIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || digits.len() > 64 {
            return Err(ObjectIdParseError(s.to_string()));
        }
        // Short ids are left-padded, as ledger explorers print them.
        let padded = format!("{:0>64}", digits);
        let bytes = hex::decode(padded).map_err(|_| ObjectIdParseError(s.to_string()))?;
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Storage node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A storage node of the current committee.
///
/// Supplied by the storage system; the pipeline never creates or mutates
/// nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    pub id: NodeId,

    /// Base URL of the node's blob API.
    pub endpoint: String,

    /// Ed25519 public key the node signs write acknowledgments with.
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,

    #[serde(default = "default_healthy")]
    pub last_known_healthy: bool,
}

fn default_healthy() -> bool {
    true
}

/// Storage pricing published by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Bytes per storage unit.
    pub unit_size: u64,

    /// Price of one unit for one epoch.
    pub storage_price_per_unit_epoch: u64,

    /// One-off write price per unit.
    pub write_price_per_unit: u64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            unit_size: 1024 * 1024,
            storage_price_per_unit_epoch: 0,
            write_price_per_unit: 0,
        }
    }
}

/// Snapshot of the storage system as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub epoch: u64,
    pub pricing: Pricing,
    pub nodes: Vec<StorageNode>,
}

/// Proof that a blob identifier holds a storage reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    pub blob_id: BlobId,

    /// The ledger object representing the registered blob.
    pub blob_object: ObjectId,

    pub tx_digest: String,

    pub size: u64,

    /// Epoch at which the reservation lapses.
    pub end_epoch: u64,
}

/// Ledger transactions submitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transaction {
    RegisterBlob {
        owner: String,
        blob_id: BlobId,
        size: u64,
        epochs: u32,
    },
    CertifyBlob {
        certificate: Certificate,
    },
    CreateSite {
        owner: String,
        manifest: SiteManifest,
    },
    UpdateSite {
        site: ObjectId,
        manifest: SiteManifest,
    },
}

/// A transaction together with the sender's Ed25519 signature over its
/// canonical CBOR encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,

    pub sender: String,

    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,

    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Check the signature against the embedded public key.
    pub fn verify(&self) -> bool {
        let Ok(message) = to_cbor(&self.transaction) else {
            return false;
        };
        UnparsedPublicKey::new(&ED25519, &self.public_key)
            .verify(&message, &self.signature)
            .is_ok()
    }
}

/// Effects of an executed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEffects {
    pub digest: String,

    /// Object created by the transaction (blob object or site object).
    pub created: Option<ObjectId>,

    pub epoch: u64,
}

/// Ledger client errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Ledger network error: {0}")]
    Network(String),

    #[error("Ledger request timed out")]
    Timeout,

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Malformed ledger response: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Transient errors are worth retrying; rejections are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Network(_) | LedgerError::Timeout)
    }
}

/// Storage node errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Node unavailable: {0}")]
    Unavailable(String),

    #[error("Node rejected blob: {0}")]
    Rejected(String),

    #[error("Invalid acknowledgment: {0}")]
    InvalidAck(String),
}

impl NodeError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::Network(_) | NodeError::Timeout(_) | NodeError::Unavailable(_)
        )
    }
}

/// Signer errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Failed to encode transaction: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ledger access: balances, system state, transaction submission and
/// object queries.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Spendable storage-token balance of `owner`.
    async fn balance(&self, owner: &str) -> Result<u64, LedgerError>;

    /// Current epoch, pricing and storage committee.
    async fn system_state(&self) -> Result<SystemState, LedgerError>;

    /// Existing registration of `blob_id` owned by `owner`, if any.
    async fn find_registration(
        &self,
        owner: &str,
        blob_id: &BlobId,
    ) -> Result<Option<RegistrationReceipt>, LedgerError>;

    /// Digest of the transaction that certified `blob_id`, if it is
    /// certified.
    async fn find_certification(&self, blob_id: &BlobId) -> Result<Option<String>, LedgerError>;

    /// Submit a signed transaction and wait for its effects.
    async fn submit(&self, tx: &SignedTransaction) -> Result<TransactionEffects, LedgerError>;

    /// Fetch the manifest stored in a site object.
    async fn fetch_site(&self, site: &ObjectId) -> Result<SiteManifest, LedgerError>;
}

/// Blob transmission to a single storage node.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Store `payload` under `blob_id` on `node` and return its signed
    /// acknowledgment.
    async fn store(
        &self,
        node: &StorageNode,
        blob_id: &BlobId,
        payload: &[u8],
    ) -> Result<WriteAck, NodeError>;
}

/// Transaction signing capability. Key material is read-only and shared by
/// every concurrent operation.
pub trait Signer: Send + Sync {
    /// Ledger address of the signing account.
    fn address(&self) -> &str;

    fn sign_transaction(&self, transaction: Transaction) -> Result<SignedTransaction, SignerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_display_and_parse() {
        let id = ObjectId::from_bytes([0x42u8; 32]);
        let text = id.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);
        assert_eq!(text.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_object_id_short_form_is_left_padded() {
        let id: ObjectId = "0x2a".parse().unwrap();
        let mut expected = [0u8; 32];
        expected[31] = 0x2a;
        assert_eq!(id.as_bytes(), &expected);
    }

    #[test]
    fn test_object_id_rejects_garbage() {
        assert!("0xnothex".parse::<ObjectId>().is_err());
        assert!("".parse::<ObjectId>().is_err());
        assert!(format!("0x{}", "1".repeat(65)).parse::<ObjectId>().is_err());
    }

    #[test]
    fn test_base36_small_values() {
        let mut bytes = [0u8; 32];
        assert_eq!(ObjectId::from_bytes(bytes).to_base36(), "0");

        bytes[31] = 35;
        assert_eq!(ObjectId::from_bytes(bytes).to_base36(), "z");

        bytes[31] = 36;
        assert_eq!(ObjectId::from_bytes(bytes).to_base36(), "10");

        bytes[30] = 1;
        bytes[31] = 0;
        // 256 = 7 * 36 + 4
        assert_eq!(ObjectId::from_bytes(bytes).to_base36(), "74");
    }

    #[test]
    fn test_base36_full_width_is_lowercase_alphanumeric() {
        let rendered = ObjectId::from_bytes([0xffu8; 32]).to_base36();
        assert!(rendered.len() <= 50);
        assert!(rendered
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_error_classification() {
        assert!(LedgerError::Network("reset".to_string()).is_transient());
        assert!(LedgerError::Timeout.is_transient());
        assert!(!LedgerError::Rejected("gas".to_string()).is_transient());

        assert!(NodeError::Timeout(100).is_transient());
        assert!(NodeError::Unavailable("down".to_string()).is_transient());
        assert!(!NodeError::Rejected("too large".to_string()).is_transient());
        assert!(!NodeError::InvalidAck("bad sig".to_string()).is_transient());
    }

    #[test]
    fn test_storage_node_defaults_to_healthy() {
        let json = r#"{"id":"n1","endpoint":"http://n1","public_key":"00ff"}"#;
        let node: StorageNode = serde_json::from_str(json).unwrap();
        assert!(node.last_known_healthy);
        assert_eq!(node.public_key, vec![0x00, 0xff]);
    }
}
