//! Blob handles and their lifecycle.
//!
//! ## States
//!
//! | State | Entered by | Requires |
//! |-------|------------|----------|
//! | **Grouped** | `BlobHandle::new` | content digest of a file group |
//! | **Registered** | `register` | registration receipt |
//! | **Written** | `mark_written` | write acks >= quorum |
//! | **Certified** | `certify` | certification transaction digest |
//!
//! Every transition checks the current state. `certified` can only become
//! true from `Written`, and nothing moves a handle backwards.
//!
//! Handles are owned by a [`BlobArena`] keyed by blob identifier. A stage
//! takes the handles it works on out of the arena and puts them back when
//! it is done, so no handle is ever shared between two stages.

use super::ack::WriteAck;
use super::grouping::FileGroup;
use crate::network::traits::{NodeId, RegistrationReceipt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Content-derived blob identifier: SHA-256 of the concatenated group
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId([u8; 32]);

impl BlobId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Identifier of a payload held in memory.
    pub fn from_content(content: &[u8]) -> Self {
        Self(Sha256::digest(content).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for BlobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let id: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("blob id must be 32 bytes"))?;
        Ok(Self(id))
    }
}

/// Where one file lives inside a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpan {
    /// Site path (`/index.html`).
    pub path: String,

    pub offset: u64,

    pub length: u64,

    /// Hex SHA-256 of the file content.
    pub sha256: String,
}

/// Content digest of a file group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDigest {
    pub blob_id: BlobId,
    pub size: u64,
    pub spans: Vec<ResourceSpan>,
}

/// Lifecycle state of a blob handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobState {
    Grouped,
    Registered,
    Written,
    Certified,
}

impl fmt::Display for BlobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlobState::Grouped => "grouped",
            BlobState::Registered => "registered",
            BlobState::Written => "written",
            BlobState::Certified => "certified",
        };
        f.write_str(name)
    }
}

/// Result of writing a blob to one storage node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Acknowledged { attempts: u32 },
    Failed { attempts: u32, error: String },
}

impl NodeOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            NodeOutcome::Acknowledged { attempts } | NodeOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("blob {blob_id}: cannot {action} while {actual} (expected {expected})")]
    InvalidTransition {
        blob_id: BlobId,
        action: &'static str,
        expected: BlobState,
        actual: BlobState,
    },

    #[error("blob {blob_id}: {acks} acknowledgments do not meet quorum {quorum}")]
    QuorumNotMet {
        blob_id: BlobId,
        acks: usize,
        quorum: usize,
    },

    #[error("blob {blob_id}: acknowledgment is for blob {ack_blob_id}")]
    ForeignAck { blob_id: BlobId, ack_blob_id: BlobId },
}

/// One blob of the current run.
#[derive(Debug, Clone)]
pub struct BlobHandle {
    blob_id: BlobId,
    size: u64,
    source_group: FileGroup,
    spans: Vec<ResourceSpan>,
    aliases: Vec<FileGroup>,
    receipt: Option<RegistrationReceipt>,
    write_acks: BTreeMap<NodeId, WriteAck>,
    node_outcomes: BTreeMap<NodeId, NodeOutcome>,
    certification_tx: Option<String>,
    state: BlobState,
}

impl BlobHandle {
    /// New handle in the `Grouped` state.
    pub fn new(group: FileGroup, digest: GroupDigest) -> Self {
        Self {
            blob_id: digest.blob_id,
            size: digest.size,
            source_group: group,
            spans: digest.spans,
            aliases: Vec::new(),
            receipt: None,
            write_acks: BTreeMap::new(),
            node_outcomes: BTreeMap::new(),
            certification_tx: None,
            state: BlobState::Grouped,
        }
    }

    pub fn blob_id(&self) -> &BlobId {
        &self.blob_id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> BlobState {
        self.state
    }

    pub fn source_group(&self) -> &FileGroup {
        &self.source_group
    }

    /// Further groups whose content hashes to this blob.
    pub fn aliases(&self) -> &[FileGroup] {
        &self.aliases
    }

    /// File locations inside the blob, source group first, then aliases.
    pub fn spans(&self) -> &[ResourceSpan] {
        &self.spans
    }

    pub fn receipt(&self) -> Option<&RegistrationReceipt> {
        self.receipt.as_ref()
    }

    pub fn write_acks(&self) -> impl Iterator<Item = &WriteAck> {
        self.write_acks.values()
    }

    pub fn ack_count(&self) -> usize {
        self.write_acks.len()
    }

    pub fn node_outcomes(&self) -> &BTreeMap<NodeId, NodeOutcome> {
        &self.node_outcomes
    }

    pub fn is_certified(&self) -> bool {
        self.state == BlobState::Certified
    }

    pub fn certification_tx(&self) -> Option<&str> {
        self.certification_tx.as_deref()
    }

    /// Attach another group with identical content.
    pub fn add_alias(&mut self, group: FileGroup, digest: GroupDigest) {
        debug_assert_eq!(digest.blob_id, self.blob_id);
        self.spans.extend(digest.spans);
        self.aliases.push(group);
    }

    /// `Grouped -> Registered`.
    pub fn register(&mut self, receipt: RegistrationReceipt) -> Result<(), TransitionError> {
        self.expect(BlobState::Grouped, "register")?;
        self.receipt = Some(receipt);
        self.state = BlobState::Registered;
        Ok(())
    }

    /// Record a verified acknowledgment. Only valid while `Registered`.
    pub fn record_ack(&mut self, ack: WriteAck) -> Result<(), TransitionError> {
        self.expect(BlobState::Registered, "record acknowledgment")?;
        if ack.blob_id != self.blob_id {
            return Err(TransitionError::ForeignAck {
                blob_id: self.blob_id,
                ack_blob_id: ack.blob_id,
            });
        }
        self.write_acks.insert(ack.node_id.clone(), ack);
        Ok(())
    }

    /// Record how writing to `node` went, acknowledged or not.
    pub fn record_outcome(&mut self, node: NodeId, outcome: NodeOutcome) {
        self.node_outcomes.insert(node, outcome);
    }

    /// `Registered -> Written`, only once acks meet `quorum`.
    pub fn mark_written(&mut self, quorum: usize) -> Result<(), TransitionError> {
        self.expect(BlobState::Registered, "mark written")?;
        if quorum == 0 || self.write_acks.len() < quorum {
            return Err(TransitionError::QuorumNotMet {
                blob_id: self.blob_id,
                acks: self.write_acks.len(),
                quorum,
            });
        }
        self.state = BlobState::Written;
        Ok(())
    }

    /// `Written -> Certified`. Irreversible.
    pub fn certify(&mut self, tx_digest: String) -> Result<(), TransitionError> {
        self.expect(BlobState::Written, "certify")?;
        self.certification_tx = Some(tx_digest);
        self.state = BlobState::Certified;
        Ok(())
    }

    fn expect(&self, expected: BlobState, action: &'static str) -> Result<(), TransitionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                blob_id: self.blob_id,
                action,
                expected,
                actual: self.state,
            })
        }
    }
}

/// All handles of one run, keyed by blob identifier, in registration order.
#[derive(Debug, Default)]
pub struct BlobArena {
    handles: HashMap<BlobId, BlobHandle>,
    order: Vec<BlobId>,
}

impl BlobArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, blob_id: &BlobId) -> bool {
        self.handles.contains_key(blob_id)
    }

    /// Insert a new handle. Returns the handle back if its id is taken.
    pub fn insert(&mut self, handle: BlobHandle) -> Result<(), BlobHandle> {
        if self.handles.contains_key(handle.blob_id()) {
            return Err(handle);
        }
        self.order.push(*handle.blob_id());
        self.handles.insert(*handle.blob_id(), handle);
        Ok(())
    }

    pub fn get(&self, blob_id: &BlobId) -> Option<&BlobHandle> {
        self.handles.get(blob_id)
    }

    pub fn get_mut(&mut self, blob_id: &BlobId) -> Option<&mut BlobHandle> {
        self.handles.get_mut(blob_id)
    }

    /// Handles in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &BlobHandle> {
        self.order.iter().filter_map(|id| self.handles.get(id))
    }

    pub fn ids(&self) -> &[BlobId] {
        &self.order
    }

    pub fn in_state(&self, state: BlobState) -> impl Iterator<Item = &BlobHandle> {
        self.iter().filter(move |h| h.state() == state)
    }

    /// Move every handle in `state` out of the arena, in registration order.
    ///
    /// The ids stay reserved; [`BlobArena::restore`] puts the handles back.
    pub fn take_in_state(&mut self, state: BlobState) -> Vec<BlobHandle> {
        let ids: Vec<BlobId> = self
            .order
            .iter()
            .filter(|id| self.handles.get(id).map(|h| h.state()) == Some(state))
            .copied()
            .collect();
        ids.iter()
            .filter_map(|id| self.handles.remove(id))
            .collect()
    }

    /// Return handles previously taken with [`BlobArena::take_in_state`].
    pub fn restore(&mut self, handles: impl IntoIterator<Item = BlobHandle>) {
        for handle in handles {
            debug_assert!(self.order.contains(handle.blob_id()));
            self.handles.insert(*handle.blob_id(), handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::traits::ObjectId;
    use crate::publish::grouping::FileEntry;
    use std::path::PathBuf;

    fn group(name: &str, size: u64) -> FileGroup {
        FileGroup::new(vec![FileEntry {
            relative_path: format!("/{}", name),
            absolute_path: PathBuf::from(format!("/tmp/site/{}", name)),
            size_bytes: size,
        }])
    }

    fn handle(content: &[u8]) -> BlobHandle {
        let blob_id = BlobId::from_content(content);
        BlobHandle::new(
            group("index.html", content.len() as u64),
            GroupDigest {
                blob_id,
                size: content.len() as u64,
                spans: vec![ResourceSpan {
                    path: "/index.html".to_string(),
                    offset: 0,
                    length: content.len() as u64,
                    sha256: hex::encode(Sha256::digest(content)),
                }],
            },
        )
    }

    fn receipt(blob_id: BlobId) -> RegistrationReceipt {
        RegistrationReceipt {
            blob_id,
            blob_object: ObjectId::from_bytes([1u8; 32]),
            tx_digest: "tx-register".to_string(),
            size: 5,
            end_epoch: 10,
        }
    }

    fn ack(blob_id: BlobId, node: &str) -> WriteAck {
        WriteAck {
            blob_id,
            node_id: NodeId(node.to_string()),
            epoch: 1,
            signature: vec![0u8; 64],
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut h = handle(b"hello");
        let id = *h.blob_id();
        assert_eq!(h.state(), BlobState::Grouped);

        h.register(receipt(id)).unwrap();
        assert_eq!(h.state(), BlobState::Registered);

        for node in ["n1", "n2", "n3"] {
            h.record_ack(ack(id, node)).unwrap();
        }
        h.mark_written(3).unwrap();
        assert_eq!(h.state(), BlobState::Written);
        assert!(!h.is_certified());

        h.certify("tx-certify".to_string()).unwrap();
        assert!(h.is_certified());
        assert_eq!(h.certification_tx(), Some("tx-certify"));
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut h = handle(b"hello");
        let id = *h.blob_id();

        assert!(matches!(
            h.record_ack(ack(id, "n1")),
            Err(TransitionError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.certify("tx".to_string()),
            Err(TransitionError::InvalidTransition {
                expected: BlobState::Written,
                actual: BlobState::Grouped,
                ..
            })
        ));

        h.register(receipt(id)).unwrap();
        assert!(h.register(receipt(id)).is_err());
        assert!(h.certify("tx".to_string()).is_err());
    }

    #[test]
    fn test_written_requires_quorum() {
        let mut h = handle(b"hello");
        let id = *h.blob_id();
        h.register(receipt(id)).unwrap();
        h.record_ack(ack(id, "n1")).unwrap();
        h.record_ack(ack(id, "n2")).unwrap();

        assert_eq!(
            h.mark_written(3),
            Err(TransitionError::QuorumNotMet {
                blob_id: id,
                acks: 2,
                quorum: 3
            })
        );
        assert_eq!(h.state(), BlobState::Registered);
        assert!(h.mark_written(0).is_err());
    }

    #[test]
    fn test_duplicate_acks_from_one_node_count_once() {
        let mut h = handle(b"hello");
        let id = *h.blob_id();
        h.register(receipt(id)).unwrap();
        h.record_ack(ack(id, "n1")).unwrap();
        h.record_ack(ack(id, "n1")).unwrap();
        assert_eq!(h.ack_count(), 1);
    }

    #[test]
    fn test_foreign_ack_rejected() {
        let mut h = handle(b"hello");
        let id = *h.blob_id();
        h.register(receipt(id)).unwrap();

        let other = BlobId::from_content(b"other");
        assert!(matches!(
            h.record_ack(ack(other, "n1")),
            Err(TransitionError::ForeignAck { .. })
        ));
        assert_eq!(h.ack_count(), 0);
    }

    #[test]
    fn test_certified_never_reverts() {
        let mut h = handle(b"hello");
        let id = *h.blob_id();
        h.register(receipt(id)).unwrap();
        h.record_ack(ack(id, "n1")).unwrap();
        h.mark_written(1).unwrap();
        h.certify("tx".to_string()).unwrap();

        assert!(h.register(receipt(id)).is_err());
        assert!(h.record_ack(ack(id, "n2")).is_err());
        assert!(h.mark_written(1).is_err());
        assert!(h.certify("tx-2".to_string()).is_err());
        assert!(h.is_certified());
        assert_eq!(h.certification_tx(), Some("tx"));
    }

    #[test]
    fn test_arena_take_and_restore_preserves_order() {
        let mut arena = BlobArena::new();
        let a = handle(b"a");
        let b = handle(b"b");
        let c = handle(b"c");
        let ids = [*a.blob_id(), *b.blob_id(), *c.blob_id()];

        arena.insert(a).unwrap();
        arena.insert(b).unwrap();
        arena.insert(c).unwrap();

        arena
            .get_mut(&ids[1])
            .unwrap()
            .register(receipt(ids[1]))
            .unwrap();

        let taken = arena.take_in_state(BlobState::Grouped);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].blob_id(), &ids[0]);
        assert_eq!(taken[1].blob_id(), &ids[2]);
        assert_eq!(arena.iter().count(), 1);

        arena.restore(taken);
        let order: Vec<BlobId> = arena.iter().map(|h| *h.blob_id()).collect();
        assert_eq!(order, ids.to_vec());
    }

    #[test]
    fn test_arena_rejects_duplicate_ids() {
        let mut arena = BlobArena::new();
        arena.insert(handle(b"same")).unwrap();
        let rejected = arena.insert(handle(b"same"));
        assert!(rejected.is_err());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_blob_id_serde_is_hex() {
        let id = BlobId::from_content(b"payload");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        assert_eq!(serde_json::from_str::<BlobId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<BlobId>("\"abcd\"").is_err());
    }
}
