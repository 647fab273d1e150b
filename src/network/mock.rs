//! In-memory ledger and storage nodes for testing.
//!
//! `MockLedger` executes transactions against in-memory tables and checks
//! signatures and certificates the way a real ledger would. `MockStorage`
//! simulates a committee of nodes with Ed25519 keys; each node can be told
//! to misbehave through [`NodeBehavior`].

use super::traits::*;
use crate::publish::ack::WriteAck;
use crate::publish::blob::BlobId;
use crate::publish::site::SiteManifest;
use async_trait::async_trait;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock ledger for testing.
#[derive(Clone)]
pub struct MockLedger {
    state: Arc<Mutex<LedgerState>>,
}

struct LedgerState {
    system: SystemState,
    balances: HashMap<String, u64>,
    registrations: HashMap<(String, BlobId), RegistrationReceipt>,
    certified: HashMap<BlobId, String>,
    sites: HashMap<ObjectId, SiteManifest>,
    submitted: Vec<Transaction>,
    certification_attempts: HashMap<BlobId, u32>,
    fail_next: VecDeque<LedgerError>,
    fail_certification: HashMap<BlobId, LedgerError>,
    lost_responses: usize,
    calls: usize,
    objects: u64,
    transactions: u64,
}

impl LedgerState {
    fn next_object(&mut self) -> ObjectId {
        self.objects += 1;
        let mut id = [0u8; 32];
        id[0] = 0xb1;
        id[24..].copy_from_slice(&self.objects.to_be_bytes());
        ObjectId::from_bytes(id)
    }

    fn next_digest(&mut self) -> String {
        self.transactions += 1;
        format!("tx-{:06}", self.transactions)
    }

    fn execute(&mut self, tx: &SignedTransaction) -> Result<Option<ObjectId>, LedgerError> {
        match &tx.transaction {
            Transaction::RegisterBlob {
                owner,
                blob_id,
                size,
                epochs,
            } => {
                if *owner != tx.sender {
                    return Err(LedgerError::Rejected(
                        "sender does not match owner".to_string(),
                    ));
                }
                let blob_object = self.next_object();
                let receipt = RegistrationReceipt {
                    blob_id: *blob_id,
                    blob_object,
                    tx_digest: format!("tx-{:06}", self.transactions + 1),
                    size: *size,
                    end_epoch: self.system.epoch + u64::from(*epochs),
                };
                self.registrations.insert((owner.clone(), *blob_id), receipt);
                Ok(Some(blob_object))
            }
            Transaction::CertifyBlob { certificate } => {
                let blob_id = certificate.blob_id;
                if let Some(err) = self.fail_certification.get(&blob_id) {
                    return Err(err.clone());
                }
                if !self.registrations.values().any(|r| r.blob_id == blob_id) {
                    return Err(LedgerError::Rejected(format!(
                        "blob {} is not registered",
                        blob_id
                    )));
                }
                if certificate.epoch != self.system.epoch {
                    return Err(LedgerError::Rejected("certificate epoch is stale".to_string()));
                }
                let nodes = &self.system.nodes;
                let valid = certificate.valid_signers(|id| {
                    nodes
                        .iter()
                        .find(|n| n.id == *id)
                        .map(|n| n.public_key.as_slice())
                });
                if valid == 0 || valid != certificate.acks.len() {
                    return Err(LedgerError::Rejected("invalid certificate".to_string()));
                }
                self.certified
                    .insert(blob_id, format!("tx-{:06}", self.transactions + 1));
                Ok(None)
            }
            Transaction::CreateSite { manifest, .. } => {
                let site = self.next_object();
                let mut manifest = manifest.clone();
                manifest.site_object_id = Some(site);
                self.sites.insert(site, manifest);
                Ok(Some(site))
            }
            Transaction::UpdateSite { site, manifest } => {
                if !self.sites.contains_key(site) {
                    return Err(LedgerError::NotFound(site.to_string()));
                }
                let mut manifest = manifest.clone();
                manifest.site_object_id = Some(*site);
                self.sites.insert(*site, manifest);
                Ok(None)
            }
        }
    }
}

impl MockLedger {
    pub fn new(system: SystemState) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                system,
                balances: HashMap::new(),
                registrations: HashMap::new(),
                certified: HashMap::new(),
                sites: HashMap::new(),
                submitted: Vec::new(),
                certification_attempts: HashMap::new(),
                fail_next: VecDeque::new(),
                fail_certification: HashMap::new(),
                lost_responses: 0,
                calls: 0,
                objects: 0,
                transactions: 0,
            })),
        }
    }

    pub fn set_balance(&self, owner: &str, amount: u64) {
        lock(&self.state).balances.insert(owner.to_string(), amount);
    }

    /// Register a blob without a transaction (for test setup).
    pub fn register_directly(&self, owner: &str, blob_id: BlobId, size: u64) -> RegistrationReceipt {
        let mut state = lock(&self.state);
        let blob_object = state.next_object();
        let receipt = RegistrationReceipt {
            blob_id,
            blob_object,
            tx_digest: "setup".to_string(),
            size,
            end_epoch: state.system.epoch + 5,
        };
        state
            .registrations
            .insert((owner.to_string(), blob_id), receipt.clone());
        receipt
    }

    pub fn insert_registration(&self, owner: &str, receipt: RegistrationReceipt) {
        lock(&self.state)
            .registrations
            .insert((owner.to_string(), receipt.blob_id), receipt);
    }

    /// Fail the next `count` submissions with `error`.
    pub fn fail_next_submits(&self, count: usize, error: LedgerError) {
        let mut state = lock(&self.state);
        for _ in 0..count {
            state.fail_next.push_back(error.clone());
        }
    }

    /// Execute the next `count` accepted submissions but answer them with
    /// a timeout, as if the response was lost in transit.
    pub fn lose_next_responses(&self, count: usize) {
        lock(&self.state).lost_responses += count;
    }

    /// Fail every certification of `blob_id` with `error`.
    pub fn fail_certification_for(&self, blob_id: BlobId, error: LedgerError) {
        lock(&self.state).fail_certification.insert(blob_id, error);
    }

    pub fn is_certified(&self, blob_id: &BlobId) -> bool {
        lock(&self.state).certified.contains_key(blob_id)
    }

    pub fn certification_attempts(&self, blob_id: &BlobId) -> u32 {
        lock(&self.state)
            .certification_attempts
            .get(blob_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn site(&self, site: &ObjectId) -> Option<SiteManifest> {
        lock(&self.state).sites.get(site).cloned()
    }

    /// Every transaction submitted, accepted or not.
    pub fn submitted(&self) -> Vec<Transaction> {
        lock(&self.state).submitted.clone()
    }

    pub fn registrations_submitted(&self) -> usize {
        lock(&self.state)
            .submitted
            .iter()
            .filter(|tx| matches!(tx, Transaction::RegisterBlob { .. }))
            .count()
    }

    /// Calls of any ledger method.
    pub fn call_count(&self) -> usize {
        lock(&self.state).calls
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn balance(&self, owner: &str) -> Result<u64, LedgerError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        Ok(state.balances.get(owner).copied().unwrap_or(0))
    }

    async fn system_state(&self) -> Result<SystemState, LedgerError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        Ok(state.system.clone())
    }

    async fn find_registration(
        &self,
        owner: &str,
        blob_id: &BlobId,
    ) -> Result<Option<RegistrationReceipt>, LedgerError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        Ok(state
            .registrations
            .get(&(owner.to_string(), *blob_id))
            .cloned())
    }

    async fn find_certification(&self, blob_id: &BlobId) -> Result<Option<String>, LedgerError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        Ok(state.certified.get(blob_id).cloned())
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<TransactionEffects, LedgerError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        state.submitted.push(tx.transaction.clone());
        if let Transaction::CertifyBlob { certificate } = &tx.transaction {
            *state
                .certification_attempts
                .entry(certificate.blob_id)
                .or_default() += 1;
        }

        if let Some(err) = state.fail_next.pop_front() {
            return Err(err);
        }
        if !tx.verify() {
            return Err(LedgerError::Rejected("invalid signature".to_string()));
        }

        let created = state.execute(tx)?;
        let digest = state.next_digest();
        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(LedgerError::Timeout);
        }
        Ok(TransactionEffects {
            digest,
            created,
            epoch: state.system.epoch,
        })
    }

    async fn fetch_site(&self, site: &ObjectId) -> Result<SiteManifest, LedgerError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        state
            .sites
            .get(site)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(site.to_string()))
    }
}

/// How a mock storage node answers store requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBehavior {
    Healthy,
    /// Every attempt fails with a transient error.
    AlwaysFail,
    /// The first `n` attempts fail with a transient error.
    FailFirst(u32),
    /// Refuses every blob.
    Reject,
    /// Signs acknowledgments with the wrong key.
    BadSignature,
    /// Answers after the given delay.
    Slow(Duration),
    /// Transiently fails for one blob only.
    FailForBlob(BlobId),
}

/// Mock storage committee for testing.
#[derive(Clone)]
pub struct MockStorage {
    nodes: Arc<Vec<StorageNode>>,
    keys: Arc<HashMap<NodeId, Ed25519KeyPair>>,
    epoch: u64,
    state: Arc<Mutex<StorageState>>,
}

#[derive(Default)]
struct StorageState {
    behaviors: HashMap<NodeId, NodeBehavior>,
    attempts: HashMap<NodeId, u32>,
    stored: HashMap<(NodeId, BlobId), usize>,
}

impl MockStorage {
    /// `count` healthy nodes named `node-1` to `node-{count}`, at epoch 1.
    pub fn new(count: usize) -> Self {
        let mut nodes = Vec::with_capacity(count);
        let mut keys = HashMap::with_capacity(count);

        for i in 1..=count {
            let seed = [(i % 251) as u8 + 1; 32];
            let Ok(key_pair) = Ed25519KeyPair::from_seed_unchecked(&seed) else {
                continue;
            };
            let id = NodeId(format!("node-{}", i));
            nodes.push(StorageNode {
                id: id.clone(),
                endpoint: format!("mock://node-{}", i),
                public_key: key_pair.public_key().as_ref().to_vec(),
                last_known_healthy: true,
            });
            keys.insert(id, key_pair);
        }

        Self {
            nodes: Arc::new(nodes),
            keys: Arc::new(keys),
            epoch: 1,
            state: Arc::new(Mutex::new(StorageState::default())),
        }
    }

    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn nodes(&self) -> Vec<StorageNode> {
        self.nodes.as_ref().clone()
    }

    /// System state announcing this committee, with free storage.
    pub fn system_state(&self) -> SystemState {
        SystemState {
            epoch: self.epoch,
            pricing: Pricing::default(),
            nodes: self.nodes(),
        }
    }

    pub fn set_behavior(&self, node: &str, behavior: NodeBehavior) {
        lock(&self.state)
            .behaviors
            .insert(NodeId(node.to_string()), behavior);
    }

    /// Store attempts received by `node`.
    pub fn attempts(&self, node: &str) -> u32 {
        lock(&self.state)
            .attempts
            .get(&NodeId(node.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn stored(&self, node: &str, blob_id: &BlobId) -> bool {
        lock(&self.state)
            .stored
            .contains_key(&(NodeId(node.to_string()), *blob_id))
    }

    /// Acknowledgment `node` would return for `blob_id`.
    pub fn sign_ack(&self, node: &NodeId, blob_id: BlobId) -> Option<WriteAck> {
        self.keys
            .get(node)
            .map(|key| WriteAck::sign(blob_id, node.clone(), self.epoch, key))
    }
}

#[async_trait]
impl StorageClient for MockStorage {
    async fn store(
        &self,
        node: &StorageNode,
        blob_id: &BlobId,
        payload: &[u8],
    ) -> Result<WriteAck, NodeError> {
        let (attempt, behavior) = {
            let mut state = lock(&self.state);
            let attempts = state.attempts.entry(node.id.clone()).or_default();
            *attempts += 1;
            let attempt = *attempts;
            let behavior = state
                .behaviors
                .get(&node.id)
                .cloned()
                .unwrap_or(NodeBehavior::Healthy);
            (attempt, behavior)
        };

        match behavior {
            NodeBehavior::Healthy => {}
            NodeBehavior::AlwaysFail => {
                return Err(NodeError::Unavailable(format!("{} is down", node.id)))
            }
            NodeBehavior::FailFirst(n) if attempt <= n => {
                return Err(NodeError::Network("connection reset".to_string()))
            }
            NodeBehavior::FailFirst(_) => {}
            NodeBehavior::Reject => {
                return Err(NodeError::Rejected("blob refused".to_string()))
            }
            NodeBehavior::BadSignature => {
                let Ok(impostor) = Ed25519KeyPair::from_seed_unchecked(&[0xee; 32]) else {
                    return Err(NodeError::Network("impostor key".to_string()));
                };
                return Ok(WriteAck::sign(*blob_id, node.id.clone(), self.epoch, &impostor));
            }
            NodeBehavior::Slow(delay) => tokio::time::sleep(delay).await,
            NodeBehavior::FailForBlob(poisoned) if poisoned == *blob_id => {
                return Err(NodeError::Unavailable(format!(
                    "{} cannot take {}",
                    node.id, blob_id
                )))
            }
            NodeBehavior::FailForBlob(_) => {}
        }

        if BlobId::from_content(payload) != *blob_id {
            return Err(NodeError::Rejected(
                "payload does not match blob id".to_string(),
            ));
        }

        let ack = self
            .sign_ack(&node.id, *blob_id)
            .ok_or_else(|| NodeError::Unavailable(format!("unknown node {}", node.id)))?;
        lock(&self.state)
            .stored
            .insert((node.id.clone(), *blob_id), payload.len());
        Ok(ack)
    }
}
