//! Blob Write Orchestration
//!
//! Pushes the content of every registered blob to the storage committee:
//! 1. Re-read the blob's source group and check it still hashes to the id
//! 2. Send the full payload to every storage node concurrently
//! 3. Retry transient node failures under the configured [`RetryPolicy`]
//! 4. Accept only acknowledgments signed by the node they claim to be from
//! 5. Mark the blob written once acknowledgments meet the quorum
//!
//! A blob that misses quorum is reported in the [`WriteReport`] and stays
//! `Registered`; the other blobs are unaffected.

use super::ack::WriteAck;
use super::blob::{BlobArena, BlobHandle, BlobId, BlobState, NodeOutcome};
use super::error::{BlobFailure, PublishError, Stage};
use super::grouping::read_group_content;
use super::observer::PipelineObserver;
use super::retry::{Attempted, RetryPolicy};
use crate::network::traits::{NodeError, StorageClient, StorageNode};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::time::Duration;

/// Write configuration
#[derive(Debug, Clone)]
pub struct WriteConfig {
    /// Acknowledgments required before a blob counts as written
    pub quorum: usize,

    /// Per-node retry policy
    pub retry: RetryPolicy,

    /// Bound on a single store attempt (default: 30s)
    pub write_timeout: Duration,

    /// Blobs written at the same time (default: 4)
    pub max_parallel: usize,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            quorum: 1,
            retry: RetryPolicy::default(),
            write_timeout: Duration::from_secs(30),
            max_parallel: 4,
        }
    }
}

/// Outcome of the write stage.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Blobs that reached quorum, in registration order.
    pub written: Vec<BlobId>,

    /// Blobs that did not.
    pub failures: Vec<BlobFailure>,
}

/// Writes registered blobs to the storage nodes.
pub struct BlobWriter<'a, S: StorageClient + ?Sized> {
    storage: &'a S,
    nodes: &'a [StorageNode],
    epoch: u64,
    config: &'a WriteConfig,
    observer: &'a dyn PipelineObserver,
}

impl<'a, S: StorageClient + ?Sized> BlobWriter<'a, S> {
    /// `epoch` is the current storage epoch; acknowledgments for any other
    /// epoch are refused.
    pub fn new(
        storage: &'a S,
        nodes: &'a [StorageNode],
        epoch: u64,
        config: &'a WriteConfig,
        observer: &'a dyn PipelineObserver,
    ) -> Self {
        Self {
            storage,
            nodes,
            epoch,
            config,
            observer,
        }
    }

    /// Write every `Registered` handle in `arena`.
    ///
    /// Handles are moved out of the arena for the duration of the stage and
    /// moved back afterwards, written or not.
    pub async fn write_all(&self, arena: &mut BlobArena) -> Result<WriteReport, PublishError> {
        if self.config.quorum == 0 || self.config.quorum > self.nodes.len() {
            return Err(PublishError::InvalidQuorum {
                quorum: self.config.quorum,
                nodes: self.nodes.len(),
            });
        }

        let handles = arena.take_in_state(BlobState::Registered);
        let results: Vec<(BlobHandle, Option<BlobFailure>)> = stream::iter(handles)
            .map(|handle| self.write_blob(handle))
            .buffered(self.config.max_parallel.max(1))
            .collect()
            .await;

        let mut report = WriteReport::default();
        let mut returned = Vec::with_capacity(results.len());
        for (handle, failure) in results {
            match failure {
                None => report.written.push(*handle.blob_id()),
                Some(failure) => {
                    self.observer.blob_failed(&failure);
                    report.failures.push(failure);
                }
            }
            returned.push(handle);
        }
        arena.restore(returned);

        Ok(report)
    }

    async fn write_blob(&self, mut handle: BlobHandle) -> (BlobHandle, Option<BlobFailure>) {
        let blob_id = *handle.blob_id();

        let payload = match self.load_payload(&handle).await {
            Ok(payload) => payload,
            Err(e) => return (handle, Some(BlobFailure::new(blob_id, Stage::Write, e))),
        };

        let attempts = join_all(
            self.nodes
                .iter()
                .map(|node| self.write_to_node(node, &blob_id, &payload)),
        )
        .await;

        for (node, attempted) in self.nodes.iter().zip(attempts) {
            let outcome = match attempted.result {
                Ok(ack) => match handle.record_ack(ack) {
                    Ok(()) => NodeOutcome::Acknowledged {
                        attempts: attempted.attempts,
                    },
                    Err(e) => NodeOutcome::Failed {
                        attempts: attempted.attempts,
                        error: e.to_string(),
                    },
                },
                Err(e) => NodeOutcome::Failed {
                    attempts: attempted.attempts,
                    error: e.to_string(),
                },
            };
            handle.record_outcome(node.id.clone(), outcome);
        }

        match handle.mark_written(self.config.quorum) {
            Ok(()) => {
                self.observer.blob_written(&blob_id, handle.ack_count());
                (handle, None)
            }
            Err(_) => {
                let error = PublishError::WriteQuorumFailed {
                    blob_id,
                    acks: handle.ack_count(),
                    quorum: self.config.quorum,
                };
                (handle, Some(BlobFailure::new(blob_id, Stage::Write, error)))
            }
        }
    }

    /// Payload of a handle, re-read from disk and checked against its id.
    async fn load_payload(&self, handle: &BlobHandle) -> Result<Vec<u8>, PublishError> {
        let content = read_group_content(handle.source_group()).await?;
        if BlobId::from_content(&content) != *handle.blob_id() {
            return Err(PublishError::ContentChanged {
                blob_id: *handle.blob_id(),
            });
        }
        Ok(content)
    }

    async fn write_to_node(
        &self,
        node: &StorageNode,
        blob_id: &BlobId,
        payload: &[u8],
    ) -> Attempted<WriteAck, NodeError> {
        let timeout = self.config.write_timeout;

        self.config
            .retry
            .run(
                || async move {
                    let ack = tokio::time::timeout(timeout, self.storage.store(node, blob_id, payload))
                        .await
                        .map_err(|_| NodeError::Timeout(timeout.as_millis() as u64))??;
                    self.check_ack(node, blob_id, ack)
                },
                NodeError::is_transient,
                |attempt, err| {
                    self.observer
                        .node_write_failed(blob_id, &node.id, attempt, err)
                },
            )
            .await
    }

    fn check_ack(
        &self,
        node: &StorageNode,
        blob_id: &BlobId,
        ack: WriteAck,
    ) -> Result<WriteAck, NodeError> {
        if ack.node_id != node.id {
            return Err(NodeError::InvalidAck(format!(
                "acknowledgment signed as {}",
                ack.node_id
            )));
        }
        if ack.blob_id != *blob_id {
            return Err(NodeError::InvalidAck(format!(
                "acknowledgment is for blob {}",
                ack.blob_id
            )));
        }
        if ack.epoch != self.epoch {
            return Err(NodeError::InvalidAck(format!(
                "acknowledgment is for epoch {}, current epoch is {}",
                ack.epoch, self.epoch
            )));
        }
        ack.verify(&node.public_key)
            .map_err(|e| NodeError::InvalidAck(e.to_string()))?;
        Ok(ack)
    }
}
