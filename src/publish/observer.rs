//! Pipeline progress reporting.
//!
//! The pipeline never logs on its own. It reports progress to an injected
//! [`PipelineObserver`]; the default [`NoopObserver`] keeps the core silent
//! and deterministic. The binary wraps it in a [`TracingObserver`] that turns
//! events into structured `tracing` records.

use super::blob::BlobId;
use super::error::{BlobFailure, Stage};
use super::grouping::FileGroup;
use super::site::PublishedSite;
use crate::network::traits::{NodeError, NodeId};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives pipeline events. Every method defaults to doing nothing.
pub trait PipelineObserver: Send + Sync {
    fn stage_started(&self, _stage: Stage) {}

    fn groups_formed(&self, _groups: &[FileGroup]) {}

    fn blob_registered(&self, _blob_id: &BlobId, _reused: bool) {}

    fn node_write_failed(&self, _blob_id: &BlobId, _node: &NodeId, _attempt: u32, _error: &NodeError) {}

    fn blob_written(&self, _blob_id: &BlobId, _acks: usize) {}

    fn blob_failed(&self, _failure: &BlobFailure) {}

    fn blob_certified(&self, _blob_id: &BlobId, _tx_digest: &str) {}

    fn site_published(&self, _site: &PublishedSite) {}
}

/// Silent observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Logs every event through `tracing`, then forwards it to `inner`.
pub struct TracingObserver<O = NoopObserver> {
    inner: O,
    run_id: Uuid,
}

impl TracingObserver<NoopObserver> {
    pub fn new() -> Self {
        Self::wrap(NoopObserver)
    }
}

impl Default for TracingObserver<NoopObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: PipelineObserver> TracingObserver<O> {
    pub fn wrap(inner: O) -> Self {
        Self {
            inner,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl<O: PipelineObserver> PipelineObserver for TracingObserver<O> {
    fn stage_started(&self, stage: Stage) {
        info!(run = %self.run_id, %stage, "stage started");
        self.inner.stage_started(stage);
    }

    fn groups_formed(&self, groups: &[FileGroup]) {
        let files: usize = groups.iter().map(|g| g.len()).sum();
        let bytes: u64 = groups.iter().map(|g| g.total_size()).sum();
        info!(run = %self.run_id, groups = groups.len(), files, bytes, "files grouped");
        self.inner.groups_formed(groups);
    }

    fn blob_registered(&self, blob_id: &BlobId, reused: bool) {
        info!(run = %self.run_id, %blob_id, reused, "blob registered");
        self.inner.blob_registered(blob_id, reused);
    }

    fn node_write_failed(&self, blob_id: &BlobId, node: &NodeId, attempt: u32, error: &NodeError) {
        debug!(run = %self.run_id, %blob_id, %node, attempt, "write attempt failed: {}", error);
        self.inner.node_write_failed(blob_id, node, attempt, error);
    }

    fn blob_written(&self, blob_id: &BlobId, acks: usize) {
        info!(run = %self.run_id, %blob_id, acks, "blob written");
        self.inner.blob_written(blob_id, acks);
    }

    fn blob_failed(&self, failure: &BlobFailure) {
        warn!(
            run = %self.run_id,
            blob_id = %failure.blob_id,
            stage = %failure.stage,
            "blob failed: {}",
            failure.error
        );
        self.inner.blob_failed(failure);
    }

    fn blob_certified(&self, blob_id: &BlobId, tx_digest: &str) {
        info!(run = %self.run_id, %blob_id, tx = tx_digest, "blob certified");
        self.inner.blob_certified(blob_id, tx_digest);
    }

    fn site_published(&self, site: &PublishedSite) {
        info!(
            run = %self.run_id,
            site = %site.object_id,
            address = %site.address,
            mode = %site.mode,
            "site published"
        );
        self.inner.site_published(site);
    }
}

/// Observer that keeps a textual event log. Used by tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl PipelineObserver for RecordingObserver {
    fn stage_started(&self, stage: Stage) {
        self.push(format!("stage:{}", stage));
    }

    fn groups_formed(&self, groups: &[FileGroup]) {
        self.push(format!("groups:{}", groups.len()));
    }

    fn blob_registered(&self, blob_id: &BlobId, reused: bool) {
        self.push(format!("registered:{}:{}", blob_id, reused));
    }

    fn node_write_failed(&self, blob_id: &BlobId, node: &NodeId, attempt: u32, _error: &NodeError) {
        self.push(format!("write-failed:{}:{}:{}", blob_id, node, attempt));
    }

    fn blob_written(&self, blob_id: &BlobId, acks: usize) {
        self.push(format!("written:{}:{}", blob_id, acks));
    }

    fn blob_failed(&self, failure: &BlobFailure) {
        self.push(format!("failed:{}:{}", failure.blob_id, failure.stage));
    }

    fn blob_certified(&self, blob_id: &BlobId, _tx_digest: &str) {
        self.push(format!("certified:{}", blob_id));
    }

    fn site_published(&self, site: &PublishedSite) {
        self.push(format!("published:{}", site.address));
    }
}

impl<O: PipelineObserver + ?Sized> PipelineObserver for Arc<O> {
    fn stage_started(&self, stage: Stage) {
        (**self).stage_started(stage)
    }

    fn groups_formed(&self, groups: &[FileGroup]) {
        (**self).groups_formed(groups)
    }

    fn blob_registered(&self, blob_id: &BlobId, reused: bool) {
        (**self).blob_registered(blob_id, reused)
    }

    fn node_write_failed(&self, blob_id: &BlobId, node: &NodeId, attempt: u32, error: &NodeError) {
        (**self).node_write_failed(blob_id, node, attempt, error)
    }

    fn blob_written(&self, blob_id: &BlobId, acks: usize) {
        (**self).blob_written(blob_id, acks)
    }

    fn blob_failed(&self, failure: &BlobFailure) {
        (**self).blob_failed(failure)
    }

    fn blob_certified(&self, blob_id: &BlobId, tx_digest: &str) {
        (**self).blob_certified(blob_id, tx_digest)
    }

    fn site_published(&self, site: &PublishedSite) {
        (**self).site_published(site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_observer_forwards_to_inner() {
        let recorder = Arc::new(RecordingObserver::new());
        let observer = TracingObserver::wrap(recorder.clone());

        let blob_id = BlobId::from_content(b"x");
        observer.stage_started(Stage::Write);
        observer.blob_written(&blob_id, 3);
        observer.node_write_failed(
            &blob_id,
            &NodeId("n2".to_string()),
            1,
            &NodeError::Timeout(10),
        );

        assert_eq!(
            recorder.events(),
            vec![
                "stage:write".to_string(),
                format!("written:{}:3", blob_id),
                format!("write-failed:{}:n2:1", blob_id),
            ]
        );
    }

    #[test]
    fn test_noop_observer_is_silent() {
        let observer = NoopObserver;
        observer.stage_started(Stage::Grouping);
        observer.blob_registered(&BlobId::from_content(b"x"), false);
    }
}
