//! Publication pipeline.
//!
//! Runs the stages strictly in order, each consuming what the previous one
//! produced:
//!
//! ```text
//! group -> register -> (settle delay) -> write -> certify -> publish
//! ```
//!
//! Grouping and registration failures end the run at once. Write and
//! certification failures are isolated per blob; once certification is
//! over, any failed blob fails the run with [`PublishError::BlobsFailed`]
//! and no manifest is published. Blobs certified by then stay certified.

use super::blob::{BlobArena, BlobHandle, BlobId};
use super::certification::BlobCertifier;
use super::error::{PublishError, Stage};
use super::grouping::{group_directory, FileGroup};
use super::observer::{NoopObserver, PipelineObserver};
use super::registration::{hash_group, storage_units, BlobRegistrar, StorageParams};
use super::retry::RetryPolicy;
use super::site::{MergeSummary, PublishMode, SiteMetadata, SitePublisher, DEFAULT_PORTAL_DOMAIN};
use super::writer::{BlobWriter, WriteConfig};
use crate::network::traits::{LedgerClient, ObjectId, Signer, StorageClient};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default cap on the size of one group (10 MiB).
pub const DEFAULT_MAX_GROUP_SIZE: u64 = 10 * 1024 * 1024;

/// Default pause between registration and the first write.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Root of the site tree.
    pub upload_path: PathBuf,

    pub site_name: String,

    pub metadata: SiteMetadata,

    /// Epochs to reserve storage for.
    pub epochs: u32,

    /// Existing site to update. `None` creates a new site.
    pub site_object_id: Option<ObjectId>,

    pub max_group_size: u64,

    pub include_hidden: bool,

    /// Acknowledgments required per blob. `None` uses [`quorum_threshold`].
    pub quorum: Option<usize>,

    pub retry: RetryPolicy,

    pub write_timeout: Duration,

    pub max_parallel: usize,

    pub settle_delay: Duration,

    pub portal_domain: String,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            upload_path: PathBuf::from("./dist"),
            site_name: "my-site".to_string(),
            metadata: SiteMetadata::default(),
            epochs: 5,
            site_object_id: None,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            include_hidden: false,
            quorum: None,
            retry: RetryPolicy::default(),
            write_timeout: Duration::from_secs(30),
            max_parallel: 4,
            settle_delay: DEFAULT_SETTLE_DELAY,
            portal_domain: DEFAULT_PORTAL_DOMAIN.to_string(),
        }
    }
}

/// Byzantine quorum over `nodes` storage nodes: `n - floor((n - 1) / 3)`,
/// at least one.
pub fn quorum_threshold(nodes: usize) -> usize {
    nodes
        .saturating_sub(nodes.saturating_sub(1) / 3)
        .max(1)
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub address: String,
    pub site_object_id: ObjectId,
    pub mode: PublishMode,
    /// Certified blobs referenced by the manifest.
    pub blobs: Vec<BlobId>,
    pub files: usize,
    pub reused_registrations: usize,
    pub registration_cost: u64,
    pub summary: MergeSummary,
}

/// One blob of a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedBlob {
    pub blob_id: BlobId,
    pub paths: Vec<String>,
    pub size: u64,
    pub units: u64,
    /// Another group of the plan has identical content.
    pub duplicate: bool,
}

/// Groups and storage footprint of a run, computed without any network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishPlan {
    pub blobs: Vec<PlannedBlob>,
    pub epochs: u32,
}

impl PublishPlan {
    /// Storage units times epochs over distinct blobs.
    pub fn unit_epochs(&self) -> u64 {
        self.blobs
            .iter()
            .filter(|b| !b.duplicate)
            .map(|b| b.units.saturating_mul(u64::from(self.epochs)))
            .sum()
    }
}

/// Group and hash the site tree without contacting the ledger.
pub async fn plan(settings: &PublishSettings, unit_size: u64) -> Result<PublishPlan, PublishError> {
    let groups = group_directory(
        &settings.upload_path,
        settings.max_group_size,
        settings.include_hidden,
    )?;

    let mut seen = HashSet::new();
    let mut blobs = Vec::with_capacity(groups.len());
    for group in &groups {
        let digest = hash_group(group).await?;
        blobs.push(PlannedBlob {
            blob_id: digest.blob_id,
            paths: group.entries().iter().map(|e| e.relative_path.clone()).collect(),
            size: digest.size,
            units: storage_units(digest.size, unit_size),
            duplicate: !seen.insert(digest.blob_id),
        });
    }

    Ok(PublishPlan {
        blobs,
        epochs: settings.epochs,
    })
}

/// A configured publication run.
pub struct Pipeline<L: LedgerClient, S: StorageClient> {
    ledger: Arc<L>,
    storage: Arc<S>,
    signer: Arc<dyn Signer>,
    observer: Arc<dyn PipelineObserver>,
    settings: PublishSettings,
}

impl<L: LedgerClient, S: StorageClient> Pipeline<L, S> {
    pub fn new(
        ledger: Arc<L>,
        storage: Arc<S>,
        signer: Arc<dyn Signer>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            ledger,
            storage,
            signer,
            observer: Arc::new(NoopObserver),
            settings,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Run every stage once.
    pub async fn run(&self) -> Result<PublishOutcome, PublishError> {
        let settings = &self.settings;
        let ledger = self.ledger.as_ref();
        let signer = self.signer.as_ref();
        let observer = self.observer.as_ref();

        observer.stage_started(Stage::Grouping);
        let groups: Vec<FileGroup> = group_directory(
            &settings.upload_path,
            settings.max_group_size,
            settings.include_hidden,
        )?;
        observer.groups_formed(&groups);
        let files = groups.iter().map(|g| g.len()).sum();

        let system = ledger.system_state().await?;
        let quorum = settings
            .quorum
            .unwrap_or_else(|| quorum_threshold(system.nodes.len()));
        if quorum == 0 || quorum > system.nodes.len() {
            return Err(PublishError::InvalidQuorum {
                quorum,
                nodes: system.nodes.len(),
            });
        }

        let params = StorageParams {
            owner: signer.address().to_string(),
            epochs: settings.epochs,
            balance: ledger.balance(signer.address()).await?,
        };

        observer.stage_started(Stage::Registration);
        let mut arena = BlobArena::new();
        let registration = BlobRegistrar::new(ledger, signer, observer)
            .register(groups, &params, &system, &mut arena)
            .await?;

        tokio::time::sleep(settings.settle_delay).await;

        observer.stage_started(Stage::Write);
        let write_config = WriteConfig {
            quorum,
            retry: settings.retry,
            write_timeout: settings.write_timeout,
            max_parallel: settings.max_parallel,
        };
        let written = BlobWriter::new(
            self.storage.as_ref(),
            &system.nodes,
            system.epoch,
            &write_config,
            observer,
        )
        .write_all(&mut arena)
        .await?;

        observer.stage_started(Stage::Certification);
        let certified = BlobCertifier::new(
            ledger,
            signer,
            settings.retry,
            quorum,
            system.epoch,
            observer,
        )
        .certify_all(&mut arena)
        .await;

        let mut failures = written.failures;
        failures.extend(certified.failures);
        if let Some(first) = failures.first() {
            return Err(PublishError::BlobsFailed {
                stage: first.stage,
                failures,
            });
        }

        observer.stage_started(Stage::Publish);
        let handles: Vec<&BlobHandle> = arena.iter().collect();
        let site = SitePublisher::new(ledger, signer, &settings.portal_domain)
            .publish(
                &handles,
                &settings.site_name,
                &settings.metadata,
                PublishMode::from_site_object_id(settings.site_object_id),
            )
            .await?;
        observer.site_published(&site);

        Ok(PublishOutcome {
            address: site.address,
            site_object_id: site.object_id,
            mode: site.mode,
            blobs: arena.ids().to_vec(),
            files,
            reused_registrations: registration.reused.len(),
            registration_cost: registration.total_cost,
            summary: site.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_quorum_threshold() {
        assert_eq!(quorum_threshold(0), 1);
        assert_eq!(quorum_threshold(1), 1);
        assert_eq!(quorum_threshold(2), 2);
        assert_eq!(quorum_threshold(3), 3);
        assert_eq!(quorum_threshold(4), 3);
        assert_eq!(quorum_threshold(7), 5);
        assert_eq!(quorum_threshold(10), 7);
    }

    #[tokio::test]
    async fn test_plan_marks_duplicates() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/index.html"), b"same").unwrap();
        fs::write(dir.path().join("b/index.html"), b"same").unwrap();
        fs::write(dir.path().join("c.txt"), vec![0u8; 3000]).unwrap();

        let settings = PublishSettings {
            upload_path: dir.path().to_path_buf(),
            max_group_size: 4,
            epochs: 2,
            ..Default::default()
        };
        let plan = plan(&settings, 1024).await.unwrap();

        assert_eq!(plan.blobs.len(), 3);
        assert!(!plan.blobs[0].duplicate);
        assert!(plan.blobs[1].duplicate);
        assert_eq!(plan.blobs[2].units, 3);
        // (1 + 3) distinct units over 2 epochs
        assert_eq!(plan.unit_epochs(), 8);
    }

    #[tokio::test]
    async fn test_plan_of_empty_tree_fails() {
        let dir = TempDir::new().unwrap();
        let settings = PublishSettings {
            upload_path: dir.path().to_path_buf(),
            ..Default::default()
        };

        assert!(matches!(
            plan(&settings, 1024).await,
            Err(PublishError::NoFilesFound { .. })
        ));
    }
}
