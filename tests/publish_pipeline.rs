// End-to-end runs of the publication pipeline against the in-memory ledger
// and storage committee.

use blobsite::network::mock::{MockLedger, MockStorage, NodeBehavior};
use blobsite::network::signer::LocalSigner;
use blobsite::network::traits::{Pricing, Signer, SystemState, Transaction};
use blobsite::publish::{
    Backoff, BlobId, Pipeline, PublishError, PublishMode, PublishSettings, RecordingObserver,
    RetryPolicy, Stage,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    ledger: MockLedger,
    storage: MockStorage,
    signer: Arc<LocalSigner>,
}

impl Harness {
    fn new(nodes: usize) -> Self {
        let storage = MockStorage::new(nodes);
        let ledger = MockLedger::new(storage.system_state());
        Self {
            ledger,
            storage,
            signer: Arc::new(LocalSigner::from_seed(&[9u8; 32]).unwrap()),
        }
    }

    fn with_system(storage: MockStorage, system: SystemState) -> Self {
        Self {
            ledger: MockLedger::new(system),
            storage,
            signer: Arc::new(LocalSigner::from_seed(&[9u8; 32]).unwrap()),
        }
    }

    fn pipeline(&self, settings: PublishSettings) -> Pipeline<MockLedger, MockStorage> {
        Pipeline::new(
            Arc::new(self.ledger.clone()),
            Arc::new(self.storage.clone()),
            self.signer.clone(),
            settings,
        )
    }
}

fn settings(root: &Path) -> PublishSettings {
    PublishSettings {
        upload_path: root.to_path_buf(),
        site_name: "docs".to_string(),
        retry: RetryPolicy::new(3, Backoff::Fixed(Duration::ZERO)),
        write_timeout: Duration::from_secs(5),
        settle_delay: Duration::ZERO,
        ..Default::default()
    }
}

/// One file per blob: every file is 8 bytes and groups hold at most 8.
fn site_tree(files: &[(&str, &[u8; 8])]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let target = dir.path().join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(target, content).unwrap();
    }
    dir
}

fn one_file_per_blob(root: &Path) -> PublishSettings {
    PublishSettings {
        max_group_size: 8,
        ..settings(root)
    }
}

#[tokio::test]
async fn test_publishes_with_one_node_down() {
    let site = site_tree(&[
        ("index.html", b"<html/>\n"),
        ("css/site.css", b"body{}\n\n"),
    ]);
    let harness = Harness::new(4);
    harness.storage.set_behavior("node-2", NodeBehavior::AlwaysFail);
    let observer = Arc::new(RecordingObserver::new());

    let outcome = harness
        .pipeline(settings(site.path()))
        .with_observer(observer.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.mode, PublishMode::Create);
    assert_eq!(outcome.files, 2);
    assert_eq!(outcome.blobs.len(), 1);
    assert!(outcome.address.starts_with("https://"));
    assert!(outcome.address.ends_with(".wal.app"));

    let blob_id = outcome.blobs[0];
    assert!(harness.ledger.is_certified(&blob_id));
    // Default quorum for 4 nodes is 3: the remaining nodes carry the blob.
    for node in ["node-1", "node-3", "node-4"] {
        assert!(harness.storage.stored(node, &blob_id));
    }
    assert!(!harness.storage.stored("node-2", &blob_id));
    assert_eq!(harness.storage.attempts("node-2"), 3);

    let manifest = harness.ledger.site(&outcome.site_object_id).unwrap();
    assert_eq!(manifest.site_name, "docs");
    assert_eq!(manifest.len(), 2);
    let css = manifest.resource("/css/site.css").unwrap();
    assert_eq!(css.blob_id, blob_id);
    assert_eq!(css.content_type, "text/css");

    let events = observer.events();
    assert!(events.contains(&"stage:write".to_string()));
    assert!(events.iter().any(|e| e.starts_with("write-failed:") && e.contains(":node-2:")));
    assert_eq!(
        events.last().unwrap(),
        &format!("published:{}", outcome.address)
    );
}

#[tokio::test]
async fn test_empty_directory_contacts_nobody() {
    let site = TempDir::new().unwrap();
    fs::write(site.path().join(".hidden"), b"secret").unwrap();
    let harness = Harness::new(4);

    let err = harness
        .pipeline(settings(site.path()))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PublishError::NoFilesFound { .. }));
    assert_eq!(harness.ledger.call_count(), 0);
    assert_eq!(harness.storage.attempts("node-1"), 0);
}

#[tokio::test]
async fn test_failing_blob_is_isolated_and_blocks_the_site() {
    let site = site_tree(&[
        ("a.html", b"aaaaaaaa"),
        ("b.html", b"bbbbbbbb"),
        ("c.html", b"cccccccc"),
    ]);
    let harness = Harness::new(4);
    let poisoned = BlobId::from_content(b"bbbbbbbb");
    harness
        .storage
        .set_behavior("node-1", NodeBehavior::FailForBlob(poisoned));
    harness
        .storage
        .set_behavior("node-2", NodeBehavior::FailForBlob(poisoned));

    let err = harness
        .pipeline(one_file_per_blob(site.path()))
        .run()
        .await
        .unwrap_err();

    match err {
        PublishError::BlobsFailed { stage, failures } => {
            assert_eq!(stage, Stage::Write);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].blob_id, poisoned);
            assert!(matches!(
                failures[0].error,
                PublishError::WriteQuorumFailed {
                    acks: 2,
                    quorum: 3,
                    ..
                }
            ));
        }
        other => panic!("Expected BlobsFailed, got {:?}", other),
    }

    // The healthy blobs went all the way through certification.
    assert!(harness.ledger.is_certified(&BlobId::from_content(b"aaaaaaaa")));
    assert!(harness.ledger.is_certified(&BlobId::from_content(b"cccccccc")));
    assert!(!harness.ledger.is_certified(&poisoned));
    assert!(!harness
        .ledger
        .submitted()
        .iter()
        .any(|tx| matches!(tx, Transaction::CreateSite { .. })));
}

#[tokio::test]
async fn test_republish_reuses_registrations_and_updates_site() {
    let site = site_tree(&[
        ("index.html", b"version1"),
        ("logo.svg", b"<svg/>\n\n"),
    ]);
    let harness = Harness::new(4);

    let first = harness
        .pipeline(one_file_per_blob(site.path()))
        .run()
        .await
        .unwrap();
    assert_eq!(first.reused_registrations, 0);
    assert_eq!(harness.ledger.registrations_submitted(), 2);

    fs::write(site.path().join("index.html"), b"version2").unwrap();
    let second = harness
        .pipeline(PublishSettings {
            site_object_id: Some(first.site_object_id),
            ..one_file_per_blob(site.path())
        })
        .run()
        .await
        .unwrap();

    assert_eq!(second.mode, PublishMode::Update(first.site_object_id));
    assert_eq!(second.site_object_id, first.site_object_id);
    assert_eq!(second.address, first.address);
    assert_eq!(second.reused_registrations, 1);
    assert_eq!(harness.ledger.registrations_submitted(), 3);
    assert_eq!(second.summary.replaced, 1);
    assert_eq!(second.summary.unchanged, 1);
    assert_eq!(second.summary.added, 0);

    let manifest = harness.ledger.site(&first.site_object_id).unwrap();
    assert_eq!(
        manifest.resource("/index.html").unwrap().blob_id,
        BlobId::from_content(b"version2")
    );
}

#[tokio::test]
async fn test_transient_node_failures_are_retried_within_bound() {
    let site = site_tree(&[("index.html", b"<html/>\n")]);
    let harness = Harness::new(4);
    harness.storage.set_behavior("node-3", NodeBehavior::FailFirst(2));
    harness.storage.set_behavior("node-4", NodeBehavior::FailFirst(10));

    let outcome = harness
        .pipeline(settings(site.path()))
        .run()
        .await
        .unwrap();

    let blob_id = outcome.blobs[0];
    assert_eq!(harness.storage.attempts("node-1"), 1);
    assert_eq!(harness.storage.attempts("node-3"), 3);
    assert!(harness.storage.stored("node-3", &blob_id));
    assert_eq!(harness.storage.attempts("node-4"), 3);
    assert!(!harness.storage.stored("node-4", &blob_id));
}

#[tokio::test]
async fn test_insufficient_balance_submits_nothing() {
    let site = site_tree(&[("index.html", b"<html/>\n")]);
    let storage = MockStorage::new(4);
    let system = SystemState {
        pricing: Pricing {
            unit_size: 1024,
            storage_price_per_unit_epoch: 10,
            write_price_per_unit: 5,
        },
        ..storage.system_state()
    };
    let harness = Harness::with_system(storage, system);
    harness.ledger.set_balance(harness.signer.address(), 54);

    let err = harness
        .pipeline(settings(site.path()))
        .run()
        .await
        .unwrap_err();

    match err {
        PublishError::InsufficientBalance {
            required,
            available,
            blobs,
            ..
        } => {
            // One unit for five epochs plus the write price.
            assert_eq!(required, 55);
            assert_eq!(available, 54);
            assert_eq!(blobs, 1);
        }
        other => panic!("Expected InsufficientBalance, got {:?}", other),
    }
    assert!(harness.ledger.submitted().is_empty());
    assert_eq!(harness.storage.attempts("node-1"), 0);
}

#[tokio::test]
async fn test_unreachable_quorum_is_rejected_before_registration() {
    let site = site_tree(&[("index.html", b"<html/>\n")]);
    let harness = Harness::new(4);

    let err = harness
        .pipeline(PublishSettings {
            quorum: Some(5),
            ..settings(site.path())
        })
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PublishError::InvalidQuorum {
            quorum: 5,
            nodes: 4
        }
    ));
    assert!(harness.ledger.submitted().is_empty());
}

#[tokio::test]
async fn test_duplicate_content_is_stored_once() {
    let site = site_tree(&[
        ("en/index.html", b"same!!!\n"),
        ("fr/index.html", b"same!!!\n"),
    ]);
    let harness = Harness::new(1);

    let outcome = harness
        .pipeline(one_file_per_blob(site.path()))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.blobs.len(), 1);
    assert_eq!(outcome.files, 2);
    assert_eq!(harness.ledger.registrations_submitted(), 1);

    let manifest = harness.ledger.site(&outcome.site_object_id).unwrap();
    assert_eq!(
        manifest.resource("/en/index.html").unwrap().blob_id,
        manifest.resource("/fr/index.html").unwrap().blob_id
    );
}
