//! Property-based tests for grouping and the blob lifecycle
//!
//! Tests for:
//! - Grouping: size bound, completeness, order preservation
//! - Quorum: a handle is never written below quorum, never reverts

use super::ack::WriteAck;
use super::blob::{BlobHandle, BlobId, BlobState, GroupDigest};
use super::grouping::{group_files, FileEntry, FileGroup};
use super::pipeline::quorum_threshold;
use crate::network::traits::{NodeId, ObjectId, RegistrationReceipt};
use proptest::prelude::*;
use std::path::PathBuf;

fn entries(sizes: &[u64]) -> Vec<FileEntry> {
    sizes
        .iter()
        .enumerate()
        .map(|(i, size)| FileEntry {
            relative_path: format!("/f{}", i),
            absolute_path: PathBuf::from(format!("f{}", i)),
            size_bytes: *size,
        })
        .collect()
}

fn registered_handle() -> BlobHandle {
    let blob_id = BlobId::from_content(b"prop");
    let mut handle = BlobHandle::new(
        FileGroup::new(Vec::new()),
        GroupDigest {
            blob_id,
            size: 4,
            spans: Vec::new(),
        },
    );
    handle
        .register(RegistrationReceipt {
            blob_id,
            blob_object: ObjectId::from_bytes([0u8; 32]),
            tx_digest: "tx".to_string(),
            size: 4,
            end_epoch: 1,
        })
        .unwrap();
    handle
}

// ============================================================================
// GROUPING
// ============================================================================

proptest! {
    /// Property: every group fits the cap unless it is a single oversized file
    #[test]
    fn grouping_respects_size_bound(
        sizes in prop::collection::vec(0u64..5_000, 0..200),
        max in 1u64..10_000,
    ) {
        let groups = group_files(entries(&sizes), max);

        for group in &groups {
            prop_assert!(!group.is_empty(), "Groups are never empty");
            if group.len() > 1 {
                prop_assert!(group.total_size() <= max);
            }
        }
    }

    /// Property: concatenating the groups yields the input, in order
    #[test]
    fn grouping_is_complete_and_ordered(
        sizes in prop::collection::vec(0u64..5_000, 0..200),
        max in 1u64..10_000,
    ) {
        let files = entries(&sizes);
        let groups = group_files(files.clone(), max);

        let flattened: Vec<FileEntry> = groups
            .iter()
            .flat_map(|g| g.entries().iter().cloned())
            .collect();
        prop_assert_eq!(flattened, files);
    }

    /// Property: greedy grouping never leaves room for the next group's
    /// first file
    #[test]
    fn grouping_is_greedy(
        sizes in prop::collection::vec(1u64..5_000, 0..200),
        max in 1u64..10_000,
    ) {
        let groups = group_files(entries(&sizes), max);

        for pair in groups.windows(2) {
            let next = pair[1].entries()[0].size_bytes;
            prop_assert!(pair[0].total_size() + next > max);
        }
    }
}

// ============================================================================
// QUORUM
// ============================================================================

proptest! {
    /// Property: a handle becomes written exactly when acks reach quorum,
    /// and later acks or checks never move it back
    #[test]
    fn written_only_at_quorum(
        acks in 0usize..12,
        quorum in 1usize..12,
    ) {
        let mut handle = registered_handle();
        for i in 0..acks {
            handle.record_ack(WriteAck {
                blob_id: *handle.blob_id(),
                node_id: NodeId(format!("node-{}", i)),
                epoch: 1,
                signature: Vec::new(),
            }).unwrap();
        }

        let result = handle.mark_written(quorum);
        prop_assert_eq!(result.is_ok(), acks >= quorum);

        if acks >= quorum {
            prop_assert!(handle.certify("cert".to_string()).is_ok());
            prop_assert!(handle.is_certified());
            prop_assert!(handle.mark_written(quorum).is_err());
            prop_assert_eq!(handle.state(), BlobState::Certified);
        } else {
            prop_assert!(handle.certify("cert".to_string()).is_err());
            prop_assert!(!handle.is_certified());
        }
    }

    /// Property: the default quorum tolerates f = floor((n-1)/3) faulty nodes
    #[test]
    fn default_quorum_is_reachable(nodes in 1usize..200) {
        let quorum = quorum_threshold(nodes);
        let faulty = (nodes - 1) / 3;

        prop_assert!(quorum >= 1);
        prop_assert!(quorum <= nodes);
        prop_assert_eq!(quorum + faulty, nodes);
        prop_assert!(2 * quorum > nodes);
    }
}
