//! Publication errors.
//!
//! Pre-flight failures (`NoFilesFound`, `InsufficientBalance`) and
//! registration failures end the run immediately. Write and certification
//! failures are isolated per blob and collected into `BlobsFailed` once the
//! certification stage has finished.

use super::blob::{BlobId, TransitionError};
use crate::network::traits::{LedgerError, SignerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Grouping,
    Registration,
    Write,
    Certification,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Grouping => "grouping",
            Stage::Registration => "registration",
            Stage::Write => "write",
            Stage::Certification => "certification",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// A blob that did not make it through a stage.
#[derive(Debug, Error)]
#[error("blob {blob_id} failed during {stage}: {error}")]
pub struct BlobFailure {
    pub blob_id: BlobId,
    pub stage: Stage,
    pub error: PublishError,
}

impl BlobFailure {
    pub fn new(blob_id: BlobId, stage: Stage, error: PublishError) -> Self {
        Self {
            blob_id,
            stage,
            error,
        }
    }
}

/// Errors surfaced by the publication pipeline.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("No files found to upload under '{}'", .root.display())]
    NoFilesFound { root: PathBuf },

    #[error(
        "Insufficient balance for {owner}: registering {blobs} blob(s) costs {required}, available {available}"
    )]
    InsufficientBalance {
        owner: String,
        blobs: usize,
        required: u64,
        available: u64,
    },

    #[error("Registration of blob {blob_id} failed: {reason}")]
    RegistrationFailed { blob_id: BlobId, reason: String },

    #[error("Blob {blob_id} collected {acks} of {quorum} required write acknowledgments")]
    WriteQuorumFailed {
        blob_id: BlobId,
        acks: usize,
        quorum: usize,
    },

    #[error("Content of blob {blob_id} changed on disk after registration")]
    ContentChanged { blob_id: BlobId },

    #[error("Certification of blob {blob_id} failed: {reason}")]
    CertificationFailed { blob_id: BlobId, reason: String },

    #[error("Site manifest publish failed: {0}")]
    ManifestPublishFailed(String),

    #[error("{} blob(s) failed during {stage}: {}", .failures.len(), summarize(.failures))]
    BlobsFailed {
        stage: Stage,
        failures: Vec<BlobFailure>,
    },

    #[error("Quorum {quorum} is not achievable with {nodes} storage node(s)")]
    InvalidQuorum { quorum: usize, nodes: usize },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    /// Stage a run-level error is attributed to.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PublishError::NoFilesFound { .. } => Some(Stage::Grouping),
            PublishError::InsufficientBalance { .. } | PublishError::RegistrationFailed { .. } => {
                Some(Stage::Registration)
            }
            PublishError::WriteQuorumFailed { .. }
            | PublishError::ContentChanged { .. }
            | PublishError::InvalidQuorum { .. } => Some(Stage::Write),
            PublishError::CertificationFailed { .. } => Some(Stage::Certification),
            PublishError::ManifestPublishFailed(_) => Some(Stage::Publish),
            PublishError::BlobsFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Blobs named by this error.
    pub fn failed_blobs(&self) -> Vec<BlobId> {
        match self {
            PublishError::RegistrationFailed { blob_id, .. }
            | PublishError::WriteQuorumFailed { blob_id, .. }
            | PublishError::ContentChanged { blob_id }
            | PublishError::CertificationFailed { blob_id, .. } => vec![*blob_id],
            PublishError::BlobsFailed { failures, .. } => {
                failures.iter().map(|f| f.blob_id).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn summarize(failures: &[BlobFailure]) -> String {
    failures
        .iter()
        .map(|f| f.error.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
