//! Blob publication pipeline.
//!
//! Publishes a static file tree: files are grouped into size-bounded
//! batches, each batch is registered as a blob, written to the storage
//! committee until a quorum acknowledges it, certified on the ledger and
//! finally referenced from a site manifest.

pub mod ack;
pub mod blob;
pub mod certification;
pub mod error;
pub mod grouping;
pub mod notify;
pub mod observer;
pub mod pipeline;
pub mod registration;
pub mod retry;
pub mod site;
pub mod writer;

#[cfg(test)]
mod proptests;

pub use ack::{AckError, Certificate, WriteAck};
pub use blob::{BlobArena, BlobHandle, BlobId, BlobState, NodeOutcome, TransitionError};
pub use certification::{BlobCertifier, CertificationReport};
pub use error::{BlobFailure, PublishError, Stage};
pub use grouping::{collect_files, group_directory, group_files, FileEntry, FileGroup};
pub use notify::{resolve_project_id, Notification, Notifier, NotifyError};
pub use observer::{NoopObserver, PipelineObserver, RecordingObserver, TracingObserver};
pub use pipeline::{
    plan, quorum_threshold, Pipeline, PlannedBlob, PublishOutcome, PublishPlan, PublishSettings,
    DEFAULT_MAX_GROUP_SIZE, DEFAULT_SETTLE_DELAY,
};
pub use registration::{
    hash_group, registration_cost, storage_units, BlobRegistrar, RegistrationReport,
    StorageParams,
};
pub use retry::{Backoff, RetryPolicy, DEFAULT_RETRY_LIMIT};
pub use site::{
    site_address, MergeSummary, PublishMode, PublishedSite, Resource, SiteManifest, SiteMetadata,
    SitePublisher, DEFAULT_PORTAL_DOMAIN,
};
pub use writer::{BlobWriter, WriteConfig, WriteReport};
