//! Blob certification.
//!
//! Every written blob gets one certification transaction carrying the
//! certificate aggregated from its write acknowledgments. Certifications
//! run concurrently and independently: a rejected certificate fails only
//! its own blob. Transient ledger errors are retried under the same
//! [`RetryPolicy`] as node writes.

use super::ack::Certificate;
use super::blob::{BlobArena, BlobHandle, BlobId, BlobState};
use super::error::{BlobFailure, PublishError, Stage};
use super::observer::PipelineObserver;
use super::retry::RetryPolicy;
use crate::network::traits::{LedgerClient, LedgerError, Signer, Transaction};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of the certification stage.
#[derive(Debug, Default)]
pub struct CertificationReport {
    /// Blobs certified by this stage, in registration order.
    pub certified: Vec<BlobId>,

    /// Blobs whose certification failed.
    pub failures: Vec<BlobFailure>,

    /// Blobs never offered for certification because they were not written.
    pub excluded: Vec<BlobId>,
}

/// Certifies written blobs on the ledger.
pub struct BlobCertifier<'a, L: LedgerClient + ?Sized> {
    ledger: &'a L,
    signer: &'a dyn Signer,
    retry: RetryPolicy,
    quorum: usize,
    epoch: u64,
    observer: &'a dyn PipelineObserver,
}

impl<'a, L: LedgerClient + ?Sized> BlobCertifier<'a, L> {
    pub fn new(
        ledger: &'a L,
        signer: &'a dyn Signer,
        retry: RetryPolicy,
        quorum: usize,
        epoch: u64,
        observer: &'a dyn PipelineObserver,
    ) -> Self {
        Self {
            ledger,
            signer,
            retry,
            quorum,
            epoch,
            observer,
        }
    }

    /// Certify every `Written` handle in `arena`.
    pub async fn certify_all(&self, arena: &mut BlobArena) -> CertificationReport {
        let mut report = CertificationReport {
            excluded: arena
                .in_state(BlobState::Registered)
                .map(|h| *h.blob_id())
                .collect(),
            ..Default::default()
        };

        let handles = arena.take_in_state(BlobState::Written);
        let results = join_all(handles.into_iter().map(|h| self.certify_blob(h))).await;

        let mut returned = Vec::with_capacity(results.len());
        for (handle, failure) in results {
            match failure {
                None => report.certified.push(*handle.blob_id()),
                Some(failure) => {
                    self.observer.blob_failed(&failure);
                    report.failures.push(failure);
                }
            }
            returned.push(handle);
        }
        arena.restore(returned);

        report
    }

    async fn certify_blob(&self, mut handle: BlobHandle) -> (BlobHandle, Option<BlobFailure>) {
        let blob_id = *handle.blob_id();
        match self.submit_certificate(&handle).await {
            Ok(tx_digest) => match handle.certify(tx_digest) {
                Ok(()) => {
                    if let Some(digest) = handle.certification_tx() {
                        self.observer.blob_certified(&blob_id, digest);
                    }
                    (handle, None)
                }
                Err(e) => (
                    handle,
                    Some(BlobFailure::new(blob_id, Stage::Certification, e.into())),
                ),
            },
            Err(e) => (
                handle,
                Some(BlobFailure::new(blob_id, Stage::Certification, e)),
            ),
        }
    }

    async fn submit_certificate(&self, handle: &BlobHandle) -> Result<String, PublishError> {
        let blob_id = *handle.blob_id();
        let failed = |reason: String| PublishError::CertificationFailed { blob_id, reason };

        if handle.ack_count() < self.quorum {
            return Err(PublishError::WriteQuorumFailed {
                blob_id,
                acks: handle.ack_count(),
                quorum: self.quorum,
            });
        }

        let certificate = Certificate::aggregate(blob_id, self.epoch, handle.write_acks())
            .map_err(|e| failed(e.to_string()))?;
        let signed = self
            .signer
            .sign_transaction(Transaction::CertifyBlob { certificate })
            .map_err(|e| failed(e.to_string()))?;

        // A transient failure may hide a certification that landed, so every
        // retry looks the blob up before submitting again.
        let resubmitting = AtomicBool::new(false);
        let ledger = self.ledger;
        let (signed, resubmitting) = (&signed, &resubmitting);
        let attempted = self
            .retry
            .run(
                move || async move {
                    if resubmitting.swap(true, Ordering::Relaxed) {
                        if let Some(digest) = ledger.find_certification(&blob_id).await? {
                            return Ok(digest);
                        }
                    }
                    ledger.submit(signed).await.map(|effects| effects.digest)
                },
                LedgerError::is_transient,
                |_, _| {},
            )
            .await;

        attempted
            .result
            .map_err(|e| failed(format!("{} (after {} attempt(s))", e, attempted.attempts)))
    }
}
