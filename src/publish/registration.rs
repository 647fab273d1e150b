//! Blob registration.
//!
//! Each file group is hashed into a content identifier and a storage
//! reservation is registered for it on the ledger:
//!
//! 1. Hash every group (SHA-256 over the concatenated content, in order)
//! 2. Collapse groups with identical content into one handle
//! 3. Reuse live registrations the owner already holds
//! 4. Check the owner's balance against the cost of the remaining ones
//! 5. Submit one registration transaction per remaining identifier
//!
//! No transaction is submitted unless the whole batch is affordable.

use super::blob::{BlobArena, BlobHandle, BlobId, BlobState, GroupDigest, ResourceSpan};
use super::error::PublishError;
use super::grouping::FileGroup;
use super::observer::PipelineObserver;
use crate::network::traits::{
    LedgerClient, Pricing, RegistrationReceipt, Signer, SystemState, Transaction,
};
use sha2::{Digest, Sha256};

/// Who pays for storage and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageParams {
    /// Ledger address of the owner account.
    pub owner: String,

    /// Number of epochs to reserve storage for.
    pub epochs: u32,

    /// Spendable balance of `owner`.
    pub balance: u64,
}

/// Outcome of the registration stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Identifiers registered by a new transaction.
    pub registered: Vec<BlobId>,

    /// Identifiers whose existing registration was reused.
    pub reused: Vec<BlobId>,

    /// Groups folded into an existing handle because their content matched.
    pub deduplicated: usize,

    /// Total cost of the submitted registrations.
    pub total_cost: u64,
}

/// Hash a group's content and record where each file lands in the blob.
pub async fn hash_group(group: &FileGroup) -> std::io::Result<GroupDigest> {
    let mut hasher = Sha256::new();
    let mut spans = Vec::with_capacity(group.len());
    let mut offset = 0u64;

    for entry in group.entries() {
        let content = tokio::fs::read(&entry.absolute_path).await?;
        hasher.update(&content);

        let length = content.len() as u64;
        spans.push(ResourceSpan {
            path: entry.relative_path.clone(),
            offset,
            length,
            sha256: hex::encode(Sha256::digest(&content)),
        });
        offset += length;
    }

    Ok(GroupDigest {
        blob_id: BlobId::from_bytes(hasher.finalize().into()),
        size: offset,
        spans,
    })
}

/// Storage units needed for `size` bytes. Never less than one.
pub fn storage_units(size: u64, unit_size: u64) -> u64 {
    let unit_size = unit_size.max(1);
    size.div_ceil(unit_size).max(1)
}

/// Cost of registering `size` bytes for `epochs` epochs.
pub fn registration_cost(size: u64, epochs: u32, pricing: &Pricing) -> u64 {
    let per_unit = pricing
        .storage_price_per_unit_epoch
        .saturating_mul(u64::from(epochs))
        .saturating_add(pricing.write_price_per_unit);
    storage_units(size, pricing.unit_size).saturating_mul(per_unit)
}

/// Registers blob identifiers on the ledger.
pub struct BlobRegistrar<'a, L: LedgerClient + ?Sized> {
    ledger: &'a L,
    signer: &'a dyn Signer,
    observer: &'a dyn PipelineObserver,
}

impl<'a, L: LedgerClient + ?Sized> BlobRegistrar<'a, L> {
    pub fn new(ledger: &'a L, signer: &'a dyn Signer, observer: &'a dyn PipelineObserver) -> Self {
        Self {
            ledger,
            signer,
            observer,
        }
    }

    /// Register every group, leaving one `Registered` handle per distinct
    /// identifier in `arena`.
    ///
    /// Fails without touching the ledger's state if the owner cannot pay for
    /// the registrations that need a transaction. The first rejected
    /// submission aborts the stage.
    pub async fn register(
        &self,
        groups: Vec<FileGroup>,
        params: &StorageParams,
        system: &SystemState,
        arena: &mut BlobArena,
    ) -> Result<RegistrationReport, PublishError> {
        let mut report = RegistrationReport::default();

        for group in groups {
            let digest = hash_group(&group).await?;
            match arena.get_mut(&digest.blob_id) {
                Some(existing) => {
                    existing.add_alias(group, digest);
                    report.deduplicated += 1;
                }
                None => {
                    // Cannot collide: presence was checked above.
                    let _ = arena.insert(BlobHandle::new(group, digest));
                }
            }
        }

        // An existing reservation is only reused if it lasts as long as a
        // fresh one would; shorter ones are registered again and paid for.
        let wanted_end = system.epoch.saturating_add(u64::from(params.epochs));
        let mut reusable = Vec::new();
        let mut pending = Vec::new();
        for handle in arena.in_state(BlobState::Grouped) {
            let blob_id = *handle.blob_id();
            match self.ledger.find_registration(&params.owner, &blob_id).await? {
                Some(receipt) if receipt.end_epoch >= wanted_end => {
                    reusable.push(receipt);
                }
                _ => pending.push((blob_id, handle.size())),
            }
        }

        let required = pending.iter().fold(0u64, |total, (_, size)| {
            total.saturating_add(registration_cost(*size, params.epochs, &system.pricing))
        });
        if required > params.balance {
            return Err(PublishError::InsufficientBalance {
                owner: params.owner.clone(),
                blobs: pending.len(),
                required,
                available: params.balance,
            });
        }

        for receipt in reusable {
            let blob_id = receipt.blob_id;
            if let Some(handle) = arena.get_mut(&blob_id) {
                handle.register(receipt)?;
                self.observer.blob_registered(&blob_id, true);
                report.reused.push(blob_id);
            }
        }

        for (blob_id, size) in pending {
            let receipt = self.submit_registration(blob_id, size, params).await?;
            if let Some(handle) = arena.get_mut(&blob_id) {
                handle.register(receipt)?;
            }
            self.observer.blob_registered(&blob_id, false);
            report.registered.push(blob_id);
        }
        report.total_cost = required;

        Ok(report)
    }

    async fn submit_registration(
        &self,
        blob_id: BlobId,
        size: u64,
        params: &StorageParams,
    ) -> Result<RegistrationReceipt, PublishError> {
        let failed = |reason: String| PublishError::RegistrationFailed { blob_id, reason };

        let signed = self.signer.sign_transaction(Transaction::RegisterBlob {
            owner: params.owner.clone(),
            blob_id,
            size,
            epochs: params.epochs,
        })?;

        let effects = self
            .ledger
            .submit(&signed)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let blob_object = effects
            .created
            .ok_or_else(|| failed("ledger created no blob object".to_string()))?;

        Ok(RegistrationReceipt {
            blob_id,
            blob_object,
            tx_digest: effects.digest,
            size,
            end_epoch: effects.epoch + u64::from(params.epochs),
        })
    }
}
