//! Site manifests and their publication.
//!
//! A [`SiteManifest`] maps site paths to byte ranges of certified blobs. The
//! [`SitePublisher`] either creates a new site object holding the manifest
//! or, when an existing site object id is configured, fetches that site's
//! manifest, overwrites the paths of the current run and submits the result
//! as an update. Paths the current run does not touch are kept.

use super::blob::{BlobHandle, BlobId};
use super::error::PublishError;
use crate::network::traits::{LedgerClient, ObjectId, Signer, Transaction};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Portal serving sites when none is configured.
pub const DEFAULT_PORTAL_DOMAIN: &str = "wal.app";

/// Descriptive metadata shown by portals and explorers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteMetadata {
    pub link: String,
    pub image_url: String,
    pub name: String,
    pub description: String,
    pub project_url: String,
    pub creator: String,
}

impl Default for SiteMetadata {
    fn default() -> Self {
        Self {
            link: String::new(),
            image_url: String::new(),
            name: "My Project".to_string(),
            description: "A decentralized web app deployed on blob storage.".to_string(),
            project_url: String::new(),
            creator: String::new(),
        }
    }
}

/// One file of the site: a byte range inside a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
    pub blob_id: BlobId,
    pub offset: u64,
    pub length: u64,
    pub content_type: String,
    /// Hex SHA-256 of the file.
    pub content_hash: String,
}

/// What a merge did to a manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub added: usize,
    pub replaced: usize,
    pub unchanged: usize,
    /// Existing paths the merge did not touch.
    pub retained: usize,
}

/// Path to resource mapping stored in a site object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteManifest {
    /// Absent until the site object has been created.
    pub site_object_id: Option<ObjectId>,

    pub site_name: String,

    pub metadata: SiteMetadata,

    /// Keyed by path, in publish order.
    pub resources: IndexMap<String, Resource>,
}

impl SiteManifest {
    pub fn new(site_name: impl Into<String>, metadata: SiteMetadata) -> Self {
        Self {
            site_object_id: None,
            site_name: site_name.into(),
            metadata,
            resources: IndexMap::new(),
        }
    }

    pub fn resource(&self, path: &str) -> Option<&Resource> {
        self.resources.get(path)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Insert or replace the resource at its path. A replaced path keeps its
    /// position.
    pub fn upsert(&mut self, resource: Resource) -> Option<Resource> {
        self.resources.insert(resource.path.clone(), resource)
    }

    /// Upsert every resource of `incoming`, leaving other paths alone.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Resource>) -> MergeSummary {
        let before = self.resources.len();
        let mut summary = MergeSummary::default();
        let mut touched_existing = 0;

        for resource in incoming {
            let replacement = resource.clone();
            match self.upsert(resource) {
                None => summary.added += 1,
                Some(previous) => {
                    touched_existing += 1;
                    if previous == replacement {
                        summary.unchanged += 1;
                    } else {
                        summary.replaced += 1;
                    }
                }
            }
        }

        summary.retained = before.saturating_sub(touched_existing);
        summary
    }
}

/// Resources for every file stored in `handle`, aliases included.
pub fn resources_for(handle: &BlobHandle) -> impl Iterator<Item = Resource> + '_ {
    let blob_id = *handle.blob_id();
    handle.spans().iter().map(move |span| Resource {
        path: span.path.clone(),
        blob_id,
        offset: span.offset,
        length: span.length,
        content_type: content_type_for(&span.path).to_string(),
        content_hash: span.sha256.clone(),
    })
}

/// MIME type guessed from the file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" | "map" => "application/json",
        "wasm" => "application/wasm",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/vnd.microsoft.icon",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}

/// Publicly resolvable address of a site object.
pub fn site_address(object_id: &ObjectId, portal_domain: &str) -> String {
    format!("https://{}.{}", object_id.to_base36(), portal_domain)
}

/// Whether the run creates a new site or updates an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishMode {
    Create,
    Update(ObjectId),
}

impl PublishMode {
    pub fn from_site_object_id(id: Option<ObjectId>) -> Self {
        match id {
            Some(id) => PublishMode::Update(id),
            None => PublishMode::Create,
        }
    }
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishMode::Create => f.write_str("create"),
            PublishMode::Update(_) => f.write_str("update"),
        }
    }
}

/// Result of a manifest publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedSite {
    pub object_id: ObjectId,
    pub address: String,
    pub mode: PublishMode,
    pub summary: MergeSummary,
}

/// Creates or updates the site object.
pub struct SitePublisher<'a, L: LedgerClient + ?Sized> {
    ledger: &'a L,
    signer: &'a dyn Signer,
    portal_domain: &'a str,
}

impl<'a, L: LedgerClient + ?Sized> SitePublisher<'a, L> {
    pub fn new(ledger: &'a L, signer: &'a dyn Signer, portal_domain: &'a str) -> Self {
        Self {
            ledger,
            signer,
            portal_domain,
        }
    }

    /// Publish `handles` under `site_name`.
    ///
    /// Every handle must be certified; the publisher refuses to reference
    /// anything else.
    pub async fn publish(
        &self,
        handles: &[&BlobHandle],
        site_name: &str,
        metadata: &SiteMetadata,
        mode: PublishMode,
    ) -> Result<PublishedSite, PublishError> {
        if handles.is_empty() {
            return Err(PublishError::ManifestPublishFailed(
                "no certified blobs to publish".to_string(),
            ));
        }
        if let Some(handle) = handles.iter().find(|h| !h.is_certified()) {
            return Err(PublishError::ManifestPublishFailed(format!(
                "blob {} is {}, not certified",
                handle.blob_id(),
                handle.state()
            )));
        }

        let incoming = handles.iter().flat_map(|h| resources_for(*h));

        let (object_id, summary) = match mode {
            PublishMode::Create => {
                let mut manifest = SiteManifest::new(site_name, metadata.clone());
                let summary = manifest.merge(incoming);
                let created = self
                    .submit(Transaction::CreateSite {
                        owner: self.signer.address().to_string(),
                        manifest,
                    })
                    .await?
                    .ok_or_else(|| {
                        PublishError::ManifestPublishFailed(
                            "ledger created no site object".to_string(),
                        )
                    })?;
                (created, summary)
            }
            PublishMode::Update(site) => {
                let mut manifest = self
                    .ledger
                    .fetch_site(&site)
                    .await
                    .map_err(|e| PublishError::ManifestPublishFailed(e.to_string()))?;
                manifest.site_object_id = Some(site);
                manifest.site_name = site_name.to_string();
                manifest.metadata = metadata.clone();
                let summary = manifest.merge(incoming);
                self.submit(Transaction::UpdateSite { site, manifest })
                    .await?;
                (site, summary)
            }
        };

        Ok(PublishedSite {
            object_id,
            address: site_address(&object_id, self.portal_domain),
            mode,
            summary,
        })
    }

    async fn submit(&self, transaction: Transaction) -> Result<Option<ObjectId>, PublishError> {
        let signed = self
            .signer
            .sign_transaction(transaction)
            .map_err(|e| PublishError::ManifestPublishFailed(e.to_string()))?;
        let effects = self
            .ledger
            .submit(&signed)
            .await
            .map_err(|e| PublishError::ManifestPublishFailed(e.to_string()))?;
        Ok(effects.created)
    }
}
