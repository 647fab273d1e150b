//! Blobsite - static site publication on decentralized blob storage
//!
//! A site directory is published in five stages:
//! - grouping: files are packed into size-bounded groups, one blob each
//! - registration: every blob gets a paid storage reservation on the ledger
//! - writing: payloads go to the storage committee until a quorum acknowledges
//! - certification: the acknowledgments are aggregated and certified on the ledger
//! - site publication: a manifest mapping paths to blob ranges is created or updated
//!
//! Blobs fail independently; the site is only published once every blob is
//! certified.

pub mod network;
pub mod publish;
pub mod serialization;
