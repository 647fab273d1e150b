//! Ledger and storage-node access.
//!
//! The pipeline only sees the traits in [`traits`]; [`http`] talks to real
//! gateways and nodes, [`mock`] runs everything in memory for tests.

pub mod http;
pub mod mock;
pub mod signer;
pub mod traits;

pub use http::{HttpLedgerClient, HttpStorageClient};
pub use mock::{MockLedger, MockStorage, NodeBehavior};
pub use signer::{LocalSigner, SIGNER_KEY_ENV};
pub use traits::{
    LedgerClient, LedgerError, NodeError, NodeId, ObjectId, Pricing, RegistrationReceipt,
    SignedTransaction, Signer, SignerError, StorageClient, StorageNode, SystemState, Transaction,
    TransactionEffects,
};
