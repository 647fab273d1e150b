//! Local Ed25519 transaction signer.
//!
//! The signing key is a 32-byte seed, stored hex-encoded in a key file or
//! passed through `BLOBSITE_SIGNER_KEY`. Decoded seed bytes are zeroized as
//! soon as the key pair has been built.
//!
//! The account address is `0x` followed by the hex SHA-256 of the public key.

use super::traits::{SignedTransaction, Signer, SignerError, Transaction};
use crate::serialization::to_cbor;
use rand::RngCore;
use ring::signature::{Ed25519KeyPair, KeyPair};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

/// Environment variable holding a hex signing seed.
pub const SIGNER_KEY_ENV: &str = "BLOBSITE_SIGNER_KEY";

/// Signs transactions with a key held in memory.
pub struct LocalSigner {
    key_pair: Ed25519KeyPair,
    public_key: Vec<u8>,
    address: String,
}

impl LocalSigner {
    /// Key pair from a borrowed seed. The caller owns the seed buffer and
    /// is responsible for wiping it; no copy is made here.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, SignerError> {
        let key_pair = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        let public_key = key_pair.public_key().as_ref().to_vec();
        let address = format!("0x{}", hex::encode(Sha256::digest(&public_key)));
        Ok(Self {
            key_pair,
            public_key,
            address,
        })
    }

    /// Seed from hex text (optional `0x` prefix, surrounding whitespace
    /// ignored).
    pub fn from_hex(text: &str) -> Result<Self, SignerError> {
        let text = text.trim();
        let digits = text.strip_prefix("0x").unwrap_or(text);
        let bytes = Zeroizing::new(
            hex::decode(digits).map_err(|e| SignerError::InvalidKey(e.to_string()))?,
        );
        if bytes.len() != 32 {
            return Err(SignerError::InvalidKey(format!(
                "expected 32-byte seed, got {} bytes",
                bytes.len()
            )));
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&bytes);
        Self::from_seed(&seed)
    }

    pub fn from_file(path: &Path) -> Result<Self, SignerError> {
        let text = Zeroizing::new(std::fs::read_to_string(path)?);
        Self::from_hex(&text)
    }

    /// Signer from [`SIGNER_KEY_ENV`], if set.
    pub fn from_env() -> Result<Option<Self>, SignerError> {
        match std::env::var(SIGNER_KEY_ENV) {
            Ok(value) => {
                let value = Zeroizing::new(value);
                Self::from_hex(&value).map(Some)
            }
            Err(_) => Ok(None),
        }
    }

    /// Fresh random signer together with its hex seed, for writing a key
    /// file.
    pub fn generate() -> Result<(Self, Zeroizing<String>), SignerError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut seed[..]);
        let encoded = Zeroizing::new(hex::encode(&seed[..]));
        let signer = Self::from_seed(&seed)?;
        Ok((signer, encoded))
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Signer for LocalSigner {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign_transaction(&self, transaction: Transaction) -> Result<SignedTransaction, SignerError> {
        let message = to_cbor(&transaction).map_err(|e| SignerError::Encoding(e.to_string()))?;
        let signature = self.key_pair.sign(&message).as_ref().to_vec();

        Ok(SignedTransaction {
            transaction,
            sender: self.address.clone(),
            public_key: self.public_key.clone(),
            signature,
        })
    }
}
