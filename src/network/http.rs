//! HTTP clients for the ledger gateway and the storage nodes.
//!
//! ## Ledger gateway
//!
//! | Method | Path | Answer |
//! |--------|------|--------|
//! | GET | `/v1/accounts/{owner}/balance` | `{"balance": u64}` |
//! | GET | `/v1/system` | [`SystemState`] |
//! | GET | `/v1/accounts/{owner}/blobs/{blob_id}` | [`RegistrationReceipt`], 404 if none |
//! | GET | `/v1/blobs/{blob_id}/certification` | `{"tx_digest": string}`, 404 if none |
//! | POST | `/v1/transactions` | [`TransactionEffects`] |
//! | GET | `/v1/sites/{object_id}` | [`SiteManifest`] |
//!
//! ## Storage node
//!
//! `PUT {endpoint}/v1/blobs/{blob_id}` with the raw payload, answered with a
//! JSON [`WriteAck`].

use super::traits::*;
use crate::publish::ack::WriteAck;
use crate::publish::blob::BlobId;
use crate::publish::site::SiteManifest;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct BalanceResponse {
    balance: u64,
}

#[derive(Deserialize)]
struct CertificationResponse {
    tx_digest: String,
}

/// Ledger client talking to a JSON gateway.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<Response, LedgerError> {
        self.client
            .get(self.url(path))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(ledger_transport_error)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, LedgerError> {
        let response = check_ledger_status(self.get(path).await?).await?;
        response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }
}

fn ledger_transport_error(e: reqwest::Error) -> LedgerError {
    if e.is_timeout() {
        LedgerError::Timeout
    } else {
        LedgerError::Network(e.to_string())
    }
}

async fn check_ledger_status(response: Response) -> Result<Response, LedgerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        body
    };
    Err(match status {
        StatusCode::NOT_FOUND => LedgerError::NotFound(detail),
        s if s.is_client_error() => LedgerError::Rejected(detail),
        _ => LedgerError::Network(detail),
    })
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn balance(&self, owner: &str) -> Result<u64, LedgerError> {
        let response: BalanceResponse = self
            .get_json(&format!("/v1/accounts/{}/balance", owner))
            .await?;
        Ok(response.balance)
    }

    async fn system_state(&self) -> Result<SystemState, LedgerError> {
        self.get_json("/v1/system").await
    }

    async fn find_registration(
        &self,
        owner: &str,
        blob_id: &BlobId,
    ) -> Result<Option<RegistrationReceipt>, LedgerError> {
        let response = self
            .get(&format!("/v1/accounts/{}/blobs/{}", owner, blob_id))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_ledger_status(response)
            .await?
            .json()
            .await
            .map(Some)
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn find_certification(&self, blob_id: &BlobId) -> Result<Option<String>, LedgerError> {
        let response = self
            .get(&format!("/v1/blobs/{}/certification", blob_id))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_ledger_status(response)
            .await?
            .json::<CertificationResponse>()
            .await
            .map(|c| Some(c.tx_digest))
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<TransactionEffects, LedgerError> {
        let response = self
            .client
            .post(self.url("/v1/transactions"))
            .json(tx)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(ledger_transport_error)?;
        check_ledger_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn fetch_site(&self, site: &ObjectId) -> Result<SiteManifest, LedgerError> {
        self.get_json(&format!("/v1/sites/{}", site)).await
    }
}

/// Storage client speaking the node blob API.
#[derive(Debug, Clone, Default)]
pub struct HttpStorageClient {
    client: reqwest::Client,
}

impl HttpStorageClient {
    pub fn new() -> Self {
        Self::default()
    }
}

fn node_transport_error(e: reqwest::Error) -> NodeError {
    // The caller bounds each attempt with its own timeout.
    if e.is_timeout() {
        NodeError::Timeout(0)
    } else {
        NodeError::Network(e.to_string())
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn store(
        &self,
        node: &StorageNode,
        blob_id: &BlobId,
        payload: &[u8],
    ) -> Result<WriteAck, NodeError> {
        let url = format!(
            "{}/v1/blobs/{}",
            node.endpoint.trim_end_matches('/'),
            blob_id
        );
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(node_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("{} {}", status, body).trim().to_string();
            return Err(match status {
                StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => {
                    NodeError::Unavailable(detail)
                }
                s if s.is_client_error() => NodeError::Rejected(detail),
                _ => NodeError::Network(detail),
            });
        }

        response
            .json()
            .await
            .map_err(|e| NodeError::InvalidAck(e.to_string()))
    }
}
