//! Best-effort project notification.
//!
//! After a site is published its address is POSTed to a tracking endpoint
//! as `{"projectId": ..., "url": ...}`. The request runs on a detached task;
//! failures go to a discard sink that logs them and never reach the
//! publication result.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Environment variable consulted when no project id is configured.
pub const PROJECT_ID_ENV: &str = "PROJECT_ID";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tracking endpoint answered {0}")]
    Status(u16),
}

/// Body sent to the tracking endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub project_id: String,
    pub url: String,
}

/// Posts notifications to one endpoint.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl Notifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one notification and wait for the answer.
    pub async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(notification)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    /// Send on a detached task. The task always completes successfully;
    /// errors are logged and dropped.
    pub fn spawn(&self, notification: Notification) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            match notifier.send(&notification).await {
                Ok(()) => info!(
                    project = %notification.project_id,
                    url = %notification.url,
                    "project notified"
                ),
                Err(e) => discard(&notification, e),
            }
        })
    }
}

fn discard(notification: &Notification, error: NotifyError) {
    warn!(
        project = %notification.project_id,
        "failed to notify tracking endpoint: {}",
        error
    );
}

/// Project id from configuration, else `$PROJECT_ID`, else a temporary id.
pub fn resolve_project_id(configured: Option<String>) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    project_id_from(configured, std::env::var(PROJECT_ID_ENV).ok(), now)
}

fn project_id_from(configured: Option<String>, env: Option<String>, now_secs: u64) -> String {
    configured
        .filter(|id| !id.is_empty())
        .or(env.filter(|id| !id.is_empty()))
        .unwrap_or_else(|| format!("project_tmp_{}", now_secs))
}
