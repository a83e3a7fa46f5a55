//! Recovery triggers over HTTP.
//!
//! `POST http://{node}/node/recover/trigger` on the peer's node endpoint
//! (see [`crate::api`]). The endpoint is idempotent, so a retried or
//! duplicated trigger only causes an extra re-scan.

use std::time::Duration;

use async_trait::async_trait;

use super::RecoveryNotifier;
use crate::api::RECOVER_TRIGGER_PATH;
use crate::error::{Result, WardenError};
use crate::membership::NodeAddress;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct HttpRecoveryNotifier {
    client: reqwest::Client,
}

impl HttpRecoveryNotifier {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    fn endpoint(node: &NodeAddress) -> String {
        let base = node.as_str().trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}{}", base, RECOVER_TRIGGER_PATH)
        } else {
            format!("http://{}{}", base, RECOVER_TRIGGER_PATH)
        }
    }
}

#[async_trait]
impl RecoveryNotifier for HttpRecoveryNotifier {
    async fn notify(&self, node: &NodeAddress) -> Result<()> {
        let url = Self::endpoint(node);
        let response = self.client.post(&url).send().await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(node = %node, "Recovery trigger delivered");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(WardenError::Notify {
            node: node.clone(),
            message: format!("status {}: {}", status, body),
        })
    }
}
