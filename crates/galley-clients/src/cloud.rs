//! Cloud POS client.
//!
//! The API token is provisioned out-of-band: an external process writes it
//! into a table and this client reads the latest row through a
//! [`TokenSource`] seam. Webhook deliveries authenticate with a shared
//! secret header; comparison goes through a digest so the check is not
//! timing-sensitive.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};

/// Where the current cloud token comes from (in production: the
/// `cloud_token` table).
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn current_token(&self) -> anyhow::Result<Option<String>>;
}

pub struct CloudClient {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<dyn TokenSource>,
}

impl CloudClient {
    pub fn new(base: Url, tokens: Arc<dyn TokenSource>) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ApiError::permanent(format!("cloud client build failed: {e}")))?;

        Ok(Self { http, base, tokens })
    }

    async fn token(&self) -> ApiResult<String> {
        self.tokens
            .current_token()
            .await
            .map_err(|e| ApiError::unknown(format!("cloud token read failed: {e}")))?
            .ok_or_else(|| ApiError::permanent("no cloud token provisioned"))
    }

    /// Register our webhook endpoint and the shared secret the cloud must
    /// echo back in the `authToken` header of every delivery.
    pub async fn register_webhook(&self, callback_url: &str, secret: &str) -> ApiResult<()> {
        let token = self.token().await?;
        let url = self
            .base
            .join("api/1/webhooks/settings")
            .map_err(|e| ApiError::permanent(format!("bad cloud path: {e}")))?;

        let body = serde_json::json!({
            "webHooksUri": callback_url,
            "authToken": secret,
        });

        let resp = self
            .http
            .post(url.clone())
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(ApiError::from_status(status, url.as_str()));
        }
        Ok(())
    }

    /// Current terminal groups, for resolving stop-list pairs to venues.
    pub async fn fetch_terminal_groups(&self) -> ApiResult<Vec<Value>> {
        let token = self.token().await?;
        let url = self
            .base
            .join("api/1/terminal_groups")
            .map_err(|e| ApiError::permanent(format!("bad cloud path: {e}")))?;

        let resp = self
            .http
            .post(url.clone())
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(ApiError::from_status(status, url.as_str()));
        }

        let v: Value = resp.json().await?;
        Ok(match v.get("terminalGroups").and_then(|t| t.as_array()) {
            Some(items) => items.clone(),
            None => Vec::new(),
        })
    }
}

/// Shared-secret check for incoming webhook deliveries.
pub fn webhook_secret_matches(expected: &str, presented: Option<&str>) -> bool {
    let Some(presented) = presented else {
        return false;
    };
    // Compare digests, not strings, to avoid a length/prefix timing oracle.
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(presented.as_bytes());
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_match_and_mismatch() {
        assert!(webhook_secret_matches("s3cret", Some("s3cret")));
        assert!(!webhook_secret_matches("s3cret", Some("s3cret ")));
        assert!(!webhook_secret_matches("s3cret", None));
    }
}
