//! Finance client.
//!
//! The upstream allows 300 requests per minute; a global semaphore of four
//! in-flight requests keeps us far under it even when all thirteen
//! resource syncs fan out together. No pagination — every list endpoint
//! returns the full set.

use reqwest::Url;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

use galley_schemas::FinanceResource;

use crate::error::{ApiError, ApiResult};
use crate::retry::FINANCE_429_BACKOFF;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_IN_FLIGHT: usize = 4;

pub struct FinanceClient {
    http: reqwest::Client,
    base: Url,
    token: String,
    gate: Semaphore,
}

impl FinanceClient {
    pub fn new(base: Url, token: String) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_IN_FLIGHT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| ApiError::permanent(format!("finance client build failed: {e}")))?;

        Ok(Self {
            http,
            base,
            token,
            gate: Semaphore::new(MAX_IN_FLIGHT),
        })
    }

    /// Full list for one resource. 429s back off exponentially for up to
    /// five attempts; the semaphore permit is held across the whole call so
    /// a backing-off request still counts against the in-flight cap.
    pub async fn fetch(&self, resource: FinanceResource) -> ApiResult<Vec<Value>> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ApiError::permanent("finance gate closed"))?;

        let url = self
            .base
            .join(&format!("v1/{}", resource.path()))
            .map_err(|e| ApiError::permanent(format!("bad finance path: {e}")))?;

        let mut last: Option<ApiError> = None;
        for (attempt, delay) in FINANCE_429_BACKOFF
            .iter()
            .map(Some)
            .chain(std::iter::once(None))
            .enumerate()
        {
            match self.fetch_once(&url).await {
                Ok(v) => return Ok(v),
                Err(e) if e.status_is(429) || e.is_transient() => {
                    match delay {
                        Some(d) => {
                            warn!(
                                resource = resource.path(),
                                attempt = attempt + 1,
                                delay_s = d.as_secs(),
                                "finance backoff"
                            );
                            last = Some(e);
                            tokio::time::sleep(*d).await;
                        }
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last.unwrap_or_else(|| ApiError::unknown("finance fetch failed")))
    }

    async fn fetch_once(&self, url: &Url) -> ApiResult<Vec<Value>> {
        let resp = self
            .http
            .get(url.clone())
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(ApiError::from_status(status, url.as_str()));
        }

        let v: Value = resp.json().await?;
        match v {
            Value::Array(items) => Ok(items),
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(ApiError::permanent("finance response is not a list")
                    .with_url(url.as_str())),
            },
            _ => Err(ApiError::permanent("finance response is not a list").with_url(url.as_str())),
        }
    }
}
