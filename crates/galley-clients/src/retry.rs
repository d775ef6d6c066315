//! Retry wrappers shared by the upstream clients.
//!
//! Only reads go through these. Document POSTs are never retried here; the
//! write-off approval path owns its own narrow retry because the document
//! UUID makes that specific POST idempotent.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{ApiResult, ErrorKind};

/// POS GET schedule: three retries after the first attempt.
pub const POS_GET_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(7),
];

/// Finance 429 schedule: five attempts total.
pub const FINANCE_429_BACKOFF: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
];

/// Run `op`, retrying transient failures per `delays` (attempts =
/// `delays.len() + 1`). An `Unknown` error gets exactly one silent retry,
/// after which it is treated as permanent.
pub async fn retry_with_backoff<T, F, Fut>(label: &str, delays: &[Duration], mut op: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut unknown_retried = false;

    for (attempt, delay) in delays.iter().enumerate() {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let retry = match e.kind {
                    ErrorKind::Transient => true,
                    ErrorKind::Unknown if !unknown_retried => {
                        unknown_retried = true;
                        true
                    }
                    _ => return Err(e),
                };
                if retry {
                    warn!(
                        label,
                        attempt = attempt + 1,
                        delay_s = delay.as_secs(),
                        error = %e,
                        "retrying upstream call"
                    );
                    tokio::time::sleep(*delay).await;
                }
            }
        }
    }

    op().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_all_attempts() {
        let calls = AtomicU32::new(0);
        let res: ApiResult<()> = retry_with_backoff("t", &POS_GET_BACKOFF, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::transient("boom")) }
        })
        .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4, "1 try + 3 retries");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let res: ApiResult<()> = retry_with_backoff("t", &POS_GET_BACKOFF, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::permanent("bad request")) }
        })
        .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_gets_exactly_one_silent_retry() {
        let calls = AtomicU32::new(0);
        let res: ApiResult<()> = retry_with_backoff("t", &POS_GET_BACKOFF, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::unknown("???")) }
        })
        .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let res = retry_with_backoff("t", &POS_GET_BACKOFF, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::transient("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
