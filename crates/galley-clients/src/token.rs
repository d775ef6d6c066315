//! Session-token cache with a single-flight refresh latch.
//!
//! The POS issues tokens valid for roughly fifteen minutes; we cache for
//! ten and refresh early. The cache mutex is held across the refresh call,
//! so concurrent callers wait on the one in-flight refresh instead of
//! stampeding the auth endpoint.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::ApiResult;

pub const TOKEN_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct CachedToken {
    token: String,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, or run `refresh` while holding the latch.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> ApiResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<String>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if cached.fetched_at.elapsed() < TOKEN_TTL {
                return Ok(cached.token.clone());
            }
        }

        let token = refresh().await?;
        *slot = Some(CachedToken {
            token: token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(token)
    }

    /// Drop the cached token so the next caller refreshes — used after an
    /// upstream 403 signals early expiry.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let cache = Arc::new(TokenCache::new());
        let refreshes = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let refreshes = Arc::clone(&refreshes);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async move {
                        refreshes.fetch_add(1, Ordering::SeqCst);
                        // Yield so other tasks pile up on the latch.
                        tokio::task::yield_now().await;
                        Ok("tok-1".to_string())
                    })
                    .await
                    .unwrap()
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), "tok-1");
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_next_refresh() {
        let cache = TokenCache::new();
        let n = AtomicU32::new(0);

        for _ in 0..2 {
            cache
                .get_or_refresh(|| async {
                    n.fetch_add(1, Ordering::SeqCst);
                    Ok("tok".to_string())
                })
                .await
                .unwrap();
        }
        assert_eq!(n.load(Ordering::SeqCst), 1, "second call served from cache");

        cache.invalidate().await;
        cache
            .get_or_refresh(|| async {
                n.fetch_add(1, Ordering::SeqCst);
                Ok("tok".to_string())
            })
            .await
            .unwrap();
        assert_eq!(n.load(Ordering::SeqCst), 2);
    }
}
