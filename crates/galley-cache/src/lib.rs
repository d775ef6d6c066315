//! Cache tiers over a pluggable key-value backend.
//!
//! Exactly three tiers exist in the system: the session-lifetime cache
//! (explicit invalidation), the TTL cache (per-entry expiry), and workflow
//! state inside FSM storage. The first two live here; both sit on the same
//! [`KvStore`] seam so that configuring a shared backend URL moves them to
//! Redis without changing keys, TTLs, or invalidation rules — replicas then
//! observe the same values.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod kv;

pub use kv::{InMemoryKv, KvStore, RedisKv};

/// List-shaped reference data (stores per department, accounts, products).
pub const LIST_TTL: Duration = Duration::from_secs(600);
/// Measure units change almost never.
pub const UNITS_TTL: Duration = Duration::from_secs(1800);

/// Pick the backend from configuration: a URL means shared Redis,
/// otherwise a process-local map.
pub async fn backend_from_config(cache_url: Option<&str>) -> Result<Arc<dyn KvStore>> {
    match cache_url {
        Some(url) => Ok(Arc::new(RedisKv::connect(url).await?)),
        None => Ok(Arc::new(InMemoryKv::new())),
    }
}

// ---------------------------------------------------------------------------
// TTL cache
// ---------------------------------------------------------------------------

/// Keyed cache with per-entry expiry.
pub struct TtlCache<T> {
    kv: Arc<dyn KvStore>,
    prefix: &'static str,
    ttl: Duration,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> TtlCache<T> {
    pub fn new(kv: Arc<dyn KvStore>, prefix: &'static str, ttl: Duration) -> Self {
        Self {
            kv,
            prefix,
            ttl,
            _marker: std::marker::PhantomData,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        let raw = self.kv.get(&self.full_key(key)).await?;
        Ok(match raw {
            Some(s) => serde_json::from_str(&s).ok(),
            None => None,
        })
    }

    pub async fn put(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(&self.full_key(key), &raw, Some(self.ttl)).await
    }

    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.kv.delete(&self.full_key(key)).await
    }
}

// ---------------------------------------------------------------------------
// Session cache
// ---------------------------------------------------------------------------

/// Keyed cache with no expiry; entries leave only on explicit invalidation
/// (mutating events) or process restart when in-memory.
pub struct SessionCache<T> {
    kv: Arc<dyn KvStore>,
    prefix: &'static str,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> SessionCache<T> {
    pub fn new(kv: Arc<dyn KvStore>, prefix: &'static str) -> Self {
        Self {
            kv,
            prefix,
            _marker: std::marker::PhantomData,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        let raw = self.kv.get(&self.full_key(key)).await?;
        Ok(match raw {
            Some(s) => serde_json::from_str(&s).ok(),
            None => None,
        })
    }

    pub async fn put(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(&self.full_key(key), &raw, None).await
    }

    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.kv.delete(&self.full_key(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ctx {
        name: String,
        dept: Option<String>,
    }

    fn ctx() -> Ctx {
        Ctx {
            name: "Иванов Иван".to_string(),
            dept: Some("Центр".to_string()),
        }
    }

    #[tokio::test]
    async fn session_cache_round_trip_and_invalidate() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let cache: SessionCache<Ctx> = SessionCache::new(kv, "user_ctx");

        assert!(cache.get("777").await.unwrap().is_none());
        cache.put("777", &ctx()).await.unwrap();
        assert_eq!(cache.get("777").await.unwrap(), Some(ctx()));

        cache.invalidate("777").await.unwrap();
        assert!(cache.get("777").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ttl_cache_entries_expire() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let cache: TtlCache<Vec<String>> =
            TtlCache::new(kv, "stores", Duration::from_millis(20));

        cache.put("d1", &vec!["Бар".to_string()]).await.unwrap();
        assert!(cache.get("d1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prefixes_do_not_collide() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let a: SessionCache<String> = SessionCache::new(Arc::clone(&kv), "a");
        let b: SessionCache<String> = SessionCache::new(kv, "b");

        a.put("k", &"va".to_string()).await.unwrap();
        assert!(b.get("k").await.unwrap().is_none());
    }
}
