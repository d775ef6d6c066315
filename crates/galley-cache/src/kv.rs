//! Key-value backend seam.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;

/// Narrow backend contract shared by caches and FSM storage. String values
/// only; typed layers serialise above this seam.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-process backend
// ---------------------------------------------------------------------------

/// Process-local map. Expired entries are dropped lazily on read.
#[derive(Default)]
pub struct InMemoryKv {
    map: RwLock<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let map = self.map.read().await;
            match map.get(key) {
                None => return Ok(None),
                Some((v, None)) => return Ok(Some(v.clone())),
                Some((v, Some(deadline))) if Instant::now() < *deadline => {
                    return Ok(Some(v.clone()))
                }
                Some(_) => {} // expired; fall through to remove
            }
        }
        self.map.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let deadline = ttl.map(|t| Instant::now() + t);
        self.map
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.write().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redis backend
// ---------------------------------------------------------------------------

/// Shared backend for horizontally scaled replicas. Same keys and TTLs as
/// the in-process map.
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid cache backend url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("cache backend connect failed")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let v: Option<String> = conn.get(key).await.context("cache get failed")?;
        Ok(v)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(t) => {
                let secs = t.as_secs().max(1);
                let _: () = conn
                    .set_ex(key, value, secs)
                    .await
                    .context("cache set_ex failed")?;
            }
            None => {
                let _: () = conn.set(key, value).await.context("cache set failed")?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.context("cache del failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_set_get_delete() {
        let kv = InMemoryKv::new();
        kv.set("k", "v", None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
        kv.delete("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_ttl_expiry() {
        let kv = InMemoryKv::new();
        kv.set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
