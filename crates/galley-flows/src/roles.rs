//! Admin and receiver resolution.
//!
//! Two sources exist: the spreadsheet capability matrix (current) and the
//! legacy `bot_admin` / `request_receiver` tables. A deployment flag picks
//! one; nothing else in the system knows which is live. The resolved sets
//! are cached for the session and invalidated explicitly after the daily
//! matrix export.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use galley_cache::{KvStore, SessionCache};
use galley_chat::RoleResolver;
use galley_db::{legacy_admin_ids, legacy_receiver_ids};
use galley_sheets::PermissionsService;

/// Capability tokens with role meaning in the matrix.
pub const CAP_ADMIN: &str = "admin";
pub const CAP_RECEIVER: &str = "receiver";

pub struct AdminDirectory {
    pool: PgPool,
    permissions: Arc<PermissionsService>,
    legacy_tables: bool,
    admin_ids: SessionCache<Vec<i64>>,
    receiver_ids: SessionCache<Vec<i64>>,
}

impl AdminDirectory {
    pub fn new(
        pool: PgPool,
        permissions: Arc<PermissionsService>,
        kv: Arc<dyn KvStore>,
        legacy_tables: bool,
    ) -> Self {
        Self {
            pool,
            permissions,
            legacy_tables,
            admin_ids: SessionCache::new(Arc::clone(&kv), "role_admins"),
            receiver_ids: SessionCache::new(kv, "role_receivers"),
        }
    }

    pub async fn admin_ids(&self) -> Result<Vec<i64>> {
        if let Some(ids) = self.admin_ids.get("all").await? {
            return Ok(ids);
        }
        let ids = if self.legacy_tables {
            legacy_admin_ids(&self.pool).await?
        } else {
            self.permissions.matrix().await?.users_with(CAP_ADMIN)
        };
        self.admin_ids.put("all", &ids).await?;
        Ok(ids)
    }

    pub async fn receiver_ids(&self) -> Result<Vec<i64>> {
        if let Some(ids) = self.receiver_ids.get("all").await? {
            return Ok(ids);
        }
        let ids = if self.legacy_tables {
            legacy_receiver_ids(&self.pool).await?
        } else {
            self.permissions.matrix().await?.users_with(CAP_RECEIVER)
        };
        self.receiver_ids.put("all", &ids).await?;
        Ok(ids)
    }

    /// Drop the cached sets (after a matrix export or admin edit).
    pub async fn invalidate(&self) -> Result<()> {
        self.admin_ids.invalidate("all").await?;
        self.receiver_ids.invalidate("all").await
    }
}

#[async_trait]
impl RoleResolver for AdminDirectory {
    async fn is_admin(&self, user_id: i64) -> Result<bool> {
        Ok(self.admin_ids().await?.contains(&user_id))
    }

    async fn is_receiver(&self, user_id: i64) -> Result<bool> {
        Ok(self.receiver_ids().await?.contains(&user_id))
    }

    async fn has_capability(&self, user_id: i64, capability: &str) -> Result<bool> {
        self.permissions.has(user_id, capability).await
    }
}
