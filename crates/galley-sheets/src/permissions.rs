//! Per-user capability matrix.
//!
//! One spreadsheet row per employee, one column per capability token; a
//! `✅` cell grants. Reads are cached for five minutes; when a refresh
//! fails the previous matrix keeps serving so a flaky spreadsheet API never
//! locks everyone out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tracing::warn;

use crate::{SheetClient, SheetRecord, TAB_PERMISSIONS};

pub const USER_ID_COLUMN: &str = "user_id";
pub const GRANT_MARK: &str = "✅";

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Parsed matrix: user id → granted capability tokens.
#[derive(Debug, Clone, Default)]
pub struct PermissionMatrix {
    by_user: HashMap<i64, HashSet<String>>,
}

impl PermissionMatrix {
    pub fn from_records(records: &[SheetRecord]) -> Self {
        let mut by_user: HashMap<i64, HashSet<String>> = HashMap::new();

        for rec in records {
            let Some(user_id) = rec.get(USER_ID_COLUMN).and_then(|v| v.trim().parse().ok())
            else {
                continue;
            };
            let grants = by_user.entry(user_id).or_default();
            for (column, value) in rec {
                if column == USER_ID_COLUMN {
                    continue;
                }
                if value.trim() == GRANT_MARK {
                    grants.insert(column.clone());
                }
            }
        }

        Self { by_user }
    }

    pub fn has(&self, user_id: i64, capability: &str) -> bool {
        self.by_user
            .get(&user_id)
            .map(|g| g.contains(capability))
            .unwrap_or(false)
    }

    pub fn users_with(&self, capability: &str) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .by_user
            .iter()
            .filter(|(_, g)| g.contains(capability))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

// ---------------------------------------------------------------------------
// Cached service
// ---------------------------------------------------------------------------

struct CachedMatrix {
    matrix: PermissionMatrix,
    fetched_at: Instant,
}

pub struct PermissionsService {
    sheets: Arc<dyn SheetClient>,
    state: RwLock<Option<CachedMatrix>>,
}

impl PermissionsService {
    pub fn new(sheets: Arc<dyn SheetClient>) -> Self {
        Self {
            sheets,
            state: RwLock::new(None),
        }
    }

    /// Current matrix: cached within the TTL, refreshed past it, and served
    /// stale when the refresh fails.
    pub async fn matrix(&self) -> Result<PermissionMatrix> {
        {
            let state = self.state.read().await;
            if let Some(cached) = state.as_ref() {
                if cached.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(cached.matrix.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = state.as_ref() {
            if cached.fetched_at.elapsed() < CACHE_TTL {
                return Ok(cached.matrix.clone());
            }
        }

        match self.sheets.read_records(TAB_PERMISSIONS).await {
            Ok(records) => {
                let matrix = PermissionMatrix::from_records(&records);
                *state = Some(CachedMatrix {
                    matrix: matrix.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(matrix)
            }
            Err(e) => match state.as_ref() {
                Some(cached) => {
                    warn!(error = %e, "permission matrix refresh failed; serving stale");
                    Ok(cached.matrix.clone())
                }
                None => Err(e).context("permission matrix unavailable and no stale copy"),
            },
        }
    }

    pub async fn has(&self, user_id: i64, capability: &str) -> Result<bool> {
        Ok(self.matrix().await?.has(user_id, capability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rec(pairs: &[(&str, &str)]) -> SheetRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn grants_only_checkmarked_cells() {
        let records = vec![
            rec(&[(USER_ID_COLUMN, "777"), ("writeoff", "✅"), ("requests", "нет")]),
            rec(&[(USER_ID_COLUMN, "888"), ("writeoff", "")]),
        ];
        let m = PermissionMatrix::from_records(&records);

        assert!(m.has(777, "writeoff"));
        assert!(!m.has(777, "requests"));
        assert!(!m.has(888, "writeoff"));
        assert!(!m.has(999, "writeoff"));
    }

    #[test]
    fn malformed_user_rows_are_skipped() {
        let records = vec![rec(&[(USER_ID_COLUMN, "abc"), ("writeoff", "✅")])];
        let m = PermissionMatrix::from_records(&records);
        assert!(m.by_user.is_empty());
    }

    #[test]
    fn users_with_returns_sorted_ids() {
        let records = vec![
            rec(&[(USER_ID_COLUMN, "999"), ("admin", "✅")]),
            rec(&[(USER_ID_COLUMN, "111"), ("admin", "✅")]),
        ];
        let m = PermissionMatrix::from_records(&records);
        assert_eq!(m.users_with("admin"), vec![111, 999]);
    }

    struct FlakySheet {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SheetClient for FlakySheet {
        async fn read_records(&self, _tab: &str) -> Result<Vec<SheetRecord>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(vec![rec(&[(USER_ID_COLUMN, "777"), ("writeoff", "✅")])])
            } else {
                anyhow::bail!("spreadsheet api down")
            }
        }

        async fn write_records(
            &self,
            _tab: &str,
            _header: &[String],
            _rows: &[Vec<String>],
        ) -> Result<()> {
            Ok(())
        }

        async fn set_dropdown(&self, _: &str, _: &str, _: &[String]) -> Result<()> {
            Ok(())
        }

        async fn hide_column(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stale_matrix_serves_through_read_failures() {
        let svc = PermissionsService::new(Arc::new(FlakySheet {
            calls: AtomicU32::new(0),
        }));

        assert!(svc.has(777, "writeoff").await.unwrap());

        // Expire the cache by rewinding the stored timestamp, then refresh
        // — which now fails — and expect the stale copy.
        {
            let mut state = svc.state.write().await;
            if let Some(cached) = state.as_mut() {
                cached.fetched_at = Instant::now() - CACHE_TTL - Duration::from_secs(1);
            }
        }
        assert!(svc.has(777, "writeoff").await.unwrap());
    }
}
