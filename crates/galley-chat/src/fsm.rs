//! Durable FSM storage.
//!
//! State and session data live in the KV backend, so with a shared backend
//! configured a write-off that spans minutes (and possibly a deploy)
//! survives restarts and is visible to every replica. Keys are per user
//! id; the transport's per-key dispatch keeps access linear.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use galley_cache::KvStore;

use crate::transport::{MessageId, UserId};

/// Message ids a session is allowed to leave in the chat. Everything the
/// engine sends during a workflow is tracked under one of these slots and
/// removed on navigation or cancel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedMessages {
    pub menu_msg_id: Option<MessageId>,
    pub header_msg_id: Option<MessageId>,
    pub prompt_msg_id: Option<MessageId>,
}

impl TrackedMessages {
    pub fn all(&self) -> impl Iterator<Item = MessageId> {
        [self.menu_msg_id, self.header_msg_id, self.prompt_msg_id]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FsmSession {
    state: Option<String>,
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    tracked: TrackedMessages,
}

pub struct FsmStorage {
    kv: Arc<dyn KvStore>,
}

impl FsmStorage {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(user_id: UserId) -> String {
        format!("fsm:{user_id}")
    }

    async fn load(&self, user_id: UserId) -> Result<FsmSession> {
        Ok(self
            .kv
            .get(&Self::key(user_id))
            .await?
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default())
    }

    async fn store(&self, user_id: UserId, session: &FsmSession) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        self.kv.set(&Self::key(user_id), &raw, None).await
    }

    pub async fn state(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.load(user_id).await?.state)
    }

    pub async fn set_state(&self, user_id: UserId, state: &str) -> Result<()> {
        let mut session = self.load(user_id).await?;
        session.state = Some(state.to_string());
        self.store(user_id, &session).await
    }

    /// Read one data slot.
    pub async fn get(&self, user_id: UserId, key: &str) -> Result<Option<Value>> {
        Ok(self.load(user_id).await?.data.get(key).cloned())
    }

    /// Write one data slot.
    pub async fn put(&self, user_id: UserId, key: &str, value: Value) -> Result<()> {
        let mut session = self.load(user_id).await?;
        session.data.insert(key.to_string(), value);
        self.store(user_id, &session).await
    }

    pub async fn tracked(&self, user_id: UserId) -> Result<TrackedMessages> {
        Ok(self.load(user_id).await?.tracked)
    }

    pub async fn set_tracked(&self, user_id: UserId, tracked: TrackedMessages) -> Result<()> {
        let mut session = self.load(user_id).await?;
        session.tracked = tracked;
        self.store(user_id, &session).await
    }

    /// Drop state and data. Tracked ids go too — callers delete the
    /// corresponding messages first (see the navigation middleware).
    pub async fn clear(&self, user_id: UserId) -> Result<()> {
        self.kv.delete(&Self::key(user_id)).await
    }

    /// True when any workflow is mid-flight for this user.
    pub async fn in_session(&self, user_id: UserId) -> Result<bool> {
        Ok(self.load(user_id).await?.state.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galley_cache::InMemoryKv;
    use serde_json::json;

    fn storage() -> FsmStorage {
        FsmStorage::new(Arc::new(InMemoryKv::new()))
    }

    #[tokio::test]
    async fn state_and_data_survive_together() {
        let fsm = storage();
        fsm.set_state(7, "writeoff:store").await.unwrap();
        fsm.put(7, "store_id", json!("11111111-1111-1111-1111-111111111111"))
            .await
            .unwrap();

        assert_eq!(fsm.state(7).await.unwrap().as_deref(), Some("writeoff:store"));
        assert_eq!(
            fsm.get(7, "store_id").await.unwrap(),
            Some(json!("11111111-1111-1111-1111-111111111111"))
        );
        assert!(fsm.in_session(7).await.unwrap());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let fsm = storage();
        fsm.set_state(7, "auth:last_name").await.unwrap();
        fsm.set_tracked(
            7,
            TrackedMessages {
                menu_msg_id: Some(10),
                header_msg_id: None,
                prompt_msg_id: Some(12),
            },
        )
        .await
        .unwrap();

        fsm.clear(7).await.unwrap();
        assert!(!fsm.in_session(7).await.unwrap());
        assert_eq!(fsm.tracked(7).await.unwrap(), TrackedMessages::default());
    }

    #[tokio::test]
    async fn sessions_are_isolated_per_user() {
        let fsm = storage();
        fsm.set_state(1, "a").await.unwrap();
        fsm.set_state(2, "b").await.unwrap();
        assert_eq!(fsm.state(1).await.unwrap().as_deref(), Some("a"));
        assert_eq!(fsm.state(2).await.unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn tracked_all_lists_only_present_ids() {
        let t = TrackedMessages {
            menu_msg_id: Some(1),
            header_msg_id: None,
            prompt_msg_id: Some(3),
        };
        let ids: Vec<_> = t.all().collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
