//! Dispatch middleware: permissions, navigation escape, and cooldowns.
//!
//! These run in order before any handler: cooldown first (cheapest),
//! navigation reset, then the permission check for the mapped capability.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::fsm::FsmStorage;
use crate::transport::{ChatId, ChatTransport, UserId};

// ---------------------------------------------------------------------------
// Permission resolution
// ---------------------------------------------------------------------------

/// Answers capability questions for a user. Backed by the spreadsheet
/// matrix (or the legacy tables) in production; admins bypass every check.
#[async_trait]
pub trait RoleResolver: Send + Sync {
    async fn is_admin(&self, user_id: UserId) -> Result<bool>;
    async fn is_receiver(&self, user_id: UserId) -> Result<bool>;
    async fn has_capability(&self, user_id: UserId, capability: &str) -> Result<bool>;
}

/// Guard attached to a callback prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackGuard {
    Capability(&'static str),
    AdminOnly,
    ReceiverOrAdmin,
}

/// Lookup tables mapping chat surface to capability tokens. Adding an
/// entry here is what makes a new column appear in the next permission
/// matrix export.
#[derive(Debug, Default)]
pub struct PermissionRules {
    text: HashMap<&'static str, &'static str>,
    callback: Vec<(&'static str, CallbackGuard)>,
}

impl PermissionRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_button(mut self, button: &'static str, capability: &'static str) -> Self {
        self.text.insert(button, capability);
        self
    }

    pub fn callback_prefix(mut self, prefix: &'static str, guard: CallbackGuard) -> Self {
        self.callback.push((prefix, guard));
        self
    }

    /// Every capability token referenced by the tables, for the matrix
    /// export.
    pub fn capability_tokens(&self) -> Vec<&'static str> {
        let mut caps: Vec<&'static str> = self
            .text
            .values()
            .copied()
            .chain(self.callback.iter().filter_map(|(_, g)| match g {
                CallbackGuard::Capability(c) => Some(*c),
                _ => None,
            }))
            .collect();
        caps.sort_unstable();
        caps.dedup();
        caps
    }

    /// Permission decision for a reply button. Unmapped buttons are open.
    pub async fn allows_text(
        &self,
        roles: &dyn RoleResolver,
        user_id: UserId,
        text: &str,
    ) -> Result<bool> {
        let Some(capability) = self.text.get(text) else {
            return Ok(true);
        };
        if roles.is_admin(user_id).await? {
            return Ok(true);
        }
        roles.has_capability(user_id, capability).await
    }

    /// Permission decision for a callback. Longest matching prefix wins;
    /// unmapped callbacks are open.
    pub async fn allows_callback(
        &self,
        roles: &dyn RoleResolver,
        user_id: UserId,
        data: &str,
    ) -> Result<bool> {
        let guard = self
            .callback
            .iter()
            .filter(|(prefix, _)| data.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, g)| g);

        let Some(guard) = guard else {
            return Ok(true);
        };

        if roles.is_admin(user_id).await? {
            return Ok(true);
        }

        match guard {
            CallbackGuard::Capability(c) => roles.has_capability(user_id, c).await,
            CallbackGuard::AdminOnly => Ok(false),
            CallbackGuard::ReceiverOrAdmin => roles.is_receiver(user_id).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Navigation escape
// ---------------------------------------------------------------------------

/// When a top-level navigation button arrives mid-session, the session is
/// cleared and its tracked messages deleted before the button is handled
/// normally. This is how every deep state stays escapable.
pub async fn navigation_reset(
    fsm: &FsmStorage,
    transport: &dyn ChatTransport,
    user_id: UserId,
    chat_id: ChatId,
) -> Result<()> {
    let tracked = fsm.tracked(user_id).await?;
    for message_id in tracked.all() {
        // Cleanup deletes are best-effort; the message may be gone already.
        if let Err(e) = transport.delete_message(chat_id, message_id).await {
            debug!(message_id, error = %e, "tracked message delete failed");
        }
    }
    fsm.clear(user_id).await
}

// ---------------------------------------------------------------------------
// Cooldowns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottledAction {
    Sync,
    FinalizeWriteoff,
    Search,
    Navigation,
    AdminOp,
}

impl ThrottledAction {
    pub fn cooldown(&self) -> Duration {
        match self {
            ThrottledAction::Sync => Duration::from_secs(10),
            ThrottledAction::FinalizeWriteoff => Duration::from_secs(5),
            ThrottledAction::Search => Duration::from_secs(1),
            ThrottledAction::Navigation => Duration::from_millis(300),
            ThrottledAction::AdminOp => Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Allow,
    /// Too soon; the handler is skipped with a short notice.
    Wait(Duration),
}

/// Per-(user, action) last-seen ledger. Excess presses are answered, not
/// queued — this is the bot's only backpressure.
#[derive(Debug, Default)]
pub struct CooldownLedger {
    seen: Mutex<HashMap<(UserId, ThrottledAction), Instant>>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, user_id: UserId, action: ThrottledAction) -> CooldownDecision {
        let mut seen = self.seen.lock().expect("cooldown ledger poisoned");
        let now = Instant::now();
        match seen.get(&(user_id, action)) {
            Some(last) => {
                let elapsed = now.duration_since(*last);
                let needed = action.cooldown();
                if elapsed < needed {
                    return CooldownDecision::Wait(needed - elapsed);
                }
                seen.insert((user_id, action), now);
                CooldownDecision::Allow
            }
            None => {
                seen.insert((user_id, action), now);
                CooldownDecision::Allow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubRoles {
        admin: bool,
        receiver: bool,
        caps: Vec<&'static str>,
    }

    #[async_trait]
    impl RoleResolver for StubRoles {
        async fn is_admin(&self, _: UserId) -> Result<bool> {
            Ok(self.admin)
        }
        async fn is_receiver(&self, _: UserId) -> Result<bool> {
            Ok(self.receiver)
        }
        async fn has_capability(&self, _: UserId, capability: &str) -> Result<bool> {
            Ok(self.caps.iter().any(|c| *c == capability))
        }
    }

    fn rules() -> PermissionRules {
        PermissionRules::new()
            .text_button("🗑 Списание", "writeoff")
            .callback_prefix("wo:approve:", CallbackGuard::AdminOnly)
            .callback_prefix("req:approve:", CallbackGuard::ReceiverOrAdmin)
            .callback_prefix("wo:", CallbackGuard::Capability("writeoff"))
    }

    #[tokio::test]
    async fn text_button_requires_mapped_capability() {
        let r = rules();
        let holder = StubRoles { admin: false, receiver: false, caps: vec!["writeoff"] };
        let nobody = StubRoles { admin: false, receiver: false, caps: vec![] };

        assert!(r.allows_text(&holder, 1, "🗑 Списание").await.unwrap());
        assert!(!r.allows_text(&nobody, 1, "🗑 Списание").await.unwrap());
        assert!(r.allows_text(&nobody, 1, "просто текст").await.unwrap());
    }

    #[tokio::test]
    async fn admin_bypasses_all_checks() {
        let r = rules();
        let admin = StubRoles { admin: true, receiver: false, caps: vec![] };
        assert!(r.allows_text(&admin, 1, "🗑 Списание").await.unwrap());
        assert!(r.allows_callback(&admin, 1, "wo:approve:abc").await.unwrap());
    }

    #[tokio::test]
    async fn longest_prefix_wins_admin_only_over_capability() {
        let r = rules();
        // Holds the writeoff capability, but wo:approve: is admin-only.
        let author = StubRoles { admin: false, receiver: false, caps: vec!["writeoff"] };
        assert!(!r.allows_callback(&author, 1, "wo:approve:abc").await.unwrap());
        assert!(r.allows_callback(&author, 1, "wo:item:3").await.unwrap());
    }

    #[tokio::test]
    async fn receiver_or_admin_prefix() {
        let r = rules();
        let receiver = StubRoles { admin: false, receiver: true, caps: vec![] };
        let nobody = StubRoles { admin: false, receiver: false, caps: vec![] };
        assert!(r.allows_callback(&receiver, 1, "req:approve:5").await.unwrap());
        assert!(!r.allows_callback(&nobody, 1, "req:approve:5").await.unwrap());
    }

    #[test]
    fn capability_tokens_deduped_sorted() {
        let r = rules();
        assert_eq!(r.capability_tokens(), vec!["writeoff"]);
    }

    #[test]
    fn cooldown_blocks_rapid_repeat_allows_distinct_actions() {
        let ledger = CooldownLedger::new();
        assert_eq!(ledger.check(1, ThrottledAction::Sync), CooldownDecision::Allow);
        assert!(matches!(
            ledger.check(1, ThrottledAction::Sync),
            CooldownDecision::Wait(_)
        ));
        assert_eq!(ledger.check(1, ThrottledAction::Search), CooldownDecision::Allow);
        assert_eq!(ledger.check(2, ThrottledAction::Sync), CooldownDecision::Allow);
    }
}
