//! Scenario: spreadsheet matrix → capability resolution → middleware
//! decisions.
//!
//! Seeds the permission tab the way operators fill it (✅ grants), runs
//! it through the cached matrix service, and checks the button/callback
//! decisions including the admin bypass and receiver-or-admin prefixes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use galley_chat::{CallbackGuard, PermissionRules, RoleResolver};
use galley_sheets::{PermissionsService, TAB_PERMISSIONS};
use galley_testkit::FakeSheet;

/// Matrix-backed resolver, admin/receiver read from their columns — the
/// same resolution the production directory performs.
struct MatrixRoles {
    permissions: Arc<PermissionsService>,
}

#[async_trait]
impl RoleResolver for MatrixRoles {
    async fn is_admin(&self, user_id: i64) -> Result<bool> {
        self.permissions.has(user_id, "admin").await
    }
    async fn is_receiver(&self, user_id: i64) -> Result<bool> {
        self.permissions.has(user_id, "receiver").await
    }
    async fn has_capability(&self, user_id: i64, capability: &str) -> Result<bool> {
        self.permissions.has(user_id, capability).await
    }
}

fn seeded_roles() -> MatrixRoles {
    let sheet = FakeSheet::new();
    sheet.seed(
        TAB_PERMISSIONS,
        &["user_id", "writeoff", "requests", "admin", "receiver"],
        &[
            &["100", "✅", "", "", ""],   // bartender: write-offs only
            &["200", "", "", "✅", ""],   // admin
            &["300", "", "", "", "✅"],   // receiver
            &["400", "", "✅", "", ""],   // floor staff: requests
        ],
    );
    MatrixRoles {
        permissions: Arc::new(PermissionsService::new(Arc::new(sheet))),
    }
}

fn rules() -> PermissionRules {
    PermissionRules::new()
        .text_button("🗑 Списание", "writeoff")
        .text_button("📝 Заявка", "requests")
        .callback_prefix("wo:approve:", CallbackGuard::AdminOnly)
        .callback_prefix("wo:", CallbackGuard::Capability("writeoff"))
        .callback_prefix("req:approve:", CallbackGuard::ReceiverOrAdmin)
}

#[tokio::test]
async fn capability_columns_gate_reply_buttons() {
    let roles = seeded_roles();
    let rules = rules();

    assert!(rules.allows_text(&roles, 100, "🗑 Списание").await.unwrap());
    assert!(!rules.allows_text(&roles, 400, "🗑 Списание").await.unwrap());
    assert!(rules.allows_text(&roles, 400, "📝 Заявка").await.unwrap());
}

#[tokio::test]
async fn admin_column_bypasses_every_check() {
    let roles = seeded_roles();
    let rules = rules();

    assert!(rules.allows_text(&roles, 200, "🗑 Списание").await.unwrap());
    assert!(rules.allows_callback(&roles, 200, "wo:approve:abc").await.unwrap());
    assert!(rules.allows_callback(&roles, 200, "req:approve:5").await.unwrap());
}

#[tokio::test]
async fn receiver_column_grants_receiver_or_admin_prefixes_only() {
    let roles = seeded_roles();
    let rules = rules();

    assert!(rules.allows_callback(&roles, 300, "req:approve:5").await.unwrap());
    assert!(!rules.allows_callback(&roles, 300, "wo:approve:abc").await.unwrap());
    assert!(!rules.allows_callback(&roles, 100, "req:approve:5").await.unwrap());
}

#[tokio::test]
async fn capability_holder_cannot_reach_admin_only_prefix() {
    let roles = seeded_roles();
    let rules = rules();

    assert!(rules.allows_callback(&roles, 100, "wo:item:3").await.unwrap());
    assert!(!rules.allows_callback(&roles, 100, "wo:approve:abc").await.unwrap());
}
