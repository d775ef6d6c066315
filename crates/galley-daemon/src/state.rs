//! Shared daemon state and application wiring.

use std::sync::Arc;

use anyhow::{Context, Result};

use galley_cache::backend_from_config;
use galley_chat::{ChatTransport, CooldownLedger, FsmStorage};
use galley_clients::{CloudClient, FinanceApi, FinanceClient, PosApi, PosClient, TokenSource};
use galley_config::Config;
use galley_flows::{FlowDeps, OcrExtractor, ResyncThrottle, StoplistDebouncer};
use galley_sheets::{PermissionsService, SheetClient};
use galley_sync::SyncLocks;

use crate::adapters::DbCloudTokens;

/// Peripheral integrations injected at bootstrap: chat delivery, the
/// spreadsheet transport, and vision extraction. The core consumes only
/// their traits.
pub struct Adapters {
    pub transport: Arc<dyn ChatTransport>,
    pub sheets: Arc<dyn SheetClient>,
    pub ocr: Arc<dyn OcrExtractor>,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<FlowDeps>,
    pub debouncer: Arc<StoplistDebouncer>,
    pub resync_throttle: Arc<ResyncThrottle>,
    pub cloud: Arc<CloudClient>,
    pub webhook_secret: String,
}

/// Build the whole application graph from validated configuration.
pub async fn build_app(config: Config, adapters: Adapters) -> Result<AppState> {
    let pool = galley_db::connect(&config.database_url).await?;

    let kv = backend_from_config(config.cache_url.as_deref())
        .await
        .context("cache backend init failed")?;

    let pos: Arc<dyn PosApi> = Arc::new(
        PosClient::new(
            config.pos_url.clone(),
            config.pos_login.clone(),
            config.pos_password.clone(),
        )
        .map_err(|e| anyhow::anyhow!("pos client init failed: {e}"))?,
    );
    let fin: Arc<dyn FinanceApi> = Arc::new(
        FinanceClient::new(config.fin_url.clone(), config.fin_token.clone())
            .map_err(|e| anyhow::anyhow!("finance client init failed: {e}"))?,
    );

    let cloud_tokens: Arc<dyn TokenSource> = Arc::new(DbCloudTokens::new(pool.clone()));
    let cloud = Arc::new(
        CloudClient::new(config.cloud_url.clone(), cloud_tokens)
            .map_err(|e| anyhow::anyhow!("cloud client init failed: {e}"))?,
    );

    let permissions = Arc::new(PermissionsService::new(Arc::clone(&adapters.sheets)));
    let roles = Arc::new(galley_flows::AdminDirectory::new(
        pool.clone(),
        Arc::clone(&permissions),
        Arc::clone(&kv),
        config.legacy_admin_tables,
    ));

    let (user_ctx, stores_by_dept, writeoff_accounts, units) = FlowDeps::caches(&kv);

    let deps = Arc::new(FlowDeps {
        pool,
        clock: config.clock,
        config,
        transport: adapters.transport,
        fsm: FsmStorage::new(Arc::clone(&kv)),
        rules: galley_flows::menu::permission_rules(),
        roles,
        cooldowns: CooldownLedger::new(),
        locks: SyncLocks::new(),
        pos,
        fin,
        cloud: Arc::clone(&cloud),
        sheets: adapters.sheets,
        permissions,
        ocr: adapters.ocr,
        kv,
        user_ctx,
        stores_by_dept,
        writeoff_accounts,
        units,
    });

    let flush_deps = Arc::clone(&deps);
    let debouncer = Arc::new(StoplistDebouncer::new(
        galley_flows::DEBOUNCE_WINDOW,
        move |pairs| {
            let deps = Arc::clone(&flush_deps);
            async move {
                if let Err(e) = galley_flows::stoplist::apply_stoplist_update(&deps, pairs).await {
                    tracing::warn!(error = %e, "stop list flush failed");
                }
            }
        },
    ));

    let webhook_secret = deps.config.webhook_secret.clone();
    Ok(AppState {
        deps,
        debouncer,
        resync_throttle: Arc::new(ResyncThrottle::new()),
        cloud,
        webhook_secret,
    })
}
