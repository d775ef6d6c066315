//! Axum router: the cloud webhook endpoint and health.
//!
//! `build_router` is the single entry point; `serve` attaches middleware
//! after it so tests can drive the bare router.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use galley_clients::webhook_secret_matches;
use galley_schemas::{WebhookEnvelope, WebhookEvent};

use crate::state::AppState;

const AUTH_HEADER: &str = "authToken";

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook", post(webhook))
        .with_state(state)
}

async fn healthz(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = galley_db::status(&st.deps.pool).await.map(|s| s.ok).unwrap_or(false);
    let code = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(serde_json::json!({ "ok": db_ok })))
}

/// Cloud webhook: shared-secret header, then per-event classification.
/// Always 200 on authorised requests — the cloud retries non-2xx
/// deliveries and we prefer to deduplicate internally.
pub(crate) async fn webhook(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let presented = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    if !webhook_secret_matches(&st.webhook_secret, presented) {
        warn!("webhook rejected: bad or missing auth token");
        return StatusCode::UNAUTHORIZED;
    }

    let envelopes: Vec<WebhookEnvelope> = match body {
        Value::Array(_) => serde_json::from_value(body).unwrap_or_default(),
        single @ Value::Object(_) => serde_json::from_value(single)
            .map(|e: WebhookEnvelope| vec![e])
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    for envelope in envelopes {
        match envelope.classify() {
            WebhookEvent::StopListUpdate { pairs } => {
                info!(pairs = pairs.len(), "stop list update received");
                st.debouncer.submit(pairs).await;
            }
            WebhookEvent::DeliveryOrderClosed | WebhookEvent::TableOrderClosed => {
                let deps = Arc::clone(&st.deps);
                let throttle = Arc::clone(&st.resync_throttle);
                tokio::spawn(async move {
                    if let Err(e) =
                        galley_flows::stoplist::on_order_closed(&deps, &throttle).await
                    {
                        warn!(error = %e, "order-closed handling failed");
                    }
                });
            }
            WebhookEvent::DeliveryOrderUpdate | WebhookEvent::TableOrderUpdate => {
                debug!("order update acknowledged");
            }
            WebhookEvent::Ignored(kind) => debug!(kind, "webhook event ignored"),
        }
    }

    StatusCode::OK
}
