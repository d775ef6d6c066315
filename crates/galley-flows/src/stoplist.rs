//! Stop-list mirror maintenance, pinned-message updates, and stock alerts.
//!
//! Webhook bursts are debounced: events within the window coalesce into
//! one flush that diffs the latest snapshot against the local mirror.
//! Pinned messages are edited only when the rendered content's hash
//! changes, which keeps a replayed identical snapshot from causing any
//! chat traffic at all.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use galley_db::{
    active_stoplist_pairs, close_stoplist_interval, open_stoplist_interval, pinned_message_upsert,
    pinned_messages_all, remove_active_pair, stock_below_min, upsert_active_pair, PinnedKind,
};
use galley_schemas::StoplistPair;

use crate::menu::user_error;
use crate::service::FlowDeps;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

type FlushFn =
    Arc<dyn Fn(Vec<StoplistPair>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct DebounceState {
    pending: Option<Vec<StoplistPair>>,
    deadline: Instant,
    flusher_running: bool,
}

/// Coalesces stop-list snapshots: each arrival replaces the pending
/// snapshot and pushes the deadline out; one flusher task drains when the
/// window finally closes.
pub struct StoplistDebouncer {
    window: Duration,
    flush: FlushFn,
    state: Arc<Mutex<DebounceState>>,
}

impl StoplistDebouncer {
    pub fn new<F, Fut>(window: Duration, flush: F) -> Self
    where
        F: Fn(Vec<StoplistPair>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            window,
            flush: Arc::new(move |pairs| Box::pin(flush(pairs))),
            state: Arc::new(Mutex::new(DebounceState {
                pending: None,
                deadline: Instant::now(),
                flusher_running: false,
            })),
        }
    }

    pub async fn submit(&self, pairs: Vec<StoplistPair>) {
        let mut state = self.state.lock().await;
        state.pending = Some(pairs);
        state.deadline = Instant::now() + self.window;

        if !state.flusher_running {
            state.flusher_running = true;
            let state_handle = Arc::clone(&self.state);
            let flush = Arc::clone(&self.flush);
            tokio::spawn(async move {
                loop {
                    let deadline = { state_handle.lock().await.deadline };
                    tokio::time::sleep_until(deadline).await;

                    let mut state = state_handle.lock().await;
                    if Instant::now() < state.deadline {
                        // A newer event extended the window; keep waiting.
                        continue;
                    }
                    let pairs = state.pending.take();
                    state.flusher_running = false;
                    drop(state);

                    if let Some(pairs) = pairs {
                        flush(pairs).await;
                    }
                    return;
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Flush: diff against the mirror, update history, refresh pinned messages
// ---------------------------------------------------------------------------

pub async fn apply_stoplist_update(deps: &Arc<FlowDeps>, snapshot: Vec<StoplistPair>) -> Result<()> {
    let now = deps.clock.now_utc();

    let current: HashSet<StoplistPair> = active_stoplist_pairs(&deps.pool).await?.into_iter().collect();
    let incoming: HashSet<StoplistPair> = snapshot.into_iter().collect();

    let entered: Vec<&StoplistPair> = incoming.difference(&current).collect();
    let left: Vec<&StoplistPair> = current.difference(&incoming).collect();

    if !entered.is_empty() || !left.is_empty() {
        info!(entered = entered.len(), left = left.len(), "stop list changed");
    }

    for pair in entered {
        let name = product_name(deps, pair.product_id).await?;
        if upsert_active_pair(&deps.pool, pair, &name, now).await? {
            open_stoplist_interval(&deps.pool, pair, &name, now).await?;
        }
    }

    for pair in left {
        if remove_active_pair(&deps.pool, pair).await? {
            close_stoplist_interval(&deps.pool, pair, now).await?;
        }
    }

    refresh_pinned_stoplists(deps).await
}

async fn product_name(deps: &FlowDeps, product_id: Uuid) -> Result<String> {
    let name: Option<(String,)> = sqlx::query_as("select name from product where id = $1")
        .bind(product_id)
        .fetch_optional(&deps.pool)
        .await?;
    Ok(name.map(|(n,)| n).unwrap_or_else(|| product_id.to_string()))
}

pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

async fn render_stoplist(deps: &FlowDeps) -> Result<String> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        select distinct product_name
        from active_stoplist
        order by product_name
        "#,
    )
    .fetch_all(&deps.pool)
    .await?;

    if rows.is_empty() {
        return Ok("🚫 Стоп-лист пуст".to_string());
    }

    let mut out = String::from("🚫 Стоп-лист:\n");
    for (name,) in rows {
        out.push_str(&format!("• {name}\n"));
    }
    Ok(out)
}

/// Hash-gated fan-out: each tracked pinned message is edited only when
/// its rendered content actually changed.
pub async fn refresh_pinned_stoplists(deps: &Arc<FlowDeps>) -> Result<()> {
    let text = render_stoplist(deps).await?;
    let hash = content_hash(&text);

    for pinned in pinned_messages_all(&deps.pool, PinnedKind::Stoplist).await? {
        if pinned.snapshot_hash == hash {
            continue;
        }
        match deps
            .transport
            .edit_message(pinned.chat_id, pinned.message_id, &text, None)
            .await
        {
            Ok(()) => {
                pinned_message_upsert(
                    &deps.pool,
                    PinnedKind::Stoplist,
                    pinned.chat_id,
                    pinned.message_id,
                    &hash,
                )
                .await?;
            }
            Err(e) => debug!(chat = pinned.chat_id, error = %e, "pinned stoplist edit failed"),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Chat entries
// ---------------------------------------------------------------------------

pub async fn entry(deps: &Arc<FlowDeps>, _user: i64, chat: i64) -> Result<()> {
    let text = render_stoplist(deps).await?;
    let hash = content_hash(&text);

    let message_id = deps.transport.send_message(chat, &text, None).await?;
    if let Err(e) = deps.transport.pin_message(chat, message_id).await {
        debug!(chat, error = %e, "pin failed");
    }
    pinned_message_upsert(&deps.pool, PinnedKind::Stoplist, chat, message_id, &hash).await?;
    Ok(())
}

pub async fn min_stock_entry(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    let Some(ctx) = deps.user_context(user).await? else {
        deps.notify(chat, &user_error("Сначала авторизуйтесь: /start")).await;
        return Ok(());
    };
    let Some(department_id) = ctx.department_id else {
        deps.notify(chat, &user_error("Сначала выберите ресторан: /start")).await;
        return Ok(());
    };

    let text = render_shortages(deps, department_id).await?;
    let hash = content_hash(&text);

    let message_id = deps.transport.send_message(chat, &text, None).await?;
    if let Err(e) = deps.transport.pin_message(chat, message_id).await {
        debug!(chat, error = %e, "pin failed");
    }
    pinned_message_upsert(&deps.pool, PinnedKind::StockAlert, chat, message_id, &hash).await?;
    Ok(())
}

async fn render_shortages(deps: &FlowDeps, department_id: Uuid) -> Result<String> {
    let shortages = stock_below_min(&deps.pool, department_id).await?;
    if shortages.is_empty() {
        return Ok("📉 Остатки в норме".to_string());
    }

    let mut out = String::from("📉 Ниже минимума:\n");
    for s in shortages {
        out.push_str(&format!(
            "• {} — {} (мин. {}) на {}\n",
            s.product_name,
            s.amount.normalize(),
            s.min_level.normalize(),
            s.store_name
        ));
    }
    Ok(out)
}

/// Update every user's pinned "stock below min" message, hash-gated.
pub async fn refresh_stock_alerts(deps: &Arc<FlowDeps>) -> Result<()> {
    for pinned in pinned_messages_all(&deps.pool, PinnedKind::StockAlert).await? {
        let Some(ctx) = deps.user_context(pinned.chat_id).await? else {
            continue;
        };
        let Some(department_id) = ctx.department_id else { continue };

        let text = render_shortages(deps, department_id).await?;
        let hash = content_hash(&text);
        if hash == pinned.snapshot_hash {
            continue;
        }

        match deps
            .transport
            .edit_message(pinned.chat_id, pinned.message_id, &text, None)
            .await
        {
            Ok(()) => {
                pinned_message_upsert(
                    &deps.pool,
                    PinnedKind::StockAlert,
                    pinned.chat_id,
                    pinned.message_id,
                    &hash,
                )
                .await?;
            }
            Err(e) => debug!(chat = pinned.chat_id, error = %e, "stock alert edit failed"),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Order-closed: throttled balance resync + alert refresh
// ---------------------------------------------------------------------------

/// Minimum spacing between webhook-driven balance resyncs.
pub const RESYNC_MIN_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Default)]
pub struct ResyncThrottle {
    last: std::sync::Mutex<Option<Instant>>,
}

impl ResyncThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when enough time has passed; stamps the ledger when allowing.
    pub fn allow(&self) -> bool {
        let mut last = self.last.lock().expect("resync throttle poisoned");
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < RESYNC_MIN_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

pub async fn on_order_closed(deps: &Arc<FlowDeps>, throttle: &ResyncThrottle) -> Result<()> {
    if !throttle.allow() {
        debug!("order-closed resync throttled");
        return Ok(());
    }

    let outcome = galley_sync::sync_stock_balances(
        &deps.pool,
        &deps.clock,
        &deps.locks,
        &deps.pos,
        galley_schemas::SyncTrigger::Webhook,
    )
    .await?;
    if !outcome.is_success() {
        warn!(?outcome, "webhook-driven balance resync did not complete");
    }

    refresh_stock_alerts(deps).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pair(n: u128) -> StoplistPair {
        StoplistPair {
            product_id: Uuid::from_u128(n),
            terminal_group_id: Uuid::from_u128(0xAA),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_events_produces_one_flush_with_latest_snapshot() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let f = Arc::clone(&flushes);
        let s = Arc::clone(&seen);
        let debouncer = StoplistDebouncer::new(Duration::from_secs(60), move |pairs| {
            let f = Arc::clone(&f);
            let s = Arc::clone(&s);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                s.lock().await.push(pairs);
            }
        });

        // Five events inside ten seconds.
        for i in 0..5u128 {
            debouncer.submit(vec![pair(i)]).await;
            tokio::time::advance(Duration::from_secs(2)).await;
        }
        assert_eq!(flushes.load(Ordering::SeqCst), 0, "window still open");

        tokio::time::advance(Duration::from_secs(61)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        let seen = seen.lock().await;
        assert_eq!(seen[0], vec![pair(4)], "latest snapshot wins");
    }

    #[tokio::test(start_paused = true)]
    async fn later_event_extends_the_window() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&flushes);
        let debouncer = StoplistDebouncer::new(Duration::from_secs(60), move |_| {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        debouncer.submit(vec![pair(1)]).await;
        tokio::time::advance(Duration::from_secs(50)).await;
        debouncer.submit(vec![pair(2)]).await;

        // The original deadline has passed, but the second event moved it.
        tokio::time::advance(Duration::from_secs(30)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(flushes.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn identical_content_produces_identical_hash() {
        let a = content_hash("🚫 Стоп-лист:\n• Лимонад\n");
        let b = content_hash("🚫 Стоп-лист:\n• Лимонад\n");
        let c = content_hash("🚫 Стоп-лист:\n• Лимонад\n• Сидр\n");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn resync_throttle_blocks_rapid_repeats() {
        let t = ResyncThrottle::new();
        assert!(t.allow());
        assert!(!t.allow());
    }
}
