//! Default adapter implementations for the peripheral seams.
//!
//! Production deployments link real integrations (chat delivery,
//! spreadsheet API, vision extraction) and pass them to `build_app`. The
//! defaults below keep the daemon runnable without them: outbound chat
//! traffic goes to the log, the spreadsheet reads empty, OCR reports
//! itself unconfigured.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};

use galley_chat::{ChatId, ChatTransport, Markup, MessageId};
use galley_clients::TokenSource;
use galley_flows::{OcrExtractor, OcrResult};
use galley_sheets::{SheetClient, SheetRecord};

use crate::state::Adapters;

/// Cloud token handoff: an external process writes rows, we read the
/// newest.
pub struct DbCloudTokens {
    pool: PgPool,
}

impl DbCloudTokens {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenSource for DbCloudTokens {
    async fn current_token(&self) -> Result<Option<String>> {
        galley_db::latest_cloud_token(&self.pool).await
    }
}

// ---------------------------------------------------------------------------
// Unconfigured defaults
// ---------------------------------------------------------------------------

/// Logs outbound messages instead of delivering them.
pub struct LoggingTransport {
    next_id: AtomicI64,
}

impl LoggingTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for LoggingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for LoggingTransport {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        _markup: Option<Markup>,
    ) -> Result<MessageId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        info!(chat_id, message_id = id, %text, "outbound message (no transport linked)");
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        _markup: Option<Markup>,
    ) -> Result<()> {
        info!(chat_id, message_id, %text, "edit (no transport linked)");
        Ok(())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        info!(chat_id, message_id, "delete (no transport linked)");
        Ok(())
    }

    async fn edit_reply_markup(
        &self,
        _chat_id: ChatId,
        _message_id: MessageId,
        _markup: Option<Markup>,
    ) -> Result<()> {
        Ok(())
    }

    async fn answer_callback(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn pin_message(&self, _chat_id: ChatId, _message_id: MessageId) -> Result<()> {
        Ok(())
    }
}

/// Reads empty tabs and drops writes, warning once per call site.
pub struct UnconfiguredSheets;

#[async_trait]
impl SheetClient for UnconfiguredSheets {
    async fn read_records(&self, tab: &str) -> Result<Vec<SheetRecord>> {
        warn!(tab, "sheet transport not configured; reading empty tab");
        Ok(Vec::new())
    }

    async fn write_records(&self, tab: &str, _header: &[String], rows: &[Vec<String>]) -> Result<()> {
        warn!(tab, rows = rows.len(), "sheet transport not configured; dropping write");
        Ok(())
    }

    async fn set_dropdown(&self, _tab: &str, _column: &str, _options: &[String]) -> Result<()> {
        Ok(())
    }

    async fn hide_column(&self, _tab: &str, _column: &str) -> Result<()> {
        Ok(())
    }
}

/// Always fails extraction with a configuration error.
pub struct UnconfiguredOcr;

#[async_trait]
impl OcrExtractor for UnconfiguredOcr {
    async fn extract(&self, _photos: &[Vec<u8>]) -> Result<OcrResult> {
        anyhow::bail!("ocr extractor not configured")
    }
}

/// Adapter set for running without any peripheral integrations linked.
pub fn unconfigured() -> Adapters {
    Adapters {
        transport: Arc::new(LoggingTransport::new()),
        sheets: Arc::new(UnconfiguredSheets),
        ocr: Arc::new(UnconfiguredOcr),
    }
}
