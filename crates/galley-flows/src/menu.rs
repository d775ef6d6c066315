//! Menu surface: button texts, navigation set, permission rules, and the
//! short user-facing error format.

use galley_chat::{CallbackGuard, InlineButton, Markup, PermissionRules};

// Top-level reply buttons.
pub const BTN_WRITEOFF: &str = "🗑 Списание";
pub const BTN_INVOICE: &str = "📦 Накладная";
pub const BTN_REQUEST: &str = "📝 Заявка";
pub const BTN_TEMPLATES: &str = "📋 Шаблоны";
pub const BTN_STOPLIST: &str = "🚫 Стоп-лист";
pub const BTN_MIN_STOCK: &str = "📉 Минимальные остатки";
pub const BTN_HISTORY: &str = "🗂 История списаний";
pub const BTN_OCR: &str = "📸 Накладная с фото";
pub const BTN_SYNC: &str = "🔄 Синхронизация";
pub const BTN_REPORTS: &str = "📊 Отчёты";
pub const BTN_SETTINGS: &str = "⚙️ Настройки";
pub const BTN_MAIN_MENU: &str = "🏠 Главное меню";
pub const BTN_BACK: &str = "⬅️ Назад";

/// Buttons that escape any FSM state: arriving mid-session they clear the
/// session, delete tracked messages, and then run normally.
pub const NAV_BUTTONS: &[&str] = &[
    BTN_WRITEOFF,
    BTN_INVOICE,
    BTN_REQUEST,
    BTN_TEMPLATES,
    BTN_STOPLIST,
    BTN_MIN_STOCK,
    BTN_HISTORY,
    BTN_OCR,
    BTN_SYNC,
    BTN_REPORTS,
    BTN_SETTINGS,
    BTN_MAIN_MENU,
    BTN_BACK,
];

pub fn is_nav_button(text: &str) -> bool {
    NAV_BUTTONS.contains(&text)
}

pub fn main_menu_markup() -> Markup {
    Markup::Reply(vec![
        vec![BTN_WRITEOFF.to_string(), BTN_INVOICE.to_string()],
        vec![BTN_REQUEST.to_string(), BTN_TEMPLATES.to_string()],
        vec![BTN_STOPLIST.to_string(), BTN_MIN_STOCK.to_string()],
        vec![BTN_HISTORY.to_string(), BTN_OCR.to_string()],
        vec![BTN_SYNC.to_string(), BTN_REPORTS.to_string()],
    ])
}

/// The lookup tables the permission middleware consults. Add a button or
/// prefix here and its capability column appears on the next matrix
/// export.
pub fn permission_rules() -> PermissionRules {
    PermissionRules::new()
        .text_button(BTN_WRITEOFF, "writeoff")
        .text_button(BTN_INVOICE, "invoice")
        .text_button(BTN_REQUEST, "requests")
        .text_button(BTN_TEMPLATES, "invoice")
        .text_button(BTN_STOPLIST, "stoplist")
        .text_button(BTN_MIN_STOCK, "min_stock")
        .text_button(BTN_HISTORY, "writeoff")
        .text_button(BTN_OCR, "ocr")
        .text_button(BTN_SYNC, "sync")
        .text_button(BTN_REPORTS, "reports")
        .callback_prefix("wo:approve:", CallbackGuard::AdminOnly)
        .callback_prefix("wo:reject:", CallbackGuard::AdminOnly)
        .callback_prefix("wo:edit:", CallbackGuard::AdminOnly)
        .callback_prefix("wo:unlock:", CallbackGuard::AdminOnly)
        .callback_prefix("wo:adj:", CallbackGuard::AdminOnly)
        .callback_prefix("wo:", CallbackGuard::Capability("writeoff"))
        .callback_prefix("inv:", CallbackGuard::Capability("invoice"))
        .callback_prefix("req:approve:", CallbackGuard::ReceiverOrAdmin)
        .callback_prefix("req:edit:", CallbackGuard::ReceiverOrAdmin)
        .callback_prefix("req:cancel:", CallbackGuard::ReceiverOrAdmin)
        .callback_prefix("req:", CallbackGuard::Capability("requests"))
        .callback_prefix("sync:", CallbackGuard::Capability("sync"))
        .callback_prefix("ocr:", CallbackGuard::Capability("ocr"))
}

/// Every chat-facing error becomes a short sentence with an emoji prefix;
/// details stay in the logs.
pub fn user_error(text: &str) -> String {
    format!("⚠️ {text}")
}

pub fn inline_rows(buttons: Vec<(String, String)>, per_row: usize) -> Markup {
    let mut rows: Vec<Vec<InlineButton>> = Vec::new();
    for chunk in buttons.chunks(per_row.max(1)) {
        rows.push(
            chunk
                .iter()
                .map(|(text, data)| InlineButton::new(text.clone(), data.clone()))
                .collect(),
        );
    }
    Markup::Inline(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nav_set_contains_all_menu_buttons() {
        assert!(is_nav_button(BTN_WRITEOFF));
        assert!(is_nav_button(BTN_MAIN_MENU));
        assert!(!is_nav_button("Иванов"));
    }

    #[test]
    fn rules_register_capability_tokens_for_export() {
        let caps = permission_rules().capability_tokens();
        for expected in ["writeoff", "invoice", "requests", "stoplist", "sync", "ocr"] {
            assert!(caps.contains(&expected), "missing token {expected}");
        }
    }

    #[test]
    fn inline_rows_chunks_by_row_width() {
        let markup = inline_rows(
            (0..5).map(|i| (format!("b{i}"), format!("d{i}"))).collect(),
            2,
        );
        match markup {
            Markup::Inline(rows) => {
                assert_eq!(rows.len(), 3);
                assert_eq!(rows[0].len(), 2);
                assert_eq!(rows[2].len(), 1);
            }
            _ => panic!("expected inline markup"),
        }
    }
}
