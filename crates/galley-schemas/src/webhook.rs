//! Cloud webhook payloads.
//!
//! The cloud POS delivers an array of event envelopes per request. Only the
//! event classes below are of interest; everything else is acknowledged and
//! dropped.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `(product, terminal group)` pair currently on the stop list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoplistPair {
    pub product_id: Uuid,
    pub terminal_group_id: Uuid,
}

/// Envelope as delivered by the cloud: type tag plus opaque body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Kept verbatim: the cloud's timestamp format has changed between
    /// API revisions and nothing downstream depends on it.
    #[serde(rename = "eventTime")]
    pub event_time: Option<String>,
    #[serde(rename = "organizationId")]
    pub organization_id: Option<Uuid>,
    #[serde(rename = "eventInfo", default)]
    pub event_info: serde_json::Value,
}

/// Classified webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    StopListUpdate { pairs: Vec<StoplistPair> },
    DeliveryOrderUpdate,
    DeliveryOrderClosed,
    TableOrderUpdate,
    TableOrderClosed,
    /// Anything else — acknowledged, not processed.
    Ignored(String),
}

impl WebhookEnvelope {
    /// Classify the envelope. Stop-list bodies are parsed eagerly; malformed
    /// item entries are dropped rather than failing the whole event.
    pub fn classify(&self) -> WebhookEvent {
        match self.event_type.as_str() {
            "StopListUpdate" => WebhookEvent::StopListUpdate {
                pairs: parse_stoplist_pairs(&self.event_info),
            },
            "DeliveryOrderUpdate" => WebhookEvent::DeliveryOrderUpdate,
            "DeliveryOrderClosed" => WebhookEvent::DeliveryOrderClosed,
            "TableOrderUpdate" => WebhookEvent::TableOrderUpdate,
            "TableOrderClosed" => WebhookEvent::TableOrderClosed,
            other => WebhookEvent::Ignored(other.to_string()),
        }
    }
}

fn parse_stoplist_pairs(info: &serde_json::Value) -> Vec<StoplistPair> {
    let Some(groups) = info.get("terminalGroups").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut pairs = Vec::new();
    for group in groups {
        let Some(tg_id) = group
            .get("terminalGroupId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            continue;
        };
        let Some(items) = group.get("items").and_then(|v| v.as_array()) else {
            continue;
        };
        for item in items {
            if let Some(pid) = item
                .get("productId")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                pairs.push(StoplistPair {
                    product_id: pid,
                    terminal_group_id: tg_id,
                });
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stoplist_update_parses_pairs_and_skips_malformed() {
        let env = WebhookEnvelope {
            event_type: "StopListUpdate".to_string(),
            event_time: None,
            organization_id: None,
            event_info: json!({
                "terminalGroups": [{
                    "terminalGroupId": "11111111-1111-1111-1111-111111111111",
                    "items": [
                        {"productId": "22222222-2222-2222-2222-222222222222"},
                        {"productId": "not-a-uuid"},
                        {"balance": 0}
                    ]
                }]
            }),
        };

        match env.classify() {
            WebhookEvent::StopListUpdate { pairs } => {
                assert_eq!(pairs.len(), 1);
                assert_eq!(
                    pairs[0].terminal_group_id.to_string(),
                    "11111111-1111-1111-1111-111111111111"
                );
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_types_are_ignored_not_errors() {
        let env = WebhookEnvelope {
            event_type: "ReserveUpdate".to_string(),
            event_time: None,
            organization_id: None,
            event_info: serde_json::Value::Null,
        };
        assert_eq!(
            env.classify(),
            WebhookEvent::Ignored("ReserveUpdate".to_string())
        );
    }

    #[test]
    fn order_closed_variants_classify() {
        for (tag, want) in [
            ("DeliveryOrderClosed", WebhookEvent::DeliveryOrderClosed),
            ("TableOrderClosed", WebhookEvent::TableOrderClosed),
            ("DeliveryOrderUpdate", WebhookEvent::DeliveryOrderUpdate),
            ("TableOrderUpdate", WebhookEvent::TableOrderUpdate),
        ] {
            let env = WebhookEnvelope {
                event_type: tag.to_string(),
                event_time: None,
                organization_id: None,
                event_info: serde_json::Value::Null,
            };
            assert_eq!(env.classify(), want);
        }
    }
}
