//! POS client: reference reads (XML and JSON), OLAP reports, and document
//! submission.
//!
//! Reads go through the transient-retry wrapper. Document POSTs do not —
//! the only retry allowed on a submission lives in the approval workflow,
//! which may re-POST because the client-generated document UUID is the
//! idempotency key.

use chrono::NaiveDate;
use quick_xml::escape::escape;
use reqwest::Url;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use galley_schemas::{
    DocItem, InternalTransferDoc, OutgoingInvoiceDoc, RootType, WriteoffDoc,
};

use crate::error::{ApiError, ApiResult};
use crate::retry::{retry_with_backoff, POS_GET_BACKOFF};
use crate::token::TokenCache;
use crate::xml::{parse_document, XmlNode};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
// One initial try plus four fixed-delay retries on network errors or 403.
const TOKEN_REFRESH_ATTEMPTS: u32 = 5;
const TOKEN_REFRESH_DELAY: Duration = Duration::from_secs(3);

pub struct PosClient {
    http: reqwest::Client,
    base: Url,
    login: String,
    password: String,
    token: TokenCache,
}

impl PosClient {
    pub fn new(base: Url, login: String, password: String) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| ApiError::permanent(format!("pos client build failed: {e}")))?;

        Ok(Self {
            http,
            base,
            login,
            password,
            token: TokenCache::new(),
        })
    }

    fn url(&self, path: &str) -> ApiResult<Url> {
        self.base
            .join(path)
            .map_err(|e| ApiError::permanent(format!("bad pos path {path}: {e}")))
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    /// Cached session token; refresh is serialised by the cache latch and
    /// itself retried with a fixed delay on network errors or 403.
    async fn session_token(&self) -> ApiResult<String> {
        self.token
            .get_or_refresh(|| async {
                let mut last: Option<ApiError> = None;
                for attempt in 1..=TOKEN_REFRESH_ATTEMPTS {
                    match self.fetch_token().await {
                        Ok(t) => return Ok(t),
                        Err(e) if e.is_transient() || e.status_is(403) => {
                            debug!(attempt, error = %e, "pos token refresh retry");
                            last = Some(e);
                            tokio::time::sleep(TOKEN_REFRESH_DELAY).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(last.unwrap_or_else(|| ApiError::unknown("token refresh failed")))
            })
            .await
    }

    async fn fetch_token(&self) -> ApiResult<String> {
        let mut url = self.url("resto/api/auth")?;
        url.query_pairs_mut()
            .append_pair("login", &self.login)
            .append_pair("pass", &self.password);

        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(ApiError::from_status(status, url.as_str()));
        }
        let token = resp.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(ApiError::permanent("pos auth returned empty token").with_url(url.as_str()));
        }
        Ok(token)
    }

    // -----------------------------------------------------------------------
    // Read plumbing
    // -----------------------------------------------------------------------

    async fn get_raw(&self, path: &str, query: &[(&str, &str)]) -> ApiResult<String> {
        let token = self.session_token().await?;
        let mut url = self.url(path)?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("key", &token);
            for (k, v) in query {
                qp.append_pair(k, v);
            }
        }

        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status().as_u16();
        if status == 403 {
            // Token expired early; drop it so the retry re-authenticates.
            self.token.invalidate().await;
            return Err(ApiError::transient("pos session expired").with_url(url.as_str()));
        }
        if status != 200 {
            return Err(ApiError::from_status(status, url.as_str()));
        }
        Ok(resp.text().await?)
    }

    async fn get_xml(&self, path: &str, query: &[(&str, &str)]) -> ApiResult<XmlNode> {
        retry_with_backoff(path, &POS_GET_BACKOFF, || async {
            let body = self.get_raw(path, query).await?;
            parse_document(&body)
        })
        .await
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> ApiResult<Value> {
        retry_with_backoff(path, &POS_GET_BACKOFF, || async {
            let body = self.get_raw(path, query).await?;
            serde_json::from_str(&body)
                .map_err(|e| ApiError::permanent(format!("pos json decode failed: {e}")))
        })
        .await
    }

    fn xml_items(root: &XmlNode, item_tag: &str) -> Vec<Value> {
        root.children_named(item_tag).map(|n| n.to_json()).collect()
    }

    fn json_items(v: Value) -> Vec<Value> {
        match v {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("response").or_else(|| map.remove("items"))
            {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Reference reads
    // -----------------------------------------------------------------------

    pub async fn fetch_departments(&self) -> ApiResult<Vec<Value>> {
        let root = self
            .get_xml("resto/api/corporation/departments", &[])
            .await?;
        Ok(Self::xml_items(&root, "corporateItemDto"))
    }

    pub async fn fetch_stores(&self) -> ApiResult<Vec<Value>> {
        let root = self.get_xml("resto/api/corporation/stores", &[]).await?;
        Ok(Self::xml_items(&root, "corporateItemDto"))
    }

    pub async fn fetch_groups(&self) -> ApiResult<Vec<Value>> {
        let root = self.get_xml("resto/api/corporation/groups", &[]).await?;
        Ok(Self::xml_items(&root, "groupDto"))
    }

    pub async fn fetch_suppliers(&self) -> ApiResult<Vec<Value>> {
        let root = self.get_xml("resto/api/suppliers", &[]).await?;
        Ok(Self::xml_items(&root, "employeeDto"))
    }

    pub async fn fetch_employees(&self) -> ApiResult<Vec<Value>> {
        let root = self.get_xml("resto/api/employees", &[]).await?;
        Ok(Self::xml_items(&root, "employeeDto"))
    }

    pub async fn fetch_employee_roles(&self) -> ApiResult<Vec<Value>> {
        let root = self.get_xml("resto/api/employees/roles", &[]).await?;
        Ok(Self::xml_items(&root, "roleDto"))
    }

    pub async fn fetch_products(&self) -> ApiResult<Vec<Value>> {
        let v = self
            .get_json(
                "resto/api/v2/entities/products/list",
                &[("includeDeleted", "true")],
            )
            .await?;
        Ok(Self::json_items(v))
    }

    pub async fn fetch_product_groups(&self) -> ApiResult<Vec<Value>> {
        let v = self
            .get_json(
                "resto/api/v2/entities/products/group/list",
                &[("includeDeleted", "true")],
            )
            .await?;
        Ok(Self::json_items(v))
    }

    /// One `root_type` slice of the shared reference list.
    pub async fn fetch_entities(&self, root_type: RootType) -> ApiResult<Vec<Value>> {
        let v = self
            .get_json(
                "resto/api/v2/entities/list",
                &[("rootType", root_type.upstream_name())],
            )
            .await?;
        Ok(Self::json_items(v))
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    pub async fn fetch_stock_balances(&self, on: NaiveDate) -> ApiResult<Vec<Value>> {
        let ts = on.format("%Y-%m-%d").to_string();
        let v = self
            .get_json(
                "resto/api/v2/reports/balance/stores",
                &[("timestamp", ts.as_str())],
            )
            .await?;
        Ok(Self::json_items(v))
    }

    /// Server-saved aggregation report, fetched by preset id.
    pub async fn fetch_olap_by_preset(&self, preset_id: &str, on: NaiveDate) -> ApiResult<Vec<Value>> {
        let d = on.format("%d.%m.%Y").to_string();
        let v = self
            .get_json(
                "resto/api/v2/reports/olap/byPresetId",
                &[("presetId", preset_id), ("dateFrom", d.as_str()), ("dateTo", d.as_str())],
            )
            .await?;
        Ok(Self::json_items(v))
    }

    /// Ad-hoc OLAP over the transactions cube. A read despite the verb, so
    /// it shares the GET retry policy.
    pub async fn fetch_olap_transactions(&self, request: &Value) -> ApiResult<Vec<Value>> {
        retry_with_backoff("olap/transactions", &POS_GET_BACKOFF, || async {
            let token = self.session_token().await?;
            let mut url = self.url("resto/api/v2/reports/olap")?;
            url.query_pairs_mut().append_pair("key", &token);

            let resp = self.http.post(url.clone()).json(request).send().await?;
            let status = resp.status().as_u16();
            if status == 403 {
                self.token.invalidate().await;
                return Err(ApiError::transient("pos session expired").with_url(url.as_str()));
            }
            if status != 200 {
                return Err(ApiError::from_status(status, url.as_str()));
            }
            let v: Value = resp.json().await?;
            Ok(Self::json_items(v))
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Document submission — never retried here
    // -----------------------------------------------------------------------

    pub async fn send_writeoff(&self, doc: &WriteoffDoc, date: NaiveDate) -> ApiResult<()> {
        let body = writeoff_xml(doc, date);
        self.post_document("resto/api/documents/import/writeoffDocument", body)
            .await
    }

    pub async fn send_outgoing_invoice(
        &self,
        doc: &OutgoingInvoiceDoc,
        date: NaiveDate,
    ) -> ApiResult<()> {
        let body = outgoing_invoice_xml(doc, date);
        self.post_document("resto/api/documents/import/outgoingInvoice", body)
            .await
    }

    pub async fn send_internal_transfer(
        &self,
        doc: &InternalTransferDoc,
        date: NaiveDate,
    ) -> ApiResult<()> {
        let body = internal_transfer_xml(doc, date);
        self.post_document("resto/api/documents/import/internalTransfer", body)
            .await
    }

    async fn post_document(&self, path: &str, body: String) -> ApiResult<()> {
        let token = self.session_token().await?;
        let mut url = self.url(path)?;
        url.query_pairs_mut().append_pair("key", &token);

        let resp = self
            .http
            .post(url.clone())
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 403 {
            self.token.invalidate().await;
            return Err(ApiError::transient("pos session expired").with_url(url.as_str()));
        }
        if status != 200 {
            return Err(ApiError::from_status(status, url.as_str()));
        }

        info!(path, "pos document accepted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Document XML builders
// ---------------------------------------------------------------------------

fn push_items(out: &mut String, items: &[DocItem]) {
    out.push_str("<items>");
    for it in items {
        out.push_str("<item>");
        out.push_str(&format!("<productId>{}</productId>", it.product_id));
        out.push_str(&format!("<amount>{}</amount>", fmt_amount(it.quantity)));
        if let Some(mu) = &it.measure_unit {
            out.push_str(&format!("<measureUnit>{}</measureUnit>", escape(mu)));
        }
        out.push_str("</item>");
    }
    out.push_str("</items>");
}

fn fmt_amount(q: Decimal) -> String {
    q.normalize().to_string()
}

pub fn writeoff_xml(doc: &WriteoffDoc, date: NaiveDate) -> String {
    let mut out = String::from("<document>");
    out.push_str(&format!("<id>{}</id>", doc.doc_uuid));
    out.push_str(&format!(
        "<dateIncoming>{}</dateIncoming>",
        date.format("%d.%m.%Y")
    ));
    out.push_str("<status>NEW</status>");
    out.push_str(&format!("<storeId>{}</storeId>", doc.store_id));
    out.push_str(&format!("<accountId>{}</accountId>", doc.account_id));
    out.push_str(&format!("<comment>{}</comment>", escape(&doc.comment)));
    push_items(&mut out, &doc.items);
    out.push_str("</document>");
    out
}

pub fn outgoing_invoice_xml(doc: &OutgoingInvoiceDoc, date: NaiveDate) -> String {
    let mut out = String::from("<document>");
    out.push_str(&format!("<id>{}</id>", doc.doc_uuid));
    out.push_str(&format!(
        "<dateIncoming>{}</dateIncoming>",
        date.format("%d.%m.%Y")
    ));
    out.push_str(&format!("<status>{}</status>", escape(&doc.status)));
    out.push_str(&format!("<storeId>{}</storeId>", doc.store_id));
    out.push_str(&format!("<counteragentId>{}</counteragentId>", doc.supplier_id));
    out.push_str(&format!("<comment>{}</comment>", escape(&doc.comment)));
    push_items(&mut out, &doc.items);
    out.push_str("</document>");
    out
}

pub fn internal_transfer_xml(doc: &InternalTransferDoc, date: NaiveDate) -> String {
    let mut out = String::from("<document>");
    out.push_str(&format!("<id>{}</id>", doc.doc_uuid));
    out.push_str(&format!(
        "<dateIncoming>{}</dateIncoming>",
        date.format("%d.%m.%Y")
    ));
    out.push_str("<status>NEW</status>");
    out.push_str(&format!("<storeFromId>{}</storeFromId>", doc.from_store_id));
    out.push_str(&format!("<storeToId>{}</storeToId>", doc.to_store_id));
    out.push_str(&format!("<comment>{}</comment>", escape(&doc.comment)));
    push_items(&mut out, &doc.items);
    out.push_str("</document>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn sample_writeoff() -> WriteoffDoc {
        WriteoffDoc {
            doc_uuid: Uuid::parse_str("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee").unwrap(),
            store_id: Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap(),
            account_id: Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap(),
            comment: "Бой посуды (Автор: Иванов И.)".to_string(),
            items: vec![DocItem {
                product_id: Uuid::parse_str("33333333-3333-3333-3333-333333333333").unwrap(),
                product_name: "Бокал".to_string(),
                quantity: dec!(2.500),
                measure_unit: Some("шт".to_string()),
            }],
        }
    }

    #[test]
    fn writeoff_xml_carries_uuid_and_comment() {
        let xml = writeoff_xml(&sample_writeoff(), NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        assert!(xml.contains("<id>aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee</id>"));
        assert!(xml.contains("<dateIncoming>14.03.2025</dateIncoming>"));
        assert!(xml.contains("Автор: Иванов И."));
        assert!(xml.contains("<amount>2.5</amount>"), "quantity must be normalised");
    }

    #[test]
    fn comment_is_escaped() {
        let mut doc = sample_writeoff();
        doc.comment = "a < b & c".to_string();
        let xml = writeoff_xml(&doc, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert!(xml.contains("a &lt; b &amp; c"));
    }

    #[test]
    fn transfer_xml_names_both_stores() {
        let doc = InternalTransferDoc {
            doc_uuid: Uuid::new_v4(),
            from_store_id: Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap(),
            to_store_id: Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap(),
            comment: String::new(),
            items: vec![],
        };
        let xml = internal_transfer_xml(&doc, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        assert!(xml.contains("<storeFromId>11111111-1111-1111-1111-111111111111</storeFromId>"));
        assert!(xml.contains("<storeToId>22222222-2222-2222-2222-222222222222</storeToId>"));
    }

    #[test]
    fn json_items_unwraps_known_envelopes() {
        let arr = serde_json::json!([{"id": 1}]);
        assert_eq!(PosClient::json_items(arr).len(), 1);

        let wrapped = serde_json::json!({"response": [{"id": 1}, {"id": 2}]});
        assert_eq!(PosClient::json_items(wrapped).len(), 2);

        assert!(PosClient::json_items(serde_json::json!("nope")).is_empty());
    }
}
