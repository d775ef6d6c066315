//! Object-safe upstream contracts.
//!
//! The rest of the system depends on these traits, not on the concrete
//! clients, so tests can substitute in-process fakes (and a future second
//! POS vendor would slot in behind the same surface).

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use galley_schemas::{
    FinanceResource, InternalTransferDoc, OutgoingInvoiceDoc, RootType, WriteoffDoc,
};

use crate::error::ApiResult;
use crate::finance::FinanceClient;
use crate::pos::PosClient;

#[async_trait]
pub trait PosApi: Send + Sync {
    async fn fetch_departments(&self) -> ApiResult<Vec<Value>>;
    async fn fetch_stores(&self) -> ApiResult<Vec<Value>>;
    async fn fetch_groups(&self) -> ApiResult<Vec<Value>>;
    async fn fetch_suppliers(&self) -> ApiResult<Vec<Value>>;
    async fn fetch_employees(&self) -> ApiResult<Vec<Value>>;
    async fn fetch_employee_roles(&self) -> ApiResult<Vec<Value>>;
    async fn fetch_products(&self) -> ApiResult<Vec<Value>>;
    async fn fetch_product_groups(&self) -> ApiResult<Vec<Value>>;
    async fn fetch_entities(&self, root_type: RootType) -> ApiResult<Vec<Value>>;
    async fn fetch_stock_balances(&self, on: NaiveDate) -> ApiResult<Vec<Value>>;
    async fn fetch_olap_by_preset(&self, preset_id: &str, on: NaiveDate)
        -> ApiResult<Vec<Value>>;
    async fn fetch_olap_transactions(&self, request: &Value) -> ApiResult<Vec<Value>>;

    async fn send_writeoff(&self, doc: &WriteoffDoc, date: NaiveDate) -> ApiResult<()>;
    async fn send_outgoing_invoice(
        &self,
        doc: &OutgoingInvoiceDoc,
        date: NaiveDate,
    ) -> ApiResult<()>;
    async fn send_internal_transfer(
        &self,
        doc: &InternalTransferDoc,
        date: NaiveDate,
    ) -> ApiResult<()>;
}

#[async_trait]
impl PosApi for PosClient {
    async fn fetch_departments(&self) -> ApiResult<Vec<Value>> {
        PosClient::fetch_departments(self).await
    }
    async fn fetch_stores(&self) -> ApiResult<Vec<Value>> {
        PosClient::fetch_stores(self).await
    }
    async fn fetch_groups(&self) -> ApiResult<Vec<Value>> {
        PosClient::fetch_groups(self).await
    }
    async fn fetch_suppliers(&self) -> ApiResult<Vec<Value>> {
        PosClient::fetch_suppliers(self).await
    }
    async fn fetch_employees(&self) -> ApiResult<Vec<Value>> {
        PosClient::fetch_employees(self).await
    }
    async fn fetch_employee_roles(&self) -> ApiResult<Vec<Value>> {
        PosClient::fetch_employee_roles(self).await
    }
    async fn fetch_products(&self) -> ApiResult<Vec<Value>> {
        PosClient::fetch_products(self).await
    }
    async fn fetch_product_groups(&self) -> ApiResult<Vec<Value>> {
        PosClient::fetch_product_groups(self).await
    }
    async fn fetch_entities(&self, root_type: RootType) -> ApiResult<Vec<Value>> {
        PosClient::fetch_entities(self, root_type).await
    }
    async fn fetch_stock_balances(&self, on: NaiveDate) -> ApiResult<Vec<Value>> {
        PosClient::fetch_stock_balances(self, on).await
    }
    async fn fetch_olap_by_preset(
        &self,
        preset_id: &str,
        on: NaiveDate,
    ) -> ApiResult<Vec<Value>> {
        PosClient::fetch_olap_by_preset(self, preset_id, on).await
    }
    async fn fetch_olap_transactions(&self, request: &Value) -> ApiResult<Vec<Value>> {
        PosClient::fetch_olap_transactions(self, request).await
    }
    async fn send_writeoff(&self, doc: &WriteoffDoc, date: NaiveDate) -> ApiResult<()> {
        PosClient::send_writeoff(self, doc, date).await
    }
    async fn send_outgoing_invoice(
        &self,
        doc: &OutgoingInvoiceDoc,
        date: NaiveDate,
    ) -> ApiResult<()> {
        PosClient::send_outgoing_invoice(self, doc, date).await
    }
    async fn send_internal_transfer(
        &self,
        doc: &InternalTransferDoc,
        date: NaiveDate,
    ) -> ApiResult<()> {
        PosClient::send_internal_transfer(self, doc, date).await
    }
}

#[async_trait]
pub trait FinanceApi: Send + Sync {
    async fn fetch(&self, resource: FinanceResource) -> ApiResult<Vec<Value>>;
}

#[async_trait]
impl FinanceApi for FinanceClient {
    async fn fetch(&self, resource: FinanceResource) -> ApiResult<Vec<Value>> {
        FinanceClient::fetch(self, resource).await
    }
}
