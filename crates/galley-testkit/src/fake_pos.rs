//! Fake upstreams.
//!
//! `FakePos` models the idempotency contract the real POS provides: every
//! accepted POST is counted, but documents sharing a UUID collapse into
//! one. A configurable number of leading submit attempts can fail
//! transiently to exercise retry paths.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use uuid::Uuid;

use galley_clients::{ApiError, ApiResult, FinanceApi, PosApi};
use galley_schemas::{
    FinanceResource, InternalTransferDoc, OutgoingInvoiceDoc, RootType, WriteoffDoc,
};

#[derive(Default)]
pub struct FakePos {
    responses: Mutex<HashMap<String, Vec<Value>>>,
    accepted_posts: AtomicU32,
    fail_next_submits: AtomicU32,
    writeoff_docs: Mutex<BTreeSet<Uuid>>,
    invoice_docs: Mutex<BTreeSet<Uuid>>,
    transfer_docs: Mutex<Vec<InternalTransferDoc>>,
}

impl FakePos {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the records a named fetch returns.
    pub fn set_response(&self, resource: &str, records: Vec<Value>) {
        self.responses
            .lock()
            .unwrap()
            .insert(resource.to_string(), records);
    }

    /// The next `n` document submits fail with a transient error.
    pub fn fail_next_submits(&self, n: u32) {
        self.fail_next_submits.store(n, Ordering::SeqCst);
    }

    /// POSTs the upstream accepted (including idempotent replays).
    pub fn accepted_posts(&self) -> u32 {
        self.accepted_posts.load(Ordering::SeqCst)
    }

    /// Distinct write-off documents, after UUID deduplication.
    pub fn distinct_writeoffs(&self) -> usize {
        self.writeoff_docs.lock().unwrap().len()
    }

    pub fn distinct_invoices(&self) -> usize {
        self.invoice_docs.lock().unwrap().len()
    }

    pub fn transfers(&self) -> Vec<InternalTransferDoc> {
        self.transfer_docs.lock().unwrap().clone()
    }

    fn fetch(&self, resource: &str) -> ApiResult<Vec<Value>> {
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(resource)
            .cloned()
            .unwrap_or_default())
    }

    fn gate_submit(&self) -> ApiResult<()> {
        let remaining = self.fail_next_submits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_submits.store(remaining - 1, Ordering::SeqCst);
            return Err(ApiError::transient("fake pos: injected failure"));
        }
        self.accepted_posts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PosApi for FakePos {
    async fn fetch_departments(&self) -> ApiResult<Vec<Value>> {
        self.fetch("departments")
    }
    async fn fetch_stores(&self) -> ApiResult<Vec<Value>> {
        self.fetch("stores")
    }
    async fn fetch_groups(&self) -> ApiResult<Vec<Value>> {
        self.fetch("groups")
    }
    async fn fetch_suppliers(&self) -> ApiResult<Vec<Value>> {
        self.fetch("suppliers")
    }
    async fn fetch_employees(&self) -> ApiResult<Vec<Value>> {
        self.fetch("employees")
    }
    async fn fetch_employee_roles(&self) -> ApiResult<Vec<Value>> {
        self.fetch("employee_roles")
    }
    async fn fetch_products(&self) -> ApiResult<Vec<Value>> {
        self.fetch("products")
    }
    async fn fetch_product_groups(&self) -> ApiResult<Vec<Value>> {
        self.fetch("product_groups")
    }
    async fn fetch_entities(&self, root_type: RootType) -> ApiResult<Vec<Value>> {
        self.fetch(root_type.as_str())
    }
    async fn fetch_stock_balances(&self, _on: NaiveDate) -> ApiResult<Vec<Value>> {
        self.fetch("stock_balances")
    }
    async fn fetch_olap_by_preset(
        &self,
        preset_id: &str,
        _on: NaiveDate,
    ) -> ApiResult<Vec<Value>> {
        self.fetch(preset_id)
    }
    async fn fetch_olap_transactions(&self, _request: &Value) -> ApiResult<Vec<Value>> {
        self.fetch("olap_transactions")
    }

    async fn send_writeoff(&self, doc: &WriteoffDoc, _date: NaiveDate) -> ApiResult<()> {
        self.gate_submit()?;
        self.writeoff_docs.lock().unwrap().insert(doc.doc_uuid);
        Ok(())
    }

    async fn send_outgoing_invoice(
        &self,
        doc: &OutgoingInvoiceDoc,
        _date: NaiveDate,
    ) -> ApiResult<()> {
        self.gate_submit()?;
        self.invoice_docs.lock().unwrap().insert(doc.doc_uuid);
        Ok(())
    }

    async fn send_internal_transfer(
        &self,
        doc: &InternalTransferDoc,
        _date: NaiveDate,
    ) -> ApiResult<()> {
        self.gate_submit()?;
        self.transfer_docs.lock().unwrap().push(doc.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Finance
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeFinance {
    responses: Mutex<HashMap<FinanceResource, Vec<Value>>>,
    fail_next: AtomicU32,
}

impl FakeFinance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_response(&self, resource: FinanceResource, records: Vec<Value>) {
        self.responses.lock().unwrap().insert(resource, records);
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl FinanceApi for FakeFinance {
    async fn fetch(&self, resource: FinanceResource) -> ApiResult<Vec<Value>> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(ApiError::transient("fake finance: injected failure"));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&resource)
            .cloned()
            .unwrap_or_default())
    }
}
