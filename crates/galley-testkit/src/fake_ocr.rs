//! Canned OCR extraction.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use galley_flows::{OcrExtractor, OcrResult};

#[derive(Default)]
pub struct FakeOcr {
    result: Mutex<Option<OcrResult>>,
}

impl FakeOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_result(&self, result: OcrResult) {
        *self.result.lock().unwrap() = Some(result);
    }
}

#[async_trait]
impl OcrExtractor for FakeOcr {
    async fn extract(&self, _photos: &[Vec<u8>]) -> Result<OcrResult> {
        self.result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("fake ocr has no configured result"))
    }
}
