//! In-memory spreadsheet.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use galley_sheets::{SheetClient, SheetRecord};

#[derive(Default)]
pub struct FakeSheet {
    tabs: Mutex<HashMap<String, (Vec<String>, Vec<Vec<String>>)>>,
    hidden: Mutex<Vec<(String, String)>>,
    dropdowns: Mutex<Vec<(String, String, Vec<String>)>>,
}

impl FakeSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tab from header + rows.
    pub fn seed(&self, tab: &str, header: &[&str], rows: &[&[&str]]) {
        self.tabs.lock().unwrap().insert(
            tab.to_string(),
            (
                header.iter().map(|s| s.to_string()).collect(),
                rows.iter()
                    .map(|r| r.iter().map(|s| s.to_string()).collect())
                    .collect(),
            ),
        );
    }

    pub fn tab(&self, tab: &str) -> Option<(Vec<String>, Vec<Vec<String>>)> {
        self.tabs.lock().unwrap().get(tab).cloned()
    }

    pub fn hidden_columns(&self) -> Vec<(String, String)> {
        self.hidden.lock().unwrap().clone()
    }
}

#[async_trait]
impl SheetClient for FakeSheet {
    async fn read_records(&self, tab: &str) -> Result<Vec<SheetRecord>> {
        let tabs = self.tabs.lock().unwrap();
        let Some((header, rows)) = tabs.get(tab) else {
            return Ok(Vec::new());
        };

        Ok(rows
            .iter()
            .map(|row| {
                header
                    .iter()
                    .zip(row)
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(h, v)| (h.clone(), v.clone()))
                    .collect()
            })
            .collect())
    }

    async fn write_records(
        &self,
        tab: &str,
        header: &[String],
        rows: &[Vec<String>],
    ) -> Result<()> {
        self.tabs
            .lock()
            .unwrap()
            .insert(tab.to_string(), (header.to_vec(), rows.to_vec()));
        Ok(())
    }

    async fn set_dropdown(&self, tab: &str, column: &str, options: &[String]) -> Result<()> {
        self.dropdowns.lock().unwrap().push((
            tab.to_string(),
            column.to_string(),
            options.to_vec(),
        ));
        Ok(())
    }

    async fn hide_column(&self, tab: &str, column: &str) -> Result<()> {
        self.hidden
            .lock()
            .unwrap()
            .push((tab.to_string(), column.to_string()));
        Ok(())
    }
}
