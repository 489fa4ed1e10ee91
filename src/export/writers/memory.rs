//! In-memory sheet document
//!
//! Keeps every sheet as owned cells behind its own lock, so concurrent sheet
//! tasks never contend with each other. Used by tests and by embedders that
//! post-process the result themselves.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::{Result, SinkError};
use crate::export::converter::{Cell, Converter};

use super::sheet::{Document, Sheet};

/// Owned copy of one cell
#[derive(Debug, Clone, PartialEq)]
pub enum SheetCell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Time(NaiveDateTime),
}

impl From<Cell<'_>> for SheetCell {
    fn from(cell: Cell<'_>) -> Self {
        match cell {
            Cell::Empty => SheetCell::Empty,
            Cell::Text(s) => SheetCell::Text(s.to_string()),
            Cell::Int(n) => SheetCell::Int(n),
            Cell::Float(f) => SheetCell::Float(f),
            Cell::Time(t) => SheetCell::Time(t),
        }
    }
}

/// Contents of one sheet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetData {
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<SheetCell>>,
    /// Number of `close` calls received
    pub close_calls: usize,
}

#[derive(Debug, Default)]
struct DocumentState {
    sheets: Mutex<Vec<Arc<Mutex<SheetData>>>>,
    close_calls: Mutex<usize>,
    fail_append_to: Option<String>,
    fail_new_sheet: Option<String>,
}

/// Document collecting sheets in memory. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    state: Arc<DocumentState>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make appends to the named sheet fail
    pub fn fail_append_to(name: &str) -> Self {
        Self {
            state: Arc::new(DocumentState {
                fail_append_to: Some(name.to_string()),
                ..DocumentState::default()
            }),
        }
    }

    /// Make creating the named sheet fail
    pub fn fail_new_sheet(name: &str) -> Self {
        Self {
            state: Arc::new(DocumentState {
                fail_new_sheet: Some(name.to_string()),
                ..DocumentState::default()
            }),
        }
    }

    /// Copy of every sheet, in creation order
    pub fn sheets(&self) -> Vec<SheetData> {
        let Ok(sheets) = self.state.sheets.lock() else {
            return Vec::new();
        };
        sheets
            .iter()
            .filter_map(|sheet| sheet.lock().ok().map(|data| data.clone()))
            .collect()
    }

    /// Number of `close` calls the document received
    pub fn close_calls(&self) -> usize {
        self.state.close_calls.lock().map(|n| *n).unwrap_or(0)
    }
}

fn poisoned(sheet: &str) -> SinkError {
    SinkError::Append {
        sheet: sheet.to_string(),
        cause: "sheet lock poisoned".to_string(),
    }
}

#[async_trait]
impl Document for MemoryDocument {
    async fn new_sheet(&mut self, name: &str, header: &[String]) -> Result<Box<dyn Sheet>> {
        if self.state.fail_new_sheet.as_deref() == Some(name) {
            return Err(SinkError::NewSheet {
                sheet: name.to_string(),
                cause: "sheet rejected".to_string(),
            }
            .into());
        }

        let data = Arc::new(Mutex::new(SheetData {
            name: name.to_string(),
            header: header.to_vec(),
            ..SheetData::default()
        }));
        self.state
            .sheets
            .lock()
            .map_err(|_| poisoned(name))?
            .push(Arc::clone(&data));

        Ok(Box::new(MemorySheet {
            name: name.to_string(),
            data,
            fail_append: self.state.fail_append_to.as_deref() == Some(name),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        let mut calls = self
            .state
            .close_calls
            .lock()
            .map_err(|_| SinkError::Close("document lock poisoned".to_string()))?;
        *calls += 1;
        Ok(())
    }
}

struct MemorySheet {
    name: String,
    data: Arc<Mutex<SheetData>>,
    fail_append: bool,
}

#[async_trait]
impl Sheet for MemorySheet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append_row(&mut self, row: &[Converter]) -> Result<()> {
        if self.fail_append {
            return Err(SinkError::Append {
                sheet: self.name.clone(),
                cause: "append rejected".to_string(),
            }
            .into());
        }
        let cells = row.iter().map(|c| SheetCell::from(c.cell())).collect();
        self.data.lock().map_err(|_| poisoned(&self.name))?.rows.push(cells);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.data.lock().map_err(|_| poisoned(&self.name))?.close_calls += 1;
        Ok(())
    }
}
