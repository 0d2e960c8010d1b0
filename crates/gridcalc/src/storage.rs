//! Storage collaborator contract and an in-memory implementation
//!
//! The engine never talks to a database directly. It asks a [`CellStorage`] for
//! the cells of a rectangle and hands it batches of [`CellRecord`]s to persist.

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridcalc_core::{
    Cell, CellFormat, CellKey, CellMerge, CellRect, CellValue, SheetId, MAX_COLS, MAX_ROWS,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The persisted shape of a cell
///
/// `raw_value` and `computed_value` serialize as `null` when empty. `formula` and a
/// meaningful `raw_value` are mutually exclusive; when both arrive the formula wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: String,
    pub sheet_id: SheetId,
    pub row: u32,
    pub col: u16,
    #[serde(default, with = "nullable_value")]
    pub raw_value: CellValue,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default, with = "nullable_value")]
    pub computed_value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<CellFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<CellMerge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CellRecord {
    /// Snapshot a cell
    pub fn from_cell(cell: &Cell) -> Self {
        Self {
            id: cell.id.clone(),
            sheet_id: cell.sheet_id.clone(),
            row: cell.row,
            col: cell.col,
            raw_value: cell.raw_value.clone(),
            formula: cell.formula.clone(),
            computed_value: cell.computed_value.clone(),
            format: cell.format.clone(),
            merge: cell.merge,
            note: cell.note.clone(),
            created_at: cell.created_at,
            updated_at: cell.updated_at,
        }
    }

    /// A record for a cell that no longer holds anything
    pub fn cleared(key: &CellKey) -> Self {
        Self::from_cell(&Cell::new(key))
    }

    /// The key of the cell this record describes
    pub fn key(&self) -> CellKey {
        CellKey::new(self.sheet_id.clone(), self.row, self.col)
    }

    /// Check the record addresses a cell inside the sheet bounds
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.row >= MAX_ROWS || self.col >= MAX_COLS {
            return Err(StorageError::InvalidRecord(format!(
                "cell ({}, {}) of sheet {} is out of bounds",
                self.row, self.col, self.sheet_id
            )));
        }
        Ok(())
    }

    /// Convert into an in-memory cell, restoring the formula/raw invariant
    pub fn into_cell(self) -> Cell {
        let (raw_value, computed_value) = match &self.formula {
            Some(_) => (CellValue::Empty, self.computed_value),
            None => (self.raw_value.clone(), self.raw_value),
        };

        Cell {
            id: self.id,
            sheet_id: self.sheet_id,
            row: self.row,
            col: self.col,
            raw_value,
            formula: self.formula,
            computed_value,
            format: self.format,
            merge: self.merge,
            note: self.note,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Encode as JSON
    pub fn to_json(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        Ok(serde_json::from_str(json)?)
    }
}

mod nullable_value {
    use gridcalc_core::CellValue;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &CellValue, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_empty() {
            serializer.serialize_none()
        } else {
            value.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CellValue, D::Error> {
        Ok(Option::<CellValue>::deserialize(deserializer)?.unwrap_or_default())
    }
}

/// Durable cell storage
///
/// Saves must be idempotent: resending the same records is safe.
#[async_trait]
pub trait CellStorage: Send + Sync {
    /// Fetch every stored cell of `sheet` inside `rect`
    async fn load_cells(&self, sheet: &SheetId, rect: CellRect)
        -> Result<Vec<CellRecord>, StorageError>;

    /// Upsert a batch of records
    async fn save_cells(&self, records: &[CellRecord]) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    cells: BTreeMap<CellKey, CellRecord>,
    loads: Vec<(SheetId, CellRect)>,
    saves: usize,
    failing_loads: usize,
    failing_saves: usize,
}

/// In-memory [`CellStorage`] with call counters and failure injection
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-populated with records
    pub fn with_records(records: impl IntoIterator<Item = CellRecord>) -> Self {
        let storage = Self::new();
        for record in records {
            storage.insert(record);
        }
        storage
    }

    /// Store a record directly
    pub fn insert(&self, record: CellRecord) {
        self.state.lock().cells.insert(record.key(), record);
    }

    /// Get a stored record
    pub fn get(&self, key: &CellKey) -> Option<CellRecord> {
        self.state.lock().cells.get(key).cloned()
    }

    /// Number of stored records
    pub fn record_count(&self) -> usize {
        self.state.lock().cells.len()
    }

    /// Number of `load_cells` calls so far (failed ones included)
    pub fn load_count(&self) -> usize {
        self.state.lock().loads.len()
    }

    /// Rectangles requested so far, in call order
    pub fn load_requests(&self) -> Vec<(SheetId, CellRect)> {
        self.state.lock().loads.clone()
    }

    /// Number of successful `save_cells` calls
    pub fn save_count(&self) -> usize {
        self.state.lock().saves
    }

    /// Make the next `n` loads fail
    pub fn fail_next_loads(&self, n: usize) {
        self.state.lock().failing_loads = n;
    }

    /// Make the next `n` saves fail
    pub fn fail_next_saves(&self, n: usize) {
        self.state.lock().failing_saves = n;
    }
}

#[async_trait]
impl CellStorage for MemoryStorage {
    async fn load_cells(
        &self,
        sheet: &SheetId,
        rect: CellRect,
    ) -> Result<Vec<CellRecord>, StorageError> {
        let mut state = self.state.lock();
        state.loads.push((sheet.clone(), rect));

        if state.failing_loads > 0 {
            state.failing_loads -= 1;
            return Err(StorageError::Unavailable(format!("injected load failure for {}", rect)));
        }

        let start = CellKey::new(sheet.clone(), rect.row_start, 0);
        let end = CellKey::new(sheet.clone(), rect.row_end, u16::MAX);
        Ok(state
            .cells
            .range(start..=end)
            .filter(|(key, _)| rect.contains_cell(key.row, key.col))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn save_cells(&self, records: &[CellRecord]) -> Result<(), StorageError> {
        let mut state = self.state.lock();

        if state.failing_saves > 0 {
            state.failing_saves -= 1;
            return Err(StorageError::Unavailable("injected save failure".into()));
        }

        for record in records {
            record.validate()?;
        }
        for record in records {
            state.cells.insert(record.key(), record.clone());
        }
        state.saves += 1;
        Ok(())
    }
}
