//! Sparse cell store
//!
//! One store per sheet. Only cells that were ever written exist; everything else
//! reads as empty.

use std::collections::BTreeMap;

use super::key::{CellKey, SheetId};
use super::record::{Cell, CellUpdate};
use crate::rect::CellRect;

/// Sparse row-based storage for the cells of one sheet
///
/// Structure: `BTreeMap<row_index, BTreeMap<col_index, Cell>>`, so iteration is
/// row-major and range scans only touch populated rows.
///
/// The store is a plain map: writing never triggers recalculation.
#[derive(Debug, Clone)]
pub struct CellStore {
    sheet: SheetId,
    rows: BTreeMap<u32, BTreeMap<u16, Cell>>,
}

impl CellStore {
    /// Create a new empty store for a sheet
    pub fn new(sheet: SheetId) -> Self {
        Self {
            sheet,
            rows: BTreeMap::new(),
        }
    }

    /// The sheet this store belongs to
    pub fn sheet_id(&self) -> &SheetId {
        &self.sheet
    }

    /// Get a cell
    pub fn get(&self, row: u32, col: u16) -> Option<&Cell> {
        self.rows.get(&row).and_then(|r| r.get(&col))
    }

    /// Get a cell by key; keys of other sheets never match
    pub fn get_key(&self, key: &CellKey) -> Option<&Cell> {
        if key.sheet != self.sheet {
            return None;
        }
        self.get(key.row, key.col)
    }

    /// Apply a partial update, creating the cell on first write
    ///
    /// Fields absent from `update` are preserved; `updated_at` is stamped.
    pub fn set(&mut self, row: u32, col: u16, update: CellUpdate) -> &Cell {
        let sheet = &self.sheet;
        let cell = self
            .rows
            .entry(row)
            .or_default()
            .entry(col)
            .or_insert_with(|| Cell::new(&CellKey::new(sheet.clone(), row, col)));
        cell.apply(update);
        cell
    }

    /// Insert a full record, replacing whatever was there
    ///
    /// The record is re-homed onto this sheet and position.
    pub fn insert(&mut self, row: u32, col: u16, mut cell: Cell) -> Option<Cell> {
        cell.sheet_id = self.sheet.clone();
        cell.row = row;
        cell.col = col;
        self.rows.entry(row).or_default().insert(col, cell)
    }

    /// Logically clear a cell
    ///
    /// The record stays in place with value and formula nulled, so its id,
    /// styling and timestamps survive. Returns whether the cell had content.
    pub fn delete(&mut self, row: u32, col: u16) -> bool {
        match self.rows.get_mut(&row).and_then(|r| r.get_mut(&col)) {
            Some(cell) => {
                let had_content = !cell.has_no_content();
                cell.clear_content();
                had_content
            }
            None => false,
        }
    }

    /// Physically remove a cell
    pub fn remove(&mut self, row: u32, col: u16) -> Option<Cell> {
        let result = self.rows.get_mut(&row).and_then(|r| r.remove(&col));

        if self.rows.get(&row).is_some_and(BTreeMap::is_empty) {
            self.rows.remove(&row);
        }

        result
    }

    /// Drop every logically empty cell, returning how many were dropped
    pub fn compact(&mut self) -> usize {
        let mut dropped = 0;
        self.rows.retain(|_, cols| {
            let before = cols.len();
            cols.retain(|_, cell| !cell.is_logically_empty());
            dropped += before - cols.len();
            !cols.is_empty()
        });
        dropped
    }

    /// Remove all cells
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Get the number of stored cells (including logically empty ones)
    pub fn cell_count(&self) -> usize {
        self.rows.values().map(|r| r.len()).sum()
    }

    /// Check if the store holds no cells
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Bounds of stored cells, or `None` if empty
    pub fn used_bounds(&self) -> Option<CellRect> {
        let min_row = *self.rows.keys().next()?;
        let max_row = *self.rows.keys().next_back()?;

        let mut min_col = u16::MAX;
        let mut max_col = 0u16;

        for cols in self.rows.values() {
            if let Some(&col) = cols.keys().next() {
                min_col = min_col.min(col);
            }
            if let Some(&col) = cols.keys().next_back() {
                max_col = max_col.max(col);
            }
        }

        Some(CellRect::new(min_row, max_row, min_col, max_col))
    }

    /// Iterate over all cells in row order
    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.rows.values().flat_map(|cols| cols.values())
    }

    /// Iterate over cells in a specific row
    pub fn iter_row(&self, row: u32) -> impl Iterator<Item = &Cell> {
        self.rows.get(&row).into_iter().flat_map(|cols| cols.values())
    }

    /// Iterate over the stored cells inside a rectangle, row-major
    pub fn iter_rect(&self, rect: CellRect) -> impl Iterator<Item = &Cell> {
        self.rows
            .range(rect.row_start..=rect.row_end)
            .flat_map(move |(_, cols)| cols.range(rect.col_start..=rect.col_end).map(|(_, c)| c))
    }

    /// Iterate over cells that hold a formula
    pub fn formula_cells(&self) -> impl Iterator<Item = &Cell> {
        self.iter().filter(|c| c.is_formula())
    }
}
