//! # gridcalc-core
//!
//! Core data structures for the gridcalc spreadsheet engine.
//!
//! This crate provides the fundamental types used throughout gridcalc:
//! - [`CellValue`] / [`CellError`] - cell values and formula error tags
//! - [`CellAddress`] and [`CellRange`] - A1 references, plus the column-letter codec
//! - [`SheetId`] and [`CellKey`] - canonical cell identity
//! - [`Cell`], [`CellUpdate`] and [`CellStore`] - cell records and sparse storage
//! - [`CellRect`] - row/column rectangles for viewports and loaded ranges
//!
//! ## Example
//!
//! ```rust
//! use gridcalc_core::{CellStore, CellUpdate, CellValue, SheetId, parse_reference};
//!
//! let mut store = CellStore::new(SheetId::new("s1"));
//! let b2 = parse_reference("B2").unwrap();
//! store.set(b2.row, b2.col, CellUpdate::new().raw_value(42));
//!
//! assert_eq!(store.get(1, 1).unwrap().computed_value, CellValue::Number(42.0));
//! ```

pub mod cell;
pub mod error;
pub mod rect;

// Re-exports for convenience
pub use cell::{
    cell_address_to_ref, column_index_to_letter, date_to_serial, letter_to_column_index,
    parse_range_reference, parse_reference, Cell, CellAddress, CellError, CellFormat, CellKey,
    CellMerge, CellRange, CellStore, CellUpdate, CellValue, SharedString, SheetId,
};
pub use error::{Error, Result};
pub use rect::CellRect;

/// Maximum number of rows in a sheet (Excel limit)
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns in a sheet (Excel limit)
pub const MAX_COLS: u16 = 16_384;
