//! Cell-related types and utilities
//!
//! This module contains:
//! - [`CellValue`] and [`CellError`] - scalar values and error tags
//! - [`CellAddress`] / [`CellRange`] - A1 references and the column-letter codec
//! - [`SheetId`] / [`CellKey`] - canonical cell identity
//! - [`Cell`] / [`CellUpdate`] - cell records and partial updates
//! - [`CellStore`] - sparse per-sheet storage

mod address;
mod key;
mod record;
mod storage;
mod value;

pub use address::{
    cell_address_to_ref, column_index_to_letter, letter_to_column_index, parse_range_reference,
    parse_reference, CellAddress, CellRange, CellRangeIterator,
};
pub use key::{CellKey, SheetId};
pub use record::{Cell, CellFormat, CellMerge, CellUpdate};
pub use storage::CellStore;
pub use value::{date_to_serial, CellError, CellValue, SharedString};
