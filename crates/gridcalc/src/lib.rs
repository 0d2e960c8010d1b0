//! # gridcalc
//!
//! An incremental spreadsheet calculation engine for interactive grids.
//!
//! gridcalc keeps the cells of the visible part of a spreadsheet in memory,
//! recalculates only what an edit affects, fetches more cells as the user
//! scrolls, and writes edits back to storage in debounced batches.
//!
//! ## Features
//!
//! - Sparse per-sheet cell stores with A1 reference parsing
//! - Formula evaluation behind a pluggable [`FormulaEvaluator`]
//! - Dirty-cell recalculation in dependency order, coalesced per batch of edits
//! - Viewport-driven lazy loading with merged loaded ranges
//! - Write-behind persistence through an async [`CellStorage`]
//!
//! ## Example
//!
//! ```rust
//! use gridcalc::prelude::*;
//!
//! let mut engine = Engine::new();
//! engine.add_sheet("s1", "Sheet1").unwrap();
//!
//! let a1 = CellKey::new("s1", 0, 0);
//! let b1 = CellKey::new("s1", 0, 1);
//! engine.update_cell_value(&a1, "1").unwrap();
//! engine.update_cell_value(&b1, "=A1/0").unwrap();
//!
//! assert_eq!(engine.get_cell_value(&b1), CellValue::Error(CellError::Div0));
//! assert_eq!(engine.get_display_text(&b1), "#DIV/0!");
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod loader;
pub mod persistence;
pub mod prelude;
pub mod scheduler;
pub mod storage;
pub mod tasks;

pub use config::{EngineConfig, LoaderConfig};
pub use engine::{Engine, SheetInfo};
pub use error::{EngineError, Result, StorageError};
pub use input::{normalize_update, parse_input, parse_literal};
pub use loader::{merge_ranges, LoadRequest, ViewportLoader};
pub use persistence::{SaveBatch, SaveQueue};
pub use scheduler::{RecalcPlan, RecalcScheduler, RecalcStats};
pub use storage::{CellRecord, CellStorage, MemoryStorage};
pub use tasks::{flush_pending_saves, load_visible, run_write_behind};

// Re-export core types
pub use gridcalc_core::{
    cell_address_to_ref, column_index_to_letter, letter_to_column_index, parse_range_reference,
    parse_reference, Cell, CellAddress, CellError, CellFormat, CellKey, CellMerge, CellRange,
    CellRect, CellStore, CellUpdate, CellValue, SheetId, MAX_COLS, MAX_ROWS,
};

// Re-export formula types
pub use gridcalc_formula::{
    parse_formula, validate_formula, CellInput, DependencyGraph, EvaluationReport, FormulaError,
    FormulaEvaluator, FormulaExpr, NativeEvaluator, Precedent, SheetRange,
};
