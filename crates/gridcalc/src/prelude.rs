//! Prelude module - common imports for gridcalc users
//!
//! ```rust
//! use gridcalc::prelude::*;
//! ```

pub use crate::{
    // Cell types
    CellError,
    CellFormat,
    CellKey,
    CellRect,
    CellUpdate,
    CellValue,
    SheetId,

    // Storage
    CellRecord,
    CellStorage,
    MemoryStorage,

    // Engine
    Engine,
    EngineConfig,
    EngineError,
    FormulaEvaluator,
    LoaderConfig,
    RecalcStats,
    Result,

    // Async drivers
    flush_pending_saves,
    load_visible,
    run_write_behind,
};
