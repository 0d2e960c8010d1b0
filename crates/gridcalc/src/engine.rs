//! The calculation engine
//!
//! An [`Engine`] owns one cell store per sheet, a dependency graph mirrored from
//! the formula evaluator, the recalculation scheduler, the viewport loader and the
//! write-behind save queue. Every mutating call is a synchronous batch: when the
//! outermost one returns, a scheduled recalculation has already run, so the next
//! read sees fresh values.
//!
//! # Example
//!
//! ```rust
//! use gridcalc::prelude::*;
//!
//! let mut engine = Engine::new();
//! engine.add_sheet("s1", "Sheet1").unwrap();
//!
//! let a1 = CellKey::new("s1", 0, 0);
//! let b1 = CellKey::new("s1", 0, 1);
//! engine.update_cell_value(&a1, "5").unwrap();
//! engine.update_cell_value(&b1, "=A1*2").unwrap();
//! assert_eq!(engine.get_cell_value(&b1), CellValue::Number(10.0));
//!
//! engine.update_cell_value(&a1, "7").unwrap();
//! assert_eq!(engine.get_display_text(&b1), "14");
//! ```

use crate::config::EngineConfig;
use crate::error::{Result, StorageError};
use crate::input::{normalize_update, parse_input};
use crate::loader::{LoadRequest, ViewportLoader};
use crate::persistence::{SaveBatch, SaveQueue};
use crate::scheduler::{RecalcPlan, RecalcScheduler, RecalcStats};
use crate::storage::CellRecord;
use ahash::{AHashMap, AHashSet};
use gridcalc_core::{
    Cell, CellFormat, CellKey, CellRect, CellStore, CellUpdate, CellValue, Error, SheetId,
    MAX_COLS, MAX_ROWS,
};
use gridcalc_formula::{CellInput, DependencyGraph, FormulaEvaluator, NativeEvaluator, Precedent};
use tokio::time::Instant;

/// A registered sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInfo {
    pub id: SheetId,
    /// Name formulas use to reference the sheet
    pub name: String,
}

/// Spreadsheet calculation engine
#[derive(Debug)]
pub struct Engine<E = NativeEvaluator> {
    config: EngineConfig,
    evaluator: E,
    sheets: Vec<SheetInfo>,
    stores: AHashMap<SheetId, CellStore>,
    active: Option<SheetId>,
    /// Mirror of the evaluator's precedent sets
    graph: DependencyGraph,
    volatile: AHashSet<CellKey>,
    scheduler: RecalcScheduler,
    batch_depth: u32,
    last_flush: Option<RecalcStats>,
    loader: ViewportLoader,
    saves: SaveQueue,
    changes: AHashSet<CellKey>,
    version: u64,
}

impl Engine<NativeEvaluator> {
    /// Create an engine with the built-in evaluator and default options
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with the built-in evaluator
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_evaluator(NativeEvaluator::new(), config)
    }
}

impl Default for Engine<NativeEvaluator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: FormulaEvaluator> Engine<E> {
    /// Create an engine on top of any formula evaluator
    pub fn with_evaluator(evaluator: E, config: EngineConfig) -> Self {
        Self {
            loader: ViewportLoader::new(config.loader.clone()),
            saves: SaveQueue::new(config.save_debounce),
            config,
            evaluator,
            sheets: Vec::new(),
            stores: AHashMap::new(),
            active: None,
            graph: DependencyGraph::new(),
            volatile: AHashSet::new(),
            scheduler: RecalcScheduler::new(),
            batch_depth: 0,
            last_flush: None,
            changes: AHashSet::new(),
            version: 0,
        }
    }

    /// Engine options
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The formula evaluator
    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    // === Sheets ===

    /// Register a sheet
    ///
    /// The first sheet becomes the active one. Formulas that referenced the name
    /// before it existed are recalculated.
    pub fn add_sheet(&mut self, id: impl Into<SheetId>, name: impl Into<String>) -> Result<()> {
        let id = id.into();
        let name = name.into();

        if self.stores.contains_key(&id) {
            return Err(Error::DuplicateSheet(id.to_string()).into());
        }
        if self.sheet_by_name(&name).is_some() {
            return Err(Error::DuplicateSheet(name).into());
        }

        tracing::debug!(sheet = %id, name = %name, "sheet added");
        self.batch(|engine| {
            engine.stores.insert(id.clone(), CellStore::new(id.clone()));
            let rebound = engine.evaluator.add_sheet(id.clone(), &name);
            engine.sheets.push(SheetInfo {
                id: id.clone(),
                name,
            });
            for key in rebound {
                engine.refresh_dependencies(&key);
                engine.scheduler.mark_dirty(key);
            }
            if engine.active.is_none() {
                engine.active = Some(id);
            }
        });
        Ok(())
    }

    /// Drop a sheet with all its cells, loaded ranges and pending saves
    pub fn remove_sheet(&mut self, id: &SheetId) -> Result<()> {
        self.check_sheet(id)?;

        tracing::debug!(sheet = %id, "sheet removed");
        self.batch(|engine| {
            let readers = engine.evaluator.remove_sheet(id);

            engine.stores.remove(id);
            engine.sheets.retain(|s| &s.id != id);
            engine.graph.remove_sheet(id);
            engine.volatile.retain(|k| &k.sheet != id);
            engine.loader.clear_sheet(id);
            engine.saves.discard_sheet(id);
            engine.changes.retain(|k| &k.sheet != id);

            if engine.active.as_ref() == Some(id) {
                engine.active = engine.sheets.first().map(|s| s.id.clone());
            }

            for key in readers {
                engine.refresh_dependencies(&key);
                engine.scheduler.mark_dirty(key);
            }
        });
        Ok(())
    }

    /// Registered sheets in creation order
    pub fn sheets(&self) -> &[SheetInfo] {
        &self.sheets
    }

    /// Name of a sheet
    pub fn sheet_name(&self, id: &SheetId) -> Option<&str> {
        self.sheets
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.name.as_str())
    }

    /// Find a sheet by name (case-insensitive)
    pub fn sheet_by_name(&self, name: &str) -> Option<&SheetId> {
        self.sheets
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| &s.id)
    }

    /// The sheet currently shown
    pub fn active_sheet(&self) -> Option<&SheetId> {
        self.active.as_ref()
    }

    /// Switch the shown sheet
    ///
    /// The loaded ranges of the sheet being left are forgotten, so coming back
    /// refetches it.
    pub fn set_active_sheet(&mut self, id: &SheetId) -> Result<()> {
        self.check_sheet(id)?;
        if self.active.as_ref() == Some(id) {
            return Ok(());
        }
        if let Some(previous) = self.active.replace(id.clone()) {
            self.loader.clear_sheet(&previous);
        }
        Ok(())
    }

    /// The cell store of a sheet
    pub fn store(&self, id: &SheetId) -> Option<&CellStore> {
        self.stores.get(id)
    }

    // === Reads ===

    /// Get a cell record
    pub fn get_cell(&self, key: &CellKey) -> Option<&Cell> {
        self.stores.get(&key.sheet)?.get_key(key)
    }

    /// Computed value of a cell (`Empty` when absent)
    pub fn get_cell_value(&self, key: &CellKey) -> CellValue {
        self.get_cell(key)
            .map(|c| c.computed_value.clone())
            .unwrap_or_default()
    }

    /// Text to render for a cell; error values render as their tag
    pub fn get_display_text(&self, key: &CellKey) -> String {
        self.get_cell(key)
            .map(|c| c.computed_value.to_string())
            .unwrap_or_default()
    }

    /// Format of a cell
    pub fn get_cell_format(&self, key: &CellKey) -> Option<&CellFormat> {
        self.get_cell(key)?.format.as_ref()
    }

    /// Formula text of a cell
    pub fn get_cell_formula(&self, key: &CellKey) -> Option<&str> {
        self.get_cell(key)?.formula.as_deref()
    }

    /// Cells a formula reads, in key order
    ///
    /// Large ranges contribute only their cells with content.
    pub fn precedents(&self, key: &CellKey) -> Vec<CellKey> {
        self.evaluator.get_precedents(key)
    }

    /// References of a formula with ranges kept whole
    pub fn references(&self, key: &CellKey) -> Vec<Precedent> {
        self.graph.precedents_of(key)
    }

    /// Formula cells that read a cell, directly or through a range, in key order
    pub fn dependents(&self, key: &CellKey) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self.graph.get_dependents(key).into_iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Counter bumped on every visible change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Keys changed since the last drain, in key order
    pub fn drain_changes(&mut self) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self.changes.drain().collect();
        keys.sort();
        keys
    }

    // === Writes ===

    /// Apply text typed by the user
    ///
    /// See [`parse_input`](crate::parse_input) for how the text is interpreted.
    pub fn update_cell_value(&mut self, key: &CellKey, input: &str) -> Result<()> {
        self.update_cell(key, parse_input(input))
    }

    /// Apply a partial update (value, formula, format, merge or note)
    ///
    /// Formula text without a leading `=` is stored as a literal.
    pub fn update_cell(&mut self, key: &CellKey, update: CellUpdate) -> Result<()> {
        self.check_key(key)?;
        let update = normalize_update(update);
        self.batch(|engine| engine.apply_update(key, update));
        Ok(())
    }

    /// Logically clear a cell, keeping its styling
    pub fn clear_cell(&mut self, key: &CellKey) -> Result<()> {
        self.check_key(key)?;
        self.batch(|engine| {
            let Some(store) = engine.stores.get_mut(&key.sheet) else {
                return;
            };
            if store.get(key.row, key.col).is_none() {
                return;
            }
            store.delete(key.row, key.col);

            engine.sync_input(key, CellInput::Empty);
            engine.saves.mark(key.clone(), Instant::now());
            engine.record_change(key);
        });
        Ok(())
    }

    /// Run several writes as one batch with a single recalculation at the end
    ///
    /// Batches nest; only the outermost one flushes.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.batch_depth += 1;
        let result = f(self);
        self.batch_depth -= 1;

        if self.batch_depth == 0 && self.scheduler.is_scheduled() {
            self.flush();
        }
        result
    }

    /// Mark a cell stale
    pub fn mark_dirty(&mut self, key: CellKey) {
        if self.scheduler.mark_dirty(key) {
            tracing::trace!(pending = self.scheduler.pending(), "flush scheduled");
        }
    }

    /// Check whether dirty cells are waiting for a flush
    pub fn is_flush_scheduled(&self) -> bool {
        self.scheduler.is_scheduled()
    }

    /// Statistics of the most recent flush
    pub fn last_flush(&self) -> Option<&RecalcStats> {
        self.last_flush.as_ref()
    }

    /// Recompute every dirty cell and its transitive dependents now
    ///
    /// Does nothing while a flush is already running.
    pub fn flush(&mut self) -> RecalcStats {
        let Some(mut dirty) = self.scheduler.begin_flush() else {
            return RecalcStats::default();
        };

        let mut stats = RecalcStats::default();
        loop {
            let pass = self.run_pass(&dirty);
            stats.absorb(pass);

            if stats.passes >= self.config.max_flush_passes {
                if self.scheduler.pending() > 0 {
                    tracing::warn!(
                        passes = stats.passes,
                        pending = self.scheduler.pending(),
                        "flush pass limit reached"
                    );
                }
                break;
            }
            match self.scheduler.next_pass() {
                Some(next) => dirty = next,
                None => break,
            }
        }
        self.scheduler.end_flush();

        tracing::debug!(
            dirty = stats.dirty,
            affected = stats.affected,
            evaluated = stats.evaluated,
            errors = stats.errors,
            cyclic = stats.cyclic.len(),
            passes = stats.passes,
            "recalculated"
        );
        self.last_flush = Some(stats.clone());
        stats
    }

    /// Recompute every formula cell of every sheet
    pub fn recalculate_all(&mut self) -> RecalcStats {
        let keys: Vec<CellKey> = self
            .stores
            .values()
            .flat_map(|store| store.formula_cells().map(Cell::key))
            .collect();
        for key in keys {
            self.scheduler.mark_dirty(key);
        }
        self.flush()
    }

    /// Recompute cells using volatile functions (TODAY, NOW, RAND) and their dependents
    pub fn recalculate_volatile(&mut self) -> RecalcStats {
        let keys: Vec<CellKey> = self.volatile.iter().cloned().collect();
        for key in keys {
            self.scheduler.mark_dirty(key);
        }
        self.flush()
    }

    /// Drop logically empty cells from every store
    pub fn compact(&mut self) -> usize {
        let dropped: usize = self.stores.values_mut().map(CellStore::compact).sum();
        tracing::debug!(dropped, "stores compacted");
        dropped
    }

    // === Loading ===

    /// True unless a single loaded range of the sheet contains `rect`
    pub fn needs_load(&self, sheet: &SheetId, rect: &CellRect) -> bool {
        self.loader.needs_load(sheet, rect)
    }

    /// Loaded ranges of a sheet
    pub fn loaded_ranges(&self, sheet: &SheetId) -> &[CellRect] {
        self.loader.loaded_ranges(sheet)
    }

    /// Check whether a range fetch is outstanding
    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    /// Report a newly visible area; returns the fetch to run, if any
    pub fn on_range_visible(&mut self, sheet: &SheetId, rect: CellRect) -> Result<Option<LoadRequest>> {
        self.check_sheet(sheet)?;
        Ok(self.loader.request_load(sheet, rect))
    }

    /// Merge the outcome of a fetch
    ///
    /// Fetched cells never overwrite cells with unsaved local edits. On failure
    /// nothing is committed and the error is returned. On success the follow-up
    /// fetch for the latest viewport is returned, if one is needed.
    pub fn complete_load(
        &mut self,
        request: LoadRequest,
        result: std::result::Result<Vec<CellRecord>, StorageError>,
    ) -> Result<Option<LoadRequest>> {
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(sheet = %request.sheet, rect = %request.rect, error = %e, "range load failed");
                self.loader.complete(&request, false);
                return Err(e.into());
            }
        };

        if !self.stores.contains_key(&request.sheet) {
            // Sheet removed while the fetch was outstanding
            self.loader.complete(&request, false);
            return Ok(None);
        }

        let fetched = records.len();
        let merged = self.batch(|engine| engine.merge_records(&request, records));
        tracing::debug!(sheet = %request.sheet, rect = %request.rect, fetched, merged, "range merged");

        Ok(self.loader.complete(&request, true))
    }

    // === Saving ===

    /// Number of cells waiting to be saved
    pub fn pending_saves(&self) -> usize {
        self.saves.len()
    }

    /// When the pending saves become due
    pub fn next_save_deadline(&self) -> Option<Instant> {
        self.saves.next_deadline()
    }

    /// Check whether the debounce window has passed
    pub fn is_save_due(&self, now: Instant) -> bool {
        self.saves.is_due(now)
    }

    /// Snapshot every pending cell into a batch for storage
    pub fn take_save_batch(&mut self) -> Option<SaveBatch> {
        let (id, keys) = self.saves.take()?;
        let records = keys
            .iter()
            .map(|key| match self.get_cell(key) {
                Some(cell) => CellRecord::from_cell(cell),
                None => CellRecord::cleared(key),
            })
            .collect();
        Some(SaveQueue::batch(id, records))
    }

    /// Settle a save batch; failed cells go back to the pending set
    pub fn complete_save(
        &mut self,
        batch: SaveBatch,
        result: std::result::Result<(), StorageError>,
    ) -> Result<()> {
        let now = Instant::now();
        match result {
            Ok(()) => {
                self.saves.complete(&batch, true, now);
                tracing::debug!(records = batch.len(), "cells saved");
                Ok(())
            }
            Err(e) => {
                let requeued = self.saves.complete(&batch, false, now);
                tracing::warn!(records = batch.len(), requeued, error = %e, "save failed");
                Err(e.into())
            }
        }
    }

    // === Internals ===

    fn check_sheet(&self, id: &SheetId) -> Result<()> {
        if self.stores.contains_key(id) {
            Ok(())
        } else {
            Err(Error::SheetNotFound(id.to_string()).into())
        }
    }

    fn check_key(&self, key: &CellKey) -> Result<()> {
        self.check_sheet(&key.sheet)?;
        if key.row >= MAX_ROWS {
            return Err(Error::RowOutOfBounds(key.row, MAX_ROWS - 1).into());
        }
        if key.col >= MAX_COLS {
            return Err(Error::ColumnOutOfBounds(key.col as u32, MAX_COLS - 1).into());
        }
        Ok(())
    }

    fn apply_update(&mut self, key: &CellKey, update: CellUpdate) {
        let content = update.touches_content();
        let Some(store) = self.stores.get_mut(&key.sheet) else {
            return;
        };

        let cell = store.set(key.row, key.col, update);
        let input = content.then(|| CellInput::from_parts(&cell.raw_value, cell.formula.as_deref()));

        if let Some(input) = input {
            self.sync_input(key, input);
        }
        self.saves.mark(key.clone(), Instant::now());
        self.record_change(key);
    }

    fn merge_records(&mut self, request: &LoadRequest, records: Vec<CellRecord>) -> usize {
        let mut merged = 0;
        for record in records {
            if record.sheet_id != request.sheet
                || !request.rect.contains_cell(record.row, record.col)
                || record.validate().is_err()
            {
                tracing::trace!(sheet = %record.sheet_id, row = record.row, col = record.col, "fetched record skipped");
                continue;
            }

            let key = record.key();
            if self.saves.is_unsaved(&key) {
                continue;
            }
            let Some(store) = self.stores.get_mut(&key.sheet) else {
                continue;
            };

            let cell = record.into_cell();
            let input = CellInput::from_parts(&cell.raw_value, cell.formula.as_deref());
            store.insert(key.row, key.col, cell);

            self.sync_input(&key, input);
            self.record_change(&key);
            merged += 1;
        }
        merged
    }

    /// Push a cell's content to the evaluator and mark it dirty
    fn sync_input(&mut self, key: &CellKey, input: CellInput) {
        self.evaluator.set_cell_value(key, input);
        self.refresh_dependencies(key);

        if self.evaluator.is_volatile(key) {
            self.volatile.insert(key.clone());
        } else {
            self.volatile.remove(key);
        }
        self.mark_dirty(key.clone());
    }

    fn refresh_dependencies(&mut self, key: &CellKey) {
        let references = self.evaluator.get_references(key);
        self.graph.set_dependencies(key, references);
    }

    fn run_pass(&mut self, dirty: &AHashSet<CellKey>) -> RecalcStats {
        let plan = RecalcPlan::build(&self.graph, dirty);
        let report = self.evaluator.recalculate(&plan.order);

        let mut errors = 0;
        let mut changed = Vec::new();
        for key in &plan.order {
            let Some(store) = self.stores.get_mut(&key.sheet) else {
                continue;
            };
            let Some(cell) = store.get(key.row, key.col) else {
                continue;
            };
            if !cell.is_formula() {
                continue;
            }

            let value = self.evaluator.get_cell_value(key);
            if value.is_error() {
                errors += 1;
            }
            if cell.computed_value != value {
                store.set(key.row, key.col, CellUpdate::new().computed_value(value));
                changed.push(key.clone());
            }
        }
        for key in &changed {
            self.record_change(key);
        }

        RecalcStats {
            dirty: plan.dirty,
            affected: plan.order.len(),
            evaluated: report.evaluated,
            errors,
            cyclic: report.cyclic,
            passes: 0,
        }
    }

    fn record_change(&mut self, key: &CellKey) {
        self.changes.insert(key.clone());
        self.version += 1;
    }
}
