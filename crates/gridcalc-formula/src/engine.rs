//! Pluggable formula evaluation
//!
//! The recalculation scheduler only talks to a [`FormulaEvaluator`]. It hands the
//! evaluator cell inputs, asks it which cells a formula reads, tells it which
//! cells to recompute, and reads results back. [`NativeEvaluator`] is the
//! built-in implementation on top of this crate's parser and function registry.

use crate::ast::FormulaExpr;
use crate::dependency::{DependencyGraph, Precedent};
use crate::evaluator::{evaluate_to_cell_value, occupied_by_scan, EvaluationContext, ValueLookup};
use crate::functions::builtin_registry;
use crate::parser::{parse_formula, validate_formula};
use ahash::{AHashMap, AHashSet};
use gridcalc_core::{CellError, CellKey, CellRect, CellValue, SheetId};

/// Ranges up to this many cells report every cell as a precedent; larger ones
/// report only the cells that hold content
const PRECEDENT_EXPANSION_LIMIT: u64 = 4096;

/// What a cell holds, as seen by the evaluator
#[derive(Debug, Clone, PartialEq)]
pub enum CellInput {
    /// No content
    Empty,
    /// A literal scalar, never evaluated
    Literal(CellValue),
    /// Formula text including the leading `=`
    Formula(String),
}

impl CellInput {
    /// Build the input for a cell's stored raw value and formula
    pub fn from_parts(raw_value: &CellValue, formula: Option<&str>) -> Self {
        match formula {
            Some(text) => CellInput::Formula(text.to_string()),
            None if raw_value.is_empty() => CellInput::Empty,
            None => CellInput::Literal(raw_value.clone()),
        }
    }
}

/// Outcome of a [`FormulaEvaluator::recalculate`] call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    /// Number of formula cells evaluated (cycle members included)
    pub evaluated: usize,
    /// Cells found on a reference cycle, in key order
    pub cyclic: Vec<CellKey>,
}

/// Formula evaluation capability
///
/// Any engine that understands spreadsheet formulas can sit behind this trait.
/// Evaluation never fails outward: a formula that cannot be computed yields an
/// error value.
pub trait FormulaEvaluator {
    /// Register a sheet under the name formulas use to reference it
    ///
    /// Returns formula cells whose references now resolve and need recomputing.
    fn add_sheet(&mut self, id: SheetId, name: &str) -> Vec<CellKey>;

    /// Drop a sheet and all its cells
    ///
    /// Returns formula cells on other sheets that referenced it.
    fn remove_sheet(&mut self, id: &SheetId) -> Vec<CellKey>;

    /// Replace the input of a cell
    ///
    /// A formula's value stays stale until it is recalculated.
    fn set_cell_value(&mut self, key: &CellKey, input: CellInput);

    /// Current value of a cell
    fn get_cell_value(&self, key: &CellKey) -> CellValue;

    /// Cells the formula in `key` reads, in key order
    fn get_precedents(&self, key: &CellKey) -> Vec<CellKey>;

    /// References of the formula in `key`, with ranges kept whole
    ///
    /// The scheduler mirrors these into its own graph. Evaluators that only know
    /// cell precedents can rely on the default.
    fn get_references(&self, key: &CellKey) -> Vec<Precedent> {
        self.get_precedents(key)
            .into_iter()
            .map(Precedent::Cell)
            .collect()
    }

    /// Formula cells that read `key`, in key order
    fn get_dependents(&self, key: &CellKey) -> Vec<CellKey>;

    /// Check whether text is a formula this evaluator accepts
    fn validate_formula(&self, text: &str) -> bool;

    /// Check whether the formula in `key` must be recomputed on every pass
    fn is_volatile(&self, key: &CellKey) -> bool;

    /// Recompute the given cells
    ///
    /// Non-formula keys are ignored. Cells on a reference cycle get `#REF!`.
    fn recalculate(&mut self, keys: &[CellKey]) -> EvaluationReport;
}

#[derive(Debug, Clone)]
enum EvalCell {
    Literal(CellValue),
    Formula(FormulaCell),
}

#[derive(Debug, Clone)]
struct FormulaCell {
    /// `None` when the text does not parse
    ast: Option<FormulaExpr>,
    value: CellValue,
    volatile: bool,
    /// References a sheet that is not registered
    unresolved: bool,
}

/// Built-in recursive-descent formula evaluator
#[derive(Debug, Default)]
pub struct NativeEvaluator {
    /// Uppercased sheet name → id
    names: AHashMap<String, SheetId>,
    /// Sheet id → name
    sheets: AHashMap<SheetId, String>,
    cells: AHashMap<CellKey, EvalCell>,
    graph: DependencyGraph,
}

impl NativeEvaluator {
    /// Create an evaluator with no sheets
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of a registered sheet
    pub fn sheet_name(&self, id: &SheetId) -> Option<&str> {
        self.sheets.get(id).map(String::as_str)
    }

    /// Number of formula cells
    pub fn formula_count(&self) -> usize {
        self.cells
            .values()
            .filter(|c| matches!(c, EvalCell::Formula(_)))
            .count()
    }

    /// Resolve references of a formula to precedents on concrete sheets
    ///
    /// Ranges stay whole. Returns `true` as the second element when some sheet
    /// qualifier did not resolve.
    fn collect_precedents(&self, key: &CellKey, ast: &FormulaExpr) -> (AHashSet<Precedent>, bool) {
        let mut precedents = AHashSet::new();
        let mut unresolved = false;

        ast.visit_references(&mut |sheet, range| {
            let sheet = match sheet {
                None => key.sheet.clone(),
                Some(name) => match self.resolve_sheet(name) {
                    Some(id) => id,
                    None => {
                        unresolved = true;
                        return;
                    }
                },
            };
            precedents.insert(Precedent::range(sheet, CellRect::from(range)));
        });

        (precedents, unresolved)
    }

    /// Re-derive the precedents of a formula cell, returning whether it still has
    /// unresolved references
    fn rebind(&mut self, key: &CellKey) -> bool {
        let Some(EvalCell::Formula(formula)) = self.cells.get(key) else {
            return false;
        };
        let Some(ast) = &formula.ast else {
            return false;
        };

        let (precedents, unresolved) = self.collect_precedents(key, ast);
        self.graph.set_dependencies(key, precedents);
        if let Some(EvalCell::Formula(formula)) = self.cells.get_mut(key) {
            formula.unresolved = unresolved;
        }
        unresolved
    }

    fn evaluate_cell(&self, key: &CellKey) -> Option<CellValue> {
        let EvalCell::Formula(formula) = self.cells.get(key)? else {
            return None;
        };

        let value = match &formula.ast {
            Some(ast) => {
                let ctx = EvaluationContext::new(self, key);
                evaluate_to_cell_value(ast, &ctx)
            }
            None => CellValue::Error(CellError::Generic),
        };
        tracing::trace!(cell = %key, value = %value, "evaluated");
        Some(value)
    }

    fn store_value(&mut self, key: &CellKey, value: CellValue) {
        if let Some(EvalCell::Formula(formula)) = self.cells.get_mut(key) {
            formula.value = value;
        }
    }

    fn evaluate_in_order(&mut self, order: &[CellKey]) -> usize {
        let mut evaluated = 0;
        for key in order {
            if let Some(value) = self.evaluate_cell(key) {
                self.store_value(key, value);
                evaluated += 1;
            }
        }
        evaluated
    }
}

impl ValueLookup for NativeEvaluator {
    fn resolve_sheet(&self, name: &str) -> Option<SheetId> {
        if let Some(id) = self.names.get(&name.to_uppercase()) {
            return Some(id.clone());
        }
        // Ids work as qualifiers too
        self.sheets
            .keys()
            .find(|id| id.as_str().eq_ignore_ascii_case(name))
            .cloned()
    }

    fn cell_value(&self, key: &CellKey) -> CellValue {
        self.get_cell_value(key)
    }

    fn occupied_cells(&self, sheet: &SheetId, rect: CellRect) -> Vec<(CellKey, CellValue)> {
        if rect.cell_count() <= self.cells.len() as u64 {
            return occupied_by_scan(self, sheet, rect);
        }
        let mut cells: Vec<(CellKey, CellValue)> = self
            .cells
            .keys()
            .filter(|k| &k.sheet == sheet && rect.contains_cell(k.row, k.col))
            .map(|k| (k.clone(), self.get_cell_value(k)))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        cells.sort_by(|(a, _), (b, _)| a.cmp(b));
        cells
    }
}

impl FormulaEvaluator for NativeEvaluator {
    fn add_sheet(&mut self, id: SheetId, name: &str) -> Vec<CellKey> {
        if let Some(old) = self.sheets.insert(id.clone(), name.to_string()) {
            self.names.remove(&old.to_uppercase());
        }
        self.names.insert(name.to_uppercase(), id);

        let mut pending: Vec<CellKey> = self
            .cells
            .iter()
            .filter_map(|(key, cell)| match cell {
                EvalCell::Formula(f) if f.unresolved => Some(key.clone()),
                _ => None,
            })
            .collect();
        pending.sort();

        let mut rebound = Vec::new();
        for key in pending {
            if !self.rebind(&key) {
                rebound.push(key);
            }
        }
        rebound
    }

    fn remove_sheet(&mut self, id: &SheetId) -> Vec<CellKey> {
        if let Some(name) = self.sheets.remove(id) {
            self.names.remove(&name.to_uppercase());
        }

        // Outside readers of the sheet, before its edges disappear
        let mut readers: Vec<CellKey> = self
            .cells
            .keys()
            .filter(|k| k.sheet != *id)
            .filter(|k| self.graph.reads_sheet(k, id))
            .cloned()
            .collect();
        readers.sort();

        self.cells.retain(|k, _| &k.sheet != id);
        self.graph.remove_sheet(id);

        for key in &readers {
            self.rebind(key);
        }
        readers
    }

    fn set_cell_value(&mut self, key: &CellKey, input: CellInput) {
        match input {
            CellInput::Empty => {
                self.cells.remove(key);
                self.graph.clear_precedents(key);
            }
            CellInput::Literal(value) => {
                self.cells.insert(key.clone(), EvalCell::Literal(value));
                self.graph.clear_precedents(key);
            }
            CellInput::Formula(text) => {
                let previous = match self.cells.get(key) {
                    Some(EvalCell::Formula(f)) => f.value.clone(),
                    _ => CellValue::Empty,
                };

                match parse_formula(&text) {
                    Ok(ast) => {
                        let registry = builtin_registry();
                        let volatile = ast.any_function(&|name| registry.is_volatile(name));
                        let (precedents, unresolved) = self.collect_precedents(key, &ast);
                        self.graph.set_dependencies(key, precedents);
                        self.cells.insert(
                            key.clone(),
                            EvalCell::Formula(FormulaCell {
                                ast: Some(ast),
                                value: previous,
                                volatile,
                                unresolved,
                            }),
                        );
                    }
                    Err(e) => {
                        tracing::debug!(cell = %key, error = %e, "formula does not parse");
                        self.graph.clear_precedents(key);
                        self.cells.insert(
                            key.clone(),
                            EvalCell::Formula(FormulaCell {
                                ast: None,
                                value: CellValue::Error(CellError::Generic),
                                volatile: false,
                                unresolved: false,
                            }),
                        );
                    }
                }
            }
        }
    }

    fn get_cell_value(&self, key: &CellKey) -> CellValue {
        match self.cells.get(key) {
            Some(EvalCell::Literal(value)) => value.clone(),
            Some(EvalCell::Formula(formula)) => formula.value.clone(),
            None => CellValue::Empty,
        }
    }

    fn get_precedents(&self, key: &CellKey) -> Vec<CellKey> {
        let mut precedents: AHashSet<CellKey> = self.graph.get_precedents(key).cloned().collect();
        for range in self.graph.get_range_precedents(key) {
            if range.rect.cell_count() <= PRECEDENT_EXPANSION_LIMIT {
                let rect = range.rect;
                for row in rect.row_start..=rect.row_end {
                    for col in rect.col_start..=rect.col_end {
                        precedents.insert(CellKey::new(range.sheet.clone(), row, col));
                    }
                }
            } else {
                precedents.extend(
                    self.occupied_cells(&range.sheet, range.rect)
                        .into_iter()
                        .map(|(k, _)| k),
                );
            }
        }
        let mut precedents: Vec<CellKey> = precedents.into_iter().collect();
        precedents.sort();
        precedents
    }

    fn get_references(&self, key: &CellKey) -> Vec<Precedent> {
        self.graph.precedents_of(key)
    }

    fn get_dependents(&self, key: &CellKey) -> Vec<CellKey> {
        let mut dependents: Vec<CellKey> =
            self.graph.get_dependents(key).into_iter().cloned().collect();
        dependents.sort();
        dependents
    }

    fn validate_formula(&self, text: &str) -> bool {
        validate_formula(text)
    }

    fn is_volatile(&self, key: &CellKey) -> bool {
        matches!(self.cells.get(key), Some(EvalCell::Formula(f)) if f.volatile)
    }

    fn recalculate(&mut self, keys: &[CellKey]) -> EvaluationReport {
        let formulas: AHashSet<CellKey> = keys
            .iter()
            .filter(|k| matches!(self.cells.get(*k), Some(EvalCell::Formula(_))))
            .cloned()
            .collect();

        let sorted = self.graph.topological_order(&formulas);
        let mut evaluated = self.evaluate_in_order(&sorted.order);

        if sorted.cyclic.is_empty() {
            return EvaluationReport {
                evaluated,
                cyclic: Vec::new(),
            };
        }

        // The residue holds cycle members plus cells downstream of a cycle
        let (cyclic, downstream): (Vec<CellKey>, Vec<CellKey>) = sorted
            .cyclic
            .into_iter()
            .partition(|k| self.graph.is_in_cycle(k));

        tracing::warn!(cells = cyclic.len(), "circular reference");
        for key in &cyclic {
            self.store_value(key, CellValue::Error(CellError::Ref));
        }
        evaluated += cyclic.len();

        let downstream: AHashSet<CellKey> = downstream.into_iter().collect();
        let rest = self.graph.topological_order(&downstream);
        evaluated += self.evaluate_in_order(&rest.order);

        EvaluationReport { evaluated, cyclic }
    }
}
