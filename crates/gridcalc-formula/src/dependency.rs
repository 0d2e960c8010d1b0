//! Dependency tracking for formula calculation

use ahash::{AHashMap, AHashSet};
use gridcalc_core::{CellKey, CellRect, SheetId};
use std::collections::VecDeque;

/// A rectangle of cells on one sheet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetRange {
    pub sheet: SheetId,
    pub rect: CellRect,
}

impl SheetRange {
    pub fn new(sheet: SheetId, rect: CellRect) -> Self {
        Self { sheet, rect }
    }

    /// Check whether a cell lies inside the range
    pub fn contains(&self, cell: &CellKey) -> bool {
        cell.sheet == self.sheet && self.rect.contains_cell(cell.row, cell.col)
    }
}

/// Something a formula reads
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Precedent {
    Cell(CellKey),
    Range(SheetRange),
}

impl Precedent {
    /// A range precedent, collapsed to a cell when it covers exactly one
    pub fn range(sheet: SheetId, rect: CellRect) -> Self {
        if rect.cell_count() == 1 {
            Precedent::Cell(CellKey::new(sheet, rect.row_start, rect.col_start))
        } else {
            Precedent::Range(SheetRange::new(sheet, rect))
        }
    }

    /// Sheet the precedent lives on
    pub fn sheet(&self) -> &SheetId {
        match self {
            Precedent::Cell(key) => &key.sheet,
            Precedent::Range(range) => &range.sheet,
        }
    }
}

impl From<CellKey> for Precedent {
    fn from(key: CellKey) -> Self {
        Precedent::Cell(key)
    }
}

impl From<SheetRange> for Precedent {
    fn from(range: SheetRange) -> Self {
        Precedent::range(range.sheet, range.rect)
    }
}

/// Dependency graph for formula cells
///
/// Tracks which cells depend on which other cells, enabling recalculation of just
/// the affected cells. Single-cell references are stored as cell edges in both
/// directions and kept symmetric: `B` is in `precedents(A)` exactly when `A` is in
/// `dependents(B)`.
///
/// Multi-cell ranges are stored once as a rectangle, never expanded. A per-sheet
/// range index maps each rectangle to the formula cells reading it, so a full
/// column reference costs one entry however many rows it spans. Dependents of a
/// cell are its cell edges plus the readers of every indexed range containing it.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Cell → Cells that depend on it (dependents)
    dependents: AHashMap<CellKey, AHashSet<CellKey>>,
    /// Cell → Cells it depends on (precedents)
    precedents: AHashMap<CellKey, AHashSet<CellKey>>,
    /// Formula cell → ranges it reads
    range_precedents: AHashMap<CellKey, AHashSet<SheetRange>>,
    /// Sheet → range rectangle → formula cells reading it
    range_index: AHashMap<SheetId, AHashMap<CellRect, AHashSet<CellKey>>>,
}

/// Result of ordering a set of cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologicalOrder {
    /// Cells in an order where precedents come before dependents
    pub order: Vec<CellKey>,
    /// Cells left with unresolved precedents: on a cycle or downstream of one
    pub cyclic: Vec<CellKey>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency: dependent depends on precedent
    pub fn add_dependency(&mut self, precedent: CellKey, dependent: CellKey) {
        self.dependents
            .entry(precedent.clone())
            .or_default()
            .insert(dependent.clone());
        self.precedents
            .entry(dependent)
            .or_default()
            .insert(precedent);
    }

    /// Add a dependency on every cell of a range, present or future
    pub fn add_range_dependency(&mut self, range: SheetRange, dependent: CellKey) {
        self.range_index
            .entry(range.sheet.clone())
            .or_default()
            .entry(range.rect)
            .or_default()
            .insert(dependent.clone());
        self.range_precedents
            .entry(dependent)
            .or_default()
            .insert(range);
    }

    /// Replace the full precedent set of a cell
    ///
    /// The cell is first unlinked from every old precedent, then linked to the new
    /// ones. Cells that depend on `cell` are untouched.
    pub fn set_dependencies<P: Into<Precedent>>(
        &mut self,
        cell: &CellKey,
        precedents: impl IntoIterator<Item = P>,
    ) {
        self.clear_precedents(cell);
        for precedent in precedents {
            match precedent.into() {
                Precedent::Cell(key) => self.add_dependency(key, cell.clone()),
                Precedent::Range(range) => self.add_range_dependency(range, cell.clone()),
            }
        }
    }

    /// Remove everything a cell depends on (it no longer holds a formula)
    pub fn clear_precedents(&mut self, cell: &CellKey) {
        if let Some(precedents) = self.precedents.remove(cell) {
            for precedent in precedents {
                if let Some(deps) = self.dependents.get_mut(&precedent) {
                    deps.remove(cell);
                    if deps.is_empty() {
                        self.dependents.remove(&precedent);
                    }
                }
            }
        }

        if let Some(ranges) = self.range_precedents.remove(cell) {
            for range in ranges {
                self.unindex_range(&range, cell);
            }
        }
    }

    fn unindex_range(&mut self, range: &SheetRange, reader: &CellKey) {
        let Some(index) = self.range_index.get_mut(&range.sheet) else {
            return;
        };
        if let Some(readers) = index.get_mut(&range.rect) {
            readers.remove(reader);
            if readers.is_empty() {
                index.remove(&range.rect);
            }
        }
        if index.is_empty() {
            self.range_index.remove(&range.sheet);
        }
    }

    /// Remove a cell from the graph in both directions
    ///
    /// Ranges covering the cell stay indexed; they describe an area, not the cell.
    pub fn remove_cell(&mut self, cell: &CellKey) {
        self.clear_precedents(cell);

        if let Some(dependents) = self.dependents.remove(cell) {
            for dependent in dependents {
                if let Some(precs) = self.precedents.get_mut(&dependent) {
                    precs.remove(cell);
                    if precs.is_empty() {
                        self.precedents.remove(&dependent);
                    }
                }
            }
        }
    }

    /// Remove every cell of a sheet, and every range on it
    pub fn remove_sheet(&mut self, sheet: &SheetId) {
        let cells: AHashSet<CellKey> = self
            .dependents
            .keys()
            .chain(self.precedents.keys())
            .chain(self.range_precedents.keys())
            .filter(|k| &k.sheet == sheet)
            .cloned()
            .collect();
        for cell in &cells {
            self.remove_cell(cell);
        }

        // Readers on other sheets lose their ranges over this one
        if let Some(index) = self.range_index.remove(sheet) {
            for (rect, readers) in index {
                let range = SheetRange::new(sheet.clone(), rect);
                for reader in readers {
                    if let Some(ranges) = self.range_precedents.get_mut(&reader) {
                        ranges.remove(&range);
                        if ranges.is_empty() {
                            self.range_precedents.remove(&reader);
                        }
                    }
                }
            }
        }
    }

    /// Get cells that depend on the given cell, directly or through a range
    pub fn get_dependents<'a>(&'a self, cell: &CellKey) -> AHashSet<&'a CellKey> {
        let mut dependents: AHashSet<&CellKey> =
            self.dependents.get(cell).into_iter().flatten().collect();
        if let Some(index) = self.range_index.get(&cell.sheet) {
            for (rect, readers) in index {
                if rect.contains_cell(cell.row, cell.col) {
                    dependents.extend(readers);
                }
            }
        }
        dependents
    }

    /// Get single cells that the given cell depends on
    pub fn get_precedents<'a>(&'a self, cell: &CellKey) -> impl Iterator<Item = &'a CellKey> {
        self.precedents.get(cell).into_iter().flatten()
    }

    /// Get ranges that the given cell depends on
    pub fn get_range_precedents<'a>(
        &'a self,
        cell: &CellKey,
    ) -> impl Iterator<Item = &'a SheetRange> {
        self.range_precedents.get(cell).into_iter().flatten()
    }

    /// Everything the given cell reads, cells first, in key order
    pub fn precedents_of(&self, cell: &CellKey) -> Vec<Precedent> {
        let mut precedents: Vec<Precedent> = self
            .get_precedents(cell)
            .cloned()
            .map(Precedent::Cell)
            .chain(self.get_range_precedents(cell).cloned().map(Precedent::Range))
            .collect();
        precedents.sort();
        precedents
    }

    /// Check whether `cell` reads anything on `sheet`
    pub fn reads_sheet(&self, cell: &CellKey, sheet: &SheetId) -> bool {
        self.get_precedents(cell).any(|p| &p.sheet == sheet)
            || self.get_range_precedents(cell).any(|r| &r.sheet == sheet)
    }

    /// Check whether `cell` reads `other`, directly or through a range
    pub fn reads(&self, cell: &CellKey, other: &CellKey) -> bool {
        self.precedents
            .get(cell)
            .is_some_and(|precs| precs.contains(other))
            || self.get_range_precedents(cell).any(|r| r.contains(other))
    }

    /// Cells with at least one precedent that lie inside `range`
    pub fn formula_cells_in_range(&self, range: &SheetRange) -> Vec<CellKey> {
        let mut cells: Vec<CellKey> = self
            .precedents
            .keys()
            .chain(self.range_precedents.keys())
            .filter(|k| range.contains(k))
            .cloned()
            .collect::<AHashSet<_>>()
            .into_iter()
            .collect();
        cells.sort();
        cells
    }

    /// Check whether a cell has any dependents
    pub fn has_dependents(&self, cell: &CellKey) -> bool {
        self.dependents.contains_key(cell)
            || self.range_index.get(&cell.sheet).is_some_and(|index| {
                index
                    .keys()
                    .any(|rect| rect.contains_cell(cell.row, cell.col))
            })
    }

    /// The cell plus everything that transitively depends on it
    pub fn collect_transitive_dependents(&self, cell: &CellKey) -> AHashSet<CellKey> {
        let mut visited = AHashSet::new();
        self.collect_transitive_dependents_into(cell, &mut visited);
        visited
    }

    /// Add the cell and its transitive dependents to `visited`
    ///
    /// Cells already in `visited` are not walked again, so cycles terminate and a
    /// shared `visited` set can accumulate the closure of many cells.
    pub fn collect_transitive_dependents_into(
        &self,
        cell: &CellKey,
        visited: &mut AHashSet<CellKey>,
    ) {
        if !visited.insert(cell.clone()) {
            return;
        }

        let mut stack = vec![cell.clone()];
        while let Some(current) = stack.pop() {
            for dependent in self.get_dependents(&current) {
                if visited.insert(dependent.clone()) {
                    stack.push(dependent.clone());
                }
            }
        }
    }

    /// Number of cells of the set that `cell` reads
    fn in_degree_within(&self, cell: &CellKey, cells: &AHashSet<CellKey>) -> usize {
        if self.range_precedents.contains_key(cell) {
            cells.iter().filter(|other| self.reads(cell, other)).count()
        } else {
            self.get_precedents(cell)
                .filter(|p| cells.contains(*p))
                .count()
        }
    }

    /// Order a set of cells so that precedents come before dependents (Kahn)
    ///
    /// Only edges between cells of the set count, and a cell read both directly
    /// and through a range counts once. Cells whose in-degree never drops to zero
    /// are reported as cyclic, in key order.
    pub fn topological_order(&self, cells: &AHashSet<CellKey>) -> TopologicalOrder {
        let mut in_degree: AHashMap<&CellKey, usize> = cells
            .iter()
            .map(|cell| (cell, self.in_degree_within(cell, cells)))
            .collect();

        let mut ready: Vec<&CellKey> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(cell, _)| *cell)
            .collect();
        ready.sort();
        let mut queue: VecDeque<&CellKey> = ready.into();

        let mut order = Vec::with_capacity(cells.len());
        while let Some(cell) = queue.pop_front() {
            order.push(cell.clone());
            let mut next: Vec<&CellKey> = Vec::new();
            for dependent in self.get_dependents(cell) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort();
            queue.extend(next);
        }

        let mut cyclic: Vec<CellKey> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(cell, _)| cell.clone())
            .collect();
        cyclic.sort();

        TopologicalOrder { order, cyclic }
    }

    /// Check whether a cell lies on a dependency cycle (including a self-reference)
    pub fn is_in_cycle(&self, cell: &CellKey) -> bool {
        let mut visited = AHashSet::new();
        let mut stack: Vec<&CellKey> = self.get_dependents(cell).into_iter().collect();

        while let Some(current) = stack.pop() {
            if current == cell {
                return true;
            }
            if visited.insert(current) {
                stack.extend(self.get_dependents(current));
            }
        }

        false
    }

    /// Number of cells with at least one precedent
    pub fn formula_count(&self) -> usize {
        self.range_precedents.len()
            + self
                .precedents
                .keys()
                .filter(|k| !self.range_precedents.contains_key(*k))
                .count()
    }

    /// Number of distinct ranges indexed across all sheets
    pub fn range_count(&self) -> usize {
        self.range_index.values().map(|index| index.len()).sum()
    }

    /// Clear the entire graph
    pub fn clear(&mut self) {
        self.dependents.clear();
        self.precedents.clear();
        self.range_precedents.clear();
        self.range_index.clear();
    }
}
