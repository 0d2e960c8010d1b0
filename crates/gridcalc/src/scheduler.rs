//! Dirty-cell recalculation scheduling
//!
//! Writes mark cells dirty; the first mark schedules a single coalesced flush that
//! runs when the outermost engine call returns. A flush swaps the dirty set out,
//! expands it to every transitive dependent, orders that subset precedents-first
//! and hands it to the formula evaluator.

use ahash::AHashSet;
use gridcalc_core::CellKey;
use gridcalc_formula::DependencyGraph;

/// Statistics from a flush
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecalcStats {
    /// Cells that were marked dirty
    pub dirty: usize,
    /// Dirty cells plus their transitive dependents
    pub affected: usize,
    /// Formula cells evaluated
    pub evaluated: usize,
    /// Evaluated cells whose result is an error value
    pub errors: usize,
    /// Cells found on a reference cycle
    pub cyclic: Vec<CellKey>,
    /// Passes run (more than one when cells were marked dirty mid-flush)
    pub passes: u32,
}

impl RecalcStats {
    pub(crate) fn absorb(&mut self, pass: RecalcStats) {
        self.dirty += pass.dirty;
        self.affected += pass.affected;
        self.evaluated += pass.evaluated;
        self.errors += pass.errors;
        self.cyclic.extend(pass.cyclic);
        self.passes += 1;
    }
}

/// The cells one pass recomputes, precedents first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecalcPlan {
    /// Number of dirty cells the plan was built from
    pub dirty: usize,
    /// Affected cells in evaluation order; cells left on or behind a cycle come last
    pub order: Vec<CellKey>,
}

impl RecalcPlan {
    /// Build the plan for a dirty set
    pub fn build(graph: &DependencyGraph, dirty: &AHashSet<CellKey>) -> Self {
        let mut affected = AHashSet::with_capacity(dirty.len());
        for key in dirty {
            graph.collect_transitive_dependents_into(key, &mut affected);
        }

        let sorted = graph.topological_order(&affected);
        let mut order = sorted.order;
        order.extend(sorted.cyclic);

        Self {
            dirty: dirty.len(),
            order,
        }
    }
}

/// Dirty set and flush state
#[derive(Debug, Default)]
pub struct RecalcScheduler {
    dirty: AHashSet<CellKey>,
    scheduled: bool,
    flushing: bool,
}

impl RecalcScheduler {
    /// Create an idle scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a cell dirty, returning `true` if this scheduled a new flush
    pub fn mark_dirty(&mut self, key: CellKey) -> bool {
        self.dirty.insert(key);
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        true
    }

    /// Check whether a flush is due
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Check whether a flush is running
    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Number of cells waiting for the next pass
    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    /// Start a flush, taking the dirty set
    ///
    /// Returns `None` while another flush is running; cells marked meanwhile
    /// are picked up by that flush's next pass.
    pub fn begin_flush(&mut self) -> Option<AHashSet<CellKey>> {
        if self.flushing {
            return None;
        }
        self.flushing = true;
        self.scheduled = false;
        Some(std::mem::take(&mut self.dirty))
    }

    /// Take cells marked dirty during the current pass
    pub fn next_pass(&mut self) -> Option<AHashSet<CellKey>> {
        if self.dirty.is_empty() {
            return None;
        }
        self.scheduled = false;
        Some(std::mem::take(&mut self.dirty))
    }

    /// Finish the running flush
    ///
    /// Cells still dirty stay scheduled for the next flush.
    pub fn end_flush(&mut self) {
        self.flushing = false;
        self.scheduled = !self.dirty.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(row: u32, col: u16) -> CellKey {
        CellKey::new("s1", row, col)
    }

    #[test]
    fn test_first_mark_schedules_once() {
        let mut scheduler = RecalcScheduler::new();
        assert!(scheduler.mark_dirty(key(0, 0)));
        assert!(!scheduler.mark_dirty(key(0, 1)));
        assert!(!scheduler.mark_dirty(key(0, 0)));
        assert!(scheduler.is_scheduled());
        assert_eq!(scheduler.pending(), 2);
    }

    #[test]
    fn test_flush_is_not_reentrant() {
        let mut scheduler = RecalcScheduler::new();
        scheduler.mark_dirty(key(0, 0));

        let dirty = scheduler.begin_flush().unwrap();
        assert_eq!(dirty.len(), 1);
        assert!(scheduler.begin_flush().is_none());

        // Marks during the flush go to the next pass
        assert!(scheduler.mark_dirty(key(1, 0)));
        let next = scheduler.next_pass().unwrap();
        assert!(next.contains(&key(1, 0)));
        assert!(scheduler.next_pass().is_none());

        scheduler.end_flush();
        assert!(!scheduler.is_flushing());
        assert!(!scheduler.is_scheduled());
    }

    #[test]
    fn test_leftover_dirty_stays_scheduled() {
        let mut scheduler = RecalcScheduler::new();
        scheduler.begin_flush();
        scheduler.mark_dirty(key(0, 0));
        scheduler.end_flush();
        assert!(scheduler.is_scheduled());
    }

    #[test]
    fn test_plan_chain() {
        // C reads B, B reads A
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&key(0, 1), [key(0, 0)]);
        graph.set_dependencies(&key(0, 2), [key(0, 1)]);

        let dirty: AHashSet<CellKey> = [key(0, 0)].into_iter().collect();
        let plan = RecalcPlan::build(&graph, &dirty);

        assert_eq!(plan.dirty, 1);
        assert_eq!(plan.order, vec![key(0, 0), key(0, 1), key(0, 2)]);
    }

    #[test]
    fn test_plan_shared_dependents_once() {
        // B and C read A, D reads B and C
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&key(1, 0), [key(0, 0)]);
        graph.set_dependencies(&key(2, 0), [key(0, 0)]);
        graph.set_dependencies(&key(3, 0), [key(1, 0), key(2, 0)]);

        let dirty: AHashSet<CellKey> = [key(0, 0), key(1, 0)].into_iter().collect();
        let plan = RecalcPlan::build(&graph, &dirty);

        assert_eq!(plan.order.len(), 4);
        assert_eq!(plan.order.first(), Some(&key(0, 0)));
        assert_eq!(plan.order.last(), Some(&key(3, 0)));
    }

    #[test]
    fn test_plan_cycle_terminates() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&key(0, 0), [key(0, 1)]);
        graph.set_dependencies(&key(0, 1), [key(0, 0)]);
        graph.set_dependencies(&key(0, 2), [key(0, 0)]);

        let dirty: AHashSet<CellKey> = [key(0, 0)].into_iter().collect();
        let plan = RecalcPlan::build(&graph, &dirty);
        assert_eq!(plan.order, vec![key(0, 0), key(0, 1), key(0, 2)]);
    }
}
