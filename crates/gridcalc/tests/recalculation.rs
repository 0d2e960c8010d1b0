//! Tests for dirty-cell recalculation

use gridcalc::prelude::*;
use gridcalc::{CellInput, EvaluationReport, NativeEvaluator, Precedent, SheetRange, MAX_COLS, MAX_ROWS};
use pretty_assertions::assert_eq;

fn engine() -> Engine {
    let mut engine = Engine::new();
    engine.add_sheet("s1", "Sheet1").unwrap();
    engine
}

fn key(reference: &str) -> CellKey {
    CellKey::parse("s1", reference).unwrap()
}

#[test]
fn test_simple_recalculation() {
    let mut engine = engine();
    engine.update_cell_value(&key("A1"), "5").unwrap();
    engine.update_cell_value(&key("B1"), "=A1*2").unwrap();
    assert_eq!(engine.get_cell_value(&key("B1")), CellValue::Number(10.0));

    engine.update_cell_value(&key("A1"), "7").unwrap();
    assert_eq!(engine.get_cell_value(&key("B1")), CellValue::Number(14.0));
}

#[test]
fn test_chain_propagation() {
    // C reads B, B reads A
    let mut engine = engine();
    engine.batch(|e| {
        e.update_cell_value(&key("A1"), "1").unwrap();
        e.update_cell_value(&key("B1"), "=A1+10").unwrap();
        e.update_cell_value(&key("C1"), "=B1*2").unwrap();
    });
    assert_eq!(engine.get_cell_value(&key("C1")), CellValue::Number(22.0));

    engine.update_cell_value(&key("A1"), "5").unwrap();

    let stats = engine.last_flush().unwrap().clone();
    assert_eq!(stats.dirty, 1);
    assert_eq!(stats.affected, 3);
    assert_eq!(stats.evaluated, 2);
    assert_eq!(engine.get_cell_value(&key("B1")), CellValue::Number(15.0));
    assert_eq!(engine.get_cell_value(&key("C1")), CellValue::Number(30.0));
}

#[test]
fn test_only_affected_cells_recalculate() {
    let mut engine = engine();
    engine.batch(|e| {
        e.update_cell_value(&key("A1"), "1").unwrap();
        e.update_cell_value(&key("A2"), "2").unwrap();
        e.update_cell_value(&key("B1"), "=A1*2").unwrap();
        e.update_cell_value(&key("B2"), "=A2*2").unwrap();
    });

    engine.update_cell_value(&key("A2"), "3").unwrap();
    let stats = engine.last_flush().unwrap();
    assert_eq!(stats.affected, 2);
    assert_eq!(stats.evaluated, 1);
}

#[test]
fn test_circular_reference_terminates() {
    let mut engine = engine();
    engine.batch(|e| {
        e.update_cell_value(&key("A1"), "=B1+1").unwrap();
        e.update_cell_value(&key("B1"), "=A1+1").unwrap();
        e.update_cell_value(&key("C1"), "=A1").unwrap();
    });

    let stats = engine.last_flush().unwrap().clone();
    assert_eq!(stats.cyclic, vec![key("A1"), key("B1")]);
    for cell in ["A1", "B1", "C1"] {
        assert_eq!(
            engine.get_cell_value(&key(cell)),
            CellValue::Error(CellError::Ref),
            "{cell}"
        );
    }

    // Breaking the cycle recovers every cell
    engine.update_cell_value(&key("B1"), "1").unwrap();
    assert_eq!(engine.get_cell_value(&key("A1")), CellValue::Number(2.0));
    assert_eq!(engine.get_cell_value(&key("C1")), CellValue::Number(2.0));
    assert!(engine.last_flush().unwrap().cyclic.is_empty());
}

#[test]
fn test_replacing_formula_rewires_dependencies() {
    let mut engine = engine();
    engine.batch(|e| {
        e.update_cell_value(&key("A1"), "1").unwrap();
        e.update_cell_value(&key("A2"), "2").unwrap();
        e.update_cell_value(&key("B1"), "=A1").unwrap();
    });
    assert_eq!(engine.dependents(&key("A1")), vec![key("B1")]);

    engine.update_cell_value(&key("B1"), "=A2").unwrap();
    assert!(engine.dependents(&key("A1")).is_empty());
    assert_eq!(engine.precedents(&key("B1")), vec![key("A2")]);

    // Old precedent no longer drives B1
    engine.update_cell_value(&key("A1"), "100").unwrap();
    assert_eq!(engine.get_cell_value(&key("B1")), CellValue::Number(2.0));
    assert_eq!(engine.last_flush().unwrap().affected, 1);
}

#[test]
fn test_clear_cell_keeps_format_and_recalculates() {
    let mut engine = engine();
    engine.update_cell_value(&key("A1"), "3").unwrap();
    engine.update_cell_value(&key("B1"), "=A1*3").unwrap();
    engine
        .update_cell(
            &key("A1"),
            CellUpdate::new().format(Some(CellFormat::new().with("bold", "true"))),
        )
        .unwrap();

    engine.clear_cell(&key("A1")).unwrap();

    let cell = engine.get_cell(&key("A1")).unwrap();
    assert_eq!(cell.raw_value, CellValue::Empty);
    assert_eq!(
        engine.get_cell_format(&key("A1")).and_then(|f| f.get("bold")),
        Some("true")
    );
    assert_eq!(engine.get_cell_value(&key("B1")), CellValue::Number(0.0));
}

#[test]
fn test_format_edit_does_not_recalculate() {
    let mut engine = engine();
    engine.update_cell_value(&key("A1"), "=1+1").unwrap();
    let before = engine.last_flush().cloned();

    engine
        .update_cell(&key("A1"), CellUpdate::new().note(Some("checked".into())))
        .unwrap();
    assert_eq!(engine.last_flush().cloned(), before);
    assert!(!engine.is_flush_scheduled());
}

#[test]
fn test_full_column_formula_tracks_the_range_once() {
    let mut engine = engine();
    engine.batch(|e| {
        e.update_cell_value(&key("A1"), "1").unwrap();
        e.update_cell_value(&key("A1000000"), "2").unwrap();
        e.update_cell_value(&key("B1"), "=SUM(A1:A1048576)").unwrap();
    });
    assert_eq!(engine.get_cell_value(&key("B1")), CellValue::Number(3.0));
    assert_eq!(
        engine.references(&key("B1")),
        vec![Precedent::Range(SheetRange::new(
            SheetId::new("s1"),
            CellRect::new(0, MAX_ROWS - 1, 0, 0)
        ))]
    );
    assert_eq!(engine.precedents(&key("B1")), vec![key("A1"), key("A1000000")]);

    // A cell nobody has touched yet still reaches the formula
    engine.update_cell_value(&key("A500000"), "4").unwrap();
    assert_eq!(engine.get_cell_value(&key("B1")), CellValue::Number(7.0));
    let stats = engine.last_flush().unwrap();
    assert_eq!(stats.affected, 2);
    assert_eq!(stats.evaluated, 1);
    assert_eq!(engine.dependents(&key("A123456")), vec![key("B1")]);
    assert!(engine.dependents(&key("C1")).is_empty());
}

#[test]
fn test_whole_sheet_range_from_another_sheet() {
    let mut engine = engine();
    engine.add_sheet("s2", "Totals").unwrap();
    let total = CellKey::new("s2", 0, 0);

    engine.update_cell_value(&key("A1"), "5").unwrap();
    engine.update_cell_value(&key("XFD1048576"), "6").unwrap();
    engine
        .update_cell_value(&total, "=SUM(Sheet1!A1:XFD1048576)")
        .unwrap();
    assert_eq!(engine.get_cell_value(&total), CellValue::Number(11.0));
    assert_eq!(
        engine.references(&total),
        vec![Precedent::Range(SheetRange::new(
            SheetId::new("s1"),
            CellRect::new(0, MAX_ROWS - 1, 0, MAX_COLS - 1)
        ))]
    );

    engine.update_cell_value(&key("Q77"), "-1").unwrap();
    assert_eq!(engine.get_cell_value(&total), CellValue::Number(10.0));

    engine.remove_sheet(&SheetId::new("s1")).unwrap();
    assert_eq!(engine.get_cell_value(&total), CellValue::Error(CellError::Ref));
    assert!(engine.references(&total).is_empty());
}

#[test]
fn test_range_formula_over_its_own_column_is_circular() {
    let mut engine = engine();
    engine.update_cell_value(&key("A1"), "1").unwrap();
    engine.update_cell_value(&key("A3"), "=SUM(A1:A10)").unwrap();

    assert_eq!(engine.last_flush().unwrap().cyclic, vec![key("A3")]);
    assert_eq!(engine.get_cell_value(&key("A3")), CellValue::Error(CellError::Ref));

    engine.update_cell_value(&key("A3"), "=SUM(A1:A2)").unwrap();
    assert_eq!(engine.get_cell_value(&key("A3")), CellValue::Number(1.0));
}

#[test]
fn test_recalculate_all() {
    let mut engine = engine();
    engine.batch(|e| {
        e.update_cell_value(&key("A1"), "2").unwrap();
        e.update_cell_value(&key("B1"), "=A1*A1").unwrap();
        e.update_cell_value(&key("B2"), "=B1+1").unwrap();
    });

    let stats = engine.recalculate_all();
    assert_eq!(stats.dirty, 2);
    assert_eq!(stats.evaluated, 2);
    assert_eq!(engine.get_cell_value(&key("B2")), CellValue::Number(5.0));
}

#[test]
fn test_change_notifications() {
    let mut engine = engine();
    let start = engine.version();

    engine.update_cell_value(&key("A1"), "1").unwrap();
    engine.update_cell_value(&key("B1"), "=A1+1").unwrap();
    assert!(engine.version() > start);
    assert_eq!(engine.drain_changes(), vec![key("A1"), key("B1")]);
    assert!(engine.drain_changes().is_empty());

    let version = engine.version();
    engine.update_cell_value(&key("A1"), "2").unwrap();
    assert!(engine.version() > version);
    // B1 changed through recalculation
    assert_eq!(engine.drain_changes(), vec![key("A1"), key("B1")]);
}

/// Evaluator that counts how often each cell is recalculated
#[derive(Debug, Default)]
struct CountingEvaluator {
    inner: NativeEvaluator,
    calls: Vec<Vec<CellKey>>,
}

impl FormulaEvaluator for CountingEvaluator {
    fn add_sheet(&mut self, id: SheetId, name: &str) -> Vec<CellKey> {
        self.inner.add_sheet(id, name)
    }

    fn remove_sheet(&mut self, id: &SheetId) -> Vec<CellKey> {
        self.inner.remove_sheet(id)
    }

    fn set_cell_value(&mut self, key: &CellKey, input: CellInput) {
        self.inner.set_cell_value(key, input)
    }

    fn get_cell_value(&self, key: &CellKey) -> CellValue {
        self.inner.get_cell_value(key)
    }

    fn get_precedents(&self, key: &CellKey) -> Vec<CellKey> {
        self.inner.get_precedents(key)
    }

    fn get_references(&self, key: &CellKey) -> Vec<Precedent> {
        self.inner.get_references(key)
    }

    fn get_dependents(&self, key: &CellKey) -> Vec<CellKey> {
        self.inner.get_dependents(key)
    }

    fn validate_formula(&self, text: &str) -> bool {
        self.inner.validate_formula(text)
    }

    fn is_volatile(&self, key: &CellKey) -> bool {
        self.inner.is_volatile(key)
    }

    fn recalculate(&mut self, keys: &[CellKey]) -> EvaluationReport {
        self.calls.push(keys.to_vec());
        self.inner.recalculate(keys)
    }
}

#[test]
fn test_pluggable_evaluator_sees_each_cell_once_in_order() {
    let mut engine = Engine::with_evaluator(CountingEvaluator::default(), EngineConfig::default());
    engine.add_sheet("s1", "Sheet1").unwrap();

    // Diamond: B and C read A, D reads B and C
    engine.batch(|e| {
        e.update_cell_value(&key("A1"), "1").unwrap();
        e.update_cell_value(&key("B1"), "=A1+1").unwrap();
        e.update_cell_value(&key("C1"), "=A1+2").unwrap();
        e.update_cell_value(&key("D1"), "=B1+C1").unwrap();
    });

    let calls = &engine.evaluator().calls;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], vec![key("A1"), key("B1"), key("C1"), key("D1")]);
    assert_eq!(engine.get_cell_value(&key("D1")), CellValue::Number(5.0));
}
