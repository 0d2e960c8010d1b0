//! Tests for write-behind persistence

use gridcalc::prelude::*;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{advance, sleep, Instant};

fn key(reference: &str) -> CellKey {
    CellKey::parse("s1", reference).unwrap()
}

fn engine() -> RefCell<Engine> {
    let mut engine = Engine::new();
    engine.add_sheet("s1", "Sheet1").unwrap();
    RefCell::new(engine)
}

#[tokio::test(start_paused = true)]
async fn test_saves_wait_for_quiet_period() {
    let engine = engine();
    engine.borrow_mut().update_cell_value(&key("A1"), "1").unwrap();
    assert_eq!(engine.borrow().pending_saves(), 1);
    assert!(!engine.borrow().is_save_due(Instant::now()));

    advance(Duration::from_millis(1500)).await;
    engine.borrow_mut().update_cell_value(&key("A2"), "2").unwrap();

    // The window restarts with every edit
    advance(Duration::from_millis(1500)).await;
    assert!(!engine.borrow().is_save_due(Instant::now()));

    advance(Duration::from_millis(500)).await;
    assert!(engine.borrow().is_save_due(Instant::now()));
}

#[tokio::test(start_paused = true)]
async fn test_flush_writes_pending_records() {
    let engine = engine();
    let storage = MemoryStorage::new();
    engine.borrow_mut().batch(|e| {
        e.update_cell_value(&key("A1"), "4").unwrap();
        e.update_cell_value(&key("B1"), "=A1*A1").unwrap();
        e.update_cell(&key("C1"), CellUpdate::new().note(Some("total".into())))
            .unwrap();
    });

    assert_eq!(flush_pending_saves(&engine, &storage).await.unwrap(), 3);
    assert_eq!(engine.borrow().pending_saves(), 0);
    assert_eq!(flush_pending_saves(&engine, &storage).await.unwrap(), 0);
    assert_eq!(storage.save_count(), 1);

    let b1 = storage.get(&key("B1")).unwrap();
    assert_eq!(b1.formula.as_deref(), Some("=A1*A1"));
    assert_eq!(b1.raw_value, CellValue::Empty);
    assert_eq!(b1.computed_value, CellValue::Number(16.0));
    assert_eq!(storage.get(&key("C1")).unwrap().note.as_deref(), Some("total"));
}

#[tokio::test(start_paused = true)]
async fn test_recalculated_cells_are_not_resaved() {
    let engine = engine();
    let storage = MemoryStorage::new();
    engine.borrow_mut().update_cell_value(&key("A1"), "1").unwrap();
    engine.borrow_mut().update_cell_value(&key("B1"), "=A1+1").unwrap();
    flush_pending_saves(&engine, &storage).await.unwrap();

    engine.borrow_mut().update_cell_value(&key("A1"), "2").unwrap();
    assert_eq!(engine.borrow().get_cell_value(&key("B1")), CellValue::Number(3.0));
    assert_eq!(engine.borrow().pending_saves(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cleared_cell_is_saved_with_null_content() {
    let engine = engine();
    let storage = MemoryStorage::new();
    engine.borrow_mut().update_cell_value(&key("A1"), "hello").unwrap();
    flush_pending_saves(&engine, &storage).await.unwrap();

    engine.borrow_mut().clear_cell(&key("A1")).unwrap();
    flush_pending_saves(&engine, &storage).await.unwrap();

    let record = storage.get(&key("A1")).unwrap();
    assert_eq!(record.raw_value, CellValue::Empty);
    assert_eq!(record.formula, None);
    assert!(record.to_json().unwrap().contains("\"raw_value\":null"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_is_requeued() {
    let engine = engine();
    let storage = MemoryStorage::new();
    storage.fail_next_saves(1);
    engine.borrow_mut().update_cell_value(&key("A1"), "1").unwrap();

    let err = flush_pending_saves(&engine, &storage).await.unwrap_err();
    assert!(err.is_storage());
    assert_eq!(engine.borrow().pending_saves(), 1);
    assert_eq!(storage.record_count(), 0);

    assert_eq!(flush_pending_saves(&engine, &storage).await.unwrap(), 1);
    assert_eq!(engine.borrow().pending_saves(), 0);
    assert_eq!(storage.get(&key("A1")).unwrap().raw_value, CellValue::Number(1.0));
}

#[tokio::test(start_paused = true)]
async fn test_edit_during_save_stays_pending() {
    let engine = engine();
    engine.borrow_mut().update_cell_value(&key("A1"), "1").unwrap();

    let batch = engine.borrow_mut().take_save_batch().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(engine.borrow().pending_saves(), 0);

    // Edited again while the first write is outstanding
    engine.borrow_mut().update_cell_value(&key("A1"), "2").unwrap();
    engine.borrow_mut().complete_save(batch, Ok(())).unwrap();
    assert_eq!(engine.borrow().pending_saves(), 1);

    let batch = engine.borrow_mut().take_save_batch().unwrap();
    assert_eq!(batch.records[0].raw_value, CellValue::Number(2.0));
}

#[tokio::test(start_paused = true)]
async fn test_write_behind_debounces_and_flushes_on_stop() {
    let engine = engine();
    let storage = MemoryStorage::new();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = run_write_behind(&engine, &storage, async {
        let _ = stop_rx.await;
    });
    let script = async {
        engine.borrow_mut().update_cell_value(&key("A1"), "1").unwrap();
        sleep(Duration::from_millis(500)).await;
        engine.borrow_mut().update_cell_value(&key("A2"), "2").unwrap();

        sleep(Duration::from_secs(1)).await;
        assert_eq!(storage.save_count(), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(storage.save_count(), 1);
        assert_eq!(storage.record_count(), 2);

        engine.borrow_mut().update_cell_value(&key("A3"), "3").unwrap();
        stop_tx.send(()).unwrap();
    };

    let (written, ()) = tokio::join!(driver, script);
    assert_eq!(written.unwrap(), 3);
    assert_eq!(storage.save_count(), 2);
    assert_eq!(engine.borrow().pending_saves(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_write_behind_retries_after_failure() {
    let engine = engine();
    let storage = MemoryStorage::new();
    storage.fail_next_saves(1);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = run_write_behind(&engine, &storage, async {
        let _ = stop_rx.await;
    });
    let script = async {
        engine.borrow_mut().update_cell_value(&key("A1"), "1").unwrap();

        sleep(Duration::from_millis(2500)).await;
        assert_eq!(storage.save_count(), 0);
        assert_eq!(engine.borrow().pending_saves(), 1);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(storage.save_count(), 1);
        assert_eq!(engine.borrow().pending_saves(), 0);

        stop_tx.send(()).unwrap();
    };

    let (written, ()) = tokio::join!(driver, script);
    assert_eq!(written.unwrap(), 1);
}
