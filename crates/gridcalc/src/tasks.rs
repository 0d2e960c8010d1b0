//! Async drivers for loading and saving
//!
//! The engine is single-threaded and lives in a `RefCell`. These helpers borrow
//! it only between awaits, so edits and scrolls can go on while a fetch or save
//! is outstanding.

use crate::engine::Engine;
use crate::error::Result;
use crate::storage::CellStorage;
use gridcalc_core::{CellRect, SheetId};
use gridcalc_formula::FormulaEvaluator;
use std::cell::RefCell;
use std::future::Future;
use tokio::time::{sleep_until, Instant};

/// Load a newly visible area, following up until the latest viewport is covered
///
/// Returns the number of fetches run.
pub async fn load_visible<E, S>(
    engine: &RefCell<Engine<E>>,
    storage: &S,
    sheet: &SheetId,
    rect: CellRect,
) -> Result<usize>
where
    E: FormulaEvaluator,
    S: CellStorage + ?Sized,
{
    let mut next = engine.borrow_mut().on_range_visible(sheet, rect)?;
    let mut fetches = 0;

    while let Some(request) = next {
        let result = request.fetch(storage).await;
        fetches += 1;
        next = engine.borrow_mut().complete_load(request, result)?;
    }

    Ok(fetches)
}

/// Write every pending cell now, ignoring the debounce window
///
/// Returns the number of records written.
pub async fn flush_pending_saves<E, S>(engine: &RefCell<Engine<E>>, storage: &S) -> Result<usize>
where
    E: FormulaEvaluator,
    S: CellStorage + ?Sized,
{
    let Some(batch) = engine.borrow_mut().take_save_batch() else {
        return Ok(0);
    };

    let result = storage.save_cells(&batch.records).await;
    let written = batch.len();
    engine.borrow_mut().complete_save(batch, result)?;
    Ok(written)
}

/// Save pending cells whenever edits have been quiet for the debounce window
///
/// Runs until `stop` resolves, then makes a final save attempt. Failed saves are
/// logged and retried after the next window.
pub async fn run_write_behind<E, S, F>(
    engine: &RefCell<Engine<E>>,
    storage: &S,
    stop: F,
) -> Result<usize>
where
    E: FormulaEvaluator,
    S: CellStorage + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(stop);
    let idle = engine.borrow().config().save_debounce;
    let mut written = 0;

    loop {
        let wake = engine
            .borrow()
            .next_save_deadline()
            .unwrap_or_else(|| Instant::now() + idle);

        tokio::select! {
            _ = &mut stop => break,
            _ = sleep_until(wake) => {
                if !engine.borrow().is_save_due(Instant::now()) {
                    continue;
                }
                match flush_pending_saves(engine, storage).await {
                    Ok(n) => written += n,
                    Err(e) => tracing::warn!(error = %e, "write-behind save failed"),
                }
            }
        }
    }

    written += flush_pending_saves(engine, storage).await?;
    Ok(written)
}
