//! Write-behind save queue
//!
//! Edited cells are collected here and written to storage in batches once edits
//! have been quiet for the debounce window. The queue only tracks keys: record
//! contents are snapshotted from the cell store when a batch is taken, so the
//! last write to a cell always wins.

use crate::storage::CellRecord;
use ahash::AHashMap;
use gridcalc_core::{CellKey, SheetId};
use std::time::Duration;
use tokio::time::Instant;

/// A batch of records handed to storage
#[derive(Debug, Clone, PartialEq)]
pub struct SaveBatch {
    id: u64,
    /// Records to persist, in key order
    pub records: Vec<CellRecord>,
}

impl SaveBatch {
    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Pending and in-flight saves
#[derive(Debug)]
pub struct SaveQueue {
    debounce: Duration,
    /// Key → edit sequence number
    pending: AHashMap<CellKey, u64>,
    /// Key → (batch id, edit sequence) for saves handed to storage
    in_flight: AHashMap<CellKey, (u64, u64)>,
    last_edit: Option<Instant>,
    next_seq: u64,
    next_batch: u64,
}

impl SaveQueue {
    /// Create a queue with the given debounce window
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: AHashMap::new(),
            in_flight: AHashMap::new(),
            last_edit: None,
            next_seq: 0,
            next_batch: 0,
        }
    }

    /// Record an edit of `key` at `now`
    pub fn mark(&mut self, key: CellKey, now: Instant) {
        self.next_seq += 1;
        self.pending.insert(key, self.next_seq);
        self.last_edit = Some(now);
    }

    /// Number of cells waiting to be saved
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Check whether a cell has local changes storage has not confirmed yet
    pub fn is_unsaved(&self, key: &CellKey) -> bool {
        self.pending.contains_key(key) || self.in_flight.contains_key(key)
    }

    /// When the pending saves become due, if any are waiting
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        self.last_edit.map(|t| t + self.debounce)
    }

    /// Check whether the debounce window has passed since the last edit
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Move every pending key in flight, returning the batch id and keys in order
    pub fn take(&mut self) -> Option<(u64, Vec<CellKey>)> {
        if self.pending.is_empty() {
            return None;
        }

        self.next_batch += 1;
        let batch = self.next_batch;

        let mut keys = Vec::with_capacity(self.pending.len());
        for (key, seq) in self.pending.drain() {
            self.in_flight.insert(key.clone(), (batch, seq));
            keys.push(key);
        }
        keys.sort();

        Some((batch, keys))
    }

    /// Wrap snapshotted records into a batch
    pub fn batch(id: u64, records: Vec<CellRecord>) -> SaveBatch {
        SaveBatch { id, records }
    }

    /// Settle a batch
    ///
    /// On failure every key that was not edited again meanwhile goes back to
    /// pending, and the debounce window restarts at `now`. Returns the number of
    /// keys re-queued.
    pub fn complete(&mut self, batch: &SaveBatch, success: bool, now: Instant) -> usize {
        let mut requeued = 0;

        for record in &batch.records {
            let key = record.key();
            let Some((owner, seq)) = self.in_flight.get(&key).copied() else {
                continue;
            };
            if owner != batch.id {
                continue;
            }
            self.in_flight.remove(&key);

            if !success && !self.pending.contains_key(&key) {
                self.pending.insert(key, seq);
                requeued += 1;
            }
        }

        if requeued > 0 {
            self.last_edit = Some(now);
        }
        requeued
    }

    /// Forget every save of a sheet
    pub fn discard_sheet(&mut self, sheet: &SheetId) {
        self.pending.retain(|k, _| &k.sheet != sheet);
        self.in_flight.retain(|k, _| &k.sheet != sheet);
    }
}
