//! Viewport-driven lazy range loading
//!
//! The loader remembers which rectangles of each sheet have been fetched and
//! decides when a newly visible area needs a fetch. It never performs I/O: it
//! hands out a [`LoadRequest`], the caller runs it against storage, and reports
//! the outcome back through the engine.

use crate::config::LoaderConfig;
use crate::error::StorageError;
use crate::storage::{CellRecord, CellStorage};
use ahash::AHashMap;
use gridcalc_core::{CellRect, SheetId};

/// A pending range fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    id: u64,
    /// Sheet to fetch from
    pub sheet: SheetId,
    /// Rectangle to fetch (the visible area plus the buffer margin)
    pub rect: CellRect,
}

impl LoadRequest {
    /// Run the fetch against a storage collaborator
    pub async fn fetch<S>(&self, storage: &S) -> Result<Vec<CellRecord>, StorageError>
    where
        S: CellStorage + ?Sized,
    {
        storage.load_cells(&self.sheet, self.rect).await
    }
}

/// Merge rectangles that overlap or touch into single rectangles
///
/// Two rectangles merge only when their union is exactly a rectangle, so merging
/// never claims a cell that was not loaded. If more than `max_ranges` remain, they
/// collapse into one bounding rectangle.
pub fn merge_ranges(mut ranges: Vec<CellRect>, max_ranges: usize) -> Vec<CellRect> {
    ranges.sort_by_key(|r| (r.row_start, r.col_start));

    let mut merged = true;
    while merged {
        merged = false;
        let mut out: Vec<CellRect> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match out.iter_mut().find_map(|r| r.union(&range).map(|u| (r, u))) {
                Some((slot, union)) => {
                    *slot = union;
                    merged = true;
                }
                None => out.push(range),
            }
        }
        ranges = out;
    }

    if ranges.len() > max_ranges {
        let bounds = ranges
            .iter()
            .copied()
            .reduce(|a, b| a.bounding(&b));
        return bounds.into_iter().collect();
    }

    ranges.sort_by_key(|r| (r.row_start, r.col_start));
    ranges
}

#[derive(Debug, Clone)]
struct InFlight {
    id: u64,
    sheet: SheetId,
}

/// Loaded-range bookkeeping for every sheet
#[derive(Debug)]
pub struct ViewportLoader {
    config: LoaderConfig,
    ranges: AHashMap<SheetId, Vec<CellRect>>,
    in_flight: Option<InFlight>,
    /// Latest visible area reported, re-checked after each load
    viewport: Option<(SheetId, CellRect)>,
    next_id: u64,
}

impl ViewportLoader {
    /// Create a loader
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            ranges: AHashMap::new(),
            in_flight: None,
            viewport: None,
            next_id: 0,
        }
    }

    /// Loaded ranges of a sheet
    pub fn loaded_ranges(&self, sheet: &SheetId) -> &[CellRect] {
        self.ranges.get(sheet).map_or(&[], Vec::as_slice)
    }

    /// Check whether a fetch is outstanding
    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True unless a single loaded range fully contains `rect`
    pub fn needs_load(&self, sheet: &SheetId, rect: &CellRect) -> bool {
        !self.loaded_ranges(sheet).iter().any(|r| r.contains(rect))
    }

    /// Report a visible area; returns a fetch to run if it is not loaded yet
    ///
    /// While another fetch is outstanding nothing is returned; the area is
    /// re-checked when that fetch completes.
    pub fn request_load(&mut self, sheet: &SheetId, rect: CellRect) -> Option<LoadRequest> {
        self.viewport = Some((sheet.clone(), rect));

        if !self.needs_load(sheet, &rect) {
            return None;
        }
        if let Some(in_flight) = &self.in_flight {
            tracing::trace!(sheet = %sheet, %rect, pending = %in_flight.sheet, "load deferred");
            return None;
        }

        self.next_id += 1;
        let request = LoadRequest {
            id: self.next_id,
            sheet: sheet.clone(),
            rect: rect.expand(self.config.row_buffer, self.config.col_buffer),
        };
        self.in_flight = Some(InFlight {
            id: request.id,
            sheet: sheet.clone(),
        });

        tracing::debug!(sheet = %sheet, rect = %request.rect, "range load requested");
        Some(request)
    }

    /// Settle a fetch and re-check the latest viewport
    ///
    /// A successful fetch merges its rectangle into the sheet's loaded ranges; a
    /// failed one commits nothing. Returns the follow-up fetch, if the viewport
    /// still is not covered.
    pub fn complete(&mut self, request: &LoadRequest, success: bool) -> Option<LoadRequest> {
        if self.in_flight.as_ref().is_some_and(|f| f.id == request.id) {
            self.in_flight = None;
        }

        if success {
            let ranges = self.ranges.entry(request.sheet.clone()).or_default();
            let mut all = std::mem::take(ranges);
            all.push(request.rect);
            *ranges = merge_ranges(all, self.config.max_ranges);
            tracing::debug!(
                sheet = %request.sheet,
                rect = %request.rect,
                ranges = ranges.len(),
                "range loaded"
            );
        } else {
            // Forget the viewport so a failing backend is not hammered in a loop
            self.viewport = None;
            return None;
        }

        let (sheet, rect) = self.viewport.clone()?;
        self.request_load(&sheet, rect)
    }

    /// Forget every loaded range of a sheet
    pub fn clear_sheet(&mut self, sheet: &SheetId) {
        self.ranges.remove(sheet);
        if self.viewport.as_ref().is_some_and(|(s, _)| s == sheet) {
            self.viewport = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sheet() -> SheetId {
        SheetId::new("s1")
    }

    fn unbuffered() -> ViewportLoader {
        ViewportLoader::new(LoaderConfig {
            row_buffer: 0,
            col_buffer: 0,
            max_ranges: 10,
        })
    }

    #[test]
    fn test_merge_overlapping_rows() {
        let merged = merge_ranges(
            vec![CellRect::new(0, 9, 0, 9), CellRect::new(8, 20, 0, 9)],
            10,
        );
        assert_eq!(merged, vec![CellRect::new(0, 20, 0, 9)]);
    }

    #[test]
    fn test_merge_adjacent_and_contained() {
        let merged = merge_ranges(
            vec![
                CellRect::new(10, 19, 0, 9),
                CellRect::new(0, 9, 0, 9),
                CellRect::new(2, 3, 2, 3),
                CellRect::new(0, 19, 10, 15),
            ],
            10,
        );
        assert_eq!(merged, vec![CellRect::new(0, 19, 0, 15)]);
    }

    #[test]
    fn test_merge_keeps_disjoint() {
        let merged = merge_ranges(
            vec![CellRect::new(50, 60, 0, 5), CellRect::new(0, 9, 0, 9)],
            10,
        );
        assert_eq!(merged, vec![CellRect::new(0, 9, 0, 9), CellRect::new(50, 60, 0, 5)]);
    }

    #[test]
    fn test_merge_collapses_over_cap() {
        let ranges: Vec<_> = (0..4).map(|i| CellRect::new(i * 10, i * 10 + 1, 0, 0)).collect();
        assert_eq!(merge_ranges(ranges, 3), vec![CellRect::new(0, 31, 0, 0)]);
    }

    #[test]
    fn test_needs_load_after_success() {
        let mut loader = unbuffered();
        let rect = CellRect::new(0, 49, 0, 25);
        assert!(loader.needs_load(&sheet(), &rect));

        let request = loader.request_load(&sheet(), rect).unwrap();
        assert!(loader.is_loading());
        assert_eq!(loader.complete(&request, true), None);

        assert!(!loader.is_loading());
        assert!(!loader.needs_load(&sheet(), &rect));
        assert!(loader.needs_load(&sheet(), &CellRect::new(0, 50, 0, 25)));
        assert_eq!(loader.request_load(&sheet(), rect), None);
    }

    #[test]
    fn test_request_expands_by_buffer() {
        let mut loader = ViewportLoader::new(LoaderConfig::default());
        let request = loader.request_load(&sheet(), CellRect::new(100, 130, 20, 30)).unwrap();
        assert_eq!(request.rect, CellRect::new(50, 180, 10, 40));

        // Clamped at the sheet origin
        let mut loader = ViewportLoader::new(LoaderConfig::default());
        let request = loader.request_load(&sheet(), CellRect::new(0, 10, 0, 5)).unwrap();
        assert_eq!(request.rect, CellRect::new(0, 60, 0, 15));
    }

    #[test]
    fn test_failed_load_commits_nothing() {
        let mut loader = unbuffered();
        let rect = CellRect::new(0, 9, 0, 9);
        let request = loader.request_load(&sheet(), rect).unwrap();

        assert_eq!(loader.complete(&request, false), None);
        assert!(!loader.is_loading());
        assert!(loader.loaded_ranges(&sheet()).is_empty());
        assert!(loader.request_load(&sheet(), rect).is_some());
    }

    #[test]
    fn test_scroll_during_load_triggers_follow_up() {
        let mut loader = unbuffered();
        let first = loader.request_load(&sheet(), CellRect::new(0, 9, 0, 9)).unwrap();

        // Scrolled while the first fetch is outstanding
        assert_eq!(loader.request_load(&sheet(), CellRect::new(100, 109, 0, 9)), None);

        let follow_up = loader.complete(&first, true).unwrap();
        assert_eq!(follow_up.rect, CellRect::new(100, 109, 0, 9));
        assert_eq!(loader.complete(&follow_up, true), None);
        assert_eq!(loader.loaded_ranges(&sheet()).len(), 2);
    }

    #[test]
    fn test_clear_sheet() {
        let mut loader = unbuffered();
        let request = loader.request_load(&sheet(), CellRect::new(0, 9, 0, 9)).unwrap();
        loader.complete(&request, true);

        loader.clear_sheet(&sheet());
        assert!(loader.loaded_ranges(&sheet()).is_empty());
    }

    fn rect_strategy() -> impl Strategy<Value = CellRect> {
        (0u32..40, 0u32..10, 0u16..20, 0u16..5)
            .prop_map(|(r, h, c, w)| CellRect::new(r, r + h, c, c + w))
    }

    proptest! {
        #[test]
        fn prop_merge_preserves_coverage(ranges in proptest::collection::vec(rect_strategy(), 0..8)) {
            let merged = merge_ranges(ranges.clone(), usize::MAX);

            // Every input cell is still covered
            for range in &ranges {
                for row in range.row_start..=range.row_end {
                    for col in range.col_start..=range.col_end {
                        prop_assert!(merged.iter().any(|m| m.contains_cell(row, col)));
                    }
                }
            }
            // And no cell outside the inputs is claimed
            for m in &merged {
                for row in m.row_start..=m.row_end {
                    for col in m.col_start..=m.col_end {
                        prop_assert!(ranges.iter().any(|r| r.contains_cell(row, col)));
                    }
                }
            }
            prop_assert!(merged.len() <= ranges.len());
        }

        #[test]
        fn prop_merge_respects_cap(ranges in proptest::collection::vec(rect_strategy(), 0..12), cap in 1usize..5) {
            let merged = merge_ranges(ranges, cap);
            prop_assert!(merged.len() <= cap);
        }
    }
}
