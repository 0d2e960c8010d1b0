//! Rectangular row/column regions
//!
//! Viewports and loaded ranges are plain index rectangles; unlike
//! [`CellRange`](crate::CellRange) they carry no A1 notation or absolute markers.

use crate::{CellRange, MAX_COLS, MAX_ROWS};
use std::fmt;

/// An inclusive rectangle of rows and columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CellRect {
    pub row_start: u32,
    pub row_end: u32,
    pub col_start: u16,
    pub col_end: u16,
}

impl CellRect {
    /// Create a rectangle; corners are sorted so start <= end on both axes
    pub fn new(row_start: u32, row_end: u32, col_start: u16, col_end: u16) -> Self {
        Self {
            row_start: row_start.min(row_end),
            row_end: row_start.max(row_end),
            col_start: col_start.min(col_end),
            col_end: col_start.max(col_end),
        }
    }

    /// Check if a cell lies inside
    pub fn contains_cell(&self, row: u32, col: u16) -> bool {
        row >= self.row_start && row <= self.row_end && col >= self.col_start && col <= self.col_end
    }

    /// Check if `other` lies entirely inside this rectangle
    pub fn contains(&self, other: &CellRect) -> bool {
        other.row_start >= self.row_start
            && other.row_end <= self.row_end
            && other.col_start >= self.col_start
            && other.col_end <= self.col_end
    }

    /// Check if the rectangles share at least one cell
    pub fn overlaps(&self, other: &CellRect) -> bool {
        self.row_start <= other.row_end
            && self.row_end >= other.row_start
            && self.col_start <= other.col_end
            && self.col_end >= other.col_start
    }

    /// Grow by a margin on every side, clamped to the sheet bounds
    pub fn expand(&self, rows: u32, cols: u16) -> Self {
        Self {
            row_start: self.row_start.saturating_sub(rows),
            row_end: self.row_end.saturating_add(rows).min(MAX_ROWS - 1),
            col_start: self.col_start.saturating_sub(cols),
            col_end: self.col_end.saturating_add(cols).min(MAX_COLS - 1),
        }
    }

    /// Smallest rectangle covering both
    pub fn bounding(&self, other: &CellRect) -> Self {
        Self {
            row_start: self.row_start.min(other.row_start),
            row_end: self.row_end.max(other.row_end),
            col_start: self.col_start.min(other.col_start),
            col_end: self.col_end.max(other.col_end),
        }
    }

    /// The union of two rectangles, when that union is itself a rectangle
    ///
    /// That holds when one contains the other, or when they share a full edge span
    /// and overlap or touch along the other axis.
    pub fn union(&self, other: &CellRect) -> Option<Self> {
        if self.contains(other) {
            return Some(*self);
        }
        if other.contains(self) {
            return Some(*other);
        }

        let same_cols = self.col_start == other.col_start && self.col_end == other.col_end;
        let rows_touch = self.row_start <= other.row_end.saturating_add(1)
            && other.row_start <= self.row_end.saturating_add(1);
        if same_cols && rows_touch {
            return Some(self.bounding(other));
        }

        let same_rows = self.row_start == other.row_start && self.row_end == other.row_end;
        let cols_touch = self.col_start <= other.col_end.saturating_add(1)
            && other.col_start <= self.col_end.saturating_add(1);
        if same_rows && cols_touch {
            return Some(self.bounding(other));
        }

        None
    }

    /// Number of rows covered
    pub fn row_count(&self) -> u32 {
        self.row_end - self.row_start + 1
    }

    /// Number of columns covered
    pub fn col_count(&self) -> u16 {
        self.col_end - self.col_start + 1
    }

    /// Number of cells covered
    pub fn cell_count(&self) -> u64 {
        self.row_count() as u64 * self.col_count() as u64
    }
}

impl From<CellRange> for CellRect {
    fn from(range: CellRange) -> Self {
        Self::new(range.start.row, range.end.row, range.start.col, range.end.col)
    }
}

impl fmt::Display for CellRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows {}-{} cols {}-{}",
            self.row_start, self.row_end, self.col_start, self.col_end
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts_corners() {
        assert_eq!(CellRect::new(9, 0, 5, 1), CellRect::new(0, 9, 1, 5));
    }

    #[test]
    fn test_contains_and_overlaps() {
        let outer = CellRect::new(0, 20, 0, 9);
        assert!(outer.contains(&CellRect::new(5, 10, 2, 3)));
        assert!(!outer.contains(&CellRect::new(5, 21, 2, 3)));
        assert!(outer.overlaps(&CellRect::new(20, 30, 9, 12)));
        assert!(!outer.overlaps(&CellRect::new(21, 30, 0, 9)));
    }

    #[test]
    fn test_expand_clamps() {
        let r = CellRect::new(2, 10, 1, 3).expand(5, 5);
        assert_eq!(r, CellRect::new(0, 15, 0, 8));

        let edge = CellRect::new(MAX_ROWS - 1, MAX_ROWS - 1, MAX_COLS - 1, MAX_COLS - 1);
        assert_eq!(edge.expand(10, 10).row_end, MAX_ROWS - 1);
        assert_eq!(edge.expand(10, 10).col_end, MAX_COLS - 1);
    }

    #[test]
    fn test_union() {
        let a = CellRect::new(0, 9, 0, 9);
        assert_eq!(a.union(&CellRect::new(8, 20, 0, 9)), Some(CellRect::new(0, 20, 0, 9)));
        // Adjacent rows
        assert_eq!(a.union(&CellRect::new(10, 12, 0, 9)), Some(CellRect::new(0, 12, 0, 9)));
        // Adjacent columns
        assert_eq!(a.union(&CellRect::new(0, 9, 10, 15)), Some(CellRect::new(0, 9, 0, 15)));
        // Contained
        assert_eq!(a.union(&CellRect::new(2, 3, 2, 3)), Some(a));
        // Gap
        assert_eq!(a.union(&CellRect::new(11, 12, 0, 9)), None);
        // L-shaped union is not a rectangle
        assert_eq!(a.union(&CellRect::new(5, 15, 5, 15)), None);
    }

    #[test]
    fn test_from_range_and_cell_count() {
        let rect = CellRect::from(CellRange::from_indices(0, 0, MAX_ROWS - 1, 0));
        assert_eq!(rect, CellRect::new(0, MAX_ROWS - 1, 0, 0));
        assert_eq!(rect.cell_count(), MAX_ROWS as u64);
        assert_eq!(CellRect::new(0, MAX_ROWS - 1, 0, MAX_COLS - 1).cell_count(), 17_179_869_184);
    }
}
