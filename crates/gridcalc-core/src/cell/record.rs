//! Cell records and partial updates

use super::key::{CellKey, SheetId};
use super::value::CellValue;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Merge span anchored at a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CellMerge {
    pub row_span: u32,
    pub col_span: u16,
}

impl CellMerge {
    /// Create a merge span
    pub fn new(row_span: u32, col_span: u16) -> Self {
        Self { row_span, col_span }
    }
}

/// Cell styling
///
/// Formats are owned by the rendering layer; the engine stores and persists them
/// without interpreting any property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CellFormat(BTreeMap<String, String>);

impl CellFormat {
    /// Create an empty format
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style property setter
    pub fn with(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(property.into(), value.into());
        self
    }

    /// Get a property
    pub fn get(&self, property: &str) -> Option<&str> {
        self.0.get(property).map(String::as_str)
    }

    /// Set a property
    pub fn set(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.0.insert(property.into(), value.into());
    }

    /// Check whether no property is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over properties in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One cell of a sheet
///
/// `formula` and `raw_value` are mutually exclusive sources of truth. With a
/// formula, `computed_value` is derived and refreshed by recalculation; without
/// one, `computed_value` always equals `raw_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: String,
    pub sheet_id: SheetId,
    pub row: u32,
    pub col: u16,
    pub raw_value: CellValue,
    pub formula: Option<String>,
    pub computed_value: CellValue,
    pub format: Option<CellFormat>,
    pub merge: Option<CellMerge>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cell {
    /// Create an empty cell at a key
    ///
    /// The id defaults to the key's `sheet!A1` form until storage assigns one.
    pub fn new(key: &CellKey) -> Self {
        let now = Utc::now();
        Self {
            id: key.to_string(),
            sheet_id: key.sheet.clone(),
            row: key.row,
            col: key.col,
            raw_value: CellValue::Empty,
            formula: None,
            computed_value: CellValue::Empty,
            format: None,
            merge: None,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The key of this cell
    pub fn key(&self) -> CellKey {
        CellKey {
            sheet: self.sheet_id.clone(),
            row: self.row,
            col: self.col,
        }
    }

    /// Check if the cell holds a formula
    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }

    /// Check if the cell has neither a value nor a formula
    pub fn has_no_content(&self) -> bool {
        self.formula.is_none() && self.raw_value.is_empty()
    }

    /// Check if the cell carries nothing worth keeping in a sparse store
    pub fn is_logically_empty(&self) -> bool {
        self.has_no_content()
            && self.format.as_ref().map_or(true, CellFormat::is_empty)
            && self.merge.is_none()
            && self.note.is_none()
    }

    /// Apply a partial update, preserving untouched fields
    ///
    /// A raw value replaces any formula (and becomes the computed value); a formula
    /// replaces any raw value and leaves the computed value stale until the next
    /// recalculation. When both are given the formula wins.
    pub fn apply(&mut self, update: CellUpdate) {
        let CellUpdate {
            raw_value,
            formula,
            computed_value,
            format,
            merge,
            note,
        } = update;

        if let Some(raw) = raw_value {
            self.formula = None;
            self.computed_value = raw.clone();
            self.raw_value = raw;
        }

        match formula {
            Some(Some(text)) => {
                self.formula = Some(text);
                self.raw_value = CellValue::Empty;
            }
            Some(None) => {
                self.formula = None;
                self.computed_value = self.raw_value.clone();
            }
            None => {}
        }

        // A cached result only means something next to a formula
        if let Some(computed) = computed_value {
            if self.formula.is_some() {
                self.computed_value = computed;
            }
        }

        if let Some(format) = format {
            self.format = format;
        }
        if let Some(merge) = merge {
            self.merge = merge;
        }
        if let Some(note) = note {
            self.note = note;
        }

        self.updated_at = Utc::now();
    }

    /// Logically clear the cell: value and formula are nulled, styling is kept
    pub fn clear_content(&mut self) {
        self.raw_value = CellValue::Empty;
        self.formula = None;
        self.computed_value = CellValue::Empty;
        self.updated_at = Utc::now();
    }
}

/// A partial cell update
///
/// `None` leaves a field untouched. For nullable fields the inner `Option` is the
/// new value, so `Some(None)` removes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellUpdate {
    pub raw_value: Option<CellValue>,
    pub formula: Option<Option<String>>,
    pub computed_value: Option<CellValue>,
    pub format: Option<Option<CellFormat>>,
    pub merge: Option<Option<CellMerge>>,
    pub note: Option<Option<String>>,
}

impl CellUpdate {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a literal value (clears any formula)
    pub fn raw_value(mut self, value: impl Into<CellValue>) -> Self {
        self.raw_value = Some(value.into());
        self
    }

    /// Set formula text (clears any raw value)
    pub fn formula(mut self, text: impl Into<String>) -> Self {
        self.formula = Some(Some(text.into()));
        self
    }

    /// Set the cached result of the formula
    pub fn computed_value(mut self, value: impl Into<CellValue>) -> Self {
        self.computed_value = Some(value.into());
        self
    }

    /// Replace the format
    pub fn format(mut self, format: Option<CellFormat>) -> Self {
        self.format = Some(format);
        self
    }

    /// Replace the merge span
    pub fn merge(mut self, merge: Option<CellMerge>) -> Self {
        self.merge = Some(merge);
        self
    }

    /// Replace the note
    pub fn note(mut self, note: Option<String>) -> Self {
        self.note = Some(note);
        self
    }

    /// Check whether the update changes the value or formula of a cell
    pub fn touches_content(&self) -> bool {
        self.raw_value.is_some() || self.formula.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cell() -> Cell {
        Cell::new(&CellKey::new("s1", 0, 0))
    }

    #[test]
    fn test_raw_value_sets_computed() {
        let mut c = cell();
        c.apply(CellUpdate::new().raw_value(5));
        assert_eq!(c.raw_value, CellValue::Number(5.0));
        assert_eq!(c.computed_value, CellValue::Number(5.0));
        assert!(!c.is_formula());
    }

    #[test]
    fn test_formula_replaces_raw_value() {
        let mut c = cell();
        c.apply(CellUpdate::new().raw_value(5));
        c.apply(CellUpdate::new().formula("=A2*2"));
        assert_eq!(c.formula.as_deref(), Some("=A2*2"));
        assert_eq!(c.raw_value, CellValue::Empty);

        c.apply(CellUpdate::new().computed_value(10));
        assert_eq!(c.computed_value, CellValue::Number(10.0));

        c.apply(CellUpdate::new().raw_value("text"));
        assert_eq!(c.formula, None);
        assert_eq!(c.computed_value, CellValue::string("text"));
    }

    #[test]
    fn test_computed_ignored_without_formula() {
        let mut c = cell();
        c.apply(CellUpdate::new().raw_value(1));
        c.apply(CellUpdate::new().computed_value(99));
        assert_eq!(c.computed_value, CellValue::Number(1.0));
    }

    #[test]
    fn test_partial_update_preserves_other_fields() {
        let mut c = cell();
        let format = CellFormat::new().with("bold", "true");
        c.apply(CellUpdate::new().raw_value(3).format(Some(format.clone())));
        c.apply(CellUpdate::new().note(Some("check".into())));

        assert_eq!(c.raw_value, CellValue::Number(3.0));
        assert_eq!(c.format, Some(format));
        assert_eq!(c.note.as_deref(), Some("check"));
    }

    #[test]
    fn test_apply_stamps_updated_at() {
        let mut c = cell();
        let before = c.updated_at;
        c.apply(CellUpdate::new().raw_value(1));
        assert!(c.updated_at >= before);
        assert_eq!(c.created_at, before);
    }

    #[test]
    fn test_logically_empty() {
        let mut c = cell();
        assert!(c.is_logically_empty());
        c.apply(CellUpdate::new().merge(Some(CellMerge::new(2, 2))));
        assert!(c.has_no_content());
        assert!(!c.is_logically_empty());
    }
}
