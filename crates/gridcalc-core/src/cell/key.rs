//! Sheet identifiers and canonical cell keys

use super::address::CellAddress;
use std::fmt;
use std::sync::Arc;

/// Identifier of a sheet
///
/// Sheet ids come from the storage layer (typically a UUID or short slug) and are
/// cloned into every [`CellKey`], so the text is shared behind an `Arc`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SheetId(Arc<str>);

impl SheetId {
    /// Create a sheet id
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        SheetId(Arc::from(id.as_ref()))
    }

    /// Get the id text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SheetId {
    fn from(s: &str) -> Self {
        SheetId::new(s)
    }
}

impl From<String> for SheetId {
    fn from(s: String) -> Self {
        SheetId(Arc::from(s))
    }
}

impl AsRef<str> for SheetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique key for a cell (sheet + 0-based row/column)
///
/// Two keys are equal iff they name the same cell. This is the lookup key of the
/// cell store and the node type of the dependency graph.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellKey {
    pub sheet: SheetId,
    pub row: u32,
    pub col: u16,
}

impl CellKey {
    /// Create a new cell key
    pub fn new(sheet: impl Into<SheetId>, row: u32, col: u16) -> Self {
        Self {
            sheet: sheet.into(),
            row,
            col,
        }
    }

    /// Create from a sheet and an A1-level address (absolute markers are dropped)
    pub fn from_address(sheet: &SheetId, addr: &CellAddress) -> Self {
        Self {
            sheet: sheet.clone(),
            row: addr.row,
            col: addr.col,
        }
    }

    /// Parse a reference like `A1` within the given sheet
    pub fn parse(sheet: impl Into<SheetId>, reference: &str) -> Option<Self> {
        let addr = CellAddress::parse(reference).ok()?;
        Some(Self::new(sheet, addr.row, addr.col))
    }

    /// The relative A1 address of this cell
    pub fn address(&self) -> CellAddress {
        CellAddress::new(self.row, self.col)
    }

    /// Format as an unqualified A1 reference
    pub fn to_ref(&self) -> String {
        self.address().to_a1_string()
    }
}

impl fmt::Debug for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.sheet, self.to_ref())
    }
}
