//! Cell value types

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::fmt;
use std::sync::Arc;

/// A scalar cell value, or exactly one error tag
///
/// `Empty` stands for "no value" (null). Raw values and computed values share this
/// type; a computed value is never both a scalar and an error.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "value", rename_all = "snake_case"))]
pub enum CellValue {
    /// Empty cell (no value)
    #[default]
    Empty,

    /// Boolean value (TRUE/FALSE)
    Boolean(bool),

    /// Numeric value
    Number(f64),

    /// String value
    String(SharedString),

    /// Date/time value
    Date(NaiveDateTime),

    /// Error value (#VALUE!, #REF!, etc.)
    Error(CellError),
}

impl CellValue {
    /// Create a new string value
    pub fn string<S: AsRef<str>>(s: S) -> Self {
        CellValue::String(SharedString::new(s))
    }

    /// Check if the value is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Check if the value is an error
    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    /// Get the error tag, if this is one
    pub fn as_error(&self) -> Option<CellError> {
        match self {
            CellValue::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// Try to get the value as a number
    ///
    /// Dates convert to their spreadsheet serial number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Boolean(true) => Some(1.0),
            CellValue::Boolean(false) => Some(0.0),
            CellValue::Date(dt) => Some(date_to_serial(dt)),
            _ => None,
        }
    }

    /// Try to get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Boolean(b) => Some(*b),
            CellValue::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    /// Try to get the value as a string slice
    pub fn as_string(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::Boolean(_) => "boolean",
            CellValue::Number(_) => "number",
            CellValue::String(_) => "string",
            CellValue::Date(_) => "date",
            CellValue::Error(_) => "error",
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            CellValue::String(s) => write!(f, "{}", s.as_str()),
            CellValue::Date(dt) => {
                if dt.time().num_seconds_from_midnight() == 0 {
                    write!(f, "{}", dt.date())
                } else {
                    write!(f, "{}", dt)
                }
            }
            CellValue::Error(e) => write!(f, "{}", e),
        }
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::string(s)
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::string(s)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(dt: NaiveDateTime) -> Self {
        CellValue::Date(dt)
    }
}

impl From<CellError> for CellValue {
    fn from(e: CellError) -> Self {
        CellValue::Error(e)
    }
}

/// Spreadsheet serial number of a date/time (days since 1899-12-30)
pub fn date_to_serial(dt: &NaiveDateTime) -> f64 {
    let days = match NaiveDate::from_ymd_opt(1899, 12, 30) {
        Some(epoch) => dt.date().signed_duration_since(epoch).num_days() as f64,
        None => 0.0,
    };
    days + dt.time().num_seconds_from_midnight() as f64 / 86_400.0
}

/// Formula error tags
///
/// The set is closed: every failure a formula can produce maps onto one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum CellError {
    /// #VALUE! - Wrong type of argument or operand
    Value,
    /// #REF! - Invalid cell reference, also used for circular references
    Ref,
    /// #DIV/0! - Division by zero
    #[cfg_attr(feature = "serde", serde(rename = "DIV_BY_ZERO"))]
    Div0,
    /// #NAME? - Unrecognized function or name
    Name,
    /// #N/A - Value not available
    #[cfg_attr(feature = "serde", serde(rename = "NOT_AVAILABLE"))]
    Na,
    /// #NUM! - Invalid numeric value
    Num,
    /// #NULL! - Incorrect range operator
    Null,
    /// #ERROR! - Anything else, e.g. a formula that does not parse
    Generic,
}

impl CellError {
    /// All error tags
    pub const ALL: [CellError; 8] = [
        CellError::Value,
        CellError::Ref,
        CellError::Div0,
        CellError::Name,
        CellError::Na,
        CellError::Num,
        CellError::Null,
        CellError::Generic,
    ];

    /// Get the display string for this error
    pub fn as_str(&self) -> &'static str {
        match self {
            CellError::Value => "#VALUE!",
            CellError::Ref => "#REF!",
            CellError::Div0 => "#DIV/0!",
            CellError::Name => "#NAME?",
            CellError::Na => "#N/A",
            CellError::Num => "#NUM!",
            CellError::Null => "#NULL!",
            CellError::Generic => "#ERROR!",
        }
    }

    /// Parse an error string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared string for cell text
///
/// Cell values are cloned into the evaluator and into persistence batches, so the
/// text sits behind an `Arc<str>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SharedString(Arc<str>);

impl SharedString {
    /// Create a new shared string
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        SharedString(Arc::from(s.as_ref()))
    }

    /// Get the string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the length of the string in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the string is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for SharedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SharedString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SharedString {
    fn from(s: &str) -> Self {
        SharedString::new(s)
    }
}

impl From<String> for SharedString {
    fn from(s: String) -> Self {
        SharedString(Arc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_conversions() {
        assert_eq!(CellValue::from(42), CellValue::Number(42.0));
        assert_eq!(CellValue::from(true), CellValue::Boolean(true));
        assert_eq!(CellValue::from("hello").as_string(), Some("hello"));
    }

    #[test]
    fn test_cell_value_as_number() {
        assert_eq!(CellValue::Number(42.0).as_number(), Some(42.0));
        assert_eq!(CellValue::Boolean(true).as_number(), Some(1.0));
        assert_eq!(CellValue::string("hello").as_number(), None);
        assert_eq!(CellValue::Empty.as_number(), None);

        let date = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(CellValue::Date(date).as_number(), Some(45292.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(CellValue::Number(14.0).to_string(), "14");
        assert_eq!(CellValue::Number(0.5).to_string(), "0.5");
        assert_eq!(CellValue::Boolean(false).to_string(), "FALSE");
        assert_eq!(CellValue::Error(CellError::Div0).to_string(), "#DIV/0!");
        assert_eq!(CellValue::Empty.to_string(), "");
    }

    #[test]
    fn test_cell_error_parse() {
        for e in CellError::ALL {
            assert_eq!(CellError::parse(e.as_str()), Some(e));
        }
        assert_eq!(CellError::parse("#n/a"), Some(CellError::Na));
        assert_eq!(CellError::parse("#SPILL!"), None);
    }
}
