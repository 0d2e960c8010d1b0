//! Interpretation of text typed into a cell

use gridcalc_core::{CellUpdate, CellValue};
use gridcalc_formula::is_formula;

/// Turn user input into a cell update
///
/// - text starting with `=` is a formula (kept verbatim, never trimmed)
/// - empty text clears the value
/// - `TRUE` / `FALSE` in any case are booleans
/// - finite numbers are numbers
/// - anything else is a string
pub fn parse_input(text: &str) -> CellUpdate {
    if is_formula(text) {
        return CellUpdate::new().formula(text);
    }
    CellUpdate::new().raw_value(parse_literal(text))
}

/// Demote formula text that lacks the leading `=` to a literal
///
/// Only `=`-prefixed text is ever evaluated, whichever way it reaches a cell.
pub fn normalize_update(mut update: CellUpdate) -> CellUpdate {
    if let Some(Some(text)) = &update.formula {
        if !is_formula(text) {
            update.raw_value = Some(parse_literal(text));
            update.formula = None;
            update.computed_value = None;
        }
    }
    update
}

/// Interpret non-formula text as a scalar
pub fn parse_literal(text: &str) -> CellValue {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    if trimmed.eq_ignore_ascii_case("TRUE") {
        return CellValue::Boolean(true);
    }
    if trimmed.eq_ignore_ascii_case("FALSE") {
        return CellValue::Boolean(false);
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => CellValue::Number(n),
        _ => CellValue::string(text),
    }
}
