//! Date/time functions
//!
//! Dates evaluate to [`FormulaValue::Date`]; arithmetic sees them as serial numbers
//! (days since 1899-12-30).

use super::{arg, scalar_number};
use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use chrono::{Duration, Local, NaiveDate};
use gridcalc_core::CellError;

/// DATE(year, month, day)
///
/// Years 0..1899 are offset by 1900. Months and days outside their usual range roll
/// over into neighbouring months/years, so `DATE(2024, 14, 1)` is 2025-02-01 and
/// `DATE(2024, 3, 0)` is 2024-02-29.
pub fn fn_date(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let mut parts = [0i64; 3];
    for (i, part) in parts.iter_mut().enumerate() {
        match scalar_number(arg(args, i)) {
            // Anything this large lands past year 9999 anyway
            Ok(n) if n.abs() > 1.0e7 => return Ok(FormulaValue::Error(CellError::Num)),
            Ok(n) => *part = n.trunc() as i64,
            Err(e) => return Ok(FormulaValue::Error(e)),
        }
    }
    let [mut year, month, day] = parts;

    if (0..1900).contains(&year) {
        year += 1900;
    }

    // Normalise month overflow/underflow into the year
    let months = year * 12 + (month - 1);
    let year = months.div_euclid(12);
    let month = months.rem_euclid(12) + 1;

    if !(1900..=9999).contains(&year) {
        return Ok(FormulaValue::Error(CellError::Num));
    }

    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, 1)
        .and_then(|first| first.checked_add_signed(Duration::days(day - 1)))
        .and_then(|date| date.and_hms_opt(0, 0, 0));

    Ok(match date {
        Some(dt) => FormulaValue::Date(dt),
        None => FormulaValue::Error(CellError::Num),
    })
}

/// NOW() - current local date and time
pub fn fn_now(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Date(Local::now().naive_local()))
}

/// TODAY() - current local date at midnight
pub fn fn_today(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let today = Local::now().date_naive();
    Ok(match today.and_hms_opt(0, 0, 0) {
        Some(dt) => FormulaValue::Date(dt),
        None => FormulaValue::Error(CellError::Num),
    })
}
