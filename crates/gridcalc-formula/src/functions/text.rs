//! Text functions

use super::{arg, flatten, scalar_number, scalar_text};
use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use gridcalc_core::CellError;

fn take_left(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn take_right(s: &str, n: usize) -> String {
    let len = s.chars().count();
    if n >= len {
        return s.to_string();
    }
    s.chars().skip(len - n).collect()
}

fn map_text(value: &FormulaValue, f: impl FnOnce(String) -> FormulaValue) -> FormulaValue {
    match scalar_text(value) {
        Ok(s) => f(s),
        Err(e) => FormulaValue::Error(e),
    }
}

/// Character count argument of LEFT/RIGHT (defaults to 1)
fn num_chars(args: &[FormulaValue]) -> Result<usize, CellError> {
    let Some(value) = args.get(1) else {
        return Ok(1);
    };
    let n = scalar_number(value)?.trunc();
    if n < 0.0 {
        return Err(CellError::Value);
    }
    Ok(n as usize)
}

/// LEN(text)
pub fn fn_len(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(map_text(arg(args, 0), |s| {
        FormulaValue::Number(s.chars().count() as f64)
    }))
}

/// LEFT(text, [num_chars])
pub fn fn_left(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let n = match num_chars(args) {
        Ok(n) => n,
        Err(e) => return Ok(FormulaValue::Error(e)),
    };
    Ok(map_text(arg(args, 0), |s| {
        FormulaValue::String(take_left(&s, n))
    }))
}

/// RIGHT(text, [num_chars])
pub fn fn_right(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let n = match num_chars(args) {
        Ok(n) => n,
        Err(e) => return Ok(FormulaValue::Error(e)),
    };
    Ok(map_text(arg(args, 0), |s| {
        FormulaValue::String(take_right(&s, n))
    }))
}

/// LOWER(text)
pub fn fn_lower(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(map_text(arg(args, 0), |s| FormulaValue::String(s.to_lowercase())))
}

/// UPPER(text)
pub fn fn_upper(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(map_text(arg(args, 0), |s| FormulaValue::String(s.to_uppercase())))
}

/// TRIM(text) - strips leading/trailing spaces and collapses inner runs
pub fn fn_trim(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(map_text(arg(args, 0), |s| {
        FormulaValue::String(s.split_whitespace().collect::<Vec<_>>().join(" "))
    }))
}

/// CONCAT(text1, [text2], ...)
///
/// Also used for legacy CONCATENATE.
pub fn fn_concat(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let mut out = String::new();
    for value in flatten(args) {
        if let FormulaValue::Error(e) = value {
            return Ok(FormulaValue::Error(*e));
        }
        out.push_str(&value.as_string());
    }
    Ok(FormulaValue::String(out))
}
