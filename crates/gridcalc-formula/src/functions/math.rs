//! Math functions

use super::{arg, flatten, scalar_number};
use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use gridcalc_core::{date_to_serial, CellError};

/// Numeric values among the arguments, ranges flattened
///
/// Text, booleans and empty cells are skipped; the first error aborts.
fn numbers(args: &[FormulaValue]) -> Result<Vec<f64>, CellError> {
    let mut out = Vec::new();
    for value in flatten(args) {
        match value {
            FormulaValue::Number(n) => out.push(*n),
            FormulaValue::Date(dt) => out.push(date_to_serial(dt)),
            FormulaValue::Error(e) => return Err(*e),
            _ => {} // Ignore non-numeric
        }
    }
    Ok(out)
}

fn with_numbers(
    args: &[FormulaValue],
    f: impl FnOnce(Vec<f64>) -> FormulaValue,
) -> FormulaResult<FormulaValue> {
    Ok(match numbers(args) {
        Ok(values) => f(values),
        Err(e) => FormulaValue::Error(e),
    })
}

fn with_number(
    value: &FormulaValue,
    f: impl FnOnce(f64) -> FormulaValue,
) -> FormulaResult<FormulaValue> {
    Ok(match scalar_number(value) {
        Ok(n) => f(n),
        Err(e) => FormulaValue::Error(e),
    })
}

/// SUM function
pub fn fn_sum(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    with_numbers(args, |values| FormulaValue::number(values.iter().sum()))
}

/// AVERAGE function
pub fn fn_average(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    with_numbers(args, |values| {
        if values.is_empty() {
            FormulaValue::Error(CellError::Div0)
        } else {
            FormulaValue::number(values.iter().sum::<f64>() / values.len() as f64)
        }
    })
}

/// MIN function (0 when there are no numbers)
pub fn fn_min(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    with_numbers(args, |values| {
        FormulaValue::Number(values.into_iter().reduce(f64::min).unwrap_or(0.0))
    })
}

/// MAX function (0 when there are no numbers)
pub fn fn_max(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    with_numbers(args, |values| {
        FormulaValue::Number(values.into_iter().reduce(f64::max).unwrap_or(0.0))
    })
}

/// COUNT function - counts numeric values, errors included in ranges are skipped
pub fn fn_count(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let count = flatten(args)
        .filter(|v| matches!(v, FormulaValue::Number(_) | FormulaValue::Date(_)))
        .count();
    Ok(FormulaValue::Number(count as f64))
}

/// COUNTA function - counts non-empty values
pub fn fn_counta(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let count = flatten(args)
        .filter(|v| !matches!(v, FormulaValue::Empty))
        .count();
    Ok(FormulaValue::Number(count as f64))
}

/// PRODUCT function (0 when there are no numbers)
pub fn fn_product(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    with_numbers(args, |values| {
        if values.is_empty() {
            FormulaValue::Number(0.0)
        } else {
            FormulaValue::number(values.iter().product())
        }
    })
}

/// ABS(number)
pub fn fn_abs(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    with_number(arg(args, 0), |n| FormulaValue::Number(n.abs()))
}

const MAX_ROUND_DIGITS: f64 = 308.0;

/// ROUND(number, [num_digits])
///
/// Rounds half away from zero; negative digits round left of the decimal point.
pub fn fn_round(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let number = match scalar_number(arg(args, 0)) {
        Ok(n) => n,
        Err(e) => return Ok(FormulaValue::Error(e)),
    };
    let num_digits = match scalar_number(arg(args, 1)) {
        // Past 308 digits the power of ten leaves the f64 range
        Ok(n) => n.trunc().clamp(-MAX_ROUND_DIGITS, MAX_ROUND_DIGITS) as i32,
        Err(e) => return Ok(FormulaValue::Error(e)),
    };

    // f64::round already rounds half away from zero
    let result = if num_digits >= 0 {
        let multiplier = 10_f64.powi(num_digits);
        let scaled = number * multiplier;
        if !scaled.is_finite() {
            // Already exact at this many digits
            return Ok(FormulaValue::number(number));
        }
        scaled.round() / multiplier
    } else {
        let divisor = 10_f64.powi(-num_digits);
        (number / divisor).round() * divisor
    };

    Ok(FormulaValue::number(result))
}

/// INT(number) - rounds down to the nearest integer
pub fn fn_int(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    with_number(arg(args, 0), |n| FormulaValue::Number(n.floor()))
}

/// MOD(number, divisor)
///
/// The result has the sign of the divisor: `number - divisor * floor(number / divisor)`.
pub fn fn_mod(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let number = match scalar_number(arg(args, 0)) {
        Ok(n) => n,
        Err(e) => return Ok(FormulaValue::Error(e)),
    };
    let divisor = match scalar_number(arg(args, 1)) {
        Ok(n) => n,
        Err(e) => return Ok(FormulaValue::Error(e)),
    };

    if divisor == 0.0 {
        return Ok(FormulaValue::Error(CellError::Div0));
    }

    Ok(FormulaValue::number(
        number - divisor * (number / divisor).floor(),
    ))
}

/// SQRT(number)
pub fn fn_sqrt(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    with_number(arg(args, 0), |n| {
        if n < 0.0 {
            FormulaValue::Error(CellError::Num)
        } else {
            FormulaValue::Number(n.sqrt())
        }
    })
}

/// POWER(number, power)
pub fn fn_power(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let base = match scalar_number(arg(args, 0)) {
        Ok(n) => n,
        Err(e) => return Ok(FormulaValue::Error(e)),
    };
    let exponent = match scalar_number(arg(args, 1)) {
        Ok(n) => n,
        Err(e) => return Ok(FormulaValue::Error(e)),
    };

    if base == 0.0 && exponent < 0.0 {
        return Ok(FormulaValue::Error(CellError::Div0));
    }

    Ok(FormulaValue::number(base.powf(exponent)))
}

/// RAND() - Returns a random number in [0, 1)
pub fn fn_rand(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    Ok(FormulaValue::Number(rng.gen::<f64>()))
}
