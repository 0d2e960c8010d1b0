//! Logical and information functions

use super::{arg, flatten};
use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use gridcalc_core::CellError;

/// IF(condition, value_if_true, [value_if_false])
pub fn fn_if(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let condition = match arg(args, 0) {
        FormulaValue::Boolean(b) => *b,
        FormulaValue::Number(n) => *n != 0.0,
        FormulaValue::Empty => false,
        FormulaValue::Error(e) => return Ok(FormulaValue::Error(*e)),
        _ => return Ok(FormulaValue::Error(CellError::Value)),
    };

    if condition {
        Ok(arg(args, 1).clone())
    } else {
        Ok(args.get(2).cloned().unwrap_or(FormulaValue::Boolean(false)))
    }
}

/// Truth values of the arguments; text and empty cells are skipped
fn truth_values(args: &[FormulaValue]) -> Result<Vec<bool>, CellError> {
    let mut out = Vec::new();
    for value in flatten(args) {
        match value {
            FormulaValue::Boolean(b) => out.push(*b),
            FormulaValue::Number(n) => out.push(*n != 0.0),
            FormulaValue::Error(e) => return Err(*e),
            _ => {}
        }
    }
    Ok(out)
}

/// AND function
pub fn fn_and(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(match truth_values(args) {
        Ok(values) if values.is_empty() => FormulaValue::Error(CellError::Value),
        Ok(values) => FormulaValue::Boolean(values.into_iter().all(|b| b)),
        Err(e) => FormulaValue::Error(e),
    })
}

/// OR function
pub fn fn_or(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(match truth_values(args) {
        Ok(values) if values.is_empty() => FormulaValue::Error(CellError::Value),
        Ok(values) => FormulaValue::Boolean(values.into_iter().any(|b| b)),
        Err(e) => FormulaValue::Error(e),
    })
}

/// NOT function
pub fn fn_not(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    match arg(args, 0) {
        FormulaValue::Error(e) => Ok(FormulaValue::Error(*e)),
        FormulaValue::Array(_) => Ok(FormulaValue::Error(CellError::Value)),
        v => Ok(match v.as_bool() {
            Some(b) => FormulaValue::Boolean(!b),
            None => FormulaValue::Error(CellError::Value),
        }),
    }
}

/// IFERROR(value, value_if_error)
pub fn fn_iferror(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    match arg(args, 0) {
        FormulaValue::Error(_) => Ok(arg(args, 1).clone()),
        v => Ok(v.clone()),
    }
}

/// ISERROR(value)
pub fn fn_iserror(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Boolean(arg(args, 0).is_error()))
}

/// ISBLANK(value)
pub fn fn_isblank(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Boolean(matches!(
        arg(args, 0),
        FormulaValue::Empty
    )))
}

/// ISNUMBER(value)
pub fn fn_isnumber(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Boolean(matches!(
        arg(args, 0),
        FormulaValue::Number(_) | FormulaValue::Date(_)
    )))
}

/// ISTEXT(value)
pub fn fn_istext(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Boolean(matches!(
        arg(args, 0),
        FormulaValue::String(_)
    )))
}

#[cfg(test)]
mod tests {
    use crate::evaluator::{evaluate, EvaluationContext, FormulaValue};
    use crate::parser::parse_formula;
    use gridcalc_core::CellError;

    fn eval(formula: &str) -> FormulaValue {
        let ast = parse_formula(formula).unwrap();
        evaluate(&ast, &EvaluationContext::simple()).unwrap()
    }

    #[test]
    fn test_if() {
        assert_eq!(eval("=IF(TRUE,1,2)"), FormulaValue::Number(1.0));
        assert_eq!(eval("=IF(FALSE,1,2)"), FormulaValue::Number(2.0));
        assert_eq!(eval("=IF(0,1)"), FormulaValue::Boolean(false));
        assert_eq!(
            eval("=IF(1>0,\"Yes\",\"No\")"),
            FormulaValue::String("Yes".into())
        );
        assert_eq!(eval("=IF(\"x\",1,2)"), FormulaValue::Error(CellError::Value));
    }

    #[test]
    fn test_and_or_not() {
        assert_eq!(eval("=AND(TRUE,TRUE)"), FormulaValue::Boolean(true));
        assert_eq!(eval("=AND(TRUE,0)"), FormulaValue::Boolean(false));
        assert_eq!(eval("=OR(FALSE,1)"), FormulaValue::Boolean(true));
        assert_eq!(eval("=OR(FALSE,FALSE)"), FormulaValue::Boolean(false));
        assert_eq!(eval("=AND(\"x\")"), FormulaValue::Error(CellError::Value));
        assert_eq!(eval("=NOT(TRUE)"), FormulaValue::Boolean(false));
        assert_eq!(eval("=NOT(0)"), FormulaValue::Boolean(true));
    }

    #[test]
    fn test_error_inspection() {
        assert_eq!(eval("=IFERROR(1/0,\"div\")"), FormulaValue::String("div".into()));
        assert_eq!(eval("=IFERROR(5,0)"), FormulaValue::Number(5.0));
        assert_eq!(eval("=ISERROR(#REF!)"), FormulaValue::Boolean(true));
        assert_eq!(eval("=ISERROR(1)"), FormulaValue::Boolean(false));
    }

    #[test]
    fn test_type_predicates() {
        assert_eq!(eval("=ISNUMBER(1)"), FormulaValue::Boolean(true));
        assert_eq!(eval("=ISNUMBER(\"1\")"), FormulaValue::Boolean(false));
        assert_eq!(eval("=ISTEXT(\"a\")"), FormulaValue::Boolean(true));
        assert_eq!(eval("=ISBLANK(\"\")"), FormulaValue::Boolean(false));
    }
}
