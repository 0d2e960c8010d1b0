//! Formula evaluator
//!
//! Evaluates formula ASTs to produce values.

use crate::ast::{BinaryOperator, FormulaExpr, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use crate::functions::builtin_registry;
use chrono::{NaiveDateTime, Timelike};
use gridcalc_core::{date_to_serial, CellError, CellKey, CellRange, CellRect, CellValue, SheetId};
use std::cmp::Ordering;

/// Value types during formula evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Number(f64),
    String(String),
    Boolean(bool),
    Date(NaiveDateTime),
    Error(CellError),
    Array(Vec<Vec<FormulaValue>>),
    Empty,
}

impl FormulaValue {
    /// Convert to number, if possible
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FormulaValue::Number(n) => Some(*n),
            FormulaValue::Boolean(true) => Some(1.0),
            FormulaValue::Boolean(false) => Some(0.0),
            FormulaValue::Date(dt) => Some(date_to_serial(dt)),
            FormulaValue::String(s) => s.parse().ok(),
            FormulaValue::Empty => Some(0.0),
            _ => None,
        }
    }

    /// Force conversion to number for arithmetic
    pub fn to_number(&self) -> FormulaResult<f64> {
        self.as_number()
            .ok_or_else(|| FormulaError::Evaluation(format!("Cannot convert {:?} to number", self)))
    }

    /// Convert to boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FormulaValue::Boolean(b) => Some(*b),
            FormulaValue::Number(n) => Some(*n != 0.0),
            FormulaValue::Empty => Some(false),
            FormulaValue::String(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    Some(true)
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Some(false)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_string(&self) -> String {
        match self {
            FormulaValue::Number(n) => {
                // Format like Excel: no trailing zeros, but reasonable precision
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            FormulaValue::String(s) => s.clone(),
            FormulaValue::Boolean(true) => "TRUE".to_string(),
            FormulaValue::Boolean(false) => "FALSE".to_string(),
            FormulaValue::Date(dt) => {
                if dt.time().num_seconds_from_midnight() == 0 {
                    dt.date().to_string()
                } else {
                    dt.to_string()
                }
            }
            FormulaValue::Error(e) => e.to_string(),
            FormulaValue::Empty => String::new(),
            FormulaValue::Array(_) => "#VALUE!".to_string(),
        }
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        matches!(self, FormulaValue::Error(_))
    }

    /// Get the error if this is one
    pub fn get_error(&self) -> Option<CellError> {
        match self {
            FormulaValue::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// Wrap a numeric result, turning NaN and infinities into `#NUM!`
    pub fn number(n: f64) -> Self {
        if n.is_finite() {
            FormulaValue::Number(n)
        } else {
            FormulaValue::Error(CellError::Num)
        }
    }
}

impl From<CellValue> for FormulaValue {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Empty => FormulaValue::Empty,
            CellValue::Number(n) => FormulaValue::Number(n),
            CellValue::String(s) => FormulaValue::String(s.as_str().to_string()),
            CellValue::Boolean(b) => FormulaValue::Boolean(b),
            CellValue::Date(dt) => FormulaValue::Date(dt),
            CellValue::Error(e) => FormulaValue::Error(e),
        }
    }
}

impl From<FormulaValue> for CellValue {
    fn from(value: FormulaValue) -> Self {
        match value {
            FormulaValue::Empty => CellValue::Empty,
            FormulaValue::Number(n) if !n.is_finite() => CellValue::Error(CellError::Num),
            FormulaValue::Number(n) => CellValue::Number(n),
            FormulaValue::String(s) => CellValue::String(s.into()),
            FormulaValue::Boolean(b) => CellValue::Boolean(b),
            FormulaValue::Date(dt) => CellValue::Date(dt),
            FormulaValue::Error(e) => CellValue::Error(e),
            FormulaValue::Array(_) => CellValue::Error(CellError::Value),
        }
    }
}

/// Read access to the cells a formula can reference
pub trait ValueLookup {
    /// Resolve a sheet name as written in a formula
    fn resolve_sheet(&self, name: &str) -> Option<SheetId>;

    /// Current value of a cell (`Empty` when absent)
    fn cell_value(&self, key: &CellKey) -> CellValue;

    /// Non-empty cells inside `rect` on `sheet`, in key order
    ///
    /// The default visits every cell of the rectangle. Lookups backed by a sparse
    /// map should override it.
    fn occupied_cells(&self, sheet: &SheetId, rect: CellRect) -> Vec<(CellKey, CellValue)> {
        occupied_by_scan(self, sheet, rect)
    }
}

/// Collect the non-empty cells of a rectangle by reading each one
pub fn occupied_by_scan<L: ValueLookup + ?Sized>(
    lookup: &L,
    sheet: &SheetId,
    rect: CellRect,
) -> Vec<(CellKey, CellValue)> {
    let mut cells = Vec::new();
    for row in rect.row_start..=rect.row_end {
        for col in rect.col_start..=rect.col_end {
            let key = CellKey::new(sheet.clone(), row, col);
            let value = lookup.cell_value(&key);
            if !value.is_empty() {
                cells.push((key, value));
            }
        }
    }
    cells
}

/// Ranges larger than this evaluate to their occupied cells only, as one row
const DENSE_RANGE_LIMIT: u64 = 1 << 16;

/// Context for formula evaluation
pub struct EvaluationContext<'a> {
    /// Cell lookups; `None` evaluates every reference as empty
    pub lookup: Option<&'a dyn ValueLookup>,
    /// Sheet that unqualified references resolve against
    pub current_sheet: SheetId,
    /// Current cell row
    pub current_row: u32,
    /// Current cell column
    pub current_col: u16,
}

impl<'a> EvaluationContext<'a> {
    /// Create a context for evaluating the formula of `cell`
    pub fn new(lookup: &'a dyn ValueLookup, cell: &CellKey) -> Self {
        Self {
            lookup: Some(lookup),
            current_sheet: cell.sheet.clone(),
            current_row: cell.row,
            current_col: cell.col,
        }
    }

    /// Create a simple context without cells (for testing)
    pub fn simple() -> Self {
        Self {
            lookup: None,
            current_sheet: SheetId::new(""),
            current_row: 0,
            current_col: 0,
        }
    }

    /// Resolve an optional sheet qualifier to a sheet id
    pub fn resolve_sheet(&self, sheet: Option<&str>) -> Option<SheetId> {
        match (sheet, self.lookup) {
            (None, _) => Some(self.current_sheet.clone()),
            (Some(name), Some(lookup)) => lookup.resolve_sheet(name),
            (Some(_), None) => None,
        }
    }

    /// Get a cell value
    pub fn get_cell_value(&self, sheet: Option<&str>, row: u32, col: u16) -> FormulaValue {
        let Some(lookup) = self.lookup else {
            return FormulaValue::Empty;
        };

        match self.resolve_sheet(sheet) {
            Some(sheet) => lookup.cell_value(&CellKey { sheet, row, col }).into(),
            None => FormulaValue::Error(CellError::Ref),
        }
    }

    /// Get a range of cell values as an array
    ///
    /// Small ranges keep their shape, empty cells included. Larger ones collapse to
    /// a single row of the occupied cells, which aggregates read the same way.
    pub fn get_range_values(&self, sheet: Option<&str>, range: &CellRange) -> FormulaValue {
        let Some(lookup) = self.lookup else {
            return FormulaValue::Array(vec![]);
        };

        let Some(sheet) = self.resolve_sheet(sheet) else {
            return FormulaValue::Error(CellError::Ref);
        };

        if range.cell_count() > DENSE_RANGE_LIMIT {
            let values = lookup
                .occupied_cells(&sheet, CellRect::from(*range))
                .into_iter()
                .map(|(_, value)| value.into())
                .collect();
            return FormulaValue::Array(vec![values]);
        }

        let mut rows = Vec::with_capacity(range.row_count() as usize);
        for row in range.start.row..=range.end.row {
            let mut cols = Vec::with_capacity(range.col_count() as usize);
            for col in range.start.col..=range.end.col {
                let key = CellKey {
                    sheet: sheet.clone(),
                    row,
                    col,
                };
                cols.push(lookup.cell_value(&key).into());
            }
            rows.push(cols);
        }

        FormulaValue::Array(rows)
    }
}

/// Evaluate a formula expression
pub fn evaluate(expr: &FormulaExpr, ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    match expr {
        // === Literals ===
        FormulaExpr::Number(n) => Ok(FormulaValue::Number(*n)),
        FormulaExpr::String(s) => Ok(FormulaValue::String(s.clone())),
        FormulaExpr::Boolean(b) => Ok(FormulaValue::Boolean(*b)),
        FormulaExpr::Error(e) => Ok(FormulaValue::Error(*e)),

        // === References ===
        FormulaExpr::CellRef(cell_ref) => Ok(ctx.get_cell_value(
            cell_ref.sheet.as_deref(),
            cell_ref.address.row,
            cell_ref.address.col,
        )),

        FormulaExpr::RangeRef(range_ref) => {
            Ok(ctx.get_range_values(range_ref.sheet.as_deref(), &range_ref.range))
        }

        // No defined names exist
        FormulaExpr::NameRef(_) => Ok(FormulaValue::Error(CellError::Name)),

        // === Operators ===
        FormulaExpr::BinaryOp { op, left, right } => evaluate_binary_op(*op, left, right, ctx),

        FormulaExpr::UnaryOp { op, operand } => evaluate_unary_op(*op, operand, ctx),

        // === Functions ===
        FormulaExpr::Function { name, args } => evaluate_function(name, args, ctx),
    }
}

/// Evaluate a formula into the value a cell stores
///
/// Never fails: evaluation errors become the matching error tag.
pub fn evaluate_to_cell_value(expr: &FormulaExpr, ctx: &EvaluationContext) -> CellValue {
    match evaluate(expr, ctx) {
        Ok(value) => value.into(),
        Err(e) => CellValue::Error(e.as_cell_error()),
    }
}

/// Evaluate a binary operation
fn evaluate_binary_op(
    op: BinaryOperator,
    left: &FormulaExpr,
    right: &FormulaExpr,
    ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    // Evaluate operands first
    let left_val = evaluate(left, ctx)?;
    let right_val = evaluate(right, ctx)?;

    // Propagate errors, leftmost first
    if let Some(e) = left_val.get_error() {
        return Ok(FormulaValue::Error(e));
    }
    if let Some(e) = right_val.get_error() {
        return Ok(FormulaValue::Error(e));
    }

    match op {
        BinaryOperator::Add => arithmetic(&left_val, &right_val, |l, r| l + r),
        BinaryOperator::Subtract => arithmetic(&left_val, &right_val, |l, r| l - r),
        BinaryOperator::Multiply => arithmetic(&left_val, &right_val, |l, r| l * r),
        BinaryOperator::Divide => {
            let l = left_val.to_number()?;
            let r = right_val.to_number()?;
            if r == 0.0 {
                Ok(FormulaValue::Error(CellError::Div0))
            } else {
                Ok(FormulaValue::number(l / r))
            }
        }
        BinaryOperator::Power => arithmetic(&left_val, &right_val, f64::powf),

        // Comparison operators
        BinaryOperator::Equal => Ok(FormulaValue::Boolean(
            compare_values(&left_val, &right_val).is_eq(),
        )),
        BinaryOperator::NotEqual => Ok(FormulaValue::Boolean(
            compare_values(&left_val, &right_val).is_ne(),
        )),
        BinaryOperator::LessThan => Ok(FormulaValue::Boolean(
            compare_values(&left_val, &right_val).is_lt(),
        )),
        BinaryOperator::LessEqual => Ok(FormulaValue::Boolean(
            compare_values(&left_val, &right_val).is_le(),
        )),
        BinaryOperator::GreaterThan => Ok(FormulaValue::Boolean(
            compare_values(&left_val, &right_val).is_gt(),
        )),
        BinaryOperator::GreaterEqual => Ok(FormulaValue::Boolean(
            compare_values(&left_val, &right_val).is_ge(),
        )),

        // Concatenation
        BinaryOperator::Concat => {
            let l = left_val.as_string();
            let r = right_val.as_string();
            Ok(FormulaValue::String(l + &r))
        }
    }
}

fn arithmetic(
    left: &FormulaValue,
    right: &FormulaValue,
    f: impl Fn(f64, f64) -> f64,
) -> FormulaResult<FormulaValue> {
    let l = left.to_number()?;
    let r = right.to_number()?;
    Ok(FormulaValue::number(f(l, r)))
}

/// Compare two values for ordering (Excel-style comparison)
fn compare_values(left: &FormulaValue, right: &FormulaValue) -> Ordering {
    // Empty values compare as zero, dates as their serial number
    let normalise = |v: &FormulaValue| match v {
        FormulaValue::Empty => FormulaValue::Number(0.0),
        FormulaValue::Date(dt) => FormulaValue::Number(date_to_serial(dt)),
        v => v.clone(),
    };
    let left = normalise(left);
    let right = normalise(right);

    match (&left, &right) {
        // Numbers compare numerically
        (FormulaValue::Number(l), FormulaValue::Number(r)) => {
            l.partial_cmp(r).unwrap_or(Ordering::Equal)
        }

        // Strings compare case-insensitively
        (FormulaValue::String(l), FormulaValue::String(r)) => {
            l.to_lowercase().cmp(&r.to_lowercase())
        }

        // Booleans: FALSE < TRUE
        (FormulaValue::Boolean(l), FormulaValue::Boolean(r)) => l.cmp(r),

        // Mixed types: number < string < boolean
        (FormulaValue::Number(_), FormulaValue::String(_)) => Ordering::Less,
        (FormulaValue::String(_), FormulaValue::Number(_)) => Ordering::Greater,
        (FormulaValue::Number(_), FormulaValue::Boolean(_)) => Ordering::Less,
        (FormulaValue::Boolean(_), FormulaValue::Number(_)) => Ordering::Greater,
        (FormulaValue::String(_), FormulaValue::Boolean(_)) => Ordering::Less,
        (FormulaValue::Boolean(_), FormulaValue::String(_)) => Ordering::Greater,

        _ => Ordering::Equal,
    }
}

/// Evaluate a unary operation
fn evaluate_unary_op(
    op: UnaryOperator,
    operand: &FormulaExpr,
    ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    let val = evaluate(operand, ctx)?;

    // Propagate errors
    if let Some(e) = val.get_error() {
        return Ok(FormulaValue::Error(e));
    }

    match op {
        UnaryOperator::Negate => Ok(FormulaValue::Number(-val.to_number()?)),
        UnaryOperator::Percent => Ok(FormulaValue::Number(val.to_number()? / 100.0)),
    }
}

/// Evaluate a function call
fn evaluate_function(
    name: &str,
    args: &[FormulaExpr],
    ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    let func = builtin_registry()
        .get(name)
        .ok_or_else(|| FormulaError::UnknownFunction(name.to_string()))?;

    // Check argument count
    if args.len() < func.min_args {
        return Err(FormulaError::ArgumentCount {
            function: name.to_string(),
            expected: format!("at least {}", func.min_args),
            actual: args.len(),
        });
    }

    if let Some(max) = func.max_args {
        if args.len() > max {
            return Err(FormulaError::ArgumentCount {
                function: name.to_string(),
                expected: format!("at most {}", max),
                actual: args.len(),
            });
        }
    }

    // A failing argument becomes an error value so IFERROR and friends can see it
    let evaluated_args: Vec<FormulaValue> = args
        .iter()
        .map(|arg| evaluate(arg, ctx).unwrap_or_else(|e| FormulaValue::Error(e.as_cell_error())))
        .collect();

    // Call the function
    (func.implementation)(&evaluated_args, ctx)
}
