//! Formula Abstract Syntax Tree types

use gridcalc_core::{CellAddress, CellError, CellRange};

/// Formula expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    // === Literals ===
    /// Numeric literal
    Number(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Boolean(bool),
    /// Error literal
    Error(CellError),

    // === References ===
    /// Single cell reference
    CellRef(CellReference),
    /// Range reference
    RangeRef(RangeReference),
    /// Bare identifier that is not a function call (always `#NAME?`)
    NameRef(String),

    // === Operators ===
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<FormulaExpr>,
    },

    // === Function call ===
    Function {
        name: String,
        args: Vec<FormulaExpr>,
    },
}

impl FormulaExpr {
    /// Visit every cell and range reference in the expression, left to right
    ///
    /// Single-cell references are reported as one-cell ranges.
    pub fn visit_references<'a>(&'a self, f: &mut impl FnMut(Option<&'a str>, CellRange)) {
        match self {
            FormulaExpr::CellRef(cell_ref) => {
                f(cell_ref.sheet.as_deref(), CellRange::single(cell_ref.address));
            }
            FormulaExpr::RangeRef(range_ref) => {
                f(range_ref.sheet.as_deref(), range_ref.range);
            }
            FormulaExpr::BinaryOp { left, right, .. } => {
                left.visit_references(f);
                right.visit_references(f);
            }
            FormulaExpr::UnaryOp { operand, .. } => operand.visit_references(f),
            FormulaExpr::Function { args, .. } => {
                for arg in args {
                    arg.visit_references(f);
                }
            }
            FormulaExpr::Number(_)
            | FormulaExpr::String(_)
            | FormulaExpr::Boolean(_)
            | FormulaExpr::Error(_)
            | FormulaExpr::NameRef(_) => {}
        }
    }

    /// Check whether any function call satisfies `pred` (names are uppercase)
    pub fn any_function(&self, pred: &impl Fn(&str) -> bool) -> bool {
        match self {
            FormulaExpr::Function { name, args } => {
                pred(name) || args.iter().any(|a| a.any_function(pred))
            }
            FormulaExpr::BinaryOp { left, right, .. } => {
                left.any_function(pred) || right.any_function(pred)
            }
            FormulaExpr::UnaryOp { operand, .. } => operand.any_function(pred),
            _ => false,
        }
    }
}

/// Cell reference with optional sheet
#[derive(Debug, Clone, PartialEq)]
pub struct CellReference {
    pub sheet: Option<String>,
    pub address: CellAddress,
}

/// Range reference with optional sheet
#[derive(Debug, Clone, PartialEq)]
pub struct RangeReference {
    pub sheet: Option<String>,
    pub range: CellRange,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Text
    Concat,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Percent,
}
