//! Formula error types

use gridcalc_core::CellError;
use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Errors that can occur during formula parsing or evaluation
///
/// None of these escape a recalculation: [`FormulaError::as_cell_error`] turns each
/// one into the error tag stored in the failing cell.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    /// Formula parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Operand or argument of the wrong type
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Invalid argument value
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Unknown function
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Wrong number of arguments
    #[error("Wrong number of arguments for {function}: expected {expected}, got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    /// Circular reference
    #[error("Circular reference detected")]
    CircularReference,

    /// Reference to an invalid cell or an unknown sheet
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
}

impl FormulaError {
    /// Error tag a cell shows when its formula fails with this error
    pub fn as_cell_error(&self) -> CellError {
        match self {
            FormulaError::Parse(_) => CellError::Generic,
            FormulaError::Evaluation(_) => CellError::Value,
            FormulaError::Argument(_) => CellError::Value,
            FormulaError::UnknownFunction(_) => CellError::Name,
            FormulaError::ArgumentCount { .. } => CellError::Na,
            FormulaError::CircularReference => CellError::Ref,
            FormulaError::InvalidReference(_) => CellError::Ref,
        }
    }
}
