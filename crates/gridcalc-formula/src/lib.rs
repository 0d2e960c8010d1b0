//! # gridcalc-formula
//!
//! Formula parser and evaluator for gridcalc.
//!
//! This crate provides:
//! - Formula parsing (text → AST)
//! - Formula evaluation (AST → value, errors as values)
//! - Built-in spreadsheet functions
//! - Dependency tracking for calculation chains
//! - The [`FormulaEvaluator`] capability and its native implementation
//!
//! ## Example
//!
//! ```rust
//! use gridcalc_core::{CellKey, CellValue, SheetId};
//! use gridcalc_formula::{CellInput, FormulaEvaluator, NativeEvaluator};
//!
//! let mut evaluator = NativeEvaluator::new();
//! evaluator.add_sheet(SheetId::new("s1"), "Sheet1");
//!
//! let a1 = CellKey::new("s1", 0, 0);
//! let b1 = CellKey::new("s1", 0, 1);
//! evaluator.set_cell_value(&a1, CellInput::Literal(CellValue::Number(5.0)));
//! evaluator.set_cell_value(&b1, CellInput::Formula("=A1*2".into()));
//! evaluator.recalculate(&[b1.clone()]);
//!
//! assert_eq!(evaluator.get_cell_value(&b1), CellValue::Number(10.0));
//! ```

pub mod ast;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod parser;

pub use ast::{BinaryOperator, CellReference, FormulaExpr, RangeReference, UnaryOperator};
pub use dependency::{DependencyGraph, Precedent, SheetRange, TopologicalOrder};
pub use engine::{CellInput, EvaluationReport, FormulaEvaluator, NativeEvaluator};
pub use error::{FormulaError, FormulaResult};
pub use evaluator::{evaluate, evaluate_to_cell_value, EvaluationContext, FormulaValue, ValueLookup};
pub use functions::{builtin_registry, FunctionRegistry};
pub use parser::{is_formula, parse_formula, validate_formula};
