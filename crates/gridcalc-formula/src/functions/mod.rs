//! Built-in spreadsheet functions

pub mod date;
pub mod logical;
pub mod math;
pub mod text;

use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use ahash::AHashMap;
use gridcalc_core::CellError;
use std::sync::OnceLock;

/// Global function registry (lazily initialized)
static FUNCTION_REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();

/// The registry of built-in functions
pub fn builtin_registry() -> &'static FunctionRegistry {
    FUNCTION_REGISTRY.get_or_init(FunctionRegistry::new)
}

/// Function implementation signature
pub type FunctionImpl = fn(&[FormulaValue], &EvaluationContext) -> FormulaResult<FormulaValue>;

/// Function definition
pub struct FunctionDef {
    /// Function name (uppercase)
    pub name: &'static str,
    /// Minimum arguments
    pub min_args: usize,
    /// Maximum arguments (None = unlimited)
    pub max_args: Option<usize>,
    /// Implementation
    pub implementation: FunctionImpl,
    /// Is volatile (recalculates every time)
    pub volatile: bool,
}

impl FunctionDef {
    fn new(
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        implementation: FunctionImpl,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            implementation,
            volatile: false,
        }
    }

    fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }
}

/// Function registry
pub struct FunctionRegistry {
    functions: AHashMap<String, FunctionDef>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Create a new registry with all built-in functions
    pub fn new() -> Self {
        let mut registry = Self {
            functions: AHashMap::new(),
        };

        registry.register_math_functions();
        registry.register_logical_functions();
        registry.register_text_functions();
        registry.register_date_functions();

        registry
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(&name.to_uppercase())
    }

    /// Register a function
    pub fn register(&mut self, def: FunctionDef) {
        self.functions.insert(def.name.to_uppercase(), def);
    }

    /// Check whether a function recalculates on every pass
    pub fn is_volatile(&self, name: &str) -> bool {
        self.get(name).is_some_and(|f| f.volatile)
    }

    /// Names of all registered functions, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.values().map(|f| f.name).collect();
        names.sort_unstable();
        names
    }

    fn register_math_functions(&mut self) {
        self.register(FunctionDef::new("SUM", 1, None, math::fn_sum));
        self.register(FunctionDef::new("AVERAGE", 1, None, math::fn_average));
        self.register(FunctionDef::new("MIN", 1, None, math::fn_min));
        self.register(FunctionDef::new("MAX", 1, None, math::fn_max));
        self.register(FunctionDef::new("COUNT", 1, None, math::fn_count));
        self.register(FunctionDef::new("COUNTA", 1, None, math::fn_counta));
        self.register(FunctionDef::new("PRODUCT", 1, None, math::fn_product));
        self.register(FunctionDef::new("ABS", 1, Some(1), math::fn_abs));
        self.register(FunctionDef::new("ROUND", 1, Some(2), math::fn_round));
        self.register(FunctionDef::new("INT", 1, Some(1), math::fn_int));
        self.register(FunctionDef::new("MOD", 2, Some(2), math::fn_mod));
        self.register(FunctionDef::new("SQRT", 1, Some(1), math::fn_sqrt));
        self.register(FunctionDef::new("POWER", 2, Some(2), math::fn_power));
        self.register(FunctionDef::new("RAND", 0, Some(0), math::fn_rand).volatile());
    }

    fn register_logical_functions(&mut self) {
        self.register(FunctionDef::new("IF", 2, Some(3), logical::fn_if));
        self.register(FunctionDef::new("AND", 1, None, logical::fn_and));
        self.register(FunctionDef::new("OR", 1, None, logical::fn_or));
        self.register(FunctionDef::new("NOT", 1, Some(1), logical::fn_not));
        self.register(FunctionDef::new("IFERROR", 2, Some(2), logical::fn_iferror));
        self.register(FunctionDef::new("ISERROR", 1, Some(1), logical::fn_iserror));
        self.register(FunctionDef::new("ISBLANK", 1, Some(1), logical::fn_isblank));
        self.register(FunctionDef::new("ISNUMBER", 1, Some(1), logical::fn_isnumber));
        self.register(FunctionDef::new("ISTEXT", 1, Some(1), logical::fn_istext));
    }

    fn register_text_functions(&mut self) {
        self.register(FunctionDef::new("CONCAT", 1, None, text::fn_concat));
        self.register(FunctionDef::new("CONCATENATE", 1, None, text::fn_concat));
        self.register(FunctionDef::new("LEN", 1, Some(1), text::fn_len));
        self.register(FunctionDef::new("UPPER", 1, Some(1), text::fn_upper));
        self.register(FunctionDef::new("LOWER", 1, Some(1), text::fn_lower));
        self.register(FunctionDef::new("TRIM", 1, Some(1), text::fn_trim));
        self.register(FunctionDef::new("LEFT", 1, Some(2), text::fn_left));
        self.register(FunctionDef::new("RIGHT", 1, Some(2), text::fn_right));
    }

    fn register_date_functions(&mut self) {
        self.register(FunctionDef::new("TODAY", 0, Some(0), date::fn_today).volatile());
        self.register(FunctionDef::new("NOW", 0, Some(0), date::fn_now).volatile());
        self.register(FunctionDef::new("DATE", 3, Some(3), date::fn_date));
    }
}

/// Value of an argument, `Empty` when it was omitted
pub(crate) fn arg(args: &[FormulaValue], index: usize) -> &FormulaValue {
    const EMPTY: &FormulaValue = &FormulaValue::Empty;
    args.get(index).unwrap_or(EMPTY)
}

/// Coerce a single (non-range) argument to a number
pub(crate) fn scalar_number(value: &FormulaValue) -> Result<f64, CellError> {
    match value {
        FormulaValue::Error(e) => Err(*e),
        FormulaValue::Array(_) => Err(CellError::Value),
        v => v.as_number().ok_or(CellError::Value),
    }
}

/// Coerce a single (non-range) argument to text
pub(crate) fn scalar_text(value: &FormulaValue) -> Result<String, CellError> {
    match value {
        FormulaValue::Error(e) => Err(*e),
        FormulaValue::Array(_) => Err(CellError::Value),
        v => Ok(v.as_string()),
    }
}

/// Iterate over arguments with ranges flattened, row-major
pub(crate) fn flatten<'a>(args: &'a [FormulaValue]) -> impl Iterator<Item = &'a FormulaValue> {
    args.iter().flat_map(|arg| -> Box<dyn Iterator<Item = &'a FormulaValue> + 'a> {
        match arg {
            FormulaValue::Array(rows) => Box::new(rows.iter().flatten()),
            v => Box::new(std::iter::once(v)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry = builtin_registry();
        assert!(registry.get("sum").is_some());
        assert!(registry.get("Sum").is_some());
        assert!(registry.get("VLOOKUP").is_none());
    }

    #[test]
    fn test_volatile_functions() {
        let registry = builtin_registry();
        for name in ["RAND", "TODAY", "NOW"] {
            assert!(registry.is_volatile(name), "{name}");
        }
        assert!(!registry.is_volatile("SUM"));
        assert!(!registry.is_volatile("NOPE"));
    }

    #[test]
    fn test_flatten() {
        let args = vec![
            FormulaValue::Number(1.0),
            FormulaValue::Array(vec![
                vec![FormulaValue::Number(2.0), FormulaValue::Empty],
                vec![FormulaValue::Number(3.0), FormulaValue::Boolean(true)],
            ]),
        ];
        assert_eq!(flatten(&args).count(), 5);
    }
}
