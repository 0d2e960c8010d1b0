//! Formula parser
//!
//! Text after the leading `=` is split into lexemes first, then folded into an AST
//! by precedence climbing. Binding powers, loosest first:
//!
//! | power | operators                  | associativity |
//! |-------|----------------------------|---------------|
//! | 1     | `=` `<>` `<` `<=` `>` `>=` | left          |
//! | 2     | `&`                        | left          |
//! | 3     | `+` `-`                    | left          |
//! | 4     | `*` `/`                    | left          |
//! | 5     | `^`                        | right         |
//!
//! Prefix `-`/`+` and postfix `%` bind tighter than any infix operator, so `-2^2`
//! is `(-2)^2`. A `:` only joins two cell references into a range and binds
//! tightest of all.

use crate::ast::{BinaryOperator, CellReference, FormulaExpr, RangeReference, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use gridcalc_core::{CellAddress, CellError, CellRange};
use std::iter::Peekable;
use std::str::CharIndices;

/// Parse a formula string into an AST
///
/// # Example
/// ```rust
/// use gridcalc_formula::parse_formula;
///
/// let ast = parse_formula("=1+2").unwrap();
/// let ast = parse_formula("=SUM(A1:A10)").unwrap();
/// let ast = parse_formula("=IF('Q1 Budget'!B2>0,\"Yes\",\"No\")").unwrap();
/// ```
pub fn parse_formula(formula: &str) -> FormulaResult<FormulaExpr> {
    let body = formula
        .strip_prefix('=')
        .ok_or_else(|| FormulaError::Parse("Formula must start with '='".into()))?;

    let mut parser = Parser {
        lexemes: tokenize(body)?,
        pos: 0,
    };
    let expr = parser.expression(0)?;
    match parser.lexemes.get(parser.pos) {
        None => Ok(expr),
        Some(extra) => Err(extra.unexpected()),
    }
}

/// Check whether text is a formula that parses
///
/// Anything not starting with `=` is a literal and therefore not a valid formula.
pub fn validate_formula(text: &str) -> bool {
    is_formula(text) && parse_formula(text).is_ok()
}

/// Check whether text is formula input (starts with `=`)
pub fn is_formula(text: &str) -> bool {
    text.starts_with('=')
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Bool(bool),
    ErrorLiteral(CellError),
    /// Function name or bare identifier
    Name(String),
    /// A1-style cell reference, possibly with `$` markers
    Cell(String),
    /// Sheet qualifier, without its quotes and `!`
    Sheet(String),
    /// Any binary operator; `+` and `-` double as prefix operators
    Infix(BinaryOperator),
    Percent,
    Colon,
    Comma,
    Open,
    Close,
}

/// A token and the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
struct Lexeme {
    token: Token,
    offset: usize,
}

impl Lexeme {
    fn unexpected(&self) -> FormulaError {
        FormulaError::Parse(format!(
            "Unexpected {:?} at position {}",
            self.token, self.offset
        ))
    }
}

fn tokenize(input: &str) -> FormulaResult<Vec<Lexeme>> {
    let mut lexer = Lexer {
        input,
        chars: input.char_indices().peekable(),
    };
    let mut lexemes = Vec::new();
    while let Some(lexeme) = lexer.next_lexeme()? {
        lexemes.push(lexeme);
    }
    Ok(lexemes)
}

struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn next_lexeme(&mut self) -> FormulaResult<Option<Lexeme>> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let Some(&(offset, c)) = self.chars.peek() else {
            return Ok(None);
        };

        let token = match c {
            '"' => self.text(offset)?,
            '\'' => self.quoted_sheet(offset)?,
            '#' => self.error_literal(offset),
            c if c.is_ascii_digit() || c == '.' => self.number(offset)?,
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => self.word(offset),
            _ => {
                self.chars.next();
                self.symbol(c, offset)?
            }
        };
        Ok(Some(Lexeme { token, offset }))
    }

    fn symbol(&mut self, c: char, offset: usize) -> FormulaResult<Token> {
        let token = match c {
            '+' => Token::Infix(BinaryOperator::Add),
            '-' => Token::Infix(BinaryOperator::Subtract),
            '*' => Token::Infix(BinaryOperator::Multiply),
            '/' => Token::Infix(BinaryOperator::Divide),
            '^' => Token::Infix(BinaryOperator::Power),
            '&' => Token::Infix(BinaryOperator::Concat),
            '=' => Token::Infix(BinaryOperator::Equal),
            '<' if self.chars.next_if(|(_, c)| *c == '=').is_some() => {
                Token::Infix(BinaryOperator::LessEqual)
            }
            '<' if self.chars.next_if(|(_, c)| *c == '>').is_some() => {
                Token::Infix(BinaryOperator::NotEqual)
            }
            '<' => Token::Infix(BinaryOperator::LessThan),
            '>' if self.chars.next_if(|(_, c)| *c == '=').is_some() => {
                Token::Infix(BinaryOperator::GreaterEqual)
            }
            '>' => Token::Infix(BinaryOperator::GreaterThan),
            '%' => Token::Percent,
            ':' => Token::Colon,
            ',' => Token::Comma,
            '(' => Token::Open,
            ')' => Token::Close,
            other => {
                return Err(FormulaError::Parse(format!(
                    "Unexpected character '{}' at position {}",
                    other, offset
                )))
            }
        };
        Ok(token)
    }

    /// Read up to the closing `delimiter`; a doubled delimiter is a literal one
    fn delimited(&mut self, delimiter: char, offset: usize) -> FormulaResult<String> {
        self.chars.next();
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == delimiter => {
                    if self.chars.next_if(|(_, c)| *c == delimiter).is_none() {
                        return Ok(out);
                    }
                    out.push(delimiter);
                }
                Some((_, c)) => out.push(c),
                None => {
                    return Err(FormulaError::Parse(format!(
                        "Unterminated {} starting at position {}",
                        delimiter, offset
                    )))
                }
            }
        }
    }

    fn text(&mut self, offset: usize) -> FormulaResult<Token> {
        self.delimited('"', offset).map(Token::Text)
    }

    fn quoted_sheet(&mut self, offset: usize) -> FormulaResult<Token> {
        let name = self.delimited('\'', offset)?;
        if name.is_empty() || self.chars.next_if(|(_, c)| *c == '!').is_none() {
            return Err(FormulaError::Parse(format!(
                "Quoted sheet name at position {} must be non-empty and followed by '!'",
                offset
            )));
        }
        Ok(Token::Sheet(name))
    }

    /// Skip characters matching `pred`, returning the offset just past them
    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        while self.chars.next_if(|(_, c)| pred(*c)).is_some() {}
        self.chars.peek().map_or(self.input.len(), |(i, _)| *i)
    }

    fn error_literal(&mut self, offset: usize) -> Token {
        self.chars.next();
        let end = self.take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '!' | '/' | '?'));
        let text = &self.input[offset..end];
        match CellError::parse(text) {
            Some(error) => Token::ErrorLiteral(error),
            // Evaluates to #NAME? like any unknown identifier
            None => Token::Name(text.to_string()),
        }
    }

    fn number(&mut self, offset: usize) -> FormulaResult<Token> {
        let mut end = self.take_while(|c| c.is_ascii_digit());
        if self.chars.next_if(|(_, c)| *c == '.').is_some() {
            end = self.take_while(|c| c.is_ascii_digit());
        }
        if self.chars.next_if(|(_, c)| matches!(*c, 'e' | 'E')).is_some() {
            self.chars.next_if(|(_, c)| matches!(*c, '+' | '-'));
            end = self.take_while(|c| c.is_ascii_digit());
        }

        let text = &self.input[offset..end];
        text.parse::<f64>().map(Token::Number).map_err(|_| {
            FormulaError::Parse(format!("Invalid number '{}' at position {}", text, offset))
        })
    }

    fn word(&mut self, offset: usize) -> Token {
        let end = self.take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
        let text = &self.input[offset..end];

        if self.chars.next_if(|(_, c)| *c == '!').is_some() {
            return Token::Sheet(text.to_string());
        }
        // A '(' right after any word makes it a function name, e.g. LOG10( or TRUE(
        if self.chars.peek().is_some_and(|(_, c)| *c == '(') {
            return Token::Name(text.to_string());
        }
        if text.eq_ignore_ascii_case("TRUE") {
            return Token::Bool(true);
        }
        if text.eq_ignore_ascii_case("FALSE") {
            return Token::Bool(false);
        }
        if looks_like_cell(text) {
            return Token::Cell(text.to_string());
        }
        Token::Name(text.to_string())
    }
}

/// `[$]letters[$]digits`, nothing else
fn looks_like_cell(text: &str) -> bool {
    let rest = text.strip_prefix('$').unwrap_or(text);
    let letters = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()).len();
    if letters == 0 {
        return false;
    }
    let rest = &rest[letters..];
    let digits = rest.strip_prefix('$').unwrap_or(rest);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Associativity {
    Left,
    Right,
}

fn binding_power(op: BinaryOperator) -> (u8, Associativity) {
    use BinaryOperator::*;
    match op {
        Equal | NotEqual | LessThan | LessEqual | GreaterThan | GreaterEqual => {
            (1, Associativity::Left)
        }
        Concat => (2, Associativity::Left),
        Add | Subtract => (3, Associativity::Left),
        Multiply | Divide => (4, Associativity::Left),
        Power => (5, Associativity::Right),
    }
}

struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.lexemes.get(self.pos).map(|l| &l.token)
    }

    fn bump(&mut self) -> FormulaResult<Lexeme> {
        let lexeme = self
            .lexemes
            .get(self.pos)
            .cloned()
            .ok_or_else(|| FormulaError::Parse("Unexpected end of formula".into()))?;
        self.pos += 1;
        Ok(lexeme)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> FormulaResult<()> {
        let lexeme = self.bump()?;
        if &lexeme.token == token {
            Ok(())
        } else {
            Err(lexeme.unexpected())
        }
    }

    /// Parse operands joined by infix operators binding at least `min_power`
    fn expression(&mut self, min_power: u8) -> FormulaResult<FormulaExpr> {
        let mut left = self.prefixed()?;

        while let Some(Token::Infix(op)) = self.peek() {
            let op = *op;
            let (power, associativity) = binding_power(op);
            if power < min_power {
                break;
            }
            self.pos += 1;

            let next_min = match associativity {
                Associativity::Left => power + 1,
                Associativity::Right => power,
            };
            let right = self.expression(next_min)?;
            left = FormulaExpr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn prefixed(&mut self) -> FormulaResult<FormulaExpr> {
        if self.eat(&Token::Infix(BinaryOperator::Subtract)) {
            let operand = self.prefixed()?;
            return Ok(FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Token::Infix(BinaryOperator::Add)) {
            return self.prefixed();
        }

        let mut operand = self.operand()?;
        while self.eat(&Token::Percent) {
            operand = FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                operand: Box::new(operand),
            };
        }
        Ok(operand)
    }

    fn operand(&mut self) -> FormulaResult<FormulaExpr> {
        let Lexeme { token, offset } = self.bump()?;
        match token {
            Token::Number(n) => Ok(FormulaExpr::Number(n)),
            Token::Text(s) => Ok(FormulaExpr::String(s)),
            Token::Bool(b) => Ok(FormulaExpr::Boolean(b)),
            Token::ErrorLiteral(e) => Ok(FormulaExpr::Error(e)),
            Token::Open => {
                let inner = self.expression(0)?;
                self.expect(&Token::Close)?;
                Ok(inner)
            }
            Token::Name(name) if self.eat(&Token::Open) => self.call(name),
            Token::Name(name) => Ok(FormulaExpr::NameRef(name)),
            Token::Sheet(sheet) => {
                let address = self.cell_after_sheet(&sheet)?;
                self.reference(Some(sheet), address)
            }
            Token::Cell(text) => {
                let address = cell_address(&text)?;
                self.reference(None, address)
            }
            other => Err(Lexeme { token: other, offset }.unexpected()),
        }
    }

    /// Arguments after the opening parenthesis of a call
    fn call(&mut self, name: String) -> FormulaResult<FormulaExpr> {
        let mut args = Vec::new();
        if !self.eat(&Token::Close) {
            loop {
                args.push(self.expression(0)?);
                if self.eat(&Token::Close) {
                    break;
                }
                self.expect(&Token::Comma)?;
            }
        }
        Ok(FormulaExpr::Function {
            name: name.to_uppercase(),
            args,
        })
    }

    fn cell_after_sheet(&mut self, sheet: &str) -> FormulaResult<CellAddress> {
        match self.bump() {
            Ok(Lexeme {
                token: Token::Cell(text),
                ..
            }) => cell_address(&text),
            _ => Err(FormulaError::Parse(format!(
                "Expected a cell reference after '{}!'",
                sheet
            ))),
        }
    }

    /// A cell reference, widened to a range when `:` follows
    fn reference(
        &mut self,
        sheet: Option<String>,
        start: CellAddress,
    ) -> FormulaResult<FormulaExpr> {
        if !self.eat(&Token::Colon) {
            return Ok(FormulaExpr::CellRef(CellReference {
                sheet,
                address: start,
            }));
        }

        let Lexeme { token, offset } = self.bump()?;
        let (end_sheet, end) = match token {
            Token::Cell(text) => (None, cell_address(&text)?),
            Token::Sheet(name) => {
                let end = self.cell_after_sheet(&name)?;
                (Some(name), end)
            }
            other => return Err(Lexeme { token: other, offset }.unexpected()),
        };

        // Sheet2!A1:B2 qualifies both corners; a repeated qualifier must agree
        let same_sheet = match (&sheet, &end_sheet) {
            (_, None) => true,
            (Some(start), Some(end)) => start.eq_ignore_ascii_case(end),
            (None, Some(_)) => false,
        };
        if !same_sheet {
            return Err(FormulaError::Parse(
                "Range corners must be on the same sheet".into(),
            ));
        }

        Ok(FormulaExpr::RangeRef(RangeReference {
            sheet,
            range: CellRange::new(start, end),
        }))
    }
}

fn cell_address(text: &str) -> FormulaResult<CellAddress> {
    CellAddress::parse(text)
        .map_err(|e| FormulaError::Parse(format!("Invalid cell reference '{}': {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Render an AST in prefix form so whole trees compare as one string
    fn render(expr: &FormulaExpr) -> String {
        let qualified = |sheet: &Option<String>, target: String| match sheet {
            Some(sheet) => format!("[{}]{}", sheet, target),
            None => target,
        };
        match expr {
            FormulaExpr::Number(n) => n.to_string(),
            FormulaExpr::String(s) => format!("{:?}", s),
            FormulaExpr::Boolean(b) => b.to_string().to_uppercase(),
            FormulaExpr::Error(e) => e.to_string(),
            FormulaExpr::CellRef(r) => qualified(&r.sheet, r.address.relative().to_a1_string()),
            FormulaExpr::RangeRef(r) => qualified(
                &r.sheet,
                format!(
                    "{}:{}",
                    r.range.start.relative().to_a1_string(),
                    r.range.end.relative().to_a1_string()
                ),
            ),
            FormulaExpr::NameRef(name) => format!("name:{}", name),
            FormulaExpr::BinaryOp { op, left, right } => {
                let symbol = match op {
                    BinaryOperator::Add => "+",
                    BinaryOperator::Subtract => "-",
                    BinaryOperator::Multiply => "*",
                    BinaryOperator::Divide => "/",
                    BinaryOperator::Power => "^",
                    BinaryOperator::Equal => "=",
                    BinaryOperator::NotEqual => "<>",
                    BinaryOperator::LessThan => "<",
                    BinaryOperator::LessEqual => "<=",
                    BinaryOperator::GreaterThan => ">",
                    BinaryOperator::GreaterEqual => ">=",
                    BinaryOperator::Concat => "&",
                };
                format!("({} {} {})", symbol, render(left), render(right))
            }
            FormulaExpr::UnaryOp { op, operand } => match op {
                UnaryOperator::Negate => format!("(neg {})", render(operand)),
                UnaryOperator::Percent => format!("(pct {})", render(operand)),
            },
            FormulaExpr::Function { name, args } => {
                let mut out = format!("({}", name);
                for arg in args {
                    out.push(' ');
                    out.push_str(&render(arg));
                }
                out.push(')');
                out
            }
        }
    }

    fn shape(formula: &str) -> String {
        render(&parse_formula(formula).unwrap())
    }

    fn tokens(body: &str) -> Vec<Token> {
        tokenize(body).unwrap().into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn test_tokenize_operators_and_offsets() {
        let lexemes = tokenize("A1 <= 10 <> x").unwrap();
        let offsets: Vec<usize> = lexemes.iter().map(|l| l.offset).collect();
        assert_eq!(offsets, vec![0, 3, 6, 9, 12]);
        assert_eq!(lexemes[1].token, Token::Infix(BinaryOperator::LessEqual));
        assert_eq!(lexemes[3].token, Token::Infix(BinaryOperator::NotEqual));

        assert_eq!(
            tokens("1>=2%"),
            vec![
                Token::Number(1.0),
                Token::Infix(BinaryOperator::GreaterEqual),
                Token::Number(2.0),
                Token::Percent,
            ]
        );
    }

    #[test]
    fn test_tokenize_words() {
        assert_eq!(
            tokens("true LOG10(B$7) Sheet_2!x.y"),
            vec![
                Token::Bool(true),
                Token::Name("LOG10".into()),
                Token::Open,
                Token::Cell("B$7".into()),
                Token::Close,
                Token::Sheet("Sheet_2".into()),
                Token::Name("x.y".into()),
            ]
        );
        assert_eq!(
            tokens("TRUE()"),
            vec![Token::Name("TRUE".into()), Token::Open, Token::Close]
        );
        assert_eq!(
            tokens("#N/A #BOGUS"),
            vec![Token::ErrorLiteral(CellError::Na), Token::Name("#BOGUS".into())]
        );
    }

    #[test]
    fn test_cell_pattern() {
        for text in ["A1", "$A$1", "xfd1048576", "AB$12"] {
            assert!(looks_like_cell(text), "{text}");
        }
        for text in ["A", "1", "A1B", "$$A1", "A$$1", "_A1", "SUM"] {
            assert!(!looks_like_cell(text), "{text}");
        }
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_formula("=42").unwrap(), FormulaExpr::Number(42.0));
        assert_eq!(parse_formula("=.5").unwrap(), FormulaExpr::Number(0.5));
        assert_eq!(parse_formula("=1e10").unwrap(), FormulaExpr::Number(1e10));
        assert_eq!(parse_formula("=2.5E-3").unwrap(), FormulaExpr::Number(0.0025));
        assert_eq!(
            parse_formula("=\"say \"\"hi\"\"\"").unwrap(),
            FormulaExpr::String("say \"hi\"".into())
        );
        assert_eq!(parse_formula("=\"\"").unwrap(), FormulaExpr::String(String::new()));
        assert_eq!(parse_formula("=false").unwrap(), FormulaExpr::Boolean(false));
        assert_eq!(parse_formula("=#DIV/0!").unwrap(), FormulaExpr::Error(CellError::Div0));
        assert_eq!(parse_formula("=#VALUE!").unwrap(), FormulaExpr::Error(CellError::Value));
    }

    #[test]
    fn test_precedence_ladder() {
        let cases = [
            ("=1+2*3", "(+ 1 (* 2 3))"),
            ("=(1+2)*3", "(* (+ 1 2) 3)"),
            ("=8-3-2", "(- (- 8 3) 2)"),
            ("=2^3^2", "(^ 2 (^ 3 2))"),
            ("=-2^2", "(^ (neg 2) 2)"),
            ("=--A1", "(neg (neg A1))"),
            ("=+5", "5"),
            ("=50%*2", "(* (pct 50) 2)"),
            ("=1+2&\"x\"", "(& (+ 1 2) \"x\")"),
            ("=\"a\"&\"b\"=\"ab\"", "(= (& \"a\" \"b\") \"ab\")"),
            ("=A1>5", "(> A1 5)"),
            ("=A1<>B1", "(<> A1 B1)"),
            ("=1<2=TRUE", "(= (< 1 2) TRUE)"),
        ];
        for (formula, expected) in cases {
            assert_eq!(shape(formula), expected, "{formula}");
        }
    }

    #[test]
    fn test_references() {
        assert_eq!(shape("=$B$2"), "B2");
        assert_eq!(shape("=A1:B10"), "A1:B10");
        assert_eq!(shape("=B10:A1"), "A1:B10");
        assert_eq!(shape("=Sheet2!B3"), "[Sheet2]B3");
        assert_eq!(shape("=Sheet2!A1:sheet2!C3"), "[Sheet2]A1:C3");
        assert_eq!(shape("='Q1 ''Actuals'''!A1:B2"), "[Q1 'Actuals']A1:B2");
        assert_eq!(shape("=-A1:A3"), "(neg A1:A3)");
        assert_eq!(shape("=revenue"), "name:revenue");

        let FormulaExpr::CellRef(cell) = parse_formula("=$B$2").unwrap() else {
            panic!("not a cell reference");
        };
        assert_eq!(cell.address, CellAddress::with_absolute(1, 1, true, true));
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(shape("=sum(1,2,3)"), "(SUM 1 2 3)");
        assert_eq!(shape("=NOW()"), "(NOW)");
        assert_eq!(
            shape("=IF(AND(A1>0,B1<100),A1*B1/100,0)"),
            "(IF (AND (> A1 0) (< B1 100)) (/ (* A1 B1) 100) 0)"
        );
        assert_eq!(shape("=IF(A1>0, SUM(B1:B10), 0)"), "(IF (> A1 0) (SUM B1:B10) 0)");
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        for formula in [
            "1+2",
            "=",
            "=1+",
            "=(1+2",
            "=1+2)",
            "=SUM(1,2",
            "=SUM(1,)",
            "=\"open",
            "=1 @ 2",
            "=1@",
            "=Sheet1!",
            "=Sheet1!SUM(1)",
            "='Sheet 1'A1",
            "=''!A1",
            "=Sheet1!A1:Sheet2!B2",
            "=A1:Sheet1!B2",
            "=1:2",
            "=A1:5",
            "={1,2}",
            "=1;2",
            "=1e",
            "=1..2",
        ] {
            assert!(parse_formula(formula).is_err(), "{formula} should not parse");
        }
    }

    #[test]
    fn test_error_mentions_position() {
        let err = parse_formula("=1+2)").unwrap_err();
        assert!(err.to_string().contains("position 3"), "{err}");
    }

    #[test]
    fn test_validate_formula() {
        assert!(validate_formula("=A1*2"));
        assert!(validate_formula("=sum(A1:A3)"));
        assert!(!validate_formula("A1*2"));
        assert!(!validate_formula("=A1*"));
        assert!(!validate_formula(""));
    }
}
