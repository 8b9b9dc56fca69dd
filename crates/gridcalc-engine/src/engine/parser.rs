//! Formula text → [`Expr`].
//!
//! Recursive descent with conventional precedence, lowest first:
//!
//! ```text
//!   expression     --> comparison
//!   comparison     --> concatenation ( ("=" | "<>" | "<" | ">" | "<=" | ">=") concatenation )*
//!   concatenation  --> additive ( "&" additive )*
//!   additive       --> multiplicative ( ("+" | "-") multiplicative )*
//!   multiplicative --> unary ( ("*" | "/") unary )*
//!   unary          --> ("-" | "+") unary | power
//!   power          --> primary ( "^" signed_primary )*
//!   primary        --> NUMBER | STRING | TRUE | FALSE | cell (":" cell)?
//!                    | NAME "(" arguments? ")" | "(" expression ")"
//! ```
//!
//! All binary operators are left-associative, so `2+3*4` is 14 and `10-4-3` is 3.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;
use tracing::trace;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::cell_ref::CellRef;
use super::value::Value;
use crate::registry::FunctionRegistry;

/// Nesting limit applied unless configured otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty formula")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("unknown name: {0}")]
    UnknownName(String),

    #[error("invalid cell reference: {0}")]
    InvalidReference(String),

    #[error("expected {expected}, found {found}")]
    Unexpected { expected: &'static str, found: String },

    #[error("formula nesting exceeds {0} levels")]
    TooDeep(usize),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Amp,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Str(s) => write!(f, "string \"{}\"", s),
            Token::Ident(s) => write!(f, "'{}'", s),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::Colon => f.write_str("':'"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Caret => f.write_str("'^'"),
            Token::Amp => f.write_str("'&'"),
            Token::Eq => f.write_str("'='"),
            Token::Ne => f.write_str("'<>'"),
            Token::Lt => f.write_str("'<'"),
            Token::Gt => f.write_str("'>'"),
            Token::Le => f.write_str("'<='"),
            Token::Ge => f.write_str("'>='"),
            Token::Eof => f.write_str("end of formula"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => push(&mut tokens, &mut i, Token::LParen),
            ')' => push(&mut tokens, &mut i, Token::RParen),
            ',' => push(&mut tokens, &mut i, Token::Comma),
            ':' => push(&mut tokens, &mut i, Token::Colon),
            '+' => push(&mut tokens, &mut i, Token::Plus),
            '-' => push(&mut tokens, &mut i, Token::Minus),
            '*' => push(&mut tokens, &mut i, Token::Star),
            '/' => push(&mut tokens, &mut i, Token::Slash),
            '^' => push(&mut tokens, &mut i, Token::Caret),
            '&' => push(&mut tokens, &mut i, Token::Amp),
            '=' => push(&mut tokens, &mut i, Token::Eq),
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Le);
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Ne);
                    i += 2;
                }
                _ => push(&mut tokens, &mut i, Token::Lt),
            },
            '>' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Ge);
                    i += 2;
                }
                _ => push(&mut tokens, &mut i, Token::Gt),
            },
            '"' => {
                // "" inside a string is an escaped quote.
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ParseError::UnterminatedString),
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            text.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            text.push(*c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || (c == '.' && next_is_digit(&chars, i)) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ParseError::UnexpectedChar { ch: other, pos: i }),
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

fn push(tokens: &mut Vec<Token>, i: &mut usize, token: Token) {
    tokens.push(token);
    *i += 1;
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
}

/// Parses formula text against a function registry. Unknown function names
/// are rejected here rather than at evaluation time.
pub struct Parser<'r> {
    registry: &'r FunctionRegistry,
    max_depth: usize,
}

impl<'r> Parser<'r> {
    pub fn new(registry: &'r FunctionRegistry) -> Self {
        Parser {
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Parse a formula. A leading '=' is optional.
    pub fn parse(&self, text: &str) -> Result<Expr, ParseError> {
        let body = text.trim();
        let body = body.strip_prefix('=').unwrap_or(body);
        let tokens = tokenize(body)?;
        if tokens.len() == 1 {
            return Err(ParseError::Empty);
        }

        let mut state = ParseState {
            tokens,
            pos: 0,
            depth: 0,
            max_depth: self.max_depth,
            registry: self.registry,
        };
        let expr = state.expression()?;
        if *state.peek() != Token::Eof {
            return Err(ParseError::Unexpected {
                expected: "end of formula",
                found: state.peek().to_string(),
            });
        }
        trace!(formula = text, "parsed formula");
        Ok(expr)
    }
}

struct ParseState<'r> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    registry: &'r FunctionRegistry,
}

impl ParseState<'_> {
    fn peek(&self) -> &Token {
        // The token list always ends with Eof and `advance` never moves past it.
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token != Token::Eof {
            self.pos += 1;
        }
        token
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ParseError::TooDeep(self.max_depth));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let expr = self.comparison();
        self.leave();
        expr
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.concatenation()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Ne => BinaryOp::Ne,
                Token::Lt => BinaryOp::Lt,
                Token::Gt => BinaryOp::Gt,
                Token::Le => BinaryOp::Le,
                Token::Ge => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.concatenation()?;
            left = binary(op, left, right);
        }
    }

    fn concatenation(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.additive()?;
        while *self.peek() == Token::Amp {
            self.advance();
            let right = self.additive()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::Minus | Token::Plus => {
                let negate = self.advance() == Token::Minus;
                self.enter()?;
                let operand = self.unary();
                self.leave();
                let operand = operand?;
                Ok(if negate { negate_expr(operand) } else { operand })
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.primary()?;
        while *self.peek() == Token::Caret {
            self.advance();
            let right = self.signed_primary()?;
            left = binary(BinaryOp::Pow, left, right);
        }
        Ok(left)
    }

    fn signed_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::Minus | Token::Plus => {
                let negate = self.advance() == Token::Minus;
                self.enter()?;
                let operand = self.signed_primary();
                self.leave();
                let operand = operand?;
                Ok(if negate { negate_expr(operand) } else { operand })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    return self.function_call(name);
                }
                if name.eq_ignore_ascii_case("TRUE") {
                    return Ok(Expr::Literal(Value::Bool(true)));
                }
                if name.eq_ignore_ascii_case("FALSE") {
                    return Ok(Expr::Literal(Value::Bool(false)));
                }
                let Some(start) = CellRef::from_str(&name) else {
                    return Err(ParseError::UnknownName(name));
                };
                if *self.peek() != Token::Colon {
                    return Ok(Expr::CellRef(start));
                }
                self.advance();
                match self.advance() {
                    Token::Ident(end_name) => {
                        let end = CellRef::from_str(&end_name)
                            .ok_or(ParseError::InvalidReference(end_name))?;
                        Ok(Expr::Range { start, end })
                    }
                    other => Err(ParseError::InvalidReference(format!("{}:{}", name, other))),
                }
            }
            other => Err(ParseError::Unexpected {
                expected: "a value",
                found: other.to_string(),
            }),
        }
    }

    fn function_call(&mut self, name: String) -> Result<Expr, ParseError> {
        let name = name.to_ascii_uppercase();
        if !self.registry.is_function_registered(&name) {
            return Err(ParseError::UnknownFunction(name));
        }
        self.expect(Token::LParen, "'('")?;

        let mut args = Vec::new();
        if *self.peek() == Token::RParen {
            self.advance();
            return Ok(Expr::FunctionCall { name, args });
        }
        loop {
            args.push(self.expression()?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => break,
                other => {
                    return Err(ParseError::Unexpected {
                        expected: "',' or ')'",
                        found: other.to_string(),
                    });
                }
            }
        }
        Ok(Expr::FunctionCall { name, args })
    }

    fn expect(&mut self, expected: Token, label: &'static str) -> Result<(), ParseError> {
        let found = self.advance();
        if found == expected {
            Ok(())
        } else {
            Err(ParseError::Unexpected {
                expected: label,
                found: found.to_string(),
            })
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn negate_expr(operand: Expr) -> Expr {
    Expr::UnaryOp {
        op: UnaryOp::Neg,
        operand: Box::new(operand),
    }
}

/// Every cell the expression references directly. Ranges contribute only
/// their two corner cells; the evaluator expands them when reading values.
pub fn extract_dependencies(expr: &Expr) -> HashSet<CellRef> {
    let mut deps = HashSet::new();
    let mut stack = vec![expr];
    while let Some(expr) = stack.pop() {
        match expr {
            Expr::Literal(_) => {}
            Expr::CellRef(cell_ref) => {
                deps.insert(*cell_ref);
            }
            Expr::Range { start, end } => {
                deps.insert(*start);
                deps.insert(*end);
            }
            Expr::FunctionCall { args, .. } => stack.extend(args.iter()),
            Expr::BinaryOp { left, right, .. } => {
                stack.push(left);
                stack.push(right);
            }
            Expr::UnaryOp { operand, .. } => stack.push(operand),
        }
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn parse(text: &str) -> Result<Expr, ParseError> {
        let registry = FunctionRegistry::with_builtins();
        Parser::new(&registry).parse(text)
    }

    fn num(n: f64) -> Expr {
        Expr::Literal(Value::Number(n))
    }

    fn cell(id: &str) -> CellRef {
        CellRef::from_str(id).unwrap()
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        assert_eq!(
            parse("=2+3*4").unwrap(),
            binary(BinaryOp::Add, num(2.0), binary(BinaryOp::Mul, num(3.0), num(4.0)))
        );
    }

    #[test]
    fn test_subtraction_is_left_associative() {
        assert_eq!(
            parse("10-4-3").unwrap(),
            binary(BinaryOp::Sub, binary(BinaryOp::Sub, num(10.0), num(4.0)), num(3.0))
        );
    }

    #[test]
    fn test_comparison_is_lowest_precedence() {
        let expr = parse("=A1+1>B1&\"x\"").unwrap();
        let Expr::BinaryOp { op, .. } = expr else {
            panic!("expected binary op");
        };
        assert_eq!(op, BinaryOp::Gt);
    }

    #[test]
    fn test_unary_minus_and_power() {
        assert_eq!(
            parse("-2^2").unwrap(),
            negate_expr(binary(BinaryOp::Pow, num(2.0), num(2.0)))
        );
        assert_eq!(
            parse("2^-1").unwrap(),
            binary(BinaryOp::Pow, num(2.0), negate_expr(num(1.0)))
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("=TRUE").unwrap(), Expr::Literal(Value::Bool(true)));
        assert_eq!(parse("=1.5e2").unwrap(), num(150.0));
        assert_eq!(parse("=.5").unwrap(), num(0.5));
        assert_eq!(
            parse("=\"say \"\"hi\"\"\"").unwrap(),
            Expr::Literal(Value::Text("say \"hi\"".into()))
        );
    }

    #[test]
    fn test_references_and_ranges() {
        assert_eq!(parse("=b12").unwrap(), Expr::CellRef(cell("B12")));
        assert_eq!(
            parse("=A1:C3").unwrap(),
            Expr::Range {
                start: cell("A1"),
                end: cell("C3")
            }
        );
    }

    #[test]
    fn test_function_call_arguments_split_at_top_level() {
        let expr = parse("=sum(A1:A3, MAX(1, 2), (3))").unwrap();
        let Expr::FunctionCall { name, args } = expr else {
            panic!("expected function call");
        };
        assert_eq!(name, "SUM");
        assert_eq!(args.len(), 3);
        assert_eq!(args[2], num(3.0));
    }

    #[test]
    fn test_zero_argument_call() {
        assert_eq!(
            parse("=RAND()").unwrap(),
            Expr::FunctionCall {
                name: "RAND".into(),
                args: vec![]
            }
        );
    }

    #[test]
    fn test_unknown_function_is_rejected() {
        assert_eq!(
            parse("=FROBNICATE(1)"),
            Err(ParseError::UnknownFunction("FROBNICATE".into()))
        );
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(parse("="), Err(ParseError::Empty));
        assert_eq!(parse("=\"abc"), Err(ParseError::UnterminatedString));
        assert!(matches!(parse("=1+"), Err(ParseError::Unexpected { .. })));
        assert!(matches!(parse("=(1+2"), Err(ParseError::Unexpected { .. })));
        assert!(matches!(parse("=1 2"), Err(ParseError::Unexpected { .. })));
        assert!(matches!(parse("=A1#"), Err(ParseError::UnexpectedChar { ch: '#', .. })));
        assert_eq!(parse("=foo"), Err(ParseError::UnknownName("foo".into())));
        assert!(matches!(parse("=A1:5"), Err(ParseError::InvalidReference(_))));
    }

    #[test]
    fn test_nesting_limit() {
        let registry = FunctionRegistry::with_builtins();
        let deep = format!("={}1{}", "(".repeat(50), ")".repeat(50));
        assert!(Parser::new(&registry).parse(&deep).is_ok());
        assert_eq!(
            Parser::new(&registry).with_max_depth(10).parse(&deep),
            Err(ParseError::TooDeep(10))
        );
        let negations = format!("={}1", "-".repeat(40));
        assert_eq!(
            Parser::new(&registry).with_max_depth(10).parse(&negations),
            Err(ParseError::TooDeep(10))
        );
    }

    #[test]
    fn test_extract_dependencies_uses_range_endpoints() {
        let deps = extract_dependencies(&parse("=SUM(A1:A100)+B2*B2+\"C3\"").unwrap());
        let expected: HashSet<CellRef> = [cell("A1"), cell("A100"), cell("B2")].into();
        assert_eq!(deps, expected);
    }

    fn reference() -> impl Strategy<Value = (CellRef, Option<CellRef>)> {
        (0usize..60, 0usize..500, proptest::option::of((0usize..60, 0usize..500))).prop_map(
            |(col, row, end)| {
                (
                    CellRef::new(col, row),
                    end.map(|(c, r)| CellRef::new(c, r)),
                )
            },
        )
    }

    proptest! {
        #[test]
        fn prop_dependencies_match_textual_references(refs in proptest::collection::vec(reference(), 1..12)) {
            let mut expected = HashSet::new();
            let terms: Vec<String> = refs
                .iter()
                .map(|(start, end)| {
                    expected.insert(*start);
                    match end {
                        Some(end) => {
                            expected.insert(*end);
                            format!("SUM({}:{})", start, end)
                        }
                        None => start.to_string(),
                    }
                })
                .collect();
            let formula = format!("={}", terms.join("+"));
            let deps = extract_dependencies(&parse(&formula).unwrap());
            prop_assert_eq!(deps, expected);
        }
    }
}
