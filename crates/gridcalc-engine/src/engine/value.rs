//! Evaluation results.
//!
//! Errors never escape evaluation as Rust errors once they reach a cell:
//! they are stored as [`Value::Error`] and displayed as the familiar
//! sentinel strings (`#DIV/0!`, `#ERROR!`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The error sentinels a cell can display.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorValue {
    /// Generic evaluation failure (parse errors, bad operands, cycles).
    Error,
    DivZero,
    Value,
    NotAvailable,
    Ref,
    Name,
    Num,
}

impl ErrorValue {
    pub const ALL: [ErrorValue; 7] = [
        ErrorValue::Error,
        ErrorValue::DivZero,
        ErrorValue::Value,
        ErrorValue::NotAvailable,
        ErrorValue::Ref,
        ErrorValue::Name,
        ErrorValue::Num,
    ];

    pub fn sentinel(self) -> &'static str {
        match self {
            ErrorValue::Error => "#ERROR!",
            ErrorValue::DivZero => "#DIV/0!",
            ErrorValue::Value => "#VALUE!",
            ErrorValue::NotAvailable => "#N/A",
            ErrorValue::Ref => "#REF!",
            ErrorValue::Name => "#NAME?",
            ErrorValue::Num => "#NUM!",
        }
    }

    /// Recognize a sentinel string (case-insensitive, surrounding whitespace ignored).
    pub fn from_sentinel(text: &str) -> Option<ErrorValue> {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|e| e.sentinel().eq_ignore_ascii_case(text))
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sentinel())
    }
}

/// A scalar or array result of evaluating an expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A cell inside a range that does not exist in the grid.
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Error(ErrorValue),
    /// Row-major cell values of a range reference.
    Array(Vec<Value>),
}

impl Value {
    /// Type a raw non-formula entry: number, TRUE/FALSE, error sentinel, else text.
    pub fn from_literal(text: &str) -> Value {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Value::Empty;
        }
        if let Some(n) = parse_number(trimmed) {
            return Value::Number(n);
        }
        if trimmed.eq_ignore_ascii_case("TRUE") {
            return Value::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("FALSE") {
            return Value::Bool(false);
        }
        if let Some(err) = ErrorValue::from_sentinel(trimmed) {
            return Value::Error(err);
        }
        Value::Text(text.to_string())
    }

    /// Numeric view of a scalar, if it has one. Empty reads as 0.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Empty => Some(0.0),
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => parse_number(s.trim()),
            Value::Error(_) | Value::Array(_) => None,
        }
    }

    /// Truthiness used by IF/AND/OR/NOT.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Text(s) if s.eq_ignore_ascii_case("TRUE") => Some(true),
            Value::Text(s) if s.eq_ignore_ascii_case("FALSE") => Some(false),
            other => other.as_number().map(|n| n != 0.0),
        }
    }

    /// Arrays collapse to their first element; scalars are returned as-is.
    pub fn first(self) -> Value {
        match self {
            Value::Array(items) => items.into_iter().next().unwrap_or(Value::Empty),
            other => other,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn error(&self) -> Option<ErrorValue> {
        match self {
            Value::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// Stable textual form used when fingerprinting dependency values.
    /// Numbers use their exact round-trip representation.
    pub fn fingerprint_key(&self) -> String {
        match self {
            Value::Empty => "empty".to_string(),
            Value::Number(n) => format!("n{:?}", n),
            Value::Text(s) => format!("s{}", s),
            Value::Bool(b) => format!("b{}", b),
            Value::Error(e) => format!("e{}", e),
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(Value::fingerprint_key).collect();
                format!("[{}]", inner.join(","))
            }
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<ErrorValue> for Value {
    fn from(e: ErrorValue) -> Self {
        Value::Error(e)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::format::format_value(self))
    }
}

/// Finite decimal numbers only; Rust's parser also accepts "inf" and "NaN".
fn parse_number(text: &str) -> Option<f64> {
    let n = text.parse::<f64>().ok()?;
    n.is_finite().then_some(n)
}
