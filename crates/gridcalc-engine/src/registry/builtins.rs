//! Built-in spreadsheet functions and their metadata.
//!
//! This is a small representative catalog, not a full spreadsheet library.
//! If you add a built-in, add its entry to `BUILTINS`; the registry picks
//! it up from there.

use rand::Rng;

use super::FunctionMeta;
use crate::engine::{ErrorValue, Value, format_value};

pub type BuiltinResult = Result<Value, ErrorValue>;

pub struct Builtin {
    pub name: &'static str,
    pub description: &'static str,
    pub syntax: &'static str,
    pub category: &'static str,
    pub examples: &'static [&'static str],
    pub volatile: bool,
    pub call: fn(&[Value]) -> BuiltinResult,
}

impl Builtin {
    pub fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: self.name.to_string(),
            description: self.description.to_string(),
            syntax: self.syntax.to_string(),
            category: self.category.to_string(),
            examples: self.examples.iter().map(|e| e.to_string()).collect(),
            volatile: self.volatile,
        }
    }
}

pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "SUM",
        description: "Sum of numeric values",
        syntax: "SUM(value1, [value2, ...])",
        category: "Math",
        examples: &["=SUM(A1:A10)", "=SUM(A1, B1, 10)"],
        volatile: false,
        call: sum,
    },
    Builtin {
        name: "AVERAGE",
        description: "Average of numeric values",
        syntax: "AVERAGE(value1, [value2, ...])",
        category: "Statistical",
        examples: &["=AVERAGE(B1:B5)"],
        volatile: false,
        call: average,
    },
    Builtin {
        name: "AVG",
        description: "Alias for AVERAGE",
        syntax: "AVG(value1, [value2, ...])",
        category: "Statistical",
        examples: &["=AVG(B1:B5)"],
        volatile: false,
        call: average,
    },
    Builtin {
        name: "COUNT",
        description: "Count of numeric values",
        syntax: "COUNT(value1, [value2, ...])",
        category: "Statistical",
        examples: &["=COUNT(A1:C3)"],
        volatile: false,
        call: count,
    },
    Builtin {
        name: "MIN",
        description: "Smallest numeric value (0 when there is none)",
        syntax: "MIN(value1, [value2, ...])",
        category: "Statistical",
        examples: &["=MIN(A1:A10)"],
        volatile: false,
        call: min,
    },
    Builtin {
        name: "MAX",
        description: "Largest numeric value (0 when there is none)",
        syntax: "MAX(value1, [value2, ...])",
        category: "Statistical",
        examples: &["=MAX(A1:A10)"],
        volatile: false,
        call: max,
    },
    Builtin {
        name: "ABS",
        description: "Absolute value of a number",
        syntax: "ABS(number)",
        category: "Math",
        examples: &["=ABS(-4)"],
        volatile: false,
        call: abs,
    },
    Builtin {
        name: "ROUND",
        description: "Round a number to a number of digits",
        syntax: "ROUND(number, [digits])",
        category: "Math",
        examples: &["=ROUND(3.14159, 2)", "=ROUND(1250, -2)"],
        volatile: false,
        call: round,
    },
    Builtin {
        name: "IF",
        description: "Choose between two values based on a condition",
        syntax: "IF(condition, value_if_true, [value_if_false])",
        category: "Logical",
        examples: &["=IF(A1>10, \"big\", \"small\")"],
        volatile: false,
        call: if_fn,
    },
    Builtin {
        name: "AND",
        description: "TRUE if every argument is true",
        syntax: "AND(logical1, [logical2, ...])",
        category: "Logical",
        examples: &["=AND(A1>0, B1>0)"],
        volatile: false,
        call: and,
    },
    Builtin {
        name: "OR",
        description: "TRUE if any argument is true",
        syntax: "OR(logical1, [logical2, ...])",
        category: "Logical",
        examples: &["=OR(A1>0, B1>0)"],
        volatile: false,
        call: or,
    },
    Builtin {
        name: "NOT",
        description: "Logical negation",
        syntax: "NOT(logical)",
        category: "Logical",
        examples: &["=NOT(A1)"],
        volatile: false,
        call: not,
    },
    Builtin {
        name: "CONCAT",
        description: "Join the display text of all arguments",
        syntax: "CONCAT(text1, [text2, ...])",
        category: "Text",
        examples: &["=CONCAT(A1, \" \", B1)"],
        volatile: false,
        call: concat,
    },
    Builtin {
        name: "LEN",
        description: "Number of characters in a value's display text",
        syntax: "LEN(text)",
        category: "Text",
        examples: &["=LEN(A1)"],
        volatile: false,
        call: len,
    },
    Builtin {
        name: "UPPER",
        description: "Convert text to upper case",
        syntax: "UPPER(text)",
        category: "Text",
        examples: &["=UPPER(\"abc\")"],
        volatile: false,
        call: upper,
    },
    Builtin {
        name: "LOWER",
        description: "Convert text to lower case",
        syntax: "LOWER(text)",
        category: "Text",
        examples: &["=LOWER(\"ABC\")"],
        volatile: false,
        call: lower,
    },
    Builtin {
        name: "NOW",
        description: "Current local date and time",
        syntax: "NOW()",
        category: "Date",
        examples: &["=NOW()"],
        volatile: true,
        call: now,
    },
    Builtin {
        name: "TODAY",
        description: "Current local date",
        syntax: "TODAY()",
        category: "Date",
        examples: &["=TODAY()"],
        volatile: true,
        call: today,
    },
    Builtin {
        name: "RAND",
        description: "Random number in [0, 1)",
        syntax: "RAND()",
        category: "Math",
        examples: &["=RAND()"],
        volatile: true,
        call: rand_fn,
    },
];

/// Arguments with ranges expanded in place.
fn flatten(args: &[Value]) -> impl Iterator<Item = &Value> {
    args.iter().flat_map(|arg| match arg {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        other => vec![other],
    })
}

fn first_error(args: &[Value]) -> Result<(), ErrorValue> {
    match flatten(args).find_map(Value::error) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Numbers from the arguments. Inside ranges only real numbers count; direct
/// arguments may also be booleans or numeric text.
fn numbers(args: &[Value]) -> Result<Vec<f64>, ErrorValue> {
    first_error(args)?;
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::Array(items) => out.extend(items.iter().filter_map(|v| match v {
                Value::Number(n) => Some(*n),
                _ => None,
            })),
            Value::Empty => {}
            other => {
                if let Some(n) = other.as_number() {
                    out.push(n);
                }
            }
        }
    }
    Ok(out)
}

fn arity(args: &[Value], min: usize, max: usize) -> Result<(), ErrorValue> {
    if args.len() < min || args.len() > max {
        return Err(ErrorValue::Value);
    }
    Ok(())
}

fn scalar(args: &[Value], idx: usize) -> Result<Value, ErrorValue> {
    match args.get(idx).cloned().unwrap_or(Value::Empty).first() {
        Value::Error(e) => Err(e),
        other => Ok(other),
    }
}

fn number_arg(args: &[Value], idx: usize) -> Result<f64, ErrorValue> {
    scalar(args, idx)?.as_number().ok_or(ErrorValue::Value)
}

fn bool_arg(value: &Value) -> Result<bool, ErrorValue> {
    value.as_bool().ok_or(ErrorValue::Value)
}

fn sum(args: &[Value]) -> BuiltinResult {
    Ok(Value::Number(numbers(args)?.iter().sum()))
}

fn average(args: &[Value]) -> BuiltinResult {
    let values = numbers(args)?;
    if values.is_empty() {
        return Err(ErrorValue::DivZero);
    }
    Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
}

fn count(args: &[Value]) -> BuiltinResult {
    let n = flatten(args)
        .filter(|v| matches!(v, Value::Number(_)))
        .count();
    Ok(Value::Number(n as f64))
}

fn min(args: &[Value]) -> BuiltinResult {
    let values = numbers(args)?;
    Ok(Value::Number(values.into_iter().reduce(f64::min).unwrap_or(0.0)))
}

fn max(args: &[Value]) -> BuiltinResult {
    let values = numbers(args)?;
    Ok(Value::Number(values.into_iter().reduce(f64::max).unwrap_or(0.0)))
}

fn abs(args: &[Value]) -> BuiltinResult {
    arity(args, 1, 1)?;
    Ok(Value::Number(number_arg(args, 0)?.abs()))
}

fn round(args: &[Value]) -> BuiltinResult {
    arity(args, 1, 2)?;
    let n = number_arg(args, 0)?;
    let digits = if args.len() > 1 { number_arg(args, 1)?.trunc() } else { 0.0 };
    let rounded = if digits >= 0.0 {
        let factor = 10f64.powf(digits);
        (n * factor).round() / factor
    } else {
        let factor = 10f64.powf(-digits);
        (n / factor).round() * factor
    };
    if rounded.is_finite() {
        Ok(Value::Number(rounded))
    } else {
        Err(ErrorValue::Num)
    }
}

fn if_fn(args: &[Value]) -> BuiltinResult {
    arity(args, 2, 3)?;
    let condition = bool_arg(&scalar(args, 0)?)?;
    let chosen = if condition {
        args[1].clone()
    } else {
        args.get(2).cloned().unwrap_or(Value::Bool(false))
    };
    Ok(chosen)
}

fn logicals(args: &[Value]) -> Result<Vec<bool>, ErrorValue> {
    first_error(args)?;
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::Array(items) => {
                for item in items {
                    if matches!(item, Value::Number(_) | Value::Bool(_)) {
                        out.push(bool_arg(item)?);
                    }
                }
            }
            other => out.push(bool_arg(other)?),
        }
    }
    if out.is_empty() {
        return Err(ErrorValue::Value);
    }
    Ok(out)
}

fn and(args: &[Value]) -> BuiltinResult {
    Ok(Value::Bool(logicals(args)?.into_iter().all(|b| b)))
}

fn or(args: &[Value]) -> BuiltinResult {
    Ok(Value::Bool(logicals(args)?.into_iter().any(|b| b)))
}

fn not(args: &[Value]) -> BuiltinResult {
    arity(args, 1, 1)?;
    Ok(Value::Bool(!bool_arg(&scalar(args, 0)?)?))
}

fn concat(args: &[Value]) -> BuiltinResult {
    first_error(args)?;
    Ok(Value::Text(flatten(args).map(format_value).collect()))
}

fn text_arg(args: &[Value]) -> Result<String, ErrorValue> {
    arity(args, 1, 1)?;
    Ok(format_value(&scalar(args, 0)?))
}

fn len(args: &[Value]) -> BuiltinResult {
    Ok(Value::Number(text_arg(args)?.chars().count() as f64))
}

fn upper(args: &[Value]) -> BuiltinResult {
    Ok(Value::Text(text_arg(args)?.to_uppercase()))
}

fn lower(args: &[Value]) -> BuiltinResult {
    Ok(Value::Text(text_arg(args)?.to_lowercase()))
}

fn now(args: &[Value]) -> BuiltinResult {
    arity(args, 0, 0)?;
    Ok(Value::Text(
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    ))
}

fn today(args: &[Value]) -> BuiltinResult {
    arity(args, 0, 0)?;
    Ok(Value::Text(chrono::Local::now().format("%Y-%m-%d").to_string()))
}

fn rand_fn(args: &[Value]) -> BuiltinResult {
    arity(args, 0, 0)?;
    Ok(Value::Number(rand::thread_rng().r#gen::<f64>()))
}
