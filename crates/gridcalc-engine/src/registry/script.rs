//! User-defined functions written in Rhai.
//!
//! Every public `fn` in a script becomes a spreadsheet function under its
//! upper-cased name, e.g. `fn double(x) { x * 2.0 }` is callable as
//! `=DOUBLE(A1)`. Arguments are passed positionally; ranges arrive as arrays.

use std::rc::Rc;

use rhai::{Array, Dynamic, Engine, FnAccess, Scope};
use tracing::{debug, warn};

use super::{FunctionMeta, FunctionRegistry, RegistryError};
use crate::engine::{ErrorValue, Value};

impl FunctionRegistry {
    /// Compile `source` and register its public functions. Returns the
    /// registered names, sorted.
    pub fn load_script(&mut self, source: &str) -> Result<Vec<String>, RegistryError> {
        let engine = Engine::new();
        let ast = engine
            .compile(source)
            .map_err(|e| RegistryError::Script(e.to_string()))?;

        let functions: Vec<(String, usize)> = ast
            .iter_functions()
            .filter(|f| f.access != FnAccess::Private)
            .map(|f| (f.name.to_string(), f.params.len()))
            .collect();

        let shared = Rc::new((engine, ast));
        let mut names = Vec::with_capacity(functions.len());
        for (name, arity) in functions {
            let upper = name.to_ascii_uppercase();
            let meta = FunctionMeta::new(&upper, "User-defined function")
                .syntax(&format!("{}({})", upper, param_list(arity)));
            let script = Rc::clone(&shared);
            self.register(meta, move |args, _ctx| {
                call_script(&script.0, &script.1, &name, arity, args)
            });
            names.push(upper);
        }
        names.sort();
        debug!(count = names.len(), "loaded script functions");
        Ok(names)
    }
}

fn param_list(arity: usize) -> String {
    (1..=arity)
        .map(|i| format!("arg{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn call_script(
    engine: &Engine,
    ast: &rhai::AST,
    name: &str,
    arity: usize,
    args: &[Value],
) -> Value {
    if args.len() != arity {
        return Value::Error(ErrorValue::Value);
    }
    if let Some(err) = args.iter().find_map(Value::error) {
        return Value::Error(err);
    }
    let dynamic_args: Vec<Dynamic> = args.iter().map(to_dynamic).collect();
    match engine.call_fn::<Dynamic>(&mut Scope::new(), ast, name, dynamic_args) {
        Ok(result) => from_dynamic(result),
        Err(e) => {
            warn!(function = name, error = %e, "script function failed");
            Value::Error(ErrorValue::Value)
        }
    }
}

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Empty => Dynamic::UNIT,
        Value::Number(n) => Dynamic::from_float(*n),
        Value::Text(s) => Dynamic::from(s.clone()),
        Value::Bool(b) => Dynamic::from_bool(*b),
        Value::Error(e) => Dynamic::from(e.sentinel().to_string()),
        Value::Array(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
    }
}

fn from_dynamic(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::Empty;
    }
    if let Ok(n) = value.as_float() {
        return number(n);
    }
    if let Ok(i) = value.as_int() {
        return number(i as f64);
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if value.is_string() {
        let text = value.into_string().unwrap_or_default();
        return match ErrorValue::from_sentinel(&text) {
            Some(e) => Value::Error(e),
            None => Value::Text(text),
        };
    }
    if value.is_array() {
        let items: Array = value.cast();
        return Value::Array(items.into_iter().map(from_dynamic).collect());
    }
    Value::Text(value.to_string())
}

fn number(n: f64) -> Value {
    if n.is_finite() {
        Value::Number(n)
    } else {
        Value::Error(ErrorValue::Num)
    }
}
