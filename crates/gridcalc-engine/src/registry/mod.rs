//! Function registry: name → implementation + metadata.
//!
//! Conventions:
//! - Spreadsheet-facing names are ALL CAPS (e.g. `SUM`, `AVERAGE`); lookups
//!   are case-insensitive.
//! - The parser checks names against the registry, so a formula can only
//!   call functions that were registered before it was parsed.
//! - Metadata is descriptive only; evaluation never consults it except for
//!   the `volatile` flag, which disables result caching.

mod builtins;
mod script;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::engine::{CellRef, Value};

pub use builtins::BUILTINS;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("function script error: {0}")]
    Script(String),
}

/// Information passed to every function call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionContext {
    /// The cell whose formula is being evaluated, if any.
    pub cell: Option<CellRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionMeta {
    pub name: String,
    pub description: String,
    pub syntax: String,
    pub category: String,
    pub examples: Vec<String>,
    /// Result may change without any input changing (NOW, RAND).
    pub volatile: bool,
}

impl FunctionMeta {
    pub fn new(name: &str, description: &str) -> Self {
        FunctionMeta {
            name: name.to_ascii_uppercase(),
            description: description.to_string(),
            syntax: format!("{}(...)", name.to_ascii_uppercase()),
            category: "Custom".to_string(),
            examples: Vec::new(),
            volatile: false,
        }
    }

    pub fn syntax(mut self, syntax: &str) -> Self {
        self.syntax = syntax.to_string();
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn example(mut self, example: &str) -> Self {
        self.examples.push(example.to_string());
        self
    }

    pub fn volatile(mut self, volatile: bool) -> Self {
        self.volatile = volatile;
        self
    }
}

pub type FunctionImpl = Box<dyn Fn(&[Value], &FunctionContext) -> Value>;

struct RegisteredFunction {
    meta: FunctionMeta,
    implementation: FunctionImpl,
}

/// One registry per engine; there is no global instance.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in catalog.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for builtin in BUILTINS {
            let call = builtin.call;
            registry.register(builtin.meta(), move |args, _ctx| {
                call(args).unwrap_or_else(Value::Error)
            });
        }
        registry
    }

    /// Register (or replace) a function under `meta.name`.
    pub fn register(
        &mut self,
        meta: FunctionMeta,
        implementation: impl Fn(&[Value], &FunctionContext) -> Value + 'static,
    ) {
        let name = meta.name.to_ascii_uppercase();
        if self.functions.contains_key(&name) {
            debug!(function = %name, "replacing registered function");
        }
        self.functions.insert(
            name,
            RegisteredFunction {
                meta,
                implementation: Box::new(implementation),
            },
        );
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.functions.remove(&name.to_ascii_uppercase()).is_some()
    }

    pub fn is_function_registered(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_uppercase())
    }

    pub fn execute(
        &self,
        name: &str,
        args: &[Value],
        ctx: &FunctionContext,
    ) -> Result<Value, RegistryError> {
        let key = name.to_ascii_uppercase();
        let function = self
            .functions
            .get(&key)
            .ok_or(RegistryError::UnknownFunction(key))?;
        Ok((function.implementation)(args, ctx))
    }

    pub fn metadata(&self, name: &str) -> Option<&FunctionMeta> {
        self.functions
            .get(&name.to_ascii_uppercase())
            .map(|f| &f.meta)
    }

    pub fn is_volatile(&self, name: &str) -> bool {
        self.metadata(name).is_some_and(|m| m.volatile)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
