//! The formula engine: parse, evaluate, cache and recalculate.
//!
//! A [`FormulaEngine`] owns the dependency graph and result cache for one
//! sheet. Every operation reads a caller-owned [`Grid`] snapshot and returns
//! a new one; the caller's grid is never modified.
//!
//! All methods take `&self`. Registered functions may hold a handle to the
//! engine that evaluates them, so a recalculation can be requested while
//! one is already running; such calls are ignored (see [`recalc`]).

mod cache;
pub mod recalc;

use std::cell::{Cell as Flag, Ref, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, trace, warn};

use gridcalc_engine::FunctionRegistry;
use gridcalc_engine::engine::{
    CellRef, DependencyGraph, ErrorValue, Evaluator, Expr, Grid, ParseError, Parser, Value,
    extract_dependencies,
};

pub use cache::{CacheEntry, ResultCache, fingerprint, input_cells};
pub use recalc::CellUpdate;

use crate::config::EngineConfig;
use crate::error::{GridcalcError, Result};

/// Largest functions file that will be read.
pub const MAX_FUNCTIONS_FILE_BYTES: u64 = 1024 * 1024;

pub struct FormulaEngine {
    registry: FunctionRegistry,
    config: EngineConfig,
    graph: RefCell<DependencyGraph>,
    cache: ResultCache,
    calculating: Flag<bool>,
    evaluations: RefCell<HashMap<CellRef, usize>>,
    cache_hits: Flag<usize>,
}

impl FormulaEngine {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    /// Uses `config` as given; `functions_files` are not read here.
    pub fn with_config(registry: FunctionRegistry, config: EngineConfig) -> Self {
        FormulaEngine {
            registry,
            config,
            graph: RefCell::new(DependencyGraph::new()),
            cache: ResultCache::new(),
            calculating: Flag::new(false),
            evaluations: RefCell::new(HashMap::new()),
            cache_hits: Flag::new(0),
        }
    }

    /// Built-in functions plus every script listed in `config.functions_files`.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let mut registry = FunctionRegistry::with_builtins();
        for path in &config.functions_files {
            load_functions(&mut registry, path)?;
        }
        Ok(Self::with_config(registry, config))
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse with this engine's registry and nesting limit.
    pub fn parse(&self, formula: &str) -> std::result::Result<Expr, ParseError> {
        Parser::new(&self.registry)
            .with_max_depth(self.config.max_nesting_depth)
            .parse(formula)
    }

    /// Evaluate `formula` as the contents of `cell`: parse, evaluate, cache.
    ///
    /// The cell's dependency edges are replaced by the ones the formula
    /// references. Parse and evaluation failures yield `#ERROR!`.
    pub fn evaluate(&self, cell: CellRef, formula: &str, grid: &Grid) -> Value {
        let Ok(mut graph) = self.graph.try_borrow_mut() else {
            warn!(%cell, "dependency graph busy; evaluation refused");
            return Value::Error(ErrorValue::Error);
        };

        let ast = match self.parse(formula) {
            Ok(ast) => ast,
            Err(e) => {
                debug!(%cell, formula, error = %e, "formula failed to parse");
                graph.remove_cell(cell);
                self.cache.invalidate(&cell);
                return Value::Error(ErrorValue::Error);
            }
        };
        graph.update_dependencies(cell, extract_dependencies(&ast));

        let volatile = ast
            .function_names()
            .into_iter()
            .any(|name| self.registry.is_volatile(name));
        let cacheable = self.config.cache_enabled && !volatile;
        let fingerprint = if cacheable {
            let current = fingerprint(grid, &input_cells(&ast));
            if let Some(value) = self.cache.lookup(&cell, formula, current) {
                self.cache_hits.set(self.cache_hits.get() + 1);
                trace!(%cell, "cache hit");
                return value;
            }
            Some(current)
        } else {
            None
        };

        *self.evaluations.borrow_mut().entry(cell).or_insert(0) += 1;
        let result = Evaluator::new(&self.registry, grid, &mut *graph)
            .for_cell(cell)
            .evaluate(&ast);

        match result {
            Ok(value) => {
                match fingerprint {
                    Some(fingerprint) => self.cache.store(
                        cell,
                        CacheEntry {
                            value: value.clone(),
                            fingerprint,
                            formula: formula.to_string(),
                        },
                    ),
                    None => self.cache.invalidate(&cell),
                }
                value
            }
            Err(e) => {
                debug!(%cell, formula, error = %e, "formula failed to evaluate");
                self.cache.invalidate(&cell);
                Value::Error(ErrorValue::Error)
            }
        }
    }

    /// Evaluate a formula that belongs to no cell. Nothing is cached and no
    /// dependency edges are recorded.
    pub fn evaluate_detached(&self, formula: &str, grid: &Grid) -> Value {
        let ast = match self.parse(formula) {
            Ok(ast) => ast,
            Err(e) => {
                debug!(formula, error = %e, "formula failed to parse");
                return Value::Error(ErrorValue::Error);
            }
        };
        match Evaluator::new(&self.registry, grid, &mut ()).evaluate(&ast) {
            Ok(value) => value,
            Err(e) => {
                debug!(formula, error = %e, "formula failed to evaluate");
                Value::Error(ErrorValue::Error)
            }
        }
    }

    /// Read access to the dependency graph. None while a cell is being
    /// evaluated, since the evaluator holds the graph mutably.
    pub fn graph(&self) -> Option<Ref<'_, DependencyGraph>> {
        self.graph.try_borrow().ok()
    }

    /// True while a recalculation pass is running.
    pub fn is_calculating(&self) -> bool {
        self.calculating.get()
    }

    /// How many times the evaluator has run for `cell`. Cache hits do not count.
    pub fn evaluation_count(&self, cell: &CellRef) -> usize {
        self.evaluations.borrow().get(cell).copied().unwrap_or(0)
    }

    pub fn total_evaluations(&self) -> usize {
        self.evaluations.borrow().values().sum()
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.get()
    }

    pub fn reset_counters(&self) {
        self.evaluations.borrow_mut().clear();
        self.cache_hits.set(0);
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl std::fmt::Debug for FormulaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormulaEngine")
            .field("config", &self.config)
            .field("cache_len", &self.cache.len())
            .field("calculating", &self.calculating.get())
            .finish_non_exhaustive()
    }
}

/// Read a Rhai functions file into `registry`.
pub fn load_functions(registry: &mut FunctionRegistry, path: &Path) -> Result<Vec<String>> {
    let size = fs::metadata(path)?.len();
    if size > MAX_FUNCTIONS_FILE_BYTES {
        return Err(GridcalcError::FileTooLarge {
            path: path.to_path_buf(),
            limit: MAX_FUNCTIONS_FILE_BYTES,
        });
    }
    let source = fs::read_to_string(path)?;
    let names = registry
        .load_script(&source)
        .map_err(|source| GridcalcError::Functions {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), functions = ?names, "loaded functions file");
    Ok(names)
}
