//! Result cache keyed by cell, validated by a fingerprint of the formula's inputs.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;

use gridcalc_engine::engine::{CellRef, Expr, Grid, MAX_RANGE_CELLS, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub fingerprint: u64,
    /// Formula text the value was computed from; an edited formula never hits.
    pub formula: String,
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<CellRef, CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached value, if it was computed from `formula` over inputs that
    /// still hash to `fingerprint`.
    pub fn lookup(&self, cell: &CellRef, formula: &str, fingerprint: u64) -> Option<Value> {
        let entry = self.entries.get(cell)?;
        (entry.fingerprint == fingerprint && entry.formula == formula)
            .then(|| entry.value.clone())
    }

    pub fn store(&self, cell: CellRef, entry: CacheEntry) {
        self.entries.insert(cell, entry);
    }

    pub fn invalidate(&self, cell: &CellRef) {
        self.entries.remove(cell);
    }

    pub fn invalidate_all<'a>(&self, cells: impl IntoIterator<Item = &'a CellRef>) {
        for cell in cells {
            self.entries.remove(cell);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Every cell a formula reads, with ranges expanded. Oversized ranges
/// contribute only their endpoints; evaluating them fails anyway.
pub fn input_cells(expr: &Expr) -> HashSet<CellRef> {
    let mut cells = HashSet::new();
    let mut stack = vec![expr];
    while let Some(expr) = stack.pop() {
        match expr {
            Expr::Literal(_) => {}
            Expr::CellRef(cell) => {
                cells.insert(*cell);
            }
            Expr::Range { start, end } => match CellRef::rect_len(*start, *end) {
                Some(len) if len <= MAX_RANGE_CELLS => cells.extend(CellRef::rect(*start, *end)),
                _ => {
                    cells.insert(*start);
                    cells.insert(*end);
                }
            },
            Expr::FunctionCall { args, .. } => stack.extend(args.iter()),
            Expr::BinaryOp { left, right, .. } => {
                stack.push(left);
                stack.push(right);
            }
            Expr::UnaryOp { operand, .. } => stack.push(operand),
        }
    }
    cells
}

/// Order-independent hash of `id:value` over `inputs`.
///
/// A missing cell hashes apart from every stored value: range functions
/// skip it, so it is not interchangeable with a zero or an empty string.
pub fn fingerprint<'a>(grid: &Grid, inputs: impl IntoIterator<Item = &'a CellRef>) -> u64 {
    inputs.into_iter().fold(0u64, |acc, cell| {
        let key = grid
            .get(cell)
            .map_or_else(|| "missing".to_string(), |c| c.value().fingerprint_key());
        let mut hasher = DefaultHasher::new();
        format!("{}:{}", cell, key).hash(&mut hasher);
        acc.wrapping_add(hasher.finish())
    })
}
