//! Formula engine building blocks.
//!
//! - [`CellRef`] - Cell reference parsing (A1 notation ↔ row/col indices)
//! - [`Cell`], [`CellKind`], [`Grid`] - Cell records and grid snapshots
//! - [`Value`], [`ErrorValue`] - Evaluation results and error sentinels
//! - [`Parser`], [`extract_dependencies`] - Formula text → [`Expr`]
//! - [`Evaluator`] - Tree-walking evaluation against a grid snapshot
//! - [`DependencyGraph`] - Edges, dirty tracking and evaluation order
//! - [`format_value`] - Display formatting

mod ast;
mod cell;
mod cell_ref;
mod cycle;
mod eval;
mod format;
mod graph;
mod parser;
mod value;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use cell::{Cell, CellKind, Grid, read_cell};
pub use cell_ref::CellRef;
pub use cycle::{cycle_members, find_cycle};
pub use eval::{DependencySink, EvalError, Evaluator, MAX_RANGE_CELLS};
pub use format::{format_number, format_value};
pub use graph::{DependencyGraph, GraphStats};
pub use parser::{DEFAULT_MAX_DEPTH, ParseError, Parser, extract_dependencies};
pub use value::{ErrorValue, Value};
