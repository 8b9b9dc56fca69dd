//! gridcalc-core - recalculation on top of the formula engine.
//!
//! [`FormulaEngine`] owns the dependency graph and a result cache, and turns
//! grid snapshots into recalculated grid snapshots.

pub mod config;
pub mod engine;
pub mod error;
pub mod sheet;

pub use config::EngineConfig;
pub use engine::{CellUpdate, FormulaEngine};
pub use error::{GridcalcError, Result};

pub use gridcalc_engine::engine::{Cell, CellRef, Grid, Value};
