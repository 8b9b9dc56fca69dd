//! Error types for gridcalc core.

use std::path::PathBuf;

use gridcalc_engine::RegistryError;
use thiserror::Error;

/// Errors raised while setting up an engine or reading a sheet. Formula
/// failures never surface here; they become error values in the grid.
#[derive(Error, Debug)]
pub enum GridcalcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("{path} is larger than {limit} bytes")]
    FileTooLarge { path: PathBuf, limit: u64 },

    #[error("Error in custom functions {path}: {source}")]
    Functions {
        path: PathBuf,
        #[source]
        source: RegistryError,
    },
}

pub type Result<T> = std::result::Result<T, GridcalcError>;
