//! Engine settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use gridcalc_engine::engine::DEFAULT_MAX_DEPTH;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Reuse results when a formula's inputs are unchanged.
    pub cache_enabled: bool,
    /// Deepest formula nesting the parser accepts.
    pub max_nesting_depth: usize,
    /// Rhai scripts whose functions are registered at startup.
    pub functions_files: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_enabled: true,
            max_nesting_depth: DEFAULT_MAX_DEPTH,
            functions_files: Vec::new(),
        }
    }
}
