//! Engine configuration file.
//!
//! ```toml
//! [engine]
//! cache_enabled = true
//! max_nesting_depth = 256
//! functions_files = ["functions.rhai"]
//! ```
//!
//! Relative `functions_files` are resolved against the config file's directory.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use gridcalc_core::EngineConfig;

/// Largest config file that will be read.
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is larger than {limit} bytes")]
    TooLarge { path: PathBuf, limit: u64 },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
}

pub fn user_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "gridcalc")?;
    Some(proj.config_dir().join("config.toml"))
}

/// Load `config_file`, or the per-user config if none is given. Problems are
/// returned as warnings and the defaults are used instead.
pub fn load_config(config_file: Option<&Path>) -> (EngineConfig, Vec<String>) {
    let mut warnings = Vec::new();
    let path = config_file.map(Path::to_path_buf).or_else(user_config_path);

    let Some(path) = path else {
        return (EngineConfig::default(), warnings);
    };
    if !path.exists() {
        if config_file.is_some() {
            warnings.push(format!("Config file not found: {}", path.display()));
        }
        return (EngineConfig::default(), warnings);
    }

    match read_config(&path) {
        Ok(config) => (config, warnings),
        Err(err) => {
            warnings.push(err.to_string());
            (EngineConfig::default(), warnings)
        }
    }
}

pub fn read_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let read_err = |source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    };
    let size = fs::metadata(path).map_err(read_err)?.len();
    if size > MAX_CONFIG_BYTES {
        return Err(ConfigError::TooLarge {
            path: path.to_path_buf(),
            limit: MAX_CONFIG_BYTES,
        });
    }
    let content = fs::read_to_string(path).map_err(read_err)?;
    let mut config = parse_config(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(base) = path.parent() {
        for file in &mut config.functions_files {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
    }
    Ok(config)
}

fn parse_config(content: &str) -> Result<EngineConfig, toml::de::Error> {
    toml::from_str::<ConfigFile>(content).map(|file| file.engine)
}
