// File: src/config.rs
//
// Interpreter configuration loaded from TOML.
// Looked up from an explicit --config path, else `ebs.toml` in the working
// directory, else defaults.

use crate::errors::RuntimeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name looked up in the working directory
pub const CONFIG_FILE: &str = "ebs.toml";

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Configuration model for the interpreter
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Nested user function calls allowed before ANY_ERROR is raised
    pub max_call_depth: usize,
    /// Per-loop iteration cap; unlimited when absent
    pub max_loop_iterations: Option<u64>,
    /// Directories searched by `import` after the importing file's directory
    pub module_paths: Vec<PathBuf>,
    /// Connection aliases, e.g. `main = "sqlite:data/app.db"`
    pub databases: BTreeMap<String, String>,
    /// Print a line for every module imported or skipped
    pub echo_imports: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_loop_iterations: None,
            module_paths: vec![PathBuf::from(".")],
            databases: BTreeMap::new(),
            echo_imports: false,
        }
    }
}

impl InterpreterConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(text)?;
        config.databases = config
            .databases
            .into_iter()
            .map(|(name, url)| (name.to_lowercase(), url))
            .collect();
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let data = fs::read_to_string(path)
            .map_err(|source| RuntimeError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&data)
            .map_err(|source| RuntimeError::Config { path: path.to_path_buf(), source })
    }

    /// Explicit path if given, else `ebs.toml` when present, else defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, RuntimeError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let local = Path::new(CONFIG_FILE);
        if local.exists() {
            tracing::debug!(path = %local.display(), "loading configuration");
            return Self::load(local);
        }
        Ok(Self::default())
    }
}
