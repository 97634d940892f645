//! Engine configuration.
//!
//! The relink policy thresholds and the inference iteration cap can be
//! given as TOML (text or file) and overridden from the environment:
//!
//! - `SUBSET_LUA_JIT_RELINK_LIMIT`
//! - `SUBSET_LUA_JIT_TYPE_CHANGE_LIMIT`
//! - `SUBSET_LUA_JIT_MAX_INFERENCE_ITERATIONS`

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RELINK_LIMIT_ENV: &str = "SUBSET_LUA_JIT_RELINK_LIMIT";
pub const TYPE_CHANGE_LIMIT_ENV: &str = "SUBSET_LUA_JIT_TYPE_CHANGE_LIMIT";
pub const MAX_INFERENCE_ITERATIONS_ENV: &str = "SUBSET_LUA_JIT_MAX_INFERENCE_ITERATIONS";

/// Default number of relinks a call site performs with identity guards
/// before it downgrades to prototype guards.
pub const DEFAULT_RELINK_LIMIT: u32 = 5;

/// Default number of signature changes after which a call site stops
/// trusting observed argument types.
pub const DEFAULT_TYPE_CHANGE_LIMIT: u32 = 3;

/// Default cap on fixed-point passes of the inference pre-pass.
pub const DEFAULT_MAX_INFERENCE_ITERATIONS: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub relink_limit: u32,
    pub type_change_limit: u32,
    pub max_inference_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relink_limit: DEFAULT_RELINK_LIMIT,
            type_change_limit: DEFAULT_TYPE_CHANGE_LIMIT,
            max_inference_iterations: DEFAULT_MAX_INFERENCE_ITERATIONS,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override(&lookup, RELINK_LIMIT_ENV)? {
            self.relink_limit = v;
        }
        if let Some(v) = parse_override(&lookup, TYPE_CHANGE_LIMIT_ENV)? {
            self.type_change_limit = v;
        }
        if let Some(v) = parse_override(&lookup, MAX_INFERENCE_ITERATIONS_ENV)? {
            self.max_inference_iterations = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_inference_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_inference_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_override<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
    }
}
