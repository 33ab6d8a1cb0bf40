//! Configuration handling
//!
//! Reads `docql.toml`, loads a `.env` file next to it when present and applies
//! environment overrides.
//!
//! ## Environment Variables
//!
//! - `DOCQL_PARALLEL_INCLUDES` - load sibling includes concurrently (`true`/`false`)
//! - `DOCQL_MAX_IN_VALUES` - limit for `In` / `ArrayContainsAny` lists
//! - `DOCQL_MAX_NOT_IN_VALUES` - limit for `NotIn` lists
//! - `DOCQL_LOG` - tracing filter directive

use std::path::Path;

use serde::{Deserialize, Serialize};

use docql_core::StoreLimits;

use crate::error::{DqlError, DqlResult};

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "docql.toml";

/// Environment variable names
pub const ENV_PARALLEL_INCLUDES: &str = "DOCQL_PARALLEL_INCLUDES";
pub const ENV_MAX_IN_VALUES: &str = "DOCQL_MAX_IN_VALUES";
pub const ENV_MAX_NOT_IN_VALUES: &str = "DOCQL_MAX_NOT_IN_VALUES";
pub const ENV_LOG: &str = "DOCQL_LOG";

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "docql=info";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DqlConfig {
    /// Store query limits
    #[serde(default)]
    pub limits: StoreLimits,
    /// Execution behaviour
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Tracing filter directive, used when `RUST_LOG` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

/// Execution-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Load sibling includes concurrently
    #[serde(default)]
    pub parallel_includes: bool,
    /// Run the queries of an emulated disjunction concurrently
    #[serde(default = "default_true")]
    pub parallel_disjunctions: bool,
    /// Maximum number of cached materialization plans
    #[serde(default = "default_plan_cache_capacity")]
    pub plan_cache_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_plan_cache_capacity() -> usize {
    1000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel_includes: false,
            parallel_disjunctions: default_true(),
            plan_cache_capacity: default_plan_cache_capacity(),
        }
    }
}

impl DqlConfig {
    /// Load configuration from a directory
    ///
    /// Missing `docql.toml` yields the defaults; environment overrides apply
    /// either way.
    pub fn load(dir: &Path) -> DqlResult<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            tracing::debug!("[CONFIG] {} not found, using defaults", config_path.display());
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a specific TOML file, without environment overrides
    pub fn from_file(path: &Path) -> DqlResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> DqlResult<Self> {
        toml::from_str(content).map_err(|e| DqlError::Config(e.to_string()))
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(ENV_PARALLEL_INCLUDES) {
            if let Ok(parallel) = value.trim().parse::<bool>() {
                self.execution.parallel_includes = parallel;
            }
        }

        if let Ok(value) = std::env::var(ENV_MAX_IN_VALUES) {
            if let Ok(max) = value.trim().parse::<usize>() {
                self.limits.max_in_values = max;
            }
        }

        if let Ok(value) = std::env::var(ENV_MAX_NOT_IN_VALUES) {
            if let Ok(max) = value.trim().parse::<usize>() {
                self.limits.max_not_in_values = max;
            }
        }

        if let Ok(filter) = std::env::var(ENV_LOG) {
            if !filter.is_empty() {
                self.log_filter = Some(filter);
            }
        }
    }

    /// Filter directive for the tracing subscriber
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Save configuration to a directory
    pub fn save(&self, dir: &Path) -> DqlResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| DqlError::Config(e.to_string()))?;
        std::fs::write(dir.join(CONFIG_FILE_NAME), content)?;
        Ok(())
    }
}
