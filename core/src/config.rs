//! Configuration
//!
//! Layers, lowest to highest:
//! 1. Built-in defaults (serde defaults on every field)
//! 2. TOML file: explicit path, `STEPWISE_CONFIG_PATH`, or `./stepwise.toml`
//! 3. Environment: `STEPWISE__<SECTION>__<KEY>` (e.g. `STEPWISE__POOL__MAX_SIZE`)
//! 4. Builder overrides
//!
//! A `.env` file in the working directory is loaded first.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "STEPWISE_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "stepwise.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Step timeout unless the step declares its own
    pub step_timeout_ms: u64,

    /// Delay before firing variable events that are not awaited
    pub event_delay_ms: u64,

    /// Tolerate unresolvable variable references
    pub build_mode: bool,

    /// Nested goal calls allowed before a run is aborted
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            event_delay_ms: 50,
            build_mode: false,
            max_call_depth: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub idle_timeout_secs: u64,
    pub eviction_interval_secs: u64,

    /// Engines created in the background when a pool is opened
    pub prewarm: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 16,
            idle_timeout_secs: 300,
            eviction_interval_secs: 60,
            prewarm: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with no overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_size == 0 {
            return Err(ConfigError::Invalid("pool.max_size must be at least 1".into()));
        }
        if self.pool.min_size > self.pool.max_size {
            return Err(ConfigError::Invalid(format!(
                "pool.min_size ({}) exceeds pool.max_size ({})",
                self.pool.min_size, self.pool.max_size
            )));
        }
        if self.engine.max_call_depth == 0 {
            return Err(ConfigError::Invalid("engine.max_call_depth must be at least 1".into()));
        }
        if self.engine.step_timeout_ms == 0 {
            return Err(ConfigError::Invalid("engine.step_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    step_timeout_ms: Option<u64>,
    build_mode: Option<bool>,
    max_pool_size: Option<usize>,
    log_level: Option<String>,
    skip_env: bool,
}

impl ConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn step_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.step_timeout_ms = ms;
        self
    }

    pub fn build_mode(mut self, build_mode: Option<bool>) -> Self {
        self.build_mode = build_mode;
        self
    }

    pub fn max_pool_size(mut self, size: Option<usize>) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn log_level(mut self, level: Option<String>) -> Self {
        self.log_level = level;
        self
    }

    /// Ignore `.env` and `STEPWISE__*` variables
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if !self.skip_env {
            let _ = dotenvy::dotenv();
        }

        let mut builder = config::Config::builder();

        // An explicit path must exist; the fallbacks are optional
        let explicit = self.config_path.clone().or_else(|| {
            if self.skip_env {
                None
            } else {
                std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
            }
        });
        match explicit {
            Some(path) => {
                builder = builder.add_source(
                    config::File::from(path)
                        .format(config::FileFormat::Toml)
                        .required(true),
                );
            }
            None => {
                builder = builder.add_source(
                    config::File::with_name(DEFAULT_CONFIG_FILE)
                        .format(config::FileFormat::Toml)
                        .required(false),
                );
            }
        }

        if !self.skip_env {
            builder = builder.add_source(
                config::Environment::with_prefix("STEPWISE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        if let Some(ms) = self.step_timeout_ms {
            builder = builder.set_override("engine.step_timeout_ms", ms as i64)?;
        }
        if let Some(build_mode) = self.build_mode {
            builder = builder.set_override("engine.build_mode", build_mode)?;
        }
        if let Some(size) = self.max_pool_size {
            builder = builder.set_override("pool.max_size", size as i64)?;
        }
        if let Some(level) = self.log_level {
            builder = builder.set_override("logging.level", level)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::builder().skip_env().build().unwrap();
        assert_eq!(config.engine.step_timeout_ms, 30_000);
        assert_eq!(config.pool.min_size, 1);
        assert_eq!(config.pool.max_size, 16);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_file_then_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[engine]\nstep_timeout_ms = 5000\n\n[pool]\nmax_size = 4\nmin_size = 2"
        )
        .unwrap();

        let config = Config::builder()
            .skip_env()
            .config_path(Some(file.path().to_path_buf()))
            .max_pool_size(Some(8))
            .build()
            .unwrap();

        assert_eq!(config.engine.step_timeout_ms, 5000);
        assert_eq!(config.pool.min_size, 2);
        assert_eq!(config.pool.max_size, 8);
        // untouched keys keep their defaults
        assert_eq!(config.pool.idle_timeout_secs, 300);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::builder()
            .skip_env()
            .config_path(Some(PathBuf::from("/nonexistent/stepwise.toml")))
            .build();
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_environment_layer() {
        std::env::set_var("STEPWISE__ENGINE__EVENT_DELAY_MS", "7");
        let config = Config::builder().build().unwrap();
        std::env::remove_var("STEPWISE__ENGINE__EVENT_DELAY_MS");
        assert_eq!(config.engine.event_delay_ms, 7);
    }

    #[test]
    fn test_validate_rejects_inverted_pool_bounds() {
        let mut config = Config::default();
        config.pool.min_size = 10;
        config.pool.max_size = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.pool.max_size = 0;
        config.pool.min_size = 0;
        assert!(config.validate().is_err());
    }
}
