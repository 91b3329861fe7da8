use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::TesseraError {
    fn from(err: ConfigError) -> Self {
        crate::TesseraError::Config(err.to_string())
    }
}

/// Main configuration for Tessera
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TesseraConfig {
    /// Runtime options manager settings
    #[serde(default)]
    pub options: OptionsConfig,

    /// Transaction name clusterer settings
    #[serde(default)]
    pub clusterer: ClustererConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsConfig {
    /// Path to the static (disk) options file: YAML, TOML or JSON
    #[serde(default)]
    pub static_config_path: Option<PathBuf>,

    /// Path to the JSON file used as the durable options database
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Seconds a cached value is served as fresh
    #[serde(default = "default_key_ttl")]
    pub default_ttl_secs: u64,

    /// Seconds a cached value may be served stale after ttl while backends fail
    #[serde(default = "default_key_grace")]
    pub default_grace_secs: u64,

    /// Prefixes of unregistered names that resolve to untyped placeholder keys
    #[serde(default = "default_legacy_prefixes")]
    pub legacy_prefixes: Vec<String>,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            static_config_path: None,
            database_path: None,
            default_ttl_secs: default_key_ttl(),
            default_grace_secs: default_key_grace(),
            legacy_prefixes: default_legacy_prefixes(),
        }
    }
}

/// Transaction name clusterer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClustererConfig {
    /// Run the periodic clusterer at all
    #[serde(default)]
    pub enabled: bool,

    /// A node with at least this many distinct children is merged into `*`
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: usize,

    /// Number of projects handed to a single clustering task
    #[serde(default = "default_projects_per_task")]
    pub projects_per_task: usize,

    /// Maximum number of sampled names kept per project
    #[serde(default = "default_sample_set_size")]
    pub sample_set_size: usize,

    /// Seconds a project's sample set survives without writes
    #[serde(default = "default_sample_set_ttl")]
    pub sample_set_ttl_secs: u64,
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            enabled: false, // Opt-in
            merge_threshold: default_merge_threshold(),
            projects_per_task: default_projects_per_task(),
            sample_set_size: default_sample_set_size(),
            sample_set_ttl_secs: default_sample_set_ttl(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_key_ttl() -> u64 {
    10
}
fn default_key_grace() -> u64 {
    60
}
fn default_legacy_prefixes() -> Vec<String> {
    vec!["tessera:".to_string(), "legacy:".to_string()]
}
fn default_merge_threshold() -> usize {
    100
}
fn default_projects_per_task() -> usize {
    100
}
fn default_sample_set_size() -> usize {
    1000
}
fn default_sample_set_ttl() -> u64 {
    24 * 60 * 60
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager with layered sources
pub struct ConfigManager {
    config: TesseraConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (.tessera.toml)
    /// 3. Sensible defaults
    pub fn load() -> Result<Self, ConfigError> {
        info!("Loading Tessera configuration...");

        Self::load_dotenv();

        let (config, config_path) = Self::load_config_file()?;
        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());
        Self::validate_config(&config)?;

        match &config_path {
            Some(path) => info!("Config file: {}", path.display()),
            None => info!("Config file: NONE (using defaults)"),
        }
        info!(
            "Clusterer: {} (merge threshold {}, {} projects per task)",
            if config.clusterer.enabled {
                "enabled"
            } else {
                "disabled"
            },
            config.clusterer.merge_threshold,
            config.clusterer.projects_per_task
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load exactly one config file, without .env or environment overrides
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::read_toml_file(path)?;
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    /// Wrap an already built configuration
    pub fn from_config(config: TesseraConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    /// Load .env file if it exists
    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            } else {
                info!("Loaded .env file from current directory");
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".tessera.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .tessera.env: {}", e);
                } else {
                    info!("Loaded .tessera.env from home directory");
                }
            }
        }
    }

    /// Find and load config file
    /// Search order:
    /// 1. ./.tessera.toml (current directory)
    /// 2. ~/.tessera/config.toml (user config)
    /// 3. Use defaults
    fn load_config_file() -> Result<(TesseraConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".tessera.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".tessera").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        info!("No config file found, using defaults");
        Ok((TesseraConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<TesseraConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply environment variable overrides.
    ///
    /// `lookup` resolves a variable name to its value; unparsable numbers are
    /// ignored with a warning.
    pub fn apply_env_overrides<F>(mut config: TesseraConfig, lookup: F) -> TesseraConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        // Options
        if let Some(path) = lookup("TESSERA_STATIC_CONFIG") {
            config.options.static_config_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("TESSERA_OPTIONS_DB") {
            config.options.database_path = Some(PathBuf::from(path));
        }
        if let Some(ttl) = parse_env(&lookup, "TESSERA_OPTIONS_TTL") {
            config.options.default_ttl_secs = ttl;
        }
        if let Some(grace) = parse_env(&lookup, "TESSERA_OPTIONS_GRACE") {
            config.options.default_grace_secs = grace;
        }
        if let Some(prefixes) = lookup("TESSERA_LEGACY_PREFIXES") {
            config.options.legacy_prefixes = prefixes
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }

        // Clusterer
        if let Some(enabled) = lookup("TESSERA_CLUSTERER_ENABLED") {
            config.clusterer.enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }
        if let Some(threshold) = parse_env(&lookup, "TESSERA_MERGE_THRESHOLD") {
            config.clusterer.merge_threshold = threshold;
        }
        if let Some(per_task) = parse_env(&lookup, "TESSERA_PROJECTS_PER_TASK") {
            config.clusterer.projects_per_task = per_task;
        }
        if let Some(size) = parse_env(&lookup, "TESSERA_SAMPLE_SET_SIZE") {
            config.clusterer.sample_set_size = size;
        }
        if let Some(ttl) = parse_env(&lookup, "TESSERA_SAMPLE_SET_TTL") {
            config.clusterer.sample_set_ttl_secs = ttl;
        }

        // Logging
        if let Some(level) = lookup("TESSERA_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = lookup("TESSERA_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    /// Validate configuration
    pub fn validate_config(config: &TesseraConfig) -> Result<(), ConfigError> {
        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        if config.clusterer.merge_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "clusterer.merge_threshold must be at least 1".to_string(),
            ));
        }
        if config.clusterer.projects_per_task == 0 {
            return Err(ConfigError::ValidationError(
                "clusterer.projects_per_task must be at least 1".to_string(),
            ));
        }
        if config.clusterer.sample_set_size == 0 {
            return Err(ConfigError::ValidationError(
                "clusterer.sample_set_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    /// Get the path to the config file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = TesseraConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = TesseraConfig::default();
        assert_eq!(config.options.default_ttl_secs, 10);
        assert_eq!(config.options.default_grace_secs, 60);
        assert!(!config.clusterer.enabled);
        assert_eq!(config.clusterer.merge_threshold, 100);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_config_validation() {
        let config = TesseraConfig::default();
        assert!(ConfigManager::validate_config(&config).is_ok());

        let mut bad_config = config.clone();
        bad_config.logging.level = "loud".to_string();
        assert!(ConfigManager::validate_config(&bad_config).is_err());

        let mut bad_config = config;
        bad_config.clusterer.merge_threshold = 0;
        assert!(ConfigManager::validate_config(&bad_config).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TESSERA_CLUSTERER_ENABLED", "true"),
            ("TESSERA_MERGE_THRESHOLD", "5"),
            ("TESSERA_PROJECTS_PER_TASK", "not-a-number"),
            ("TESSERA_LEGACY_PREFIXES", "a:, b:,"),
        ]
        .into_iter()
        .collect();

        let config = ConfigManager::apply_env_overrides(TesseraConfig::default(), |key| {
            env.get(key).map(|v| v.to_string())
        });

        assert!(config.clusterer.enabled);
        assert_eq!(config.clusterer.merge_threshold, 5);
        assert_eq!(config.clusterer.projects_per_task, 100);
        assert_eq!(config.options.legacy_prefixes, vec!["a:", "b:"]);
    }
}
