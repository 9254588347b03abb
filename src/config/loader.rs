//! Configuration File Loading
//!
//! Loads the configuration from the first file found on the search path,
//! overlays `PERSISTENT_SHELL_<SECTION>__<FIELD>` environment variables and
//! validates the result. Missing files fall back to built-in defaults.

use super::Config;
use crate::error::{Error, Result};
use crate::security::audit::log_config_event;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_FILE_ENV: &str = "PERSISTENT_SHELL_CONFIG";

/// Prefix for per-field environment overrides
pub const ENV_PREFIX: &str = "PERSISTENT_SHELL_";

/// Configuration file loader
pub struct ConfigLoader {
    /// Search paths for configuration files
    search_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            search_paths: Self::get_search_paths(),
        }
    }

    /// Create a loader with an explicit search path list
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Load configuration from the default search path plus the process environment
    pub fn load() -> Result<Config> {
        Self::new().load_with_env(env::vars())
    }

    /// Load from search paths, then apply the given environment overrides and validate
    pub fn load_with_env<I>(&self, vars: I) -> Result<Config>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = match self.find_config_file() {
            Some(path) => {
                let config = Self::load_from_path(&path)?;
                info!("Configuration loaded from {}", path.display());
                log_config_event(false, Some(&format!("path={}", path.display())));
                config
            }
            None => {
                debug!("No configuration file found, using defaults");
                Config::default()
            }
        };

        let config = apply_env_overrides(config, vars)?;
        validate_config(&config)?;
        warn_if_insecure(&config);
        Ok(config)
    }

    /// Load a specific configuration file without overrides
    pub fn load_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| {
            log_config_event(true, Some(&format!("path={}", path.display())));
            Error::ConfigLoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        match ConfigFormat::from_path(path) {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| Error::ConfigParseFailed {
                format: "TOML".to_string(),
                reason: e.to_string(),
            }),
            ConfigFormat::Json => {
                serde_json::from_str(&content).map_err(|e| Error::ConfigParseFailed {
                    format: "JSON".to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// First existing file on the search path
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.is_file()).cloned()
    }

    /// Get configuration search paths in priority order
    pub fn get_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(explicit) = env::var(CONFIG_FILE_ENV) {
            if !explicit.is_empty() {
                paths.push(PathBuf::from(explicit));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("persistent-shell").join("config.toml"));
            paths.push(config_dir.join("persistent-shell").join("config.json"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".persistent-shell").join("config.toml"));
        }

        paths.push(PathBuf::from("persistent-shell.toml"));
        paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Overlay `PERSISTENT_SHELL_<SECTION>__<FIELD>=value` variables onto `config`
///
/// Values are read as booleans, integers, or JSON arrays (`["ls","cat"]`) when
/// they parse as such, and as strings otherwise.
pub fn apply_env_overrides<I>(config: Config, vars: I) -> Result<Config>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut root = toml::Value::try_from(&config).map_err(|e| Error::ConfigParseFailed {
        format: "TOML".to_string(),
        reason: e.to_string(),
    })?;

    let mut applied = 0usize;
    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let Some((section, field)) = rest.split_once("__") else {
            continue;
        };
        let section = section.to_ascii_lowercase();
        let field = field.to_ascii_lowercase();

        let Some(table) = root.get_mut(&section).and_then(|v| v.as_table_mut()) else {
            warn!("Ignoring override for unknown config section: {}", key);
            continue;
        };

        table.insert(field, parse_override_value(&raw));
        applied += 1;
    }

    if applied == 0 {
        return Ok(config);
    }

    debug!("Applied {} environment override(s)", applied);
    root.try_into().map_err(|e: toml::de::Error| Error::ConfigParseFailed {
        format: "environment".to_string(),
        reason: e.to_string(),
    })
}

fn parse_override_value(raw: &str) -> toml::Value {
    let trimmed = raw.trim();

    if let Ok(b) = trimmed.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if trimmed.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
            return toml::Value::Array(items.into_iter().map(toml::Value::String).collect());
        }
    }

    toml::Value::String(raw.to_string())
}

/// Check value ranges
pub fn validate_config(config: &Config) -> Result<()> {
    let security = &config.security;

    if !(1..=300).contains(&security.max_execution_time) {
        return Err(Error::ConfigValidationFailed {
            field: "security.max_execution_time".to_string(),
            reason: format!("{} is outside 1..=300 seconds", security.max_execution_time),
        });
    }

    if !(1024..=10 * 1024 * 1024).contains(&security.max_output_size) {
        return Err(Error::ConfigValidationFailed {
            field: "security.max_output_size".to_string(),
            reason: format!("{} is outside 1KiB..=10MiB", security.max_output_size),
        });
    }

    for pattern in &security.blocked_patterns {
        regex::Regex::new(pattern).map_err(|e| Error::InvalidBlockedPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
    }

    let idle = config.session.idle_timeout_secs;
    if idle != 0 && idle < 60 {
        return Err(Error::ConfigValidationFailed {
            field: "session.idle_timeout_secs".to_string(),
            reason: format!("{} is below the 60 second minimum", idle),
        });
    }

    if config.session.probe_interval_secs == 0 {
        return Err(Error::ConfigValidationFailed {
            field: "session.probe_interval_secs".to_string(),
            reason: "must be at least 1 second".to_string(),
        });
    }

    if config.shell.shell_path.as_os_str().is_empty() {
        return Err(Error::ConfigValidationFailed {
            field: "shell.shell_path".to_string(),
            reason: "must not be empty".to_string(),
        });
    }

    Ok(())
}

fn warn_if_insecure(config: &Config) {
    if !config.security.enabled {
        warn!("Security validation is DISABLED: every command will reach the shell unchecked");
    }
}
