//! TOML-based configuration for the schema cache engine.
//!
//! Supports a config file (schemacache.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [metadata]
//! store = "sqlite"
//! sqlite_path = "${HOME}/.schemacache/metadata.db"
//! sync_interval_seconds = 30
//!
//! [features]
//! native_queries = true
//! logical_models = true
//! remote_schema_permissions = false
//!
//! [logging]
//! level = "schemacache=debug,info"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::context::{AppContext, Environment, FeatureFlags};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Metadata storage and catalog sync.
    pub metadata: MetadataSettings,

    /// Feature flags that gate parts of the schema cache build.
    pub features: FeatureFlags,

    /// Log filter used by the CLI.
    pub logging: LoggingSettings,
}

/// Where the metadata document is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

/// Metadata configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// Storage backend for the metadata document.
    pub store: StoreKind,

    /// SQLite database path (supports ${ENV_VAR} expansion).
    pub sqlite_path: String,

    /// How often to poll the store for changes made by other instances.
    /// Zero disables polling.
    pub sync_interval_seconds: u64,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            sqlite_path: "schemacache.db".to_string(),
            sync_interval_seconds: 60,
        }
    }
}

impl MetadataSettings {
    /// Get the SQLite path with environment variables expanded.
    pub fn resolved_sqlite_path(&self) -> Result<PathBuf, SettingsError> {
        Ok(PathBuf::from(expand_env_vars(&self.sqlite_path)?))
    }

    /// Catalog sync interval, if polling is enabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        match self.sync_interval_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SCHEMACACHE_CONFIG`
    /// 2. `./schemacache.toml`
    /// 3. `~/.config/schemacache/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SCHEMACACHE_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("schemacache.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("schemacache").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.metadata.store == StoreKind::Sqlite && self.metadata.sqlite_path.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "metadata.sqlite_path must be set when metadata.store = \"sqlite\"".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the application context the schema cache is built against,
    /// capturing the current process environment.
    pub fn app_context(&self) -> AppContext {
        AppContext::new(self.features.clone(), Environment::from_process())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
