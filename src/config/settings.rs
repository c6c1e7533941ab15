//! TOML-based configuration for Cubist.
//!
//! Supports a config file (cubist.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [schema]
//! path = "./model"
//! app_id = "CUBE_APP"
//!
//! [query]
//! dialect = "duckdb"
//! timeout_secs = 30
//! max_concurrency = 8
//! default_limit = 10000
//! max_limit = 50000
//!
//! [refresh]
//! scheduled_refresh_timer = true
//! default_every = "1 hour"
//! store_path = "~/.cubist/preaggs.db"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::RefreshEvery;
use crate::preagg::RefreshOptions;
use crate::query::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::schema::DEFAULT_APP_ID;
use crate::sql::Dialect;

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

    #[error("Invalid duration format: {0}")]
    InvalidDuration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub schema: SchemaSettings,
    pub query: QuerySettings,
    pub refresh: RefreshSettings,
}

/// Where cube definitions live.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// Directory of `.json` cube files (supports `${ENV_VAR}` expansion).
    pub path: String,

    /// App id the definitions are activated under.
    pub app_id: String,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            path: "./model".to_string(),
            app_id: DEFAULT_APP_ID.to_string(),
        }
    }
}

impl SchemaSettings {
    pub fn resolved_path(&self) -> Result<PathBuf, SettingsError> {
        expand_env_vars(&self.path).map(PathBuf::from)
    }
}

/// Query path settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuerySettings {
    pub dialect: Dialect,

    /// Deadline per query.
    pub timeout_secs: u64,

    /// Queries executing at once.
    pub max_concurrency: usize,

    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            timeout_secs: 30,
            max_concurrency: 8,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

impl QuerySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Pre-aggregation refresh settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// Refresh on per-key timers. When off, only explicit refreshes run.
    pub scheduled_refresh_timer: bool,

    /// Interval for specs without `refreshKey.every` (e.g. "1 hour").
    pub default_every: String,

    /// SQLite file persisting materialized rowsets. Unset keeps them in
    /// memory only.
    pub store_path: Option<String>,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            scheduled_refresh_timer: true,
            default_every: "1 hour".to_string(),
            store_path: None,
        }
    }
}

impl RefreshSettings {
    pub fn default_every(&self) -> Result<Duration, SettingsError> {
        RefreshEvery::parse(&self.default_every)
            .map(|e| e.as_duration())
            .ok_or_else(|| SettingsError::InvalidDuration(self.default_every.clone()))
    }

    pub fn resolved_store_path(&self) -> Result<Option<String>, SettingsError> {
        self.store_path.as_deref().map(expand_env_vars).transpose()
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
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `CUBIST_CONFIG`
    /// 2. `./cubist.toml`
    /// 3. `~/.config/cubist/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("CUBIST_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("cubist.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("cubist").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.query.max_concurrency == 0 {
            return Err(SettingsError::InvalidConfig(
                "query.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.query.default_limit > self.query.max_limit {
            return Err(SettingsError::InvalidConfig(format!(
                "query.default_limit ({}) exceeds query.max_limit ({})",
                self.query.default_limit, self.query.max_limit
            )));
        }
        self.refresh.default_every()?;
        Ok(())
    }

    /// Scheduler options derived from the `[query]` and `[refresh]` sections.
    pub fn refresh_options(&self) -> Result<RefreshOptions, SettingsError> {
        Ok(RefreshOptions {
            dialect: self.query.dialect,
            default_every: self.refresh.default_every()?,
            scheduled: self.refresh.scheduled_refresh_timer,
        })
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}`, `${VAR:-default}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let mut body = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                body.push(ch);
            }
            if !closed {
                return Err(SettingsError::InvalidConfig(format!(
                    "unterminated variable reference '${{{body}'"
                )));
            }
            let (name, default) = match body.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (body.as_str(), None),
            };
            match env::var(name) {
                Ok(value) if !value.is_empty() || default.is_none() => result.push_str(&value),
                _ => match default {
                    Some(default) => result.push_str(default),
                    None => return Err(SettingsError::MissingEnvVar(name.to_string())),
                },
            }
        } else {
            // $VAR ends at the first non-alphanumeric, non-underscore char.
            let mut var_name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                result.push('$');
            } else {
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            }
        }
    }

    Ok(result)
}
