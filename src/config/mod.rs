//! Configuration module for Cubist.
//!
//! Handles the TOML settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, QuerySettings, RefreshSettings, SchemaSettings, Settings, SettingsError,
};
