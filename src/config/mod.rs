//! Configuration module for Quarry.
//!
//! Handles the config file, environment variables, and compiler defaults.

mod settings;

pub use settings::{
    expand_env_vars, CacheSettings, CompilerSettings, ModelSettings, Settings, SettingsError,
    CONFIG_ENV,
};
