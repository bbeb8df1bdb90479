//! TOML-based configuration for Quarry.
//!
//! Supports a config file (quarry.toml) with environment variable expansion
//! in model roots.
//!
//! Example configuration:
//! ```toml
//! [compiler]
//! dialect = "postgres"
//!
//! [planner]
//! join_type = "inner"
//! strict_join_paths = true
//!
//! [models]
//! roots = ["./models", "${SHARED_MODELS}"]
//! extension = "qry"
//!
//! [cache]
//! enabled = true
//! max_entries = 512
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::compile::CompileOptions;
use crate::planner::PlannerOptions;
use crate::sql::Dialect;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "QUARRY_CONFIG";

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
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub compiler: CompilerSettings,

    /// Join behaviour of the planner.
    pub planner: PlannerOptions,

    pub models: ModelSettings,

    pub cache: CacheSettings,
}

/// Compiler configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Default SQL dialect, overridable per invocation.
    pub dialect: Dialect,
}

/// Where model files live.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Import search roots (support ${ENV_VAR} expansion).
    pub roots: Vec<String>,

    /// Model file extension, without the dot.
    pub extension: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            extension: "qry".to_string(),
        }
    }
}

/// Compiled query cache configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
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
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `QUARRY_CONFIG`
    /// 2. `./quarry.toml`
    /// 3. `~/.config/quarry/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            log::debug!(path = path.as_str(); "Loading config from environment");
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("quarry.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("quarry").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.models.extension.trim_start_matches('.').is_empty() {
            return Err(SettingsError::InvalidConfig(
                "models.extension must not be empty".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(SettingsError::InvalidConfig(
                "cache.max_entries must be at least 1 when the cache is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Model roots with environment variables expanded.
    pub fn model_roots(&self) -> Result<Vec<PathBuf>, SettingsError> {
        self.models
            .roots
            .iter()
            .map(|root| expand_env_vars(root).map(PathBuf::from))
            .collect()
    }

    /// Compile options from the configured defaults.
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions::default()
            .with_dialect(self.compiler.dialect)
            .with_planner(self.planner)
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
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                var_name.push(ch);
            }
            if !closed {
                return Err(SettingsError::InvalidConfig(format!(
                    "unterminated variable reference `${{{}`",
                    var_name
                )));
            }
        } else {
            // $VAR ends at the first non-alphanumeric, non-underscore char
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::JoinType;

    #[test]
    fn test_expand_env_vars_braces() {
        env::set_var("QUARRY_TEST_VAR", "hello");
        assert_eq!(expand_env_vars("${QUARRY_TEST_VAR}").unwrap(), "hello");
        assert_eq!(
            expand_env_vars("prefix_${QUARRY_TEST_VAR}_suffix").unwrap(),
            "prefix_hello_suffix"
        );
        env::remove_var("QUARRY_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        env::set_var("QUARRY_TEST_VAR2", "world");
        assert_eq!(expand_env_vars("$QUARRY_TEST_VAR2").unwrap(), "world");
        assert_eq!(expand_env_vars("$QUARRY_TEST_VAR2!").unwrap(), "world!");
        assert_eq!(expand_env_vars("cost: $ 5").unwrap(), "cost: $ 5");
        env::remove_var("QUARRY_TEST_VAR2");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("${NONEXISTENT_VAR_12345}");
        assert!(matches!(result, Err(SettingsError::MissingEnvVar(_))));
    }

    #[test]
    fn test_expand_env_vars_unterminated() {
        let result = expand_env_vars("${HOME");
        assert!(matches!(result, Err(SettingsError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[compiler]
dialect = "snowflake"

[planner]
join_type = "inner"
strict_join_paths = true

[models]
roots = ["./models", "/srv/shared"]

[cache]
max_entries = 64
"#;

        let settings = Settings::from_toml(toml).unwrap();

        assert_eq!(settings.compiler.dialect, Dialect::Snowflake);
        assert_eq!(settings.planner.join_type, JoinType::Inner);
        assert!(settings.planner.strict_join_paths);
        assert_eq!(settings.models.roots.len(), 2);
        assert_eq!(settings.models.extension, "qry");
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.max_entries, 64);

        let options = settings.compile_options();
        assert_eq!(options.dialect, Dialect::Snowflake);
        assert!(options.planner.strict_join_paths);
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.compiler.dialect, Dialect::DuckDb);
        assert_eq!(settings.planner.join_type, JoinType::Left);
        assert!(!settings.planner.strict_join_paths);
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.max_entries, DEFAULT_MAX_ENTRIES);
        assert!(settings.model_roots().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Settings::from_toml("[models]\nextension = \"\""),
            Err(SettingsError::InvalidConfig(_))
        ));
        assert!(matches!(
            Settings::from_toml("[cache]\nmax_entries = 0"),
            Err(SettingsError::InvalidConfig(_))
        ));
        assert!(matches!(
            Settings::from_toml("[compiler]\ndialect = \"oracle\""),
            Err(SettingsError::ParseError(_))
        ));
    }

    #[test]
    fn test_model_roots_expand() {
        env::set_var("QUARRY_TEST_ROOT", "/data/models");
        let settings = Settings::from_toml("[models]\nroots = [\"${QUARRY_TEST_ROOT}/core\"]").unwrap();
        assert_eq!(
            settings.model_roots().unwrap(),
            vec![PathBuf::from("/data/models/core")]
        );
        env::remove_var("QUARRY_TEST_ROOT");
    }
}
