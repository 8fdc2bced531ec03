//! Engine configuration
//!
//! Layered, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a config file: the explicit path if given, else an optional
//!    `tagflow.toml` (or any other format `config` knows) in the working
//!    directory
//! 3. environment variables prefixed `TAGFLOW_`, nested keys separated by
//!    `__` (a `.env` file is loaded into the environment first)
//!
//! `resource_dirs` may be given in the environment as a comma separated list.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_CONFIG_NAME: &str = "tagflow";
const ENV_PREFIX: &str = "TAGFLOW";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directories scanned for `*.xml` resources at start-up
    pub resource_dirs: Vec<PathBuf>,

    /// Reject bean parameters that match no declared field
    pub strict_parameters: bool,

    /// Keep parsed entities between calls
    pub cache_entities: bool,

    /// Default wait for `<mutex>`
    pub mutex_timeout_ms: u64,

    /// Consts bound in every chain's process root
    pub properties: IndexMap<String, String>,

    /// `tracing` filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            strict_parameters: true,
            cache_entities: true,
            mutex_timeout_ms: 120_000,
            properties: IndexMap::new(),
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Load from the default file and the environment
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }
}

#[derive(Debug, Default)]
pub struct SettingsBuilder {
    config_path: Option<PathBuf>,
    resource_dirs: Vec<PathBuf>,
    properties: IndexMap<String, String>,
}

impl SettingsBuilder {
    /// Config file to read instead of the default one; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Extra resource directory, scanned after the configured ones
    pub fn resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dirs.push(dir.into());
        self
    }

    /// Property overriding the configured one of the same name
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Settings> {
        dotenvy::dotenv().ok();

        let file = match &self.config_path {
            Some(path) => config::File::from(path.as_path()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("resource_dirs");

        let mut settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.resource_dirs.extend(self.resource_dirs);
        settings.properties.extend(self.properties);
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.strict_parameters);
        assert!(settings.cache_entities);
        assert_eq!(settings.mutex_timeout_ms, 120_000);
        assert_eq!(settings.log_filter, "info");
        assert!(settings.properties.is_empty());
    }

    #[test]
    fn test_file_layer_and_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
strict_parameters = false
mutex_timeout_ms = 500
resource_dirs = ["flows"]

[properties]
env = "test"
region = "eu"
"#
        )
        .unwrap();

        let settings = Settings::builder()
            .config_path(Some(file.path().to_path_buf()))
            .resource_dir("more")
            .property("region", "us")
            .build()
            .unwrap();

        assert!(!settings.strict_parameters);
        assert!(settings.cache_entities);
        assert_eq!(settings.mutex_timeout_ms, 500);
        assert_eq!(settings.resource_dirs, vec![PathBuf::from("flows"), PathBuf::from("more")]);
        assert_eq!(settings.properties.get("env").map(String::as_str), Some("test"));
        assert_eq!(settings.properties.get("region").map(String::as_str), Some("us"));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::builder()
            .config_path(Some(dir.path().join("absent.toml")))
            .build();
        assert!(result.is_err());
    }
}
