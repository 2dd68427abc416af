use std::fmt;
use std::path;

use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Undo items kept before the oldest is dropped. Zero keeps everything.
    pub undo_depth: usize,

    /// Consecutive updates of one object collapse into a single command while combining.
    pub merge_updates_while_combining: bool,

    /// Properties flagged unique get " (n)" suffixes when an object lands in an array next to a namesake.
    pub ensure_unique_properties: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            undo_depth: 100,
            merge_updates_while_combining: true,
            ensure_unique_properties: true,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Xdg(xdg::BaseDirectoriesError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "couldn't read config: {}", e),
            ConfigError::Toml(e) => write!(f, "couldn't parse config: {}", e),
            ConfigError::Xdg(e) => write!(f, "couldn't locate config directory: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> ConfigError {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> ConfigError {
        ConfigError::Toml(e)
    }
}

impl From<xdg::BaseDirectoriesError> for ConfigError {
    fn from(e: xdg::BaseDirectoriesError) -> ConfigError {
        ConfigError::Xdg(e)
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_path<P: AsRef<path::Path>>(path: P) -> Result<Config, ConfigError> {
        Config::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Reads `config.toml` from the XDG config directory. A missing file means defaults.
    pub fn load() -> Result<Config, ConfigError> {
        let dirs = xdg::BaseDirectories::with_prefix("eez-store")?;

        match dirs.find_config_file("config.toml") {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Config::load_from_path(path)
            },
            None => Ok(Config::default()),
        }
    }
}
