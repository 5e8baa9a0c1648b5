//! Tool configuration.
//!
//! Loaded from an optional TOML file. Every field has a default, so an
//! absent file or an empty table is a valid configuration. Command-line
//! flags are applied on top by `main`.

use std::path::{Path, PathBuf};

use chainloader::config::{DEFAULT_PAYLOAD, PAYLOAD_DIR};
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "chainload.toml";

/// Tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    /// Directory standing in for the SD card root.
    pub sd_root: PathBuf,
    /// Payload directory, relative to `sd_root`.
    pub payload_dir: String,
    /// Payload used when no menu selection is made.
    pub default_payload: String,
    /// Log filter for the core crate (`error` .. `trace`).
    pub log_level: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            sd_root: PathBuf::from("."),
            payload_dir: PAYLOAD_DIR.to_string(),
            default_payload: DEFAULT_PAYLOAD.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ToolConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ToolError> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`]
    /// is used if present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ToolError> {
        let path = match path {
            Some(path) if !path.exists() => {
                return Err(ToolError::ConfigNotFound {
                    path: path.to_path_buf(),
                })
            }
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Parsed log level, `Info` when unrecognised.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
