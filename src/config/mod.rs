//! Configuration module for drawbot-rs
//!
//! This module handles persistent application configuration: the drawing
//! area, G-code snippets, plotting options, device settings and the pen set.
//!
//! # App Data Location
//!
//! Application data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.drawbot.drawbot-rs/`
//! - **macOS**: `~/Library/Application Support/dev.drawbot.drawbot-rs/`
//! - **Windows**: `%APPDATA%\dev.drawbot.drawbot-rs\`
//!
//! # Files
//!
//! - `config.toml` - The [`AppConfig`]
//! - `logs/` - Daily rolling log files written by the binary
//!
//! # Example
//!
//! ```ignore
//! use drawbot_rs::config::AppConfig;
//!
//! let mut config = AppConfig::load_or_default();
//! config.device.jog_step = 2.5;
//! config.save(AppConfig::default_path()?)?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{DrawbotError, Result};
use crate::types::PenSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.drawbot.drawbot-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Log directory name under the app data directory
pub const LOG_DIR: &str = "logs";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        DrawbotError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            DrawbotError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Directory the binary writes its rolling log files to
pub fn log_dir() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(LOG_DIR))
}

// ==================== App Config ====================

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Version for future migration support
    pub version: u32,
    pub drawing_area: DrawingAreaConfig,
    pub gcode: GCodeConfig,
    pub plotting: PlottingConfig,
    pub device: DeviceConfig,
    pub pens: PenSet,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            drawing_area: DrawingAreaConfig::default(),
            gcode: GCodeConfig::default(),
            plotting: PlottingConfig::default(),
            device: DeviceConfig::default(),
            pens: PenSet::default(),
        }
    }
}

impl AppConfig {
    /// Location of the config file in the app data directory
    pub fn default_path() -> Result<PathBuf> {
        app_data_dir()
            .map(|p| p.join(CONFIG_FILE))
            .ok_or_else(|| DrawbotError::Config("Could not determine config path".to_string()))
    }

    /// Load a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DrawbotError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            DrawbotError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load the config from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let path = match Self::default_path() {
            Ok(path) if path.exists() => path,
            Ok(_) => return Self::default(),
            Err(e) => {
                tracing::warn!("{}, using default config", e);
                return Self::default();
            }
        };

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DrawbotError::Config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| {
            DrawbotError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Render the config as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DrawbotError::Serialization(format!("Failed to serialize config: {}", e)))
    }
}
