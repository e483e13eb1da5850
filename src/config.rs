//! Settings management
//!
//! Stores user preferences in ~/.config/mipforge/settings.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::textures::CompressionFormat;

/// Format used when neither the command line nor settings name one
pub const DEFAULT_FORMAT: CompressionFormat = CompressionFormat::RgbS3tcDxt1;

/// Base width used when neither the command line nor settings give one
pub const DEFAULT_BASE_WIDTH: u32 = 512;

/// User settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    /// Selected GPU index (None = auto-select)
    #[serde(default)]
    pub gpu_index: Option<usize>,

    /// Default compression format name, e.g. "RGBA_S3TC_DXT5"
    #[serde(default)]
    pub format: Option<String>,

    /// Default base width of the mip chain
    #[serde(default)]
    pub base_width: Option<u32>,
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown compression format in settings: {0}")]
    UnknownFormat(String),
}

impl Settings {
    /// Get the config directory path (~/.config/mipforge)
    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("mipforge");

        Ok(config_dir)
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|path| Self::load_from(&path)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load settings: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load settings from an explicit file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    /// Save settings to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// The stored format, falling back to [`DEFAULT_FORMAT`]
    pub fn resolve_format(&self) -> Result<CompressionFormat, ConfigError> {
        match &self.format {
            None => Ok(DEFAULT_FORMAT),
            Some(name) => {
                CompressionFormat::from_str(name).ok_or_else(|| ConfigError::UnknownFormat(name.clone()))
            }
        }
    }

    /// The stored base width, falling back to [`DEFAULT_BASE_WIDTH`]
    pub fn resolve_base_width(&self) -> u32 {
        self.base_width.unwrap_or(DEFAULT_BASE_WIDTH)
    }

    /// Make a run's choices the defaults for later runs
    ///
    /// `format` is `None` when several formats were compressed; the stored
    /// format is then left alone.
    pub fn remember(&mut self, format: Option<CompressionFormat>, base_width: u32, gpu_index: Option<usize>) {
        if let Some(format) = format {
            self.format = Some(format.name().to_string());
        }
        self.base_width = Some(base_width);
        if gpu_index.is_some() {
            self.gpu_index = gpu_index;
        }
    }
}
