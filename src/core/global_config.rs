//! Global configuration management
//!
//! Reads optional settings from `config.toml` in the user's config
//! directory: where the host's syslinux files live, and build defaults.
//! Command-line flags override these values, which override the built-in
//! defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::syslinux::SyslinuxAssets;
use crate::config::defaults::{CONFIG_DIR_NAME, CONFIG_FILE_NAME};

/// Global configuration error types
#[derive(Error, Debug)]
pub enum GlobalConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },
}

/// Global configuration for usbforge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Host syslinux installation
    #[serde(default)]
    pub syslinux: SyslinuxConfig,

    /// Default build options
    #[serde(default)]
    pub build: BuildConfig,
}

/// Host syslinux installation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyslinuxConfig {
    /// Directory holding the syslinux distribution
    pub path: Option<PathBuf>,

    /// Boot record image, absolute or relative to `path`
    pub mbr: Option<String>,

    /// Menu helper modules to upload
    pub menu_files: Option<Vec<String>>,
}

/// Default build options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Image size in megabytes
    pub size_mb: Option<u64>,

    /// Target filesystem type
    pub fstype: Option<String>,
}

impl GlobalConfig {
    /// Default location of the config file
    ///
    /// `None` when the platform has no config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the config from the default location
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `GlobalConfigError::ParseError` if the config file exists but
    /// contains invalid TOML.
    pub fn load() -> Result<Self, GlobalConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load global configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, GlobalConfigError> {
        if !path.exists() {
            tracing::debug!("No config file at {}", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GlobalConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| GlobalConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Effective syslinux assets, with `dir_override` taking precedence
    #[must_use]
    pub fn syslinux_assets(&self, dir_override: Option<&Path>) -> SyslinuxAssets {
        let mut assets = SyslinuxAssets::default();
        if let Some(dir) = dir_override.map(Path::to_path_buf).or_else(|| self.syslinux.path.clone()) {
            assets.dir = dir;
        }
        if let Some(mbr) = &self.syslinux.mbr {
            assets.mbr.clone_from(mbr);
        }
        if let Some(modules) = &self.syslinux.menu_files {
            assets.menu_modules.clone_from(modules);
        }
        assets
    }
}
