//! Bridge settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use sensor_detect::{DiscoveryConfig, ScannerConfig, SupportedTypes};
use sensor_link::LinkConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Bridge settings, stored as JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Link to this port only and skip discovery
    #[serde(default)]
    pub port: Option<String>,
    /// Port enumeration and fallback ports
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Discovery timing
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Steady-state link behavior
    #[serde(default)]
    pub link: LinkConfig,
    /// Device types to look for
    #[serde(default)]
    pub supported_types: SupportedTypes,
}

impl Settings {
    /// Get the XDG config directory for serialthing
    /// Uses $XDG_CONFIG_HOME/serialthing, falls back to ~/.config/serialthing
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("serialthing"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("serialthing"))
    }

    /// Default settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from the default location
    ///
    /// Missing or unreadable settings fall back to defaults. A missing file
    /// is created so it can be edited.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            warn!("Could not determine settings path, using defaults");
            return Self::default();
        };
        Self::load_from(&path).unwrap_or_else(|e| {
            warn!("{:#}, using defaults", e);
            Self::default()
        })
    }

    /// Load settings from a file, creating it with defaults if missing
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let settings = Self::default();
            match settings.save_to(path) {
                Ok(()) => info!("Wrote default settings to {}", path.display()),
                Err(e) => warn!("{:#}", e),
            }
            return Ok(settings);
        }

        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;

        Ok(())
    }
}
