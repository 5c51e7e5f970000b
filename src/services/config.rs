use crate::error::TelemetryError;
use crate::models::config::AppConfig;
use crate::models::settings::ProfileSettings;
use crate::services::ocr::debug::DEBUG_ENV_VAR;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration manager for app settings and per-profile capture settings
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
    profiles_path: PathBuf,
}

impl ConfigManager {
    /// Manager rooted in the platform config directory.
    ///
    /// This will create the config directory if it doesn't exist.
    pub fn new() -> Result<Self, TelemetryError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| TelemetryError::Config("Failed to determine config directory".to_string()))?
            .join("hud-telemetry");
        fs::create_dir_all(&config_dir)?;
        Ok(Self::with_dir(config_dir))
    }

    /// Manager rooted in `config_dir`; the directory is created on first save
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            config_path: config_dir.join("config.json"),
            profiles_path: config_dir.join("profiles.json"),
            config_dir,
        }
    }

    /// Load configuration from disk.
    ///
    /// A missing file yields the defaults. Setting `HUD_TELEMETRY_OCR_DEBUG=1`
    /// turns on image dumps regardless of the file.
    pub fn load(&self) -> Result<AppConfig, TelemetryError> {
        let mut config: AppConfig = self.read_json(&self.config_path)?.unwrap_or_default();
        if debug_forced() {
            config.debug.enabled = true;
        }
        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), TelemetryError> {
        self.write_json(&self.config_path, config)
    }

    /// Load saved timers, regions and manual levels keyed by profile id
    pub fn load_profiles(&self) -> Result<BTreeMap<String, ProfileSettings>, TelemetryError> {
        Ok(self.read_json(&self.profiles_path)?.unwrap_or_default())
    }

    pub fn save_profiles(&self, profiles: &BTreeMap<String, ProfileSettings>) -> Result<(), TelemetryError> {
        self.write_json(&self.profiles_path, profiles)
    }

    /// Get the config file path
    pub fn config_file_path(&self) -> &Path {
        &self.config_path
    }

    pub fn profiles_file_path(&self) -> &Path {
        &self.profiles_path
    }

    /// Check if config file exists
    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, TelemetryError> {
        if !path.exists() {
            debug!("{} not found, using defaults", path.display());
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let value = serde_json::from_str(&content)
            .map_err(|e| TelemetryError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(Some(value))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), TelemetryError> {
        fs::create_dir_all(&self.config_dir)?;
        // Pretty print for human readability
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json)?;
        info!("Saved {}", path.display());
        Ok(())
    }
}

fn debug_forced() -> bool {
    std::env::var(DEBUG_ENV_VAR).map_or(false, |v| v == "1")
}
