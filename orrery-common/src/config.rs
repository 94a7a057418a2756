//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML configuration file contents (`~/.config/orrery/orrery-px.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and uploaded blobs
    pub root_folder: Option<String>,

    /// Insight gateway base URL (e.g. "https://gateway.example.com/v1")
    pub gateway_url: Option<String>,

    /// Insight gateway API key
    pub gateway_api_key: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter ("trace", "debug", "info", "warn", "error")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Load TOML config from an explicit path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load TOML config from the platform default location, or defaults if absent
    pub fn load_default(service: &str) -> Self {
        match default_config_path(service) {
            Some(path) if path.exists() => Self::load(&path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                Self::default()
            }),
            _ => Self::default(),
        }
    }
}

/// Default configuration file path for the platform
fn default_config_path(service: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("orrery").join(format!("{}.toml", service)))
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_config.root_folder.as_deref() {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("orrery"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/orrery"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("orrery"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/orrery"))
    } else if cfg!(target_os = "windows") {
        dirs::data_dir()
            .map(|d| d.join("orrery"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\orrery"))
    } else {
        PathBuf::from("./orrery-data")
    }
}

/// Ensure the root folder exists, creating it if missing
pub fn ensure_root_folder(root: &Path) -> Result<()> {
    if !root.exists() {
        std::fs::create_dir_all(root)
            .map_err(|e| Error::Config(format!("Create root folder failed: {}", e)))?;
        tracing::info!(root = %root.display(), "Created root folder");
    }
    Ok(())
}

/// Database path within the root folder
pub fn database_path(root: &Path) -> PathBuf {
    root.join("orrery.db")
}

/// Upload blob directory within the root folder
pub fn uploads_path(root: &Path) -> PathBuf {
    root.join("uploads")
}
