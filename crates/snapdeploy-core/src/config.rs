//! Configuration structures for the deploy system.
//!
//! Defines which app and channel to follow, what binary is running,
//! and where snapshots are stored on disk.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Default deploy server.
pub const DEFAULT_SERVER_URL: &str = "https://api.ionic.io";

/// Main deploy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// App identifier sent with every channel query
    #[serde(default)]
    pub app_id: String,

    /// Base URL of the deploy server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Channel followed when none is given explicitly
    #[serde(default = "default_channel_tag")]
    pub channel_tag: String,

    /// Version of the host binary, reported to the channel
    #[serde(default = "default_binary_version")]
    pub binary_version: Version,

    /// Platform tag reported to the channel
    #[serde(default = "current_platform")]
    pub platform: String,

    /// Install time of the host binary, used in the version label
    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,

    /// Directory holding snapshot folders and the staging archive
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            server_url: default_server_url(),
            channel_tag: default_channel_tag(),
            binary_version: default_binary_version(),
            platform: current_platform(),
            installed_at: None,
            data_dir: None,
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DeployConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, DeployError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| DeployError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), DeployError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| DeployError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that would otherwise fail late, mid-update.
    pub fn validate(&self) -> Result<(), DeployError> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(DeployError::Config(format!(
                "server_url must be an http(s) URL, got '{}'",
                self.server_url
            )));
        }
        if self.channel_tag.is_empty() {
            return Err(DeployError::Config("channel_tag must not be empty".to_string()));
        }
        Ok(())
    }

    /// Binary version as `major.minor.build`.
    pub fn binary_version_string(&self) -> String {
        let v = &self.binary_version;
        format!("{}.{}.{}", v.major, v.minor, v.patch)
    }

    /// Get the data directory, using the platform default if not specified.
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir(),
        }
    }
}

/// Network configuration for channel queries and downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connect timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Read timeout for streamed downloads in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            read_timeout_seconds: default_read_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Platform tag for the running target.
pub fn current_platform() -> String {
    let os = if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "android") {
        "android"
    } else if cfg!(target_os = "ios") {
        "ios"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "unknown"
    };
    os.to_string()
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_channel_tag() -> String {
    "production".to_string()
}

fn default_binary_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 0))
}

fn default_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(appdata).join("SnapDeploy");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("SnapDeploy");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(data_home).join("snapdeploy");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("snapdeploy");
        }
    }

    PathBuf::from(".").join("snapdeploy")
}
