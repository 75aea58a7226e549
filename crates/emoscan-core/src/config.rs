use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EmoscanError, Result};

/// Top-level configuration for EmoScan.
///
/// Loaded from `~/.emoscan/config.toml` by default. Every section falls back
/// to its defaults when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmoscanConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl EmoscanConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EmoscanConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| EmoscanError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the client unusable.
    pub fn validate(&self) -> Result<()> {
        let url = self.server.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(EmoscanError::Config(format!(
                "server.base_url must be an http(s) URL, got '{}'",
                self.server.base_url
            )));
        }
        if self.server.connect_timeout_secs == 0 || self.server.read_timeout_secs == 0 {
            return Err(EmoscanError::Config(
                "server timeouts must be greater than zero".to_string(),
            ));
        }
        if self.history.reader_connections == 0 {
            return Err(EmoscanError::Config(
                "history.reader_connections must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.analysis.probability_sum_tolerance) {
            return Err(EmoscanError::Config(
                "analysis.probability_sum_tolerance must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the history database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.emoscan/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl GeneralConfig {
    /// `data_dir` with a leading `~` expanded to the home directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }
}

/// Inference service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL; `/predict` is appended for uploads.
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Budget for sending the request body. Folded into the overall request
    /// timeout.
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://10.112.0.244:5000".to_string(),
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            write_timeout_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Ceiling for a whole request: connect + write + read.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs + self.write_timeout_secs + self.read_timeout_secs,
        )
    }
}

/// History store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Rows shown in the "recent analyses" list.
    pub recent_limit: u32,
    /// Insert a sample record when the store is empty at start-up.
    pub seed_debug_record: bool,
    /// Read-only connections opened next to the writer (file databases only).
    pub reader_connections: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            recent_limit: 10,
            seed_debug_record: false,
            reader_connections: 2,
        }
    }
}

/// Result handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Allowed deviation of the probability sum from 1 before a warning.
    pub probability_sum_tolerance: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            probability_sum_tolerance: 0.05,
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}
