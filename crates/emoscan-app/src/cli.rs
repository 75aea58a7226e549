//! CLI argument definitions for the EmoScan application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use emoscan_core::types::MediaKind;

/// EmoScan: send photos and videos to an emotion recognition service and
/// keep a local history of the results.
#[derive(Parser, Debug)]
#[command(name = "emoscan", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the history database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Inference service base URL.
    #[arg(short = 's', long = "server", global = true)]
    pub server: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Upload a photo or video and show the detected emotion.
    Analyze {
        file: PathBuf,
        /// Free-text note stored with the result.
        #[arg(short = 'm', long, default_value = "")]
        description: String,
        /// Override the media type inferred from the extension.
        #[arg(short = 'k', long, value_enum)]
        kind: Option<KindArg>,
        /// Do not write the result to the history.
        #[arg(long)]
        no_save: bool,
        /// Print the shareable summary instead of the full view.
        #[arg(long)]
        share: bool,
    },
    /// Browse and manage past analyses.
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Aggregate statistics over the history.
    Stats,
    /// Check that the inference service is up.
    Health,
    /// Show the service's model description.
    ModelInfo,
    /// Read and change preferences.
    Prefs {
        #[command(subcommand)]
        action: PrefsCommand,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum HistoryCommand {
    /// List analyses, newest first.
    List {
        /// Maximum rows (defaults to history.recent_limit).
        #[arg(short = 'n', long)]
        limit: Option<u32>,
        /// List everything.
        #[arg(short = 'a', long, conflicts_with = "limit")]
        all: bool,
        #[arg(short = 'k', long, value_enum)]
        kind: Option<KindArg>,
        #[arg(short = 'e', long)]
        emotion: Option<String>,
    },
    /// Show one stored analysis.
    Show {
        id: i64,
        /// Print the shareable summary.
        #[arg(long, conflicts_with = "json")]
        share: bool,
        /// Print the result in the service's JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Delete one analysis.
    Delete { id: i64 },
    /// Delete every analysis.
    Clear,
    /// Print the recent list again whenever the history changes.
    Watch {
        #[arg(short = 'n', long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum PrefsCommand {
    /// Print one preference, or all of them.
    Get { key: Option<String> },
    Set { key: String, value: String },
    /// Reset every preference to its default.
    Clear,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    Image,
    Video,
}

impl From<KindArg> for MediaKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Image => MediaKind::Image,
            KindArg::Video => MediaKind::Video,
        }
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > EMOSCAN_CONFIG env var > platform default (~/.emoscan/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("EMOSCAN_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the inference service URL.
    ///
    /// Priority: --server flag > EMOSCAN_SERVER env var.
    /// Returns `None` if neither is set (use config value).
    pub fn resolve_server(&self) -> Option<String> {
        if let Some(ref s) = self.server {
            return Some(s.clone());
        }
        std::env::var("EMOSCAN_SERVER").ok().filter(|s| !s.trim().is_empty())
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > config file value.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log filter.
    ///
    /// Priority: RUST_LOG > --log-level flag > config file value.
    pub fn resolve_log_filter(&self, config_level: &str) -> String {
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.trim().is_empty() {
                return filter;
            }
        }
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".emoscan").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".emoscan").join("config.toml");
    }
    PathBuf::from("config.toml")
}
