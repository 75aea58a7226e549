//! EmoScan storage crate - SQLite persistence for the analysis history.
//!
//! Provides a WAL-mode SQLite database with migrations, the analysis
//! repository with live queries, aggregate statistics, and the typed
//! preference store.

pub mod db;
pub mod live;
pub mod migrations;
pub mod preferences;
pub mod repository;
pub mod stats;

pub use db::Database;
pub use live::LiveQuery;
pub use preferences::{PreferenceKey, PreferenceStore, PreferenceValue};
pub use repository::AnalysisRepository;
pub use stats::HistoryStats;
