pub mod config;
pub mod error;
pub mod events;
pub mod prediction;
pub mod types;

pub use config::EmoscanConfig;
pub use error::{EmoscanError, Result};
pub use events::HistoryEvent;
pub use prediction::{AnalysisContext, PredictionResponse, PredictionView};
pub use types::*;
