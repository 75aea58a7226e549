//! Bodies of the service's auxiliary endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `GET /health`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthStatus {
    pub status: String,
    pub device: String,
    pub model_loaded: bool,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" && self.model_loaded
    }
}

/// `GET /model-info`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub model_name: String,
    pub num_classes: u32,
    pub emotions: Vec<String>,
    pub total_parameters: u64,
    pub trainable_parameters: u64,
    /// Modality → input width.
    pub input_dimensions: BTreeMap<String, i64>,
}
