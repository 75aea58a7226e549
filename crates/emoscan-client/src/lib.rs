//! EmoScan client crate - multipart upload client for the inference service.

pub mod client;
pub mod service;

pub use client::{InferenceClient, UploadRequest};
pub use service::{HealthStatus, ModelInfo};
