//! EmoScan analysis pipeline.
//!
//! This crate provides:
//! - `InferenceService` trait with the HTTP client and a scripted test double
//! - `AnalysisPipeline` for upload → decode → view → history insert
//! - background analyses gated by a cancellation token

pub mod pipeline;
pub mod service;
pub mod task;

pub use pipeline::{AnalysisPipeline, Persist};
pub use service::{InferenceService, ScriptedService};
pub use task::{spawn_analysis, AnalysisTask, AnalysisUpdate};
