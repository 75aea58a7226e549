//! Plain-text rendering of views for the terminal.

use std::fmt::Write;

use emoscan_client::{HealthStatus, ModelInfo};
use emoscan_core::prediction::PredictionView;
use emoscan_core::types::{AnalysisRecord, EmotionStyle};
use emoscan_pipeline::AnalysisUpdate;
use emoscan_storage::{HistoryStats, PreferenceKey, PreferenceValue};

const BAR_WIDTH: usize = 20;

fn icon(style: &EmotionStyle) -> &'static str {
    style.icon().unwrap_or(" ")
}

fn bar(probability: f32) -> String {
    let filled = ((probability.clamp(0.0, 1.0) * BAR_WIDTH as f32) as usize).min(BAR_WIDTH);
    "█".repeat(filled)
}

/// Full result screen for one analysis.
pub fn view(view: &PredictionView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", icon(&view.style), view.emotion.to_uppercase());
    let _ = writeln!(out, "Confidence: {}%", view.confidence_percent);
    let _ = writeln!(out, "File: {}", view.filename);
    let _ = writeln!(out, "Type: {}", view.media_kind);
    let _ = writeln!(out, "Date: {}", view.analyzed_at.long_display());
    if !view.description.is_empty() {
        let _ = writeln!(out, "Description: {}", view.description);
    }

    if !view.breakdown.is_empty() {
        let _ = writeln!(out, "\nEmotion breakdown");
        for row in &view.breakdown {
            let _ = writeln!(
                out,
                "  {} {:<10} {:>3}%  {}",
                icon(&row.style),
                row.label,
                row.percent,
                bar(row.probability)
            );
        }
    }

    if let Some(features) = &view.features {
        let _ = writeln!(out, "\nFeatures");
        let lines = [
            ("Audio", features.audio_dimensions),
            ("Video", features.video_dimensions),
            ("Image", features.image_dimensions),
        ];
        for (name, dims) in lines {
            if let Some(dims) = dims {
                let _ = writeln!(out, "  {}: {} dimensions", name, dims);
            }
        }
    }

    if let Some(id) = view.record_id {
        let _ = writeln!(out, "\nSaved as #{}", id);
    }
    out
}

/// One line of the history list.
pub fn history_row(record: &AnalysisRecord) -> String {
    format!(
        "#{:<5} {}  {:<7} {} {:<10} {:>6}  {}",
        record.id.unwrap_or_default(),
        record.created_at.short_display(),
        record.media_kind.as_str(),
        icon(&record.emotion().style()),
        record.dominant_emotion,
        record.confidence_display(),
        record.filename
    )
}

pub fn history(records: &[AnalysisRecord]) -> String {
    if records.is_empty() {
        return "No analyses yet.\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        out.push_str(&history_row(record));
        out.push('\n');
    }
    out
}

pub fn stats(stats: &HistoryStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total analyses: {}", stats.total);
    if stats.total == 0 {
        return out;
    }
    if let Some(mean) = stats.mean_confidence {
        let _ = writeln!(out, "Average confidence: {:.1}%", mean * 100.0);
    }
    if let Some(emotion) = &stats.most_common_emotion {
        let _ = writeln!(out, "Most common emotion: {}", emotion);
    }
    let _ = writeln!(out, "Last 7 days: {}", stats.last_7_days);

    let _ = writeln!(out, "\nBy emotion");
    for (label, count) in &stats.by_emotion {
        let _ = writeln!(out, "  {:<10} {}", label, count);
    }
    let _ = writeln!(out, "\nBy media type");
    for (kind, count) in &stats.by_media_kind {
        let _ = writeln!(out, "  {:<10} {}", kind.as_str(), count);
    }
    out
}

pub fn health(status: &HealthStatus, base_url: &str) -> String {
    format!(
        "{}: {} (device: {}, model loaded: {})\n",
        base_url,
        if status.is_healthy() { "healthy" } else { "unhealthy" },
        if status.device.is_empty() { "unknown" } else { status.device.as_str() },
        status.model_loaded
    )
}

pub fn model_info(info: &ModelInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Model: {}", info.model_name);
    let _ = writeln!(out, "Classes: {} ({})", info.num_classes, info.emotions.join(", "));
    let _ = writeln!(
        out,
        "Parameters: {} total, {} trainable",
        info.total_parameters, info.trainable_parameters
    );
    for (modality, width) in &info.input_dimensions {
        let _ = writeln!(out, "  {} input: {}", modality, width);
    }
    out
}

pub fn preference(key: PreferenceKey, value: Option<&PreferenceValue>) -> String {
    match value {
        Some(value) => format!("{} = {}\n", key, value),
        None => format!("{} is not set\n", key),
    }
}

/// Progress line for a background analysis.
pub fn update(update: &AnalysisUpdate) -> String {
    match update {
        AnalysisUpdate::Started { file_name } => format!("Analyzing {}...\n", file_name),
        AnalysisUpdate::Completed { view: v } => view(v),
        AnalysisUpdate::Failed { message } => format!("{}\n", message),
    }
}
