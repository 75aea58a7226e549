use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EmoscanError, Result};

// =============================================================================
// Enums
// =============================================================================

/// Kind of media that was analysed.
///
/// Only `Image` and `Video` are ever uploaded. `Generic` is the fallback for
/// stored values this build does not recognise; consumers render it neutrally
/// instead of failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Generic,
}

impl MediaKind {
    const IMAGE_EXTENSIONS: &'static [&'static str] =
        &["jpg", "jpeg", "png", "webp", "bmp", "gif", "heic"];
    const VIDEO_EXTENSIONS: &'static [&'static str] = &["mp4", "avi", "mov", "mkv", "webm", "3gp"];

    /// Parse a stored or user-supplied value. Never fails.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            _ => MediaKind::Generic,
        }
    }

    /// Infer the kind from a file extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if Self::IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if Self::VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Generic => "generic",
        }
    }

    /// Content type sent with the multipart file part.
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/*",
            MediaKind::Video => "video/*",
            MediaKind::Generic => "application/octet-stream",
        }
    }

    /// Whether this kind may be uploaded to the inference service.
    pub fn is_uploadable(&self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emotion classes produced by the inference model.
///
/// Discriminants match the service's `emotion_id` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionLabel {
    Neutral,
    Calm,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgust,
    Surprised,
    /// Any label outside the model's class list.
    Unrecognized,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 8] = [
        EmotionLabel::Neutral,
        EmotionLabel::Calm,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Fearful,
        EmotionLabel::Disgust,
        EmotionLabel::Surprised,
    ];

    /// Parse a label as sent by the service. Case-insensitive, never fails.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "neutral" => EmotionLabel::Neutral,
            "calm" => EmotionLabel::Calm,
            "happy" => EmotionLabel::Happy,
            "sad" => EmotionLabel::Sad,
            "angry" => EmotionLabel::Angry,
            "fearful" => EmotionLabel::Fearful,
            "disgust" => EmotionLabel::Disgust,
            "surprised" => EmotionLabel::Surprised,
            _ => EmotionLabel::Unrecognized,
        }
    }

    pub fn from_id(id: i32) -> Self {
        usize::try_from(id)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or(EmotionLabel::Unrecognized)
    }

    pub fn id(&self) -> Option<i32> {
        Self::ALL.iter().position(|l| l == self).map(|i| i as i32)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Calm => "calm",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Fearful => "fearful",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Surprised => "surprised",
            EmotionLabel::Unrecognized => "unrecognized",
        }
    }

    /// Display descriptor for this label. Total over the enum.
    pub fn style(&self) -> EmotionStyle {
        let (icon, color) = match self {
            EmotionLabel::Neutral => ("😐", ColorToken::Neutral),
            EmotionLabel::Calm => ("😌", ColorToken::Calm),
            EmotionLabel::Happy => ("😄", ColorToken::Happy),
            EmotionLabel::Sad => ("😢", ColorToken::Sad),
            EmotionLabel::Angry => ("😠", ColorToken::Angry),
            EmotionLabel::Fearful => ("😨", ColorToken::Sad),
            EmotionLabel::Disgust => ("🤢", ColorToken::Angry),
            EmotionLabel::Surprised => ("😲", ColorToken::Surprised),
            EmotionLabel::Unrecognized => return EmotionStyle::Plain,
        };
        EmotionStyle::Styled { icon, color }
    }
}

/// Palette entries shared by the emotion cards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorToken {
    Neutral,
    Calm,
    Happy,
    Sad,
    Angry,
    Surprised,
}

impl ColorToken {
    pub fn hex(&self) -> &'static str {
        match self {
            ColorToken::Neutral => "#9E9E9E",
            ColorToken::Calm => "#4DB6AC",
            ColorToken::Happy => "#FFC107",
            ColorToken::Sad => "#5C6BC0",
            ColorToken::Angry => "#E53935",
            ColorToken::Surprised => "#AB47BC",
        }
    }
}

/// How an emotion is decorated on screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EmotionStyle {
    Styled { icon: &'static str, color: ColorToken },
    /// No icon and no stylised colour.
    Plain,
}

impl EmotionStyle {
    pub fn icon(&self) -> Option<&'static str> {
        match self {
            EmotionStyle::Styled { icon, .. } => Some(icon),
            EmotionStyle::Plain => None,
        }
    }

    pub fn color(&self) -> Option<ColorToken> {
        match self {
            EmotionStyle::Styled { color, .. } => Some(*color),
            EmotionStyle::Plain => None,
        }
    }
}

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Wall-clock instant in milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EpochMillis(pub i64);

impl EpochMillis {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }

    /// Short form used in history rows, e.g. `Mar 04, 17:30`.
    pub fn short_display(&self) -> String {
        self.to_datetime().format("%b %d, %H:%M").to_string()
    }

    /// Long form used on the result screen, e.g. `Mar 04, 2025 - 05:30 PM`.
    pub fn long_display(&self) -> String {
        self.to_datetime().format("%b %d, %Y - %I:%M %p").to_string()
    }
}

/// Shape of a feature tensor reported by the service. Opaque to the client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureShape(pub Vec<i64>);

impl FeatureShape {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Leading dimension, shown as "N dimensions" on the result screen.
    pub fn leading_dimension(&self) -> Option<i64> {
        self.0.first().copied()
    }

    /// Column encoding: a JSON array.
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    /// Decode a stored column.
    ///
    /// Accepts an empty string, a JSON array, or the older single-key object
    /// form (`{"audio_shape":[40]}`).
    pub fn decode(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        match serde_json::from_str::<serde_json::Value>(trimmed)? {
            serde_json::Value::Array(_) => Ok(Self(serde_json::from_str(trimmed)?)),
            serde_json::Value::Object(map) => match map.into_iter().next() {
                Some((_, inner)) => Ok(Self(serde_json::from_value(inner)?)),
                None => Ok(Self::default()),
            },
            serde_json::Value::Null => Ok(Self::default()),
            other => Err(EmoscanError::Serialization(format!(
                "unexpected feature shape encoding: {}",
                other
            ))),
        }
    }
}

/// Label → probability mapping.
///
/// Ordered by label so that serialization is deterministic. Values are not
/// required to sum to one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Probabilities(pub BTreeMap<String, f32>);

impl Probabilities {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.0.get(label).copied()
    }

    pub fn sum(&self) -> f32 {
        self.0.values().sum()
    }

    /// Entries ordered by probability descending, label ascending on ties.
    pub fn ranked(&self) -> Vec<(&str, f32)> {
        let mut entries: Vec<(&str, f32)> =
            self.0.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }

    /// Column encoding: a JSON object.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn decode(value: &str) -> Result<Self> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(Self(serde_json::from_str(value)?))
    }

    /// First label whose value lies outside `[0, 1]`.
    fn first_out_of_range(&self) -> Option<(&str, f32)> {
        self.0
            .iter()
            .find(|(_, v)| !in_unit_range(**v))
            .map(|(k, v)| (k.as_str(), *v))
    }
}

impl<const N: usize> From<[(&str, f32); N]> for Probabilities {
    fn from(entries: [(&str, f32); N]) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}

fn in_unit_range(value: f32) -> bool {
    (0.0..=1.0).contains(&value)
}

/// Percentage for on-screen text: `value * 100`, truncated toward zero.
pub fn percent(value: f32) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else {
        (value * 100.0) as u32
    }
}

// =============================================================================
// Entities
// =============================================================================

/// One completed analysis, as persisted in the history store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Assigned by the store on insert.
    pub id: Option<i64>,
    pub filename: String,
    pub file_path: String,
    pub media_kind: MediaKind,
    pub dominant_emotion: String,
    pub emotion_id: i32,
    pub confidence: f32,
    pub probabilities: Probabilities,
    pub created_at: EpochMillis,
    pub description: String,
    pub audio_shape: FeatureShape,
    pub video_shape: FeatureShape,
    pub image_shape: FeatureShape,
}

impl AnalysisRecord {
    /// Check the value-range invariants before a write.
    pub fn validate(&self) -> Result<()> {
        if !in_unit_range(self.confidence) {
            return Err(EmoscanError::InvalidInput(format!(
                "confidence {} is outside [0, 1]",
                self.confidence
            )));
        }
        if let Some((label, value)) = self.probabilities.first_out_of_range() {
            return Err(EmoscanError::InvalidInput(format!(
                "probability for '{}' is {} (outside [0, 1])",
                label, value
            )));
        }
        Ok(())
    }

    pub fn emotion(&self) -> EmotionLabel {
        EmotionLabel::parse(&self.dominant_emotion)
    }

    /// Confidence with one decimal, e.g. `85.0%`.
    pub fn confidence_display(&self) -> String {
        format!("{:.1}%", self.confidence * 100.0)
    }

    /// Record inserted when the history is empty and debug seeding is on.
    pub fn debug_sample() -> Self {
        Self {
            id: None,
            filename: "Test Recording".to_string(),
            file_path: "/test/path".to_string(),
            media_kind: MediaKind::Video,
            dominant_emotion: "happy".to_string(),
            emotion_id: 1,
            confidence: 0.85,
            probabilities: Probabilities::from([("happy", 0.85), ("sad", 0.10), ("neutral", 0.05)]),
            created_at: EpochMillis::now(),
            description: "Debug test record".to_string(),
            audio_shape: FeatureShape::default(),
            video_shape: FeatureShape::default(),
            image_shape: FeatureShape::default(),
        }
    }
}
