//! Prediction payloads and the shared view model.
//!
//! `PredictionResponse` mirrors the inference service's JSON body.
//! `PredictionView` is what the front end renders; it is produced both from a
//! freshly decoded response and directly from a stored [`AnalysisRecord`], so
//! history replay never goes through a synthetic JSON payload.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EmoscanError, Result};
use crate::types::{
    percent, AnalysisRecord, EmotionLabel, EmotionStyle, EpochMillis, FeatureShape, MediaKind,
    Probabilities,
};

/// Value of `status` on a successful prediction.
pub const STATUS_SUCCESS: &str = "success";

/// Body of a `POST /predict` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub status: String,
    pub filename: String,
    pub prediction: Prediction,
    pub probabilities: Probabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub emotion: String,
    pub emotion_id: i32,
    pub confidence: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub audio_shape: FeatureShape,
    #[serde(default)]
    pub video_shape: FeatureShape,
    #[serde(default)]
    pub image_shape: FeatureShape,
}

impl Features {
    fn all_empty(&self) -> bool {
        self.audio_shape.is_empty() && self.video_shape.is_empty() && self.image_shape.is_empty()
    }
}

/// Where an analysis came from. Everything the response itself does not carry.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisContext {
    pub file_path: String,
    pub media_kind: MediaKind,
    pub description: String,
    pub analyzed_at: EpochMillis,
}

impl AnalysisContext {
    pub fn new(file_path: impl Into<String>, media_kind: MediaKind) -> Self {
        Self {
            file_path: file_path.into(),
            media_kind,
            description: String::new(),
            analyzed_at: EpochMillis::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl PredictionResponse {
    /// Decode a response body.
    ///
    /// A body that reports `"status": "error"` is turned into a `Decode` error
    /// carrying the service's message rather than a missing-field complaint.
    pub fn from_json(body: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| EmoscanError::Decode(format!("invalid JSON: {}", e)))?;

        if let Some(status) = value.get("status").and_then(|s| s.as_str()) {
            if status != STATUS_SUCCESS && value.get("prediction").is_none() {
                let message = value
                    .get("message")
                    .or_else(|| value.get("error"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("no message");
                return Err(EmoscanError::Decode(format!(
                    "service reported status '{}': {}",
                    status, message
                )));
            }
        }

        serde_json::from_value(value).map_err(|e| EmoscanError::Decode(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Log when the distribution does not sum to one within `tolerance`.
    ///
    /// Returns whether the sum was within tolerance. Never fails.
    pub fn check_distribution(&self, tolerance: f32) -> bool {
        let sum = self.probabilities.sum();
        let ok = (sum - 1.0).abs() <= tolerance;
        if !ok {
            warn!(
                filename = %self.filename,
                sum,
                tolerance,
                "Probabilities do not sum to 1; continuing"
            );
        }
        ok
    }

    /// Build the history row for this response.
    pub fn to_record(&self, ctx: &AnalysisContext) -> AnalysisRecord {
        let features = self.features.clone().unwrap_or_default();
        AnalysisRecord {
            id: None,
            filename: self.filename.clone(),
            file_path: ctx.file_path.clone(),
            media_kind: ctx.media_kind,
            dominant_emotion: self.prediction.emotion.clone(),
            emotion_id: self.prediction.emotion_id,
            confidence: self.prediction.confidence,
            probabilities: self.probabilities.clone(),
            created_at: ctx.analyzed_at,
            description: ctx.description.clone(),
            audio_shape: features.audio_shape,
            video_shape: features.video_shape,
            image_shape: features.image_shape,
        }
    }

    /// Reconstruct a wire-shaped response from a stored record.
    ///
    /// Used for export and sharing. Rendering history goes through
    /// [`PredictionView::from_record`] instead.
    pub fn from_record(record: &AnalysisRecord) -> Self {
        let features = Features {
            audio_shape: record.audio_shape.clone(),
            video_shape: record.video_shape.clone(),
            image_shape: record.image_shape.clone(),
        };
        Self {
            status: STATUS_SUCCESS.to_string(),
            filename: record.filename.clone(),
            prediction: Prediction {
                emotion: record.dominant_emotion.clone(),
                emotion_id: record.emotion_id,
                confidence: record.confidence,
            },
            probabilities: record.probabilities.clone(),
            features: (!features.all_empty()).then_some(features),
        }
    }
}

/// One line of the probability breakdown.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProbabilityRow {
    pub label: String,
    pub emotion: EmotionLabel,
    pub style: EmotionStyle,
    pub probability: f32,
    pub percent: u32,
}

/// Leading dimension of each non-empty feature tensor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FeatureSummary {
    pub audio_dimensions: Option<i64>,
    pub video_dimensions: Option<i64>,
    pub image_dimensions: Option<i64>,
}

impl FeatureSummary {
    fn from_shapes(audio: &FeatureShape, video: &FeatureShape, image: &FeatureShape) -> Option<Self> {
        let summary = Self {
            audio_dimensions: audio.leading_dimension(),
            video_dimensions: video.leading_dimension(),
            image_dimensions: image.leading_dimension(),
        };
        (summary != Self::default()).then_some(summary)
    }
}

/// Render-ready analysis result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PredictionView {
    /// Set when the view was built from, or has been saved to, the history.
    pub record_id: Option<i64>,
    pub filename: String,
    pub file_path: String,
    pub media_kind: MediaKind,
    pub description: String,
    pub analyzed_at: EpochMillis,
    /// Dominant label exactly as reported.
    pub emotion: String,
    pub label: EmotionLabel,
    pub style: EmotionStyle,
    pub emotion_id: i32,
    pub confidence: f32,
    pub confidence_percent: u32,
    /// Ranked by probability, highest first.
    pub breakdown: Vec<ProbabilityRow>,
    /// `None` hides the feature section.
    pub features: Option<FeatureSummary>,
}

impl PredictionView {
    pub fn from_response(response: &PredictionResponse, ctx: &AnalysisContext) -> Self {
        let features = response.features.as_ref().and_then(|f| {
            FeatureSummary::from_shapes(&f.audio_shape, &f.video_shape, &f.image_shape)
        });
        Self::build(
            None,
            &response.filename,
            ctx,
            &response.prediction.emotion,
            response.prediction.emotion_id,
            response.prediction.confidence,
            &response.probabilities,
            features,
        )
    }

    pub fn from_record(record: &AnalysisRecord) -> Self {
        let ctx = AnalysisContext {
            file_path: record.file_path.clone(),
            media_kind: record.media_kind,
            description: record.description.clone(),
            analyzed_at: record.created_at,
        };
        let features =
            FeatureSummary::from_shapes(&record.audio_shape, &record.video_shape, &record.image_shape);
        Self::build(
            record.id,
            &record.filename,
            &ctx,
            &record.dominant_emotion,
            record.emotion_id,
            record.confidence,
            &record.probabilities,
            features,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        record_id: Option<i64>,
        filename: &str,
        ctx: &AnalysisContext,
        emotion: &str,
        emotion_id: i32,
        confidence: f32,
        probabilities: &Probabilities,
        features: Option<FeatureSummary>,
    ) -> Self {
        let label = EmotionLabel::parse(emotion);
        let breakdown = probabilities
            .ranked()
            .into_iter()
            .map(|(name, probability)| {
                let emotion = EmotionLabel::parse(name);
                ProbabilityRow {
                    label: name.to_string(),
                    emotion,
                    style: emotion.style(),
                    probability,
                    percent: percent(probability),
                }
            })
            .collect();

        Self {
            record_id,
            filename: filename.to_string(),
            file_path: ctx.file_path.clone(),
            media_kind: ctx.media_kind,
            description: ctx.description.clone(),
            analyzed_at: ctx.analyzed_at,
            emotion: emotion.to_string(),
            label,
            style: label.style(),
            emotion_id,
            confidence,
            confidence_percent: percent(confidence),
            breakdown,
            features,
        }
    }

    /// Plain-text summary for sharing.
    pub fn share_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Emotion Detection Results\n\n");
        out.push_str(&format!("Detected Emotion: {}\n", self.emotion));
        out.push_str(&format!("Confidence: {}%\n\n", self.confidence_percent));
        out.push_str("Full Analysis:\n");
        for row in &self.breakdown {
            out.push_str(&format!("- {}: {}%\n", row.label.to_uppercase(), row.percent));
        }
        out.push_str(&format!("\nFile: {}\n", self.filename));
        out.push_str(&format!("Date: {}\n", self.analyzed_at.long_display()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY_PAYLOAD: &str = r#"{"status":"success","filename":"a.mp4","prediction":{"emotion":"happy","emotion_id":1,"confidence":0.92},"probabilities":{"happy":0.92,"sad":0.08}}"#;

    fn ctx() -> AnalysisContext {
        AnalysisContext {
            file_path: "/media/a.mp4".to_string(),
            media_kind: MediaKind::Video,
            description: "first try".to_string(),
            analyzed_at: EpochMillis(1_709_573_400_000),
        }
    }

    #[test]
    fn test_decode_success_payload() {
        let resp = PredictionResponse::from_json(HAPPY_PAYLOAD).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.filename, "a.mp4");
        assert_eq!(resp.prediction.emotion, "happy");
        assert_eq!(resp.prediction.emotion_id, 1);
        assert_eq!(resp.prediction.confidence, 0.92);
        assert_eq!(resp.probabilities.len(), 2);
        assert!(resp.features.is_none());
    }

    #[test]
    fn test_decode_with_features() {
        let body = r#"{"status":"success","filename":"b.mp4",
            "prediction":{"emotion":"sad","emotion_id":3,"confidence":0.6},
            "probabilities":{"sad":0.6,"neutral":0.4},
            "features":{"audio_shape":[40],"video_shape":[30,3],"image_shape":[]}}"#;
        let resp = PredictionResponse::from_json(body).unwrap();
        let features = resp.features.unwrap();
        assert_eq!(features.audio_shape, FeatureShape(vec![40]));
        assert_eq!(features.video_shape, FeatureShape(vec![30, 3]));
        assert!(features.image_shape.is_empty());
    }

    #[test]
    fn test_decode_partial_features_defaults_missing_shapes() {
        let body = r#"{"status":"success","filename":"c.jpg",
            "prediction":{"emotion":"calm","emotion_id":1,"confidence":0.5},
            "probabilities":{"calm":0.5},
            "features":{"image_shape":[512]}}"#;
        let resp = PredictionResponse::from_json(body).unwrap();
        let features = resp.features.unwrap();
        assert!(features.audio_shape.is_empty());
        assert_eq!(features.image_shape, FeatureShape(vec![512]));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            PredictionResponse::from_json("not json"),
            Err(EmoscanError::Decode(_))
        ));
        assert!(matches!(
            PredictionResponse::from_json(r#"{"status":"success","filename":"x"}"#),
            Err(EmoscanError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_error_status_surfaces_message() {
        let err = PredictionResponse::from_json(r#"{"status":"error","message":"model exploded"}"#)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("error"));
        assert!(msg.contains("model exploded"));
    }

    #[test]
    fn test_to_record_maps_every_field() {
        let resp = PredictionResponse::from_json(HAPPY_PAYLOAD).unwrap();
        let record = resp.to_record(&ctx());
        assert_eq!(record.id, None);
        assert_eq!(record.filename, "a.mp4");
        assert_eq!(record.file_path, "/media/a.mp4");
        assert_eq!(record.media_kind, MediaKind::Video);
        assert_eq!(record.dominant_emotion, "happy");
        assert_eq!(record.emotion_id, 1);
        assert_eq!(record.confidence, 0.92);
        assert_eq!(record.probabilities, Probabilities::from([("happy", 0.92), ("sad", 0.08)]));
        assert_eq!(record.created_at, EpochMillis(1_709_573_400_000));
        assert_eq!(record.description, "first try");
        assert!(record.audio_shape.is_empty());
    }

    #[test]
    fn test_reverse_reconstruction_round_trip() {
        let mut record = PredictionResponse::from_json(HAPPY_PAYLOAD)
            .unwrap()
            .to_record(&ctx());
        record.id = Some(7);
        record.video_shape = FeatureShape(vec![30, 1]);

        let json = PredictionResponse::from_record(&record).to_json().unwrap();
        let parsed = PredictionResponse::from_json(&json).unwrap();

        assert_eq!(parsed.prediction.emotion, record.dominant_emotion);
        assert_eq!(parsed.prediction.emotion_id, record.emotion_id);
        assert_eq!(parsed.prediction.confidence, record.confidence);
        assert_eq!(parsed.probabilities, record.probabilities);
        assert_eq!(parsed.features.unwrap().video_shape, FeatureShape(vec![30, 1]));
    }

    #[test]
    fn test_reverse_reconstruction_omits_empty_features() {
        let record = AnalysisRecord::debug_sample();
        assert!(PredictionResponse::from_record(&record).features.is_none());
    }

    #[test]
    fn test_view_from_response_and_record_agree() {
        let resp = PredictionResponse::from_json(HAPPY_PAYLOAD).unwrap();
        let live = PredictionView::from_response(&resp, &ctx());

        let mut record = resp.to_record(&ctx());
        record.id = Some(3);
        let replayed = PredictionView::from_record(&record);

        assert_eq!(replayed.record_id, Some(3));
        assert_eq!(PredictionView { record_id: Some(3), ..live }, replayed);
    }

    #[test]
    fn test_view_breakdown_ranked_and_truncated() {
        let resp = PredictionResponse::from_json(HAPPY_PAYLOAD).unwrap();
        let view = PredictionView::from_response(&resp, &ctx());
        assert_eq!(view.label, EmotionLabel::Happy);
        assert_eq!(view.confidence_percent, 92);
        assert_eq!(view.breakdown.len(), 2);
        assert_eq!(view.breakdown[0].label, "happy");
        assert_eq!(view.breakdown[0].percent, 92);
        assert_eq!(view.breakdown[1].label, "sad");
        assert_eq!(view.breakdown[1].percent, 8);
        // Stored value keeps full precision.
        assert_eq!(view.confidence, 0.92);
    }

    #[test]
    fn test_view_unknown_label_is_plain() {
        let body = r#"{"status":"success","filename":"x.jpg",
            "prediction":{"emotion":"bored","emotion_id":42,"confidence":0.7},
            "probabilities":{"bored":0.7,"happy":0.3}}"#;
        let view = PredictionView::from_response(&PredictionResponse::from_json(body).unwrap(), &ctx());
        assert_eq!(view.label, EmotionLabel::Unrecognized);
        assert_eq!(view.style, EmotionStyle::Plain);
        assert_eq!(view.breakdown[0].style, EmotionStyle::Plain);
        assert!(view.breakdown[1].style.icon().is_some());
    }

    #[test]
    fn test_view_features_hidden_when_absent() {
        let resp = PredictionResponse::from_json(HAPPY_PAYLOAD).unwrap();
        assert!(PredictionView::from_response(&resp, &ctx()).features.is_none());

        let mut with_features = resp.clone();
        with_features.features = Some(Features {
            audio_shape: FeatureShape(vec![40]),
            ..Features::default()
        });
        let summary = PredictionView::from_response(&with_features, &ctx())
            .features
            .unwrap();
        assert_eq!(summary.audio_dimensions, Some(40));
        assert_eq!(summary.video_dimensions, None);
    }

    #[test]
    fn test_check_distribution() {
        let resp = PredictionResponse::from_json(HAPPY_PAYLOAD).unwrap();
        assert!(resp.check_distribution(0.05));

        let mut skewed = resp;
        skewed.probabilities = Probabilities::from([("happy", 0.9), ("sad", 0.9)]);
        assert!(!skewed.check_distribution(0.05));
    }

    #[test]
    fn test_share_text() {
        let resp = PredictionResponse::from_json(HAPPY_PAYLOAD).unwrap();
        let text = PredictionView::from_response(&resp, &ctx()).share_text();
        assert!(text.contains("Detected Emotion: happy"));
        assert!(text.contains("Confidence: 92%"));
        assert!(text.contains("- HAPPY: 92%"));
        assert!(text.contains("- SAD: 8%"));
        assert!(text.contains("File: a.mp4"));
    }
}
