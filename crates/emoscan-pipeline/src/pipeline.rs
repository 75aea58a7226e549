//! Analysis pipeline.
//!
//! Runs one analysis through upload, decode, view building and persistence,
//! and rebuilds views from the history.

use std::sync::Arc;

use tracing::{debug, info, warn};

use emoscan_client::UploadRequest;
use emoscan_core::config::AnalysisConfig;
use emoscan_core::error::{EmoscanError, Result};
use emoscan_core::prediction::{AnalysisContext, PredictionResponse, PredictionView};
use emoscan_core::types::AnalysisRecord;
use emoscan_storage::AnalysisRepository;

use crate::service::InferenceService;

/// Whether a successful analysis is written to the history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Persist {
    Save,
    Skip,
}

/// The analysis pipeline.
///
/// Processes one upload through:
/// 1. Upload to the inference service
/// 2. Decoding and status check
/// 3. Distribution check (log only)
/// 4. View building
/// 5. History insert (failures are logged, never surfaced)
pub struct AnalysisPipeline<S: InferenceService> {
    service: S,
    repo: Arc<AnalysisRepository>,
    probability_tolerance: f32,
}

impl<S: InferenceService> AnalysisPipeline<S> {
    pub fn new(service: S, repo: Arc<AnalysisRepository>, config: &AnalysisConfig) -> Self {
        Self {
            service,
            repo,
            probability_tolerance: config.probability_sum_tolerance,
        }
    }

    pub fn repository(&self) -> &Arc<AnalysisRepository> {
        &self.repo
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Analyse one file.
    ///
    /// On success the view carries the new record id when it was saved. A
    /// storage failure does not fail the analysis.
    pub async fn analyze(&self, request: &UploadRequest, persist: Persist) -> Result<PredictionView> {
        let body = self.service.upload(request).await?;

        let response = PredictionResponse::from_json(&body)?;
        if !response.is_success() {
            return Err(EmoscanError::Decode(format!(
                "service reported status '{}'",
                response.status
            )));
        }
        response.check_distribution(self.probability_tolerance);

        let ctx = AnalysisContext::new(request.path.to_string_lossy(), request.media_kind)
            .with_description(request.description.clone());
        let mut view = PredictionView::from_response(&response, &ctx);

        info!(
            file = %view.filename,
            emotion = %view.emotion,
            confidence = view.confidence,
            "Analysis complete"
        );

        if persist == Persist::Save {
            view.record_id = self.save(response.to_record(&ctx)).await;
        }
        Ok(view)
    }

    /// Insert off the async runtime. Errors are logged and swallowed.
    async fn save(&self, record: AnalysisRecord) -> Option<i64> {
        let repo = Arc::clone(&self.repo);
        match tokio::task::spawn_blocking(move || repo.insert(&record)).await {
            Ok(Ok(id)) => {
                debug!(id, "Analysis saved to history");
                Some(id)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to save analysis to history");
                None
            }
            Err(e) => {
                warn!(error = %e, "History insert task failed");
                None
            }
        }
    }

    /// Rebuild the result view for a stored analysis.
    pub async fn replay(&self, id: i64) -> Result<Option<PredictionView>> {
        let repo = Arc::clone(&self.repo);
        let record = tokio::task::spawn_blocking(move || repo.get_by_id(id))
            .await
            .map_err(|e| EmoscanError::Storage(format!("History lookup task failed: {}", e)))??;
        Ok(record.as_ref().map(PredictionView::from_record))
    }

    /// Views for the most recent analyses, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<PredictionView>> {
        let repo = Arc::clone(&self.repo);
        let records = tokio::task::spawn_blocking(move || repo.list_recent(limit))
            .await
            .map_err(|e| EmoscanError::Storage(format!("History lookup task failed: {}", e)))??;
        Ok(records.iter().map(PredictionView::from_record).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use emoscan_core::types::MediaKind;
    use emoscan_storage::Database;

    use super::*;
    use crate::service::ScriptedService;

    const HAPPY_BODY: &str = r#"{"status":"success","filename":"a.mp4","prediction":{"emotion":"happy","emotion_id":2,"confidence":0.92},"probabilities":{"happy":0.92,"sad":0.08},"features":{"audio_shape":[40],"video_shape":[30,3],"image_shape":[]}}"#;

    fn make_repo() -> Arc<AnalysisRepository> {
        Arc::new(AnalysisRepository::new(Arc::new(Database::in_memory().unwrap())))
    }

    fn make_pipeline(service: ScriptedService) -> AnalysisPipeline<ScriptedService> {
        AnalysisPipeline::new(service, make_repo(), &AnalysisConfig::default())
    }

    fn request() -> UploadRequest {
        UploadRequest::new(PathBuf::from("/videos/a.mp4")).with_description("party")
    }

    #[tokio::test]
    async fn test_success_saves_exactly_one_record() {
        let pipeline = make_pipeline(ScriptedService::new().respond(HAPPY_BODY));

        let view = pipeline.analyze(&request(), Persist::Save).await.unwrap();
        assert_eq!(view.emotion, "happy");
        assert_eq!(view.confidence_percent, 92);
        assert_eq!(view.breakdown[0].label, "happy");
        assert_eq!(view.breakdown[1].percent, 8);

        let repo = pipeline.repository();
        assert_eq!(repo.count().unwrap(), 1);
        let record = repo.get_by_id(view.record_id.unwrap()).unwrap().unwrap();
        assert_eq!(record.dominant_emotion, "happy");
        assert_eq!(record.emotion_id, 2);
        assert_eq!(record.filename, "a.mp4");
        assert_eq!(record.file_path, "/videos/a.mp4");
        assert_eq!(record.media_kind, MediaKind::Video);
        assert_eq!(record.description, "party");
        assert!((record.confidence - 0.92).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_server_error_saves_nothing() {
        let pipeline = make_pipeline(ScriptedService::new().fail(EmoscanError::Server {
            status: 500,
            body: "server error".to_string(),
        }));

        let err = pipeline.analyze(&request(), Persist::Save).await.unwrap_err();
        assert_eq!(err.to_string(), "Server returned error: 500 - server error");
        assert_eq!(pipeline.repository().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_saves_nothing() {
        let pipeline = make_pipeline(ScriptedService::new().respond("{not json"));
        let err = pipeline.analyze(&request(), Persist::Save).await.unwrap_err();
        assert!(matches!(err, EmoscanError::Decode(_)));
        assert_eq!(pipeline.repository().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_success_status_with_prediction_is_rejected() {
        let body = HAPPY_BODY.replace(r#""status":"success""#, r#""status":"partial""#);
        let pipeline = make_pipeline(ScriptedService::new().respond(body));
        let err = pipeline.analyze(&request(), Persist::Save).await.unwrap_err();
        assert!(err.to_string().contains("partial"));
        assert_eq!(pipeline.repository().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_skip_persist() {
        let pipeline = make_pipeline(ScriptedService::new().respond(HAPPY_BODY));
        let view = pipeline.analyze(&request(), Persist::Skip).await.unwrap();
        assert_eq!(view.record_id, None);
        assert_eq!(pipeline.repository().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_uneven_distribution_still_completes() {
        let body = HAPPY_BODY.replace(r#""sad":0.08"#, r#""sad":0.5"#);
        let pipeline = make_pipeline(ScriptedService::new().respond(body));
        let view = pipeline.analyze(&request(), Persist::Save).await.unwrap();
        assert!(view.record_id.is_some());
    }

    #[tokio::test]
    async fn test_replay_matches_live_view() {
        let pipeline = make_pipeline(ScriptedService::new().respond(HAPPY_BODY));
        let live = pipeline.analyze(&request(), Persist::Save).await.unwrap();

        let replayed = pipeline.replay(live.record_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(replayed, live);
        assert_eq!(replayed.features.as_ref().unwrap().audio_dimensions, Some(40));
        assert_eq!(replayed.features.as_ref().unwrap().image_dimensions, None);
    }

    #[tokio::test]
    async fn test_replay_missing_record() {
        let pipeline = make_pipeline(ScriptedService::new());
        assert!(pipeline.replay(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_views_newest_first() {
        let pipeline = make_pipeline(
            ScriptedService::new()
                .respond(HAPPY_BODY)
                .respond(HAPPY_BODY.replace("happy", "calm")),
        );
        pipeline.analyze(&request(), Persist::Save).await.unwrap();
        pipeline.analyze(&request(), Persist::Save).await.unwrap();

        let views = pipeline.recent(10).await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].emotion, "calm");
        assert!(views[0].record_id > views[1].record_id);
        assert_eq!(pipeline.service().requests().len(), 2);
    }
}
