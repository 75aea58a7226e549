//! Background analyses.
//!
//! A spawned analysis always runs to completion, including the history
//! insert. Its cancellation token only gates the updates sent to whoever is
//! displaying progress: once cancelled, no further update is sent.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use emoscan_client::UploadRequest;
use emoscan_core::error::{EmoscanError, Result};
use emoscan_core::prediction::PredictionView;

use crate::pipeline::{AnalysisPipeline, Persist};
use crate::service::InferenceService;

/// Progress of a background analysis.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisUpdate {
    Started { file_name: String },
    Completed { view: Box<PredictionView> },
    Failed { message: String },
}

/// Handle to a spawned analysis.
pub struct AnalysisTask {
    cancel: CancellationToken,
    handle: JoinHandle<Result<PredictionView>>,
}

impl AnalysisTask {
    /// Stop sending updates. The analysis itself keeps running.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for the analysis to finish.
    pub async fn join(self) -> Result<PredictionView> {
        self.handle
            .await
            .unwrap_or_else(|e| Err(EmoscanError::Storage(format!("Analysis task failed: {}", e))))
    }
}

/// Spawn an analysis on the runtime.
///
/// `updates` receives `Started` and then either `Completed` or `Failed`,
/// unless `cancel` fires first.
pub fn spawn_analysis<S>(
    pipeline: Arc<AnalysisPipeline<S>>,
    request: UploadRequest,
    persist: Persist,
    updates: mpsc::Sender<AnalysisUpdate>,
    cancel: CancellationToken,
) -> AnalysisTask
where
    S: InferenceService + 'static,
{
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        notify(
            &updates,
            &token,
            AnalysisUpdate::Started {
                file_name: request.file_name(),
            },
        )
        .await;

        let result = pipeline.analyze(&request, persist).await;

        let update = match &result {
            Ok(view) => AnalysisUpdate::Completed {
                view: Box::new(view.clone()),
            },
            Err(e) => {
                warn!(file = %request.path.display(), error = %e, "Background analysis failed");
                AnalysisUpdate::Failed {
                    message: e.user_message(),
                }
            }
        };
        notify(&updates, &token, update).await;
        result
    });

    AnalysisTask { cancel, handle }
}

async fn notify(
    updates: &mpsc::Sender<AnalysisUpdate>,
    cancel: &CancellationToken,
    update: AnalysisUpdate,
) {
    if cancel.is_cancelled() {
        debug!("Analysis view gone, dropping update");
        return;
    }
    if updates.send(update).await.is_err() {
        debug!("Update receiver closed");
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use emoscan_core::config::AnalysisConfig;
    use emoscan_storage::{AnalysisRepository, Database};

    use super::*;
    use crate::service::ScriptedService;

    const BODY: &str = r#"{"status":"success","filename":"f.jpg","prediction":{"emotion":"surprised","emotion_id":7,"confidence":0.7},"probabilities":{"surprised":0.7,"happy":0.3}}"#;

    fn make_pipeline(service: ScriptedService) -> Arc<AnalysisPipeline<ScriptedService>> {
        let repo = Arc::new(AnalysisRepository::new(Arc::new(Database::in_memory().unwrap())));
        Arc::new(AnalysisPipeline::new(service, repo, &AnalysisConfig::default()))
    }

    fn request() -> UploadRequest {
        UploadRequest::new(PathBuf::from("/pics/f.jpg"))
    }

    #[tokio::test]
    async fn test_updates_in_order() {
        let pipeline = make_pipeline(ScriptedService::new().respond(BODY));
        let (tx, mut rx) = mpsc::channel(8);

        let task = spawn_analysis(
            Arc::clone(&pipeline),
            request(),
            Persist::Save,
            tx,
            CancellationToken::new(),
        );
        let view = task.join().await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            AnalysisUpdate::Started {
                file_name: "f.jpg".to_string()
            }
        );
        match rx.recv().await.unwrap() {
            AnalysisUpdate::Completed { view: sent } => assert_eq!(*sent, view),
            other => panic!("unexpected update {:?}", other),
        }
        assert!(rx.recv().await.is_none());
        assert_eq!(pipeline.repository().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_update_carries_user_message() {
        let pipeline = make_pipeline(
            ScriptedService::new().fail(EmoscanError::Network("connection refused".to_string())),
        );
        let (tx, mut rx) = mpsc::channel(8);

        let task = spawn_analysis(pipeline, request(), Persist::Save, tx, CancellationToken::new());
        assert!(task.join().await.is_err());

        rx.recv().await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            AnalysisUpdate::Failed {
                message: "Upload failed: Network error: connection refused".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_task_still_persists_but_sends_nothing() {
        let pipeline = make_pipeline(ScriptedService::new().respond(BODY));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task = spawn_analysis(Arc::clone(&pipeline), request(), Persist::Save, tx, cancel);
        assert!(task.token().is_cancelled());
        let view = task.join().await.unwrap();

        assert!(view.record_id.is_some());
        assert_eq!(pipeline.repository().count().unwrap(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_receiver_does_not_fail_task() {
        let pipeline = make_pipeline(ScriptedService::new().respond(BODY));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let task = spawn_analysis(pipeline, request(), Persist::Skip, tx, CancellationToken::new());
        assert_eq!(task.join().await.unwrap().emotion, "surprised");
    }
}
