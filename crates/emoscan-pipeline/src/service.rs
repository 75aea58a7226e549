//! Inference service trait and implementations.
//!
//! - `InferenceClient` talks to the real service over HTTP.
//! - `ScriptedService` replays canned outcomes for testing.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use emoscan_client::{InferenceClient, UploadRequest};
use emoscan_core::error::{EmoscanError, Result};

/// Something that turns an upload into a raw prediction body.
pub trait InferenceService: Send + Sync {
    /// Upload the file and return the response body on a 2xx answer.
    fn upload(&self, request: &UploadRequest) -> impl Future<Output = Result<String>> + Send;
}

impl InferenceService for InferenceClient {
    fn upload(&self, request: &UploadRequest) -> impl Future<Output = Result<String>> + Send {
        InferenceClient::upload(self, request)
    }
}

/// Canned outcomes, returned in order. Records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedService {
    outcomes: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<UploadRequest>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful body.
    pub fn respond(self, body: impl Into<String>) -> Self {
        self.push(Ok(body.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, error: EmoscanError) -> Self {
        self.push(Err(error));
        self
    }

    fn push(&self, outcome: Result<String>) {
        if let Ok(mut queue) = self.outcomes.lock() {
            queue.push_back(outcome);
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl InferenceService for ScriptedService {
    async fn upload(&self, request: &UploadRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.outcomes
            .lock()
            .map_err(|_| EmoscanError::Network("scripted service poisoned".to_string()))?
            .pop_front()
            .unwrap_or_else(|| Err(EmoscanError::Network("no scripted response left".to_string())))
    }
}
