//! Queries that re-run whenever the history changes.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use emoscan_core::error::EmoscanError;
use emoscan_core::events::HistoryEvent;

use crate::repository::AnalysisRepository;

type QueryFn<T> = dyn Fn(&AnalysisRepository) -> Result<T, EmoscanError> + Send + Sync;

/// A query bound to the repository's change feed.
///
/// The subscription is taken at construction, so a write that lands between
/// [`LiveQuery::current`] and the next [`LiveQuery::next`] is never missed.
pub struct LiveQuery<T> {
    repo: Arc<AnalysisRepository>,
    query: Arc<QueryFn<T>>,
    events: broadcast::Receiver<HistoryEvent>,
}

impl<T: Send + 'static> LiveQuery<T> {
    pub fn new<F>(repo: Arc<AnalysisRepository>, query: F) -> Self
    where
        F: Fn(&AnalysisRepository) -> Result<T, EmoscanError> + Send + Sync + 'static,
    {
        let events = repo.subscribe();
        Self {
            repo,
            query: Arc::new(query),
            events,
        }
    }

    /// Run the query now, on the calling thread.
    pub fn current(&self) -> Result<T, EmoscanError> {
        (self.query)(&self.repo)
    }

    /// Wait for the next change. Returns `false` once the change feed closes.
    ///
    /// Missed events (a slow consumer) count as a change.
    pub async fn changed(&mut self) -> bool {
        match self.events.recv().await {
            Ok(event) => {
                debug!(event = event.event_name(), "History changed");
                true
            }
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "Live query lagged, re-running");
                true
            }
            Err(RecvError::Closed) => false,
        }
    }

    /// Wait for the next change and re-run the query off the async runtime.
    ///
    /// Returns `None` once the change feed closes.
    pub async fn next(&mut self) -> Option<Result<T, EmoscanError>> {
        if !self.changed().await {
            return None;
        }
        // Collapse a burst of writes into one re-run.
        while let Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) = self.events.try_recv() {}

        let repo = Arc::clone(&self.repo);
        let query = Arc::clone(&self.query);
        let result = tokio::task::spawn_blocking(move || query(&repo))
            .await
            .unwrap_or_else(|e| Err(EmoscanError::Storage(format!("Query task failed: {}", e))));
        Some(result)
    }
}
