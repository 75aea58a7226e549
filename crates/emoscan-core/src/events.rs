use serde::{Deserialize, Serialize};

use crate::types::EpochMillis;

/// Changes to the analysis history.
///
/// Published by the store after each committed write and consumed by:
/// - live queries (re-run on every event)
/// - the `history watch` command
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum HistoryEvent {
    /// A row was inserted, or replaced by an insert with the same id.
    RecordSaved { id: i64, timestamp: EpochMillis },

    /// An existing row was updated in place.
    RecordUpdated { id: i64, timestamp: EpochMillis },

    /// A row was removed.
    RecordDeleted { id: i64, timestamp: EpochMillis },

    /// Every row was removed.
    HistoryCleared {
        removed: u64,
        timestamp: EpochMillis,
    },
}

impl HistoryEvent {
    pub fn timestamp(&self) -> EpochMillis {
        match self {
            HistoryEvent::RecordSaved { timestamp, .. }
            | HistoryEvent::RecordUpdated { timestamp, .. }
            | HistoryEvent::RecordDeleted { timestamp, .. }
            | HistoryEvent::HistoryCleared { timestamp, .. } => *timestamp,
        }
    }

    /// Human-readable event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            HistoryEvent::RecordSaved { .. } => "record_saved",
            HistoryEvent::RecordUpdated { .. } => "record_updated",
            HistoryEvent::RecordDeleted { .. } => "record_deleted",
            HistoryEvent::HistoryCleared { .. } => "history_cleared",
        }
    }

    /// Id of the affected row, if the event concerns a single row.
    pub fn record_id(&self) -> Option<i64> {
        match self {
            HistoryEvent::RecordSaved { id, .. }
            | HistoryEvent::RecordUpdated { id, .. }
            | HistoryEvent::RecordDeleted { id, .. } => Some(*id),
            HistoryEvent::HistoryCleared { .. } => None,
        }
    }
}
