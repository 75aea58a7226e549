//! Analysis history repository.
//!
//! All reads go through the reader pool, all writes through the single
//! writer. Every committed write is announced on a broadcast channel so live
//! queries can re-run.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use emoscan_core::error::EmoscanError;
use emoscan_core::events::HistoryEvent;
use emoscan_core::types::{
    AnalysisRecord, EmotionLabel, EpochMillis, FeatureShape, MediaKind, Probabilities,
};

use crate::db::Database;
use crate::live::LiveQuery;

const EVENT_CAPACITY: usize = 256;

const SELECT_COLUMNS: &str = "SELECT id, filename, file_path, media_type, dominant_emotion,
        emotion_id, confidence, probabilities, analysis_date, description,
        audio_features, video_features, image_features
     FROM analysis_history";

const ORDER_NEWEST_FIRST: &str = "ORDER BY analysis_date DESC, id DESC";

/// Repository for completed analyses.
pub struct AnalysisRepository {
    db: Arc<Database>,
    events: broadcast::Sender<HistoryEvent>,
}

impl AnalysisRepository {
    pub fn new(db: Arc<Database>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { db, events }
    }

    /// Receive an event after every committed write.
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert a record and return its id.
    ///
    /// A record without an id gets the next one. A record whose id already
    /// exists replaces that row.
    pub fn insert(&self, record: &AnalysisRecord) -> Result<i64, EmoscanError> {
        record.validate()?;
        let probabilities = record.probabilities.encode()?;

        let id = self.db.with_conn(|conn| {
            // A NULL id lets SQLite assign the next AUTOINCREMENT value.
            conn.execute(
                "INSERT OR REPLACE INTO analysis_history (id, filename, file_path, media_type,
                     dominant_emotion, emotion_id, confidence, probabilities, analysis_date,
                     description, audio_features, video_features, image_features)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    record.id,
                    record.filename,
                    record.file_path,
                    record.media_kind.as_str(),
                    record.dominant_emotion,
                    record.emotion_id,
                    record.confidence as f64,
                    probabilities,
                    record.created_at.0,
                    record.description,
                    record.audio_shape.encode(),
                    record.video_shape.encode(),
                    record.image_shape.encode(),
                ],
            )
            .map_err(|e| EmoscanError::Storage(format!("Failed to save analysis: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(id, emotion = %record.dominant_emotion, "Analysis saved");
        self.publish(HistoryEvent::RecordSaved {
            id,
            timestamp: EpochMillis::now(),
        });
        Ok(id)
    }

    /// Insert each record in turn. Not atomic: a failure leaves earlier rows
    /// in place.
    pub fn insert_many(&self, records: &[AnalysisRecord]) -> Result<Vec<i64>, EmoscanError> {
        records.iter().map(|r| self.insert(r)).collect()
    }

    /// Replace the row with the record's id.
    ///
    /// Returns `false` without error when the record has no id or no such
    /// row exists.
    pub fn update(&self, record: &AnalysisRecord) -> Result<bool, EmoscanError> {
        let Some(id) = record.id else {
            return Ok(false);
        };
        record.validate()?;
        let probabilities = record.probabilities.encode()?;

        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE analysis_history
                 SET filename = ?2, file_path = ?3, media_type = ?4, dominant_emotion = ?5,
                     emotion_id = ?6, confidence = ?7, probabilities = ?8, analysis_date = ?9,
                     description = ?10, audio_features = ?11, video_features = ?12,
                     image_features = ?13
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    record.filename,
                    record.file_path,
                    record.media_kind.as_str(),
                    record.dominant_emotion,
                    record.emotion_id,
                    record.confidence as f64,
                    probabilities,
                    record.created_at.0,
                    record.description,
                    record.audio_shape.encode(),
                    record.video_shape.encode(),
                    record.image_shape.encode(),
                ],
            )
            .map_err(|e| EmoscanError::Storage(format!("Failed to update analysis: {}", e)))
        })?;

        if changed > 0 {
            self.publish(HistoryEvent::RecordUpdated {
                id,
                timestamp: EpochMillis::now(),
            });
        }
        Ok(changed > 0)
    }

    /// Delete a row by id. Returns whether a row was removed.
    pub fn delete_by_id(&self, id: i64) -> Result<bool, EmoscanError> {
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM analysis_history WHERE id = ?1",
                rusqlite::params![id],
            )
            .map_err(|e| EmoscanError::Storage(format!("Failed to delete analysis: {}", e)))
        })?;

        if removed > 0 {
            debug!(id, "Analysis deleted");
            self.publish(HistoryEvent::RecordDeleted {
                id,
                timestamp: EpochMillis::now(),
            });
        }
        Ok(removed > 0)
    }

    /// Delete the row a record was loaded from.
    pub fn delete(&self, record: &AnalysisRecord) -> Result<bool, EmoscanError> {
        match record.id {
            Some(id) => self.delete_by_id(id),
            None => Ok(false),
        }
    }

    /// Remove every row. Returns the number removed.
    pub fn delete_all(&self) -> Result<u64, EmoscanError> {
        let removed = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM analysis_history", [])
                .map_err(|e| EmoscanError::Storage(format!("Failed to clear history: {}", e)))
        })? as u64;

        if removed > 0 {
            self.publish(HistoryEvent::HistoryCleared {
                removed,
                timestamp: EpochMillis::now(),
            });
        }
        Ok(removed)
    }

    /// Insert [`AnalysisRecord::debug_sample`] if the history is empty.
    pub fn seed_debug_record(&self) -> Result<Option<i64>, EmoscanError> {
        if self.count()? > 0 {
            return Ok(None);
        }
        let id = self.insert(&AnalysisRecord::debug_sample())?;
        info!(id, "Seeded debug record");
        Ok(Some(id))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_by_id(&self, id: i64) -> Result<Option<AnalysisRecord>, EmoscanError> {
        self.db.with_reader(|conn| {
            let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| EmoscanError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![id], |row| Ok(row_to_record(row)))
                .optional()
                .map_err(|e| EmoscanError::Storage(e.to_string()))?;

            result.transpose()
        })
    }

    /// Every record, newest first.
    pub fn list_all(&self) -> Result<Vec<AnalysisRecord>, EmoscanError> {
        self.db.with_reader(|conn| {
            let sql = format!("{} {}", SELECT_COLUMNS, ORDER_NEWEST_FIRST);
            query_records(conn, &sql, [])
        })
    }

    /// At most `limit` records, newest first.
    pub fn list_recent(&self, limit: u32) -> Result<Vec<AnalysisRecord>, EmoscanError> {
        self.db.with_reader(|conn| {
            let sql = format!("{} {} LIMIT ?1", SELECT_COLUMNS, ORDER_NEWEST_FIRST);
            query_records(conn, &sql, rusqlite::params![limit])
        })
    }

    pub fn list_by_media_kind(&self, kind: MediaKind) -> Result<Vec<AnalysisRecord>, EmoscanError> {
        self.db.with_reader(|conn| {
            let sql = format!(
                "{} WHERE media_type = ?1 {}",
                SELECT_COLUMNS, ORDER_NEWEST_FIRST
            );
            query_records(conn, &sql, rusqlite::params![kind.as_str()])
        })
    }

    /// Records whose dominant emotion matches the label, case-insensitively.
    pub fn list_by_emotion(&self, label: &str) -> Result<Vec<AnalysisRecord>, EmoscanError> {
        self.db.with_reader(|conn| {
            let sql = format!(
                "{} WHERE lower(dominant_emotion) = lower(?1) {}",
                SELECT_COLUMNS, ORDER_NEWEST_FIRST
            );
            query_records(conn, &sql, rusqlite::params![label.trim()])
        })
    }

    pub fn count(&self) -> Result<u64, EmoscanError> {
        self.db.with_reader(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM analysis_history", [], |row| row.get(0))
                .map_err(|e| EmoscanError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Most recent record, if any.
    pub fn latest(&self) -> Result<Option<AnalysisRecord>, EmoscanError> {
        Ok(self.list_recent(1)?.into_iter().next())
    }

    // ------------------------------------------------------------------
    // Live queries
    // ------------------------------------------------------------------

    pub fn watch_all(self: &Arc<Self>) -> LiveQuery<Vec<AnalysisRecord>> {
        LiveQuery::new(Arc::clone(self), |repo| repo.list_all())
    }

    pub fn watch_recent(self: &Arc<Self>, limit: u32) -> LiveQuery<Vec<AnalysisRecord>> {
        LiveQuery::new(Arc::clone(self), move |repo| repo.list_recent(limit))
    }

    pub fn watch_count(self: &Arc<Self>) -> LiveQuery<u64> {
        LiveQuery::new(Arc::clone(self), |repo| repo.count())
    }

    fn publish(&self, event: HistoryEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for AnalysisRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisRepository")
            .field("db", &self.db)
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<AnalysisRecord>, EmoscanError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EmoscanError::Storage(e.to_string()))?;

    let rows = stmt
        .query_map(params, |row| Ok(row_to_record(row)))
        .map_err(|e| EmoscanError::Storage(e.to_string()))?;

    let mut records = Vec::new();
    for row in rows {
        let record = row.map_err(|e| EmoscanError::Storage(e.to_string()))??;
        records.push(record);
    }
    Ok(records)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<AnalysisRecord, EmoscanError> {
    let get_err = |e: rusqlite::Error| EmoscanError::Storage(e.to_string());

    let id: i64 = row.get(0).map_err(get_err)?;
    let media_type: String = row.get(3).map_err(get_err)?;
    let confidence: f64 = row.get(6).map_err(get_err)?;
    let probabilities: String = row.get(7).map_err(get_err)?;
    let audio: String = row.get(10).map_err(get_err)?;
    let video: String = row.get(11).map_err(get_err)?;
    let image: String = row.get(12).map_err(get_err)?;

    let probabilities = Probabilities::decode(&probabilities).map_err(|e| {
        EmoscanError::Storage(format!("Corrupt probabilities in row {}: {}", id, e))
    })?;

    Ok(AnalysisRecord {
        id: Some(id),
        filename: row.get(1).map_err(get_err)?,
        file_path: row.get(2).map_err(get_err)?,
        media_kind: MediaKind::parse(&media_type),
        dominant_emotion: row.get(4).map_err(get_err)?,
        emotion_id: row.get(5).map_err(get_err)?,
        confidence: confidence as f32,
        probabilities,
        created_at: EpochMillis(row.get(8).map_err(get_err)?),
        description: row.get(9).map_err(get_err)?,
        audio_shape: decode_shape(id, "audio", &audio),
        video_shape: decode_shape(id, "video", &video),
        image_shape: decode_shape(id, "image", &image),
    })
}

/// Feature shapes are display-only; an unreadable one is dropped.
fn decode_shape(id: i64, column: &str, value: &str) -> FeatureShape {
    FeatureShape::decode(value).unwrap_or_else(|e| {
        warn!(id, column, error = %e, "Ignoring unreadable feature shape");
        FeatureShape::default()
    })
}

/// Minimal single-label record, for fixtures.
pub fn sample_record(
    kind: MediaKind,
    emotion: EmotionLabel,
    confidence: f32,
    created_at: EpochMillis,
) -> AnalysisRecord {
    let label = emotion.as_str();
    let extension = match kind {
        MediaKind::Image => "jpg",
        _ => "mp4",
    };
    AnalysisRecord {
        id: None,
        filename: format!("{}_{}.{}", label, created_at.0, extension),
        file_path: format!("/media/{}_{}.{}", label, created_at.0, extension),
        media_kind: kind,
        dominant_emotion: label.to_string(),
        emotion_id: emotion.id().unwrap_or(-1),
        confidence,
        probabilities: Probabilities::from([(label, confidence)]),
        created_at,
        description: String::new(),
        audio_shape: FeatureShape::default(),
        video_shape: FeatureShape::default(),
        image_shape: FeatureShape::default(),
    }
}
