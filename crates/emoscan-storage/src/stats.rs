//! Aggregate statistics over the analysis history.

use serde::Serialize;

use emoscan_core::error::EmoscanError;
use emoscan_core::types::{EpochMillis, MediaKind};

use crate::repository::AnalysisRepository;

const WEEK_MILLIS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Summary shown by the statistics view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total: u64,
    /// `None` when the history is empty.
    pub mean_confidence: Option<f32>,
    pub most_common_emotion: Option<String>,
    /// Analyses in the seven days before `now`.
    pub last_7_days: u64,
    /// Lower-cased label → count, most frequent first.
    pub by_emotion: Vec<(String, u64)>,
    pub by_media_kind: Vec<(MediaKind, u64)>,
}

impl HistoryStats {
    pub fn collect(repo: &AnalysisRepository, now: EpochMillis) -> Result<Self, EmoscanError> {
        repo.database().with_reader(|conn| {
            let storage_err = |e: rusqlite::Error| EmoscanError::Storage(e.to_string());

            let (total, mean): (i64, Option<f64>) = conn
                .query_row(
                    "SELECT COUNT(*), AVG(confidence) FROM analysis_history",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(storage_err)?;

            let last_7_days: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM analysis_history WHERE analysis_date >= ?1",
                    rusqlite::params![now.0 - WEEK_MILLIS],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;

            let mut stmt = conn
                .prepare(
                    "SELECT lower(dominant_emotion) AS label, COUNT(*) AS n
                     FROM analysis_history
                     GROUP BY label
                     ORDER BY n DESC, label ASC",
                )
                .map_err(storage_err)?;
            let by_emotion = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;

            let mut stmt = conn
                .prepare(
                    "SELECT media_type, COUNT(*) AS n
                     FROM analysis_history
                     GROUP BY media_type
                     ORDER BY n DESC, media_type ASC",
                )
                .map_err(storage_err)?;
            let raw_kinds = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;

            // Several unknown stored values fold into one Generic bucket.
            let mut by_media_kind: Vec<(MediaKind, u64)> = Vec::new();
            for (value, n) in raw_kinds {
                let kind = MediaKind::parse(&value);
                match by_media_kind.iter_mut().find(|(k, _)| *k == kind) {
                    Some((_, count)) => *count += n,
                    None => by_media_kind.push((kind, n)),
                }
            }
            by_media_kind.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

            Ok(HistoryStats {
                total: total as u64,
                mean_confidence: mean.map(|m| m as f32),
                most_common_emotion: by_emotion.first().map(|(label, _)| label.clone()),
                last_7_days: last_7_days as u64,
                by_emotion,
                by_media_kind,
            })
        })
    }

    pub fn count_for(&self, kind: MediaKind) -> u64 {
        self.by_media_kind
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use emoscan_core::types::EmotionLabel;

    use super::*;
    use crate::db::Database;
    use crate::repository::sample_record;

    const NOW: EpochMillis = EpochMillis(1_700_000_000_000);
    const DAY: i64 = 24 * 60 * 60 * 1000;

    fn make_repo() -> AnalysisRepository {
        AnalysisRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_empty_history() {
        let repo = make_repo();
        let stats = HistoryStats::collect(&repo, NOW).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.mean_confidence, None);
        assert_eq!(stats.most_common_emotion, None);
        assert_eq!(stats.last_7_days, 0);
        assert!(stats.by_emotion.is_empty());
    }

    #[test]
    fn test_aggregates() {
        let repo = make_repo();
        let rows = [
            (MediaKind::Video, EmotionLabel::Happy, 0.9, NOW.0 - DAY),
            (MediaKind::Video, EmotionLabel::Happy, 0.7, NOW.0 - 2 * DAY),
            (MediaKind::Image, EmotionLabel::Sad, 0.5, NOW.0 - 10 * DAY),
            (MediaKind::Image, EmotionLabel::Calm, 0.3, NOW.0 - 30 * DAY),
        ];
        for (kind, emotion, confidence, ts) in rows {
            repo.insert(&sample_record(kind, emotion, confidence, EpochMillis(ts)))
                .unwrap();
        }

        let stats = HistoryStats::collect(&repo, NOW).unwrap();
        assert_eq!(stats.total, 4);
        assert!((stats.mean_confidence.unwrap() - 0.6).abs() < 1e-4);
        assert_eq!(stats.most_common_emotion.as_deref(), Some("happy"));
        assert_eq!(stats.last_7_days, 2);
        assert_eq!(stats.by_emotion[0], ("happy".to_string(), 2));
        assert_eq!(stats.by_emotion.len(), 3);
        assert_eq!(stats.count_for(MediaKind::Video), 2);
        assert_eq!(stats.count_for(MediaKind::Image), 2);
        assert_eq!(stats.count_for(MediaKind::Generic), 0);
    }

    #[test]
    fn test_emotion_counts_ignore_case() {
        let repo = make_repo();
        let mut upper = sample_record(MediaKind::Image, EmotionLabel::Angry, 0.8, NOW);
        upper.dominant_emotion = "Angry".to_string();
        repo.insert(&upper).unwrap();
        repo.insert(&sample_record(MediaKind::Image, EmotionLabel::Angry, 0.8, NOW))
            .unwrap();

        let stats = HistoryStats::collect(&repo, NOW).unwrap();
        assert_eq!(stats.by_emotion, vec![("angry".to_string(), 2)]);
    }
}
