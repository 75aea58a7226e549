//! Subcommand handlers.
//!
//! Each handler renders to the writer it is given and reports failures as
//! `EmoscanError`; the caller turns those into a message and an exit code.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use emoscan_client::{InferenceClient, UploadRequest};
use emoscan_core::config::EmoscanConfig;
use emoscan_core::error::{EmoscanError, Result};
use emoscan_core::prediction::{PredictionResponse, PredictionView};
use emoscan_core::types::{AnalysisRecord, EpochMillis, MediaKind};
use emoscan_pipeline::{spawn_analysis, AnalysisPipeline, AnalysisUpdate, InferenceService, Persist};
use emoscan_storage::{AnalysisRepository, HistoryStats, PreferenceKey, PreferenceStore};

use crate::render;

/// Everything a command needs from start-up.
pub struct Context {
    pub config: EmoscanConfig,
    pub repo: Arc<AnalysisRepository>,
    pub prefs: PreferenceStore,
}

/// Options of `analyze`.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub file: PathBuf,
    pub description: String,
    pub kind: Option<MediaKind>,
    pub no_save: bool,
    pub share: bool,
}

/// Filters of `history list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<u32>,
    pub all: bool,
    pub kind: Option<MediaKind>,
    pub emotion: Option<String>,
}

/// How `history show` prints a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowFormat {
    View,
    Share,
    Json,
}

/// Upload one file and print progress and the result.
///
/// When `cancel` fires the command stops printing and waits for the
/// analysis to finish so that its history insert is not lost.
pub async fn analyze<S, W>(
    ctx: &Context,
    pipeline: Arc<AnalysisPipeline<S>>,
    options: AnalyzeOptions,
    out: &mut W,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: InferenceService + 'static,
    W: Write,
{
    let mut request =
        UploadRequest::new(options.file.clone()).with_description(options.description.clone());
    if let Some(kind) = options.kind {
        request = request.with_media_kind(kind);
    }

    let persist = if options.no_save || !auto_save(&ctx.prefs) {
        Persist::Skip
    } else {
        Persist::Save
    };

    let (tx, mut rx) = mpsc::channel(4);
    let task = spawn_analysis(pipeline, request, persist, tx, cancel.child_token());

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                writeln!(out, "Interrupted, finishing in the background...")?;
                out.flush()?;
                break;
            }
            update = rx.recv() => match update {
                Some(update) => print_update(&update, options.share, out)?,
                None => break,
            },
        }
    }

    let result = task.join().await;
    if cancel.is_cancelled() {
        if let Ok(view) = &result {
            info!(record_id = ?view.record_id, "Interrupted analysis finished");
        }
        return Err(EmoscanError::Cancelled);
    }
    result.map(|_| ())
}

fn auto_save(prefs: &PreferenceStore) -> bool {
    prefs.auto_save().unwrap_or_else(|e| {
        warn!(error = %e, "Could not read auto_save preference, saving");
        true
    })
}

fn print_update<W: Write>(update: &AnalysisUpdate, share: bool, out: &mut W) -> Result<()> {
    match update {
        AnalysisUpdate::Completed { view } if share => {
            writeln!(out, "{}", view.share_text())?;
        }
        // The join result carries the error back to the caller.
        AnalysisUpdate::Failed { .. } => {}
        other => out.write_all(render::update(other).as_bytes())?,
    }
    out.flush()?;
    Ok(())
}

fn list_records(ctx: &Context, options: &ListOptions) -> Result<Vec<AnalysisRecord>> {
    let limit = if options.all {
        None
    } else {
        Some(options.limit.unwrap_or(ctx.config.history.recent_limit))
    };

    let mut records = match (options.kind, &options.emotion) {
        (Some(kind), _) => ctx.repo.list_by_media_kind(kind)?,
        (None, Some(emotion)) => ctx.repo.list_by_emotion(emotion)?,
        (None, None) => match limit {
            Some(limit) => return ctx.repo.list_recent(limit),
            None => return ctx.repo.list_all(),
        },
    };

    if let (Some(_), Some(emotion)) = (options.kind, &options.emotion) {
        let wanted = emotion.trim().to_lowercase();
        records.retain(|r| r.dominant_emotion.to_lowercase() == wanted);
    }
    if let Some(limit) = limit {
        records.truncate(limit as usize);
    }
    Ok(records)
}

pub fn history_list<W: Write>(ctx: &Context, options: &ListOptions, out: &mut W) -> Result<()> {
    let records = list_records(ctx, options)?;
    out.write_all(render::history(&records).as_bytes())?;
    Ok(())
}

pub fn history_show<W: Write>(ctx: &Context, id: i64, format: ShowFormat, out: &mut W) -> Result<()> {
    let record = ctx
        .repo
        .get_by_id(id)?
        .ok_or_else(|| EmoscanError::InvalidInput(format!("No analysis with id {}", id)))?;

    match format {
        ShowFormat::View => out.write_all(render::view(&PredictionView::from_record(&record)).as_bytes())?,
        ShowFormat::Share => writeln!(out, "{}", PredictionView::from_record(&record).share_text())?,
        ShowFormat::Json => writeln!(out, "{}", PredictionResponse::from_record(&record).to_json()?)?,
    }
    Ok(())
}

pub fn history_delete<W: Write>(ctx: &Context, id: i64, out: &mut W) -> Result<()> {
    if !ctx.repo.delete_by_id(id)? {
        return Err(EmoscanError::InvalidInput(format!("No analysis with id {}", id)));
    }
    writeln!(out, "Deleted #{}", id)?;
    Ok(())
}

pub fn history_clear<W: Write>(ctx: &Context, out: &mut W) -> Result<()> {
    let removed = ctx.repo.delete_all()?;
    writeln!(out, "Deleted {} analyses", removed)?;
    Ok(())
}

/// Print the recent list, then again after every change until `cancel` fires.
pub async fn history_watch<W: Write>(
    repo: &Arc<AnalysisRepository>,
    limit: u32,
    out: &mut W,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut live = repo.watch_recent(limit);
    out.write_all(render::history(&live.current()?).as_bytes())?;
    out.flush()?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = live.next() => match next {
                Some(records) => {
                    writeln!(out)?;
                    out.write_all(render::history(&records?).as_bytes())?;
                    out.flush()?;
                }
                None => break,
            },
        }
    }
    Ok(())
}

pub fn stats<W: Write>(ctx: &Context, out: &mut W) -> Result<()> {
    let stats = HistoryStats::collect(&ctx.repo, EpochMillis::now())?;
    out.write_all(render::stats(&stats).as_bytes())?;
    Ok(())
}

pub async fn health<W: Write>(client: &InferenceClient, out: &mut W) -> Result<()> {
    let status = client.health().await?;
    out.write_all(render::health(&status, client.base_url()).as_bytes())?;
    Ok(())
}

pub async fn model_info<W: Write>(client: &InferenceClient, out: &mut W) -> Result<()> {
    let info = client.model_info().await?;
    out.write_all(render::model_info(&info).as_bytes())?;
    Ok(())
}

fn parse_key(key: &str) -> Result<PreferenceKey> {
    PreferenceKey::parse(key).ok_or_else(|| {
        let known: Vec<&str> = PreferenceKey::ALL.iter().map(|k| k.as_str()).collect();
        EmoscanError::InvalidInput(format!(
            "Unknown preference '{}' (known: {})",
            key,
            known.join(", ")
        ))
    })
}

pub fn prefs_get<W: Write>(prefs: &PreferenceStore, key: Option<&str>, out: &mut W) -> Result<()> {
    let keys = match key {
        Some(key) => vec![parse_key(key)?],
        None => PreferenceKey::ALL.to_vec(),
    };
    for key in keys {
        let value = prefs.get(key)?;
        out.write_all(render::preference(key, value.as_ref()).as_bytes())?;
    }
    Ok(())
}

pub fn prefs_set<W: Write>(prefs: &PreferenceStore, key: &str, value: &str, out: &mut W) -> Result<()> {
    let key = parse_key(key)?;
    let value = prefs.set_from_str(key, value)?;
    out.write_all(render::preference(key, Some(&value)).as_bytes())?;
    Ok(())
}

pub fn prefs_clear<W: Write>(prefs: &PreferenceStore, out: &mut W) -> Result<()> {
    prefs.clear()?;
    writeln!(out, "Preferences reset")?;
    Ok(())
}
