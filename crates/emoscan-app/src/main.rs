//! EmoScan application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Install the tracing subscriber
//! 3. Open the history database once and share it
//! 4. Build the upload client and analysis pipeline
//! 5. Run the requested subcommand

mod cli;
mod commands;
mod render;

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use emoscan_client::InferenceClient;
use emoscan_core::config::EmoscanConfig;
use emoscan_core::error::{EmoscanError, Result};
use emoscan_pipeline::AnalysisPipeline;
use emoscan_storage::{AnalysisRepository, Database, PreferenceKey, PreferenceStore, PreferenceValue};

use cli::{CliArgs, Command, HistoryCommand, PrefsCommand};
use commands::{AnalyzeOptions, Context, ListOptions, ShowFormat};

const DB_FILE: &str = "emoscan.db";

/// Open the history database under `data_dir`, creating the directory.
fn open_database(data_dir: &Path, reader_connections: usize) -> Result<Arc<Database>> {
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join(DB_FILE);
    let db = Database::with_readers(&db_path, reader_connections)?;
    tracing::info!(path = %db_path.display(), readers = db.reader_count(), "SQLite database opened");
    Ok(Arc::new(db))
}

/// Start-up work that runs once per database.
fn prepare_store(config: &EmoscanConfig, repo: &AnalysisRepository, prefs: &PreferenceStore) -> Result<()> {
    if config.history.seed_debug_record {
        if let Some(id) = repo.seed_debug_record()? {
            tracing::info!(id, "Seeded debug record");
        }
    }
    if prefs.first_launch()? {
        tracing::info!("First launch");
        prefs.set(PreferenceKey::FirstLaunch, &PreferenceValue::Bool(false))?;
    }
    Ok(())
}

/// Cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Ctrl-C received");
            trigger.cancel();
        }
    });
    token
}

async fn run(args: CliArgs, config: EmoscanConfig) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    // Service-only commands never touch the history.
    match &args.command {
        Command::Health => {
            let client = InferenceClient::new(&config.server)?;
            return commands::health(&client, &mut out).await;
        }
        Command::ModelInfo => {
            let client = InferenceClient::new(&config.server)?;
            return commands::model_info(&client, &mut out).await;
        }
        _ => {}
    }

    let data_dir = config.general.resolved_data_dir();
    let db = open_database(&data_dir, config.history.reader_connections)?;
    let repo = Arc::new(AnalysisRepository::new(Arc::clone(&db)));
    let prefs = PreferenceStore::new(db);
    prepare_store(&config, &repo, &prefs)?;

    let ctx = Context {
        config,
        repo,
        prefs,
    };

    let result = match args.command {
        Command::Analyze {
            file,
            description,
            kind,
            no_save,
            share,
        } => {
            let client = InferenceClient::new(&ctx.config.server)?;
            let pipeline = Arc::new(AnalysisPipeline::new(
                client,
                Arc::clone(&ctx.repo),
                &ctx.config.analysis,
            ));
            let options = AnalyzeOptions {
                file,
                description,
                kind: kind.map(Into::into),
                no_save,
                share,
            };
            commands::analyze(&ctx, pipeline, options, &mut out, &interrupt_token()).await
        }
        Command::History { action } => match action {
            HistoryCommand::List {
                limit,
                all,
                kind,
                emotion,
            } => {
                let options = ListOptions {
                    limit,
                    all,
                    kind: kind.map(Into::into),
                    emotion,
                };
                commands::history_list(&ctx, &options, &mut out)
            }
            HistoryCommand::Show { id, share, json } => {
                let format = if json {
                    ShowFormat::Json
                } else if share {
                    ShowFormat::Share
                } else {
                    ShowFormat::View
                };
                commands::history_show(&ctx, id, format, &mut out)
            }
            HistoryCommand::Delete { id } => commands::history_delete(&ctx, id, &mut out),
            HistoryCommand::Clear => commands::history_clear(&ctx, &mut out),
            HistoryCommand::Watch { limit } => {
                let limit = limit.unwrap_or(ctx.config.history.recent_limit);
                commands::history_watch(&ctx.repo, limit, &mut out, &interrupt_token()).await
            }
        },
        Command::Stats => commands::stats(&ctx, &mut out),
        Command::Prefs { action } => match action {
            PrefsCommand::Get { key } => commands::prefs_get(&ctx.prefs, key.as_deref(), &mut out),
            PrefsCommand::Set { key, value } => commands::prefs_set(&ctx.prefs, &key, &value, &mut out),
            PrefsCommand::Clear => commands::prefs_clear(&ctx.prefs, &mut out),
        },
        Command::Health | Command::ModelInfo => Ok(()),
    };
    out.flush()?;
    result
}

/// Apply CLI and environment overrides on top of the file configuration.
fn apply_overrides(args: &CliArgs, config: &mut EmoscanConfig) {
    if let Some(server) = args.resolve_server() {
        config.server.base_url = server;
    }
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Config is read before tracing starts so its log level can apply; a
    // load failure is reported once the subscriber is up.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match EmoscanConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (EmoscanConfig::default(), Some(e)),
    };
    apply_overrides(&args, &mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(args.resolve_log_filter(&config.general.log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting EmoScan v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        Some(EmoscanError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_file.display(), "No config file, using defaults");
        }
        Some(e) => {
            tracing::warn!(path = %config_file.display(), error = %e, "Failed to load config, using defaults");
        }
        None => tracing::debug!(path = %config_file.display(), "Configuration loaded"),
    }

    if let Err(e) = config.validate() {
        eprintln!("{}", e.user_message());
        return ExitCode::FAILURE;
    }

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = %e, "Command failed");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use emoscan_core::config::expand_home;

    use super::*;

    #[test]
    fn test_open_database_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("data");

        let db = open_database(&data_dir, 2).unwrap();
        assert!(data_dir.join(DB_FILE).exists());
        assert_eq!(db.reader_count(), 2);
    }

    #[test]
    fn test_prepare_store_seeds_once_and_clears_first_launch() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(dir.path(), 1).unwrap();
        let repo = AnalysisRepository::new(Arc::clone(&db));
        let prefs = PreferenceStore::new(db);
        let mut config = EmoscanConfig::default();
        config.history.seed_debug_record = true;

        assert!(prefs.first_launch().unwrap());
        prepare_store(&config, &repo, &prefs).unwrap();
        prepare_store(&config, &repo, &prefs).unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        assert!(!prefs.first_launch().unwrap());
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let args = CliArgs::try_parse_from([
            "emoscan",
            "--server",
            "http://127.0.0.1:9000",
            "--data-dir",
            "/tmp/emoscan-data",
            "stats",
        ])
        .unwrap();
        let mut config = EmoscanConfig::default();
        apply_overrides(&args, &mut config);

        assert_eq!(config.server.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.general.resolved_data_dir(), expand_home("/tmp/emoscan-data"));
    }
}
