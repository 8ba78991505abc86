use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use hermes_core::types::ChatMessage;
use hermes_core::HermesConfig;
use hermes_ingest::backup;
use hermes_store::Store;

/// Two manual jobs exposed as one CLI: replaying crash-backup chat files
/// (spec §6.3) is the default, bare-positional form; `import-dicts` runs
/// the dictionary-import job (spec §4.5.3), which has no scheduled cadence
/// of its own and is otherwise only reachable by calling the library
/// function directly.
#[derive(Parser, Debug)]
#[command(name = "hermes-import")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// A single backup file, a stream directory (all files within), or a
    /// root containing per-stream subdirectories. Ignored when a
    /// subcommand is given.
    path: Option<PathBuf>,

    /// Video id to attribute messages to. Only meaningful for a single file
    /// or a single stream directory; ignored when `path` is a root of
    /// per-stream subdirectories (each subdirectory name is used instead).
    #[arg(long)]
    stream_id: Option<String>,

    /// Remove each backup file after an error-free import.
    #[arg(long)]
    delete: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upsert `replace_words.json` / `special_words.json` /
    /// `meaningless_words.json` from a directory into the active dictionaries.
    ImportDicts {
        /// Directory containing the three optional dictionary files.
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match HermesConfig::load(None) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    let Some(database_url) = config.database_url.as_deref() else {
        error!("DATABASE_URL is not set");
        return ExitCode::FAILURE;
    };

    let store = match Store::open(sqlite_path(database_url)) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open database");
            return ExitCode::FAILURE;
        }
    };

    if let Some(Command::ImportDicts { dir }) = &cli.command {
        return match hermes_etl::jobs::import_dicts(&store, dir) {
            Ok((count, metadata)) => {
                info!(count, %metadata, "dictionary import complete");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "dictionary import failed");
                ExitCode::FAILURE
            }
        };
    }

    let Some(path) = &cli.path else {
        error!("a path is required when no subcommand is given");
        return ExitCode::FAILURE;
    };
    if !path.exists() {
        error!(path = %path.display(), "path does not exist");
        return ExitCode::FAILURE;
    }

    match run(&store, path, cli.stream_id.as_deref(), cli.delete) {
        Ok(summary) => {
            info!(
                files = summary.files,
                inserted = summary.inserted,
                duplicates = summary.duplicates,
                still_failed = summary.still_failed,
                "import complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "import failed");
            ExitCode::FAILURE
        }
    }
}

fn sqlite_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite:///")
        .map(|_| database_url.trim_start_matches("sqlite://"))
        .unwrap_or(database_url)
}

#[derive(Debug, Default)]
struct ImportSummary {
    files: usize,
    inserted: usize,
    duplicates: usize,
    still_failed: usize,
}

fn run(store: &Store, path: &Path, stream_id: Option<&str>, delete: bool) -> anyhow::Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    if path.is_file() {
        let video_id = stream_id
            .map(String::from)
            .or_else(|| parent_dir_name(path))
            .ok_or_else(|| anyhow::anyhow!("cannot infer stream id for {}", path.display()))?;
        import_file(store, path, &video_id, delete, &mut summary)?;
        return Ok(summary);
    }

    let json_files = list_json_files(path)?;
    if !json_files.is_empty() {
        // A stream directory: every file inside belongs to the same stream.
        let video_id = stream_id
            .map(String::from)
            .or_else(|| dir_name(path))
            .ok_or_else(|| anyhow::anyhow!("cannot infer stream id for {}", path.display()))?;
        for file in json_files {
            import_file(store, &file, &video_id, delete, &mut summary)?;
        }
        return Ok(summary);
    }

    // A root of per-stream subdirectories: each subdirectory is its own
    // stream, named for its video id.
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let stream_dir = entry.path();
        let Some(video_id) = dir_name(&stream_dir) else { continue };
        for file in list_json_files(&stream_dir)? {
            import_file(store, &file, &video_id, delete, &mut summary)?;
        }
    }

    Ok(summary)
}

fn import_file(
    store: &Store,
    path: &Path,
    video_id: &str,
    delete_on_success: bool,
    summary: &mut ImportSummary,
) -> anyhow::Result<()> {
    let raw_messages = backup::read_backup(path)?;
    if raw_messages.is_empty() {
        if delete_on_success {
            backup::delete_backup(path)?;
        }
        summary.files += 1;
        return Ok(());
    }

    let messages: Vec<ChatMessage> = raw_messages
        .iter()
        .cloned()
        .map(|raw| ChatMessage::from_raw(raw, video_id))
        .collect();
    let result = store.batch_upsert_chat(&messages)?;

    summary.files += 1;
    summary.inserted += result.inserted;
    summary.duplicates += result.duplicates;

    if result.errors.is_empty() {
        if delete_on_success {
            backup::delete_backup(path)?;
        }
    } else {
        warn!(path = %path.display(), errors = result.errors.len(), "some messages failed to import, rewriting backup file");
        let failed_ids: std::collections::HashSet<&str> = result.errors.iter().map(|(id, _)| id.as_str()).collect();
        let still_failed: Vec<_> = raw_messages
            .into_iter()
            .filter(|m| failed_ids.contains(m.message_id.as_str()))
            .collect();
        summary.still_failed += still_failed.len();
        backup::rewrite_backup(path, &still_failed)?;
    }

    Ok(())
}

fn list_json_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn parent_dir_name(path: &Path) -> Option<String> {
    path.parent().and_then(dir_name)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}
