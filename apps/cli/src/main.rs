mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cloudrive_drive_client::Client;
use cloudrive_transfer::{ChunkPlan, FileSource, LocalFile, NoopObserver, compute_fingerprint};
use cloudrive_upload::{UploadEvent, UploadOutcome, UploadQueue, UploadState};

use config::AppConfig;

/// Cloudrive - upload files to a cloud drive with content deduplication
#[derive(Parser)]
#[command(name = "cloudrive")]
#[command(about = "Fingerprint and upload files to a cloud drive", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to <config dir>/cloudrive/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for cloudrive crates (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files, skipping content the drive already has
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Destination folder id
        #[arg(short, long)]
        folder: Option<i64>,

        /// Files uploaded at the same time
        #[arg(long)]
        concurrency: Option<usize>,

        /// Chunks of one file in flight at the same time
        #[arg(long)]
        chunk_concurrency: Option<usize>,
    },

    /// Print content fingerprints and chunk plans without uploading
    Hash {
        /// Files to fingerprint
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the effective configuration, or update the stored one
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (token redacted)
    Show,

    /// Update stored settings
    Set(ConfigUpdate),
}

#[derive(Args, Default)]
struct ConfigUpdate {
    /// Drive API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// API token
    #[arg(long)]
    token: Option<String>,

    /// Default destination folder id
    #[arg(long)]
    folder: Option<i64>,

    /// Files uploaded at the same time
    #[arg(long)]
    concurrency: Option<usize>,

    /// Chunks of one file in flight at the same time
    #[arg(long)]
    chunk_concurrency: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    chunk_timeout: Option<u64>,
}

impl ConfigUpdate {
    fn apply(self, cfg: &mut AppConfig) {
        if let Some(url) = self.base_url {
            cfg.api.base_url = url;
        }
        if let Some(token) = self.token {
            cfg.api.token = token;
        }
        if let Some(folder) = self.folder {
            cfg.default_folder_id = folder;
        }
        if let Some(n) = self.concurrency {
            cfg.upload.file_concurrency = n;
        }
        if let Some(n) = self.chunk_concurrency {
            cfg.upload.chunk_concurrency = n;
        }
        if let Some(secs) = self.chunk_timeout {
            cfg.upload.chunk_timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Config {
        action: Some(ConfigAction::Set(update)),
    } = cli.command
    {
        return cmd_config_set(cli.config.as_deref(), update);
    }

    let cfg = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Upload {
            paths,
            folder,
            concurrency,
            chunk_concurrency,
        } => {
            let mut cfg = cfg;
            if let Some(n) = concurrency {
                cfg.upload.file_concurrency = n;
            }
            if let Some(n) = chunk_concurrency {
                cfg.upload.chunk_concurrency = n;
            }
            let folder = folder.unwrap_or(cfg.default_folder_id);
            cmd_upload(cfg, &paths, folder).await
        }
        Commands::Hash { paths } => cmd_hash(&paths).await,
        Commands::Config { .. } => cmd_config(cfg, cli.config.as_deref()),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,cloudrive=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_upload(cfg: AppConfig, paths: &[PathBuf], folder: i64) -> Result<()> {
    let client = Client::new(&cfg.api).context("creating drive client")?;
    let mut queue = UploadQueue::new(Arc::new(client), cfg.upload.clone());
    let events = queue
        .take_events()
        .context("upload events already taken")?;

    for path in paths {
        let file = LocalFile::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        queue.enqueue(Arc::new(file), folder);
    }

    let queue = Arc::new(queue);

    let printer = spawn_printer(events, print_event);

    let interrupt = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling pending uploads");
                queue.cancel_all();
            }
        })
    };

    let reports = queue.run().await;
    interrupt.abort();
    let _ = interrupt.await;
    // Last holder of the event sender; the printer drains what is left.
    drop(queue);
    let _ = printer.await;

    let mut failed = 0usize;
    for report in &reports {
        match &report.outcome {
            UploadOutcome::Done {
                fingerprint,
                deduplicated: true,
                ..
            } => println!("{}: already on drive ({fingerprint})", report.file_name),
            UploadOutcome::Done { fingerprint, .. } => {
                println!("{}: uploaded ({fingerprint})", report.file_name)
            }
            UploadOutcome::Canceled => println!("{}: canceled", report.file_name),
            UploadOutcome::Failed { stage, error } => {
                failed += 1;
                eprintln!("{}: failed while {stage}: {error}", report.file_name);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} uploads failed", reports.len());
    }
    Ok(())
}

/// Feeds every event to `sink` until all senders are gone.
fn spawn_printer<F>(mut events: mpsc::Receiver<UploadEvent>, mut sink: F) -> JoinHandle<()>
where
    F: FnMut(&UploadEvent) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            sink(&event);
        }
    })
}

fn print_event(event: &UploadEvent) {
    match event {
        UploadEvent::StateChanged {
            id,
            file_name,
            state,
        } if !state.is_terminal() && *state != UploadState::Ready => {
            eprintln!("{id} {file_name}: {state}");
        }
        UploadEvent::HashProgress { id, percent } => {
            eprintln!("{id} hashing {percent:>3}%");
        }
        UploadEvent::UploadProgress { id, progress } => {
            eprintln!(
                "{id} uploading {:>3}% {}",
                progress.percent,
                format_speed(progress.speed_bytes_per_second)
            );
        }
        _ => {}
    }
}

async fn cmd_hash(paths: &[PathBuf]) -> Result<()> {
    let cancel = CancellationToken::new();
    for path in paths {
        let file = LocalFile::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let plan = ChunkPlan::for_size(file.size());
        let hash = compute_fingerprint(&file, &NoopObserver, &cancel)
            .await
            .with_context(|| format!("hashing {}", path.display()))?;
        println!(
            "{hash}  {}  ({} bytes, {} x {} byte chunks)",
            path.display(),
            plan.size(),
            plan.chunk_count(),
            plan.chunk_size()
        );
    }
    Ok(())
}

fn cmd_config(mut cfg: AppConfig, path: Option<&Path>) -> Result<()> {
    let path = config::resolve(path)?;
    if !cfg.api.token.is_empty() {
        cfg.api.token = "********".into();
    }
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

fn cmd_config_set(path: Option<&Path>, update: ConfigUpdate) -> Result<()> {
    let path = config::resolve(path)?;
    let mut cfg = AppConfig::load_file(&path).context("loading configuration")?;
    update.apply(&mut cfg);
    cfg.save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("saved {}", path.display());
    Ok(())
}

/// Formats bytes/second with a binary unit.
fn format_speed(bytes_per_second: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_second;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudrive_upload::UploadId;

    #[test]
    fn cli_parses_upload() {
        let cli = Cli::try_parse_from([
            "cloudrive",
            "upload",
            "a.txt",
            "b.txt",
            "--folder",
            "7",
            "--concurrency",
            "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload {
                paths,
                folder,
                concurrency,
                chunk_concurrency,
            } => {
                assert_eq!(paths.len(), 2);
                assert_eq!(folder, Some(7));
                assert_eq!(concurrency, Some(2));
                assert_eq!(chunk_concurrency, None);
            }
            _ => panic!("expected upload"),
        }
    }

    #[test]
    fn cli_requires_paths() {
        assert!(Cli::try_parse_from(["cloudrive", "upload"]).is_err());
        assert!(Cli::try_parse_from(["cloudrive", "hash"]).is_err());
    }

    #[test]
    fn format_speed_units() {
        assert_eq!(format_speed(0.0), "0.0 B/s");
        assert_eq!(format_speed(512.0), "512.0 B/s");
        assert_eq!(format_speed(1536.0), "1.5 KiB/s");
        assert_eq!(format_speed(3.0 * 1024.0 * 1024.0), "3.0 MiB/s");
    }

    #[test]
    fn cli_parses_config_set() {
        let cli = Cli::try_parse_from([
            "cloudrive",
            "config",
            "set",
            "--folder",
            "12",
            "--chunk-concurrency",
            "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Config {
                action: Some(ConfigAction::Set(update)),
            } => {
                assert_eq!(update.folder, Some(12));
                assert_eq!(update.chunk_concurrency, Some(4));
                assert!(update.base_url.is_none());
            }
            _ => panic!("expected config set"),
        }
        assert!(matches!(
            Cli::try_parse_from(["cloudrive", "config"]).unwrap().command,
            Commands::Config { action: None }
        ));
    }

    #[test]
    fn config_set_updates_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"defaultFolderId":3,"upload":{"fileConcurrency":2}}"#).unwrap();

        cmd_config_set(
            Some(&path),
            ConfigUpdate {
                base_url: Some("https://drive.example.com/api".into()),
                chunk_timeout: Some(30),
                ..ConfigUpdate::default()
            },
        )
        .unwrap();

        let stored = AppConfig::load_file(&path).unwrap();
        assert_eq!(stored.api.base_url, "https://drive.example.com/api");
        assert_eq!(stored.upload.chunk_timeout_secs, 30);
        assert_eq!(stored.default_folder_id, 3);
        assert_eq!(stored.upload.file_concurrency, 2);
    }

    #[tokio::test]
    async fn printer_drains_buffered_events_after_sender_drops() {
        let (tx, rx) = mpsc::channel(16);
        for id in 1..=5 {
            tx.try_send(UploadEvent::HashProgress {
                id: UploadId(id),
                percent: 100,
            })
            .unwrap();
        }

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let printer = spawn_printer(rx, move |event| {
            if let UploadEvent::HashProgress { id, .. } = event {
                sink.lock().unwrap().push(id.0);
            }
        });
        drop(tx);
        printer.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn hash_command_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        std::fs::write(&path, b"hello").unwrap();
        cmd_hash(&[path]).await.unwrap();
    }
}
