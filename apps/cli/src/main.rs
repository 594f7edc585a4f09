mod config;
mod report;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use filmup_protocol::{ContentKind, FileRef};
use filmup_transfer::{SessionRegistry, TusTransport};
use filmup_upload_queue::{
    EndpointDefaults, ErrorClass, QueueConfig, UploadJournal, UploadQueue, UploadTask,
};

use config::{CliConfig, default_config_path};
use report::ProgressReporter;

#[derive(Parser)]
#[command(name = "filmup", version, about = "Resumable media uploads")]
struct Cli {
    /// Config file (default: ~/.config/filmup/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `api_url` from the config file.
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload one or more files.
    Upload {
        /// photo, film_photo, avatar, cover or film_video.
        #[arg(long, default_value = "photo")]
        kind: String,

        /// Extra upload parameter, e.g. `--param film_id=42`.
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Upload URL; defaults to the kind's route under `api_url`.
        #[arg(long)]
        endpoint: Option<String>,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Continue uploads left unfinished by an earlier run.
    Resume {
        #[arg(long, default_value = "photo")]
        kind: String,
    },
    /// Inspect the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Print the config file location.
    Path,
    /// Set one value and write the config file.
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,filmup=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut cfg = CliConfig::load(&config_path)?;
    if let Some(url) = cli.api_url {
        cfg.api_url = url;
    }

    match cli.command {
        Command::Config { action } => {
            match action {
                ConfigAction::Path => println!("{}", config_path.display()),
                ConfigAction::Show => {
                    let mut shown = cfg.clone();
                    if !shown.auth_token.is_empty() {
                        shown.auth_token = "********".into();
                    }
                    shown.journal_path = Some(cfg.journal_path(&config_path));
                    println!("{}", serde_json::to_string_pretty(&shown)?);
                }
                ConfigAction::Set { key, value } => {
                    // Persist file values only, not `--api-url`.
                    let mut stored = CliConfig::load(&config_path)?;
                    stored.set(&key, &value)?;
                    stored.save(&config_path)?;
                    println!("{key} saved to {}", config_path.display());
                }
            }
            Ok(())
        }
        Command::Upload {
            kind,
            params,
            endpoint,
            files,
        } => {
            let kind = parse_kind(&kind)?;
            let params = parse_params(&params)?;
            let queue = build_queue(&cfg, &config_path, kind)?;

            let (tx, rx) = watch_queue(&queue);
            for path in &files {
                let file = FileRef::from_path(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                queue.enqueue(file, params.clone(), endpoint.clone()).await;
            }
            tx.send_replace(queue.snapshot());
            run_to_completion(&queue, rx).await
        }
        Command::Resume { kind } => {
            let kind = parse_kind(&kind)?;
            let queue = build_queue(&cfg, &config_path, kind)?;

            let (tx, rx) = watch_queue(&queue);
            let restored = queue.restore().await?;
            if restored == 0 {
                println!("nothing to resume");
                return Ok(());
            }
            println!("resuming {restored} upload(s)");
            tx.send_replace(queue.snapshot());
            run_to_completion(&queue, rx).await
        }
    }
}

fn parse_kind(kind: &str) -> anyhow::Result<ContentKind> {
    ContentKind::parse(kind).with_context(|| format!("unknown content kind: {kind}"))
}

fn parse_params(params: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    params
        .iter()
        .map(|p| match p.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => bail!("invalid --param {p:?}, expected KEY=VALUE"),
        })
        .collect()
}

fn build_queue(
    cfg: &CliConfig,
    config_path: &std::path::Path,
    kind: ContentKind,
) -> anyhow::Result<UploadQueue> {
    let transport = TusTransport::new(cfg.tus_config())?;
    let registry = Arc::new(SessionRegistry::new(Arc::new(transport)));

    let mut queue_config = QueueConfig::for_kind(kind, EndpointDefaults::new(cfg.api_url.clone()))
        .with_context("cli");
    if !cfg.auth_token.is_empty() {
        queue_config = queue_config.with_header("Authorization", format!("Bearer {}", cfg.auth_token));
    }

    let journal_path = cfg.journal_path(config_path);
    let journal = UploadJournal::open(&journal_path)
        .with_context(|| format!("cannot open journal {}", journal_path.display()))?;
    tracing::debug!(journal = %journal_path.display(), "upload journal opened");

    let queue = UploadQueue::new(registry, queue_config).with_journal(Arc::new(journal));
    let reporter = ProgressReporter::new();
    queue.subscribe(Box::new(move |tasks: &[UploadTask]| reporter.update(tasks)));
    queue.on_terminal(Box::new(|task_id: &str, resource: Option<&serde_json::Value>| {
        match resource {
            Some(resource) => println!("{task_id} done: {resource}"),
            None => println!("{task_id} cancelled"),
        }
    }));
    Ok(queue)
}

/// Mirrors queue updates into a watch channel.
fn watch_queue(
    queue: &UploadQueue,
) -> (
    Arc<watch::Sender<Vec<UploadTask>>>,
    watch::Receiver<Vec<UploadTask>>,
) {
    let (tx, rx) = watch::channel(Vec::new());
    let tx = Arc::new(tx);
    let sender = Arc::clone(&tx);
    queue.subscribe(Box::new(move |tasks: &[UploadTask]| {
        sender.send_replace(tasks.to_vec());
    }));
    (tx, rx)
}

/// Waits until no task is transferring. Ctrl-C pauses everything and keeps
/// the journal for `filmup resume`.
async fn run_to_completion(
    queue: &UploadQueue,
    mut rx: watch::Receiver<Vec<UploadTask>>,
) -> anyhow::Result<()> {
    tokio::select! {
        settled = rx.wait_for(|tasks| !tasks.iter().any(|t| t.state.is_active())) => {
            settled.context("upload queue closed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            queue.shutdown().await;
            println!("paused; run `filmup resume` to continue");
            return Ok(());
        }
    }

    let leftover = queue.snapshot();
    // Fatal failures can never succeed; drop them from the journal.
    for task in leftover
        .iter()
        .filter(|t| t.error_class == Some(ErrorClass::Fatal))
    {
        queue.cancel(&task.task_id).await?;
    }
    queue.shutdown().await;

    if leftover.is_empty() {
        return Ok(());
    }
    bail!("{} upload(s) did not finish", leftover.len())
}
