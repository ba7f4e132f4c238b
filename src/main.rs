//! `codectx`: index a source tree into a vector store and search it in plain language.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use codectx_core::{Command, CommandResponse, Config, Engine, resolve_config_path};
use codectx_index::{SessionReport, SessionStatus};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Parser)]
#[command(name = "codectx", version, about = "Semantic code search over a local workspace")]
struct Cli {
    /// Config file (default: $CODECTX_CONFIG, then config/default.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root to index and search
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full indexing session; Ctrl-C stops it after the files in flight
    Index {
        /// Use a single worker
        #[arg(long)]
        low_intensity: bool,
    },
    /// Query the index and print the results as JSON
    Search {
        text: String,
        /// Maximum number of files to return
        #[arg(short = 'n', long)]
        max_results: Option<usize>,
        /// Include the full content of each matching file
        #[arg(long)]
        content: bool,
    },
    /// Index, then keep the index current as files change until Ctrl-C
    Watch,
    /// Read JSON commands from stdin, one per line, and answer on stdout
    Serve,
    /// Check the vector store and the embedding provider
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if let Commands::Index { low_intensity: true } = cli.command {
        config.indexing.low_intensity = true;
    }
    if matches!(cli.command, Commands::Watch) {
        config.watch.enabled = true;
    }

    let engine = Engine::new(config, &cli.root).context("failed to initialize engine")?;

    match cli.command {
        Commands::Index { .. } => {
            let report = run_index(&engine).await?;
            print_json(&report)?;
            if report.status == SessionStatus::Error {
                bail!(
                    "indexing failed: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Search {
            text,
            max_results,
            content,
        } => {
            let command = Command::Query {
                text,
                max_results,
                include_content: content,
            };
            command.validate()?;
            let response = engine.dispatch(command).await;
            print_json(&response)?;
            if let CommandResponse::Results(results) = response
                && let Some(e) = results.error
            {
                bail!("search failed: {e}");
            }
        }
        Commands::Watch => run_watch(engine).await?,
        Commands::Serve => {
            let mut engine = engine;
            if engine.config().watch.enabled {
                engine.start_watching()?;
            }
            let engine = Arc::new(engine);
            let stdin = BufReader::new(tokio::io::stdin());
            tokio::select! {
                result = serve(Arc::clone(&engine), stdin, tokio::io::stdout()) => {
                    result?;
                }
                () = shutdown_signal() => {
                    engine.orchestrator().stop().await;
                }
            }
        }
        Commands::Health => {
            let report = engine.health().await;
            print_json(&report)?;
            if !report.healthy {
                bail!("one or more components are unhealthy");
            }
        }
    }
    Ok(())
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e:#}");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}

/// Log progress events until the channel closes.
fn spawn_progress_logger(mut events: broadcast::Receiver<codectx_index::ProgressEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(file) = &event.current_file {
                        tracing::info!(
                            processed = event.processed,
                            total = event.total,
                            file = %file,
                            "indexed"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "progress logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn run_index(engine: &Engine) -> anyhow::Result<SessionReport> {
    let orchestrator = engine.orchestrator();
    spawn_progress_logger(engine.subscribe());
    orchestrator.start().await?;

    let report = tokio::select! {
        report = orchestrator.wait() => report,
        () = shutdown_signal() => {
            let processed = orchestrator.stop().await;
            tracing::info!(processed, "indexing stopped");
            orchestrator.status()
        }
    };
    tracing::info!(
        status = %report.status,
        processed = report.processed_files,
        skipped = report.skipped_files.len(),
        pruned = report.pruned_files,
        duration_ms = report.duration_ms,
        "indexing finished"
    );
    Ok(report)
}

async fn run_watch(mut engine: Engine) -> anyhow::Result<()> {
    engine.start_watching()?;
    let orchestrator = Arc::clone(engine.orchestrator());
    spawn_progress_logger(engine.subscribe());
    orchestrator.start().await?;

    tokio::select! {
        report = orchestrator.wait() => {
            tracing::info!(
                status = %report.status,
                processed = report.processed_files,
                "initial index finished, watching for changes"
            );
            shutdown_signal().await;
        }
        () = shutdown_signal() => {
            orchestrator.stop().await;
        }
    }
    Ok(())
}

/// Answer newline-delimited JSON commands from `input` on `output`.
///
/// Progress events are interleaved with responses as they happen. Returns
/// `output` once `input` is exhausted; an active session is stopped first.
async fn serve<R, W>(engine: Arc<Engine>, input: R, mut output: W) -> anyhow::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<CommandResponse>();

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_string(&response)?;
            line.push('\n');
            output.write_all(line.as_bytes()).await?;
            output.flush().await?;
        }
        anyhow::Ok(output)
    });

    let mut events = engine.subscribe();
    let progress_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if progress_tx.send(CommandResponse::Progress(event)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "progress consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match Command::parse(&line) {
            Ok(command) => {
                tracing::debug!(?command, "dispatching");
                engine.dispatch(command).await
            }
            Err(e) => CommandResponse::error(e),
        };
        if tx.send(response).is_err() {
            break;
        }
    }

    if engine.status().status.is_active() {
        engine.orchestrator().stop().await;
    }
    forwarder.abort();
    let _ = forwarder.await;
    drop(tx);
    writer.await.context("response writer panicked")?
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use codectx_core::config::{ProviderKind, StoreBackend};
    use serde_json::Value;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_search_arguments() {
        let cli = Cli::try_parse_from([
            "codectx", "--root", "/src/app", "search", "where are tokens checked", "-n", "3", "--content",
        ])
        .unwrap();
        assert_eq!(cli.root, PathBuf::from("/src/app"));
        match cli.command {
            Commands::Search {
                text,
                max_results,
                content,
            } => {
                assert_eq!(text, "where are tokens checked");
                assert_eq!(max_results, Some(3));
                assert!(content);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_index_flags_and_global_config() {
        let cli = Cli::try_parse_from(["codectx", "index", "--low-intensity", "-c", "custom.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Index { low_intensity: true }));
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn search_requires_text() {
        assert!(Cli::try_parse_from(["codectx", "search"]).is_err());
    }

    fn mock_engine(root: &std::path::Path) -> Arc<Engine> {
        let mut config = Config::default();
        config.embedding.provider = ProviderKind::Mock;
        config.store.backend = StoreBackend::Memory;
        Arc::new(Engine::new(config, root).unwrap())
    }

    fn responses(output: &[u8]) -> Vec<Value> {
        std::str::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn serve_answers_each_line() {
        let dir = tempfile::tempdir().unwrap();
        let engine = mock_engine(dir.path());
        let input = b"{\"action\":\"status\"}\n\n{\"action\":\"explode\"}\n{\"action\":\"query\",\"text\":\"\"}\n".as_slice();

        let output = serve(engine, input, Vec::new()).await.unwrap();
        let lines = responses(&output);
        let types: Vec<&str> = lines.iter().map(|v| v["type"].as_str().unwrap()).collect();
        assert_eq!(types, ["status", "error", "error"]);
        assert_eq!(lines[0]["status"], "not_started");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serve_runs_a_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn greet() -> &'static str {\n    \"hi\"\n}\n").unwrap();
        let engine = mock_engine(dir.path());
        let input = b"{\"action\":\"start\"}\n".as_slice();

        let output = serve(Arc::clone(&engine), input, Vec::new()).await.unwrap();
        let lines = responses(&output);
        assert_eq!(lines[0]["type"], "started");
        assert!(lines.iter().skip(1).all(|v| v["type"] == "progress"));
        assert!(!engine.status().status.is_active());
    }
}
