//! CLI entry point. Two modes share one binary: the normal orchestrator
//! loop, and a hidden worker-mode re-exec target that `WorkerSupervisor`
//! spawns for OS-process isolation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docingest::chunker::Chunker;
use docingest::config::{self, Config};
use docingest::error::IngestError;
use docingest::extract::Registry;
use docingest::file_processor::FileProcessor;
use docingest::filter::FileFilter;
use docingest::lock_manager::LockManager;
use docingest::metadata_store::InMemoryMetadataStore;
use docingest::orchestrator::Orchestrator;
use docingest::process_probe::SysinfoProbe;
use docingest::scanner::DirectoryScanner;
use docingest::supervisor::WORKER_MODE_FLAG;
use docingest::vector_store::InMemoryVectorStore;
use docingest::worker_runtime::WorkerRuntime;
use tokio::io::AsyncBufReadExt;

/// Re-scan cadence when running without `--once`; not a spec invariant,
/// just the ambient polling loop's period.
const RESCAN_INTERVAL_SECONDS: u64 = 60;

#[derive(Parser, Debug)]
#[command(
    name = "docingest",
    version,
    about = "Document ingestion engine: scans watched directories, parses files into semantic blocks, and pushes size-bounded chunks to a vector store and metadata store."
)]
struct Cli {
    /// Directories to scan and ingest.
    directories: Vec<PathBuf>,

    /// Path to a JSON config file. Defaults to `.docingest.json` in the
    /// current directory; silently falls back to built-in defaults when
    /// absent, hard errors when present but invalid.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `orchestrator.max_concurrent_directories` from the config
    /// file.
    #[arg(long)]
    max_concurrent_directories: Option<usize>,

    /// Run a single pass over all directories and exit instead of looping
    /// on an interval.
    #[arg(long)]
    once: bool,

    /// Hidden: re-exec target used by `WorkerSupervisor` to drive one
    /// directory in an isolated OS process. Not part of the public surface.
    #[arg(long = "worker-mode", hide = true)]
    worker_mode: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .compact()
        .init();

    let cli = Cli::parse();

    if cli.worker_mode {
        let directory = cli
            .directories
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("--worker-mode requires exactly one directory argument"))?;
        let config = load_config(cli.config.as_deref())?;
        return run_worker_mode(directory, config).await;
    }

    if cli.directories.is_empty() {
        anyhow::bail!("at least one directory is required");
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(max) = cli.max_concurrent_directories {
        config.orchestrator.max_concurrent_directories = max;
    }

    let directories = cli.directories;
    loop {
        let orchestrator = build_orchestrator(&config)?;
        let mut runtimes = Vec::with_capacity(directories.len());
        for (i, directory) in directories.iter().enumerate() {
            let runtime = build_worker_runtime(format!("worker-{i}"), directory.clone(), &config)?;
            runtimes.push((directory.clone(), Arc::new(runtime)));
        }

        let results = orchestrator.process_directories(runtimes).await;
        let mut all_succeeded = true;
        for result in &results {
            if result.success {
                tracing::info!(
                    directory = %result.directory_path,
                    files_processed = result.files_processed,
                    files_failed = result.files_failed,
                    chunks_created = result.chunks_created,
                    "directory processed"
                );
            } else {
                all_succeeded = false;
                tracing::error!(
                    directory = %result.directory_path,
                    error = ?result.error_message,
                    "directory processing failed"
                );
            }
        }

        if cli.once {
            std::process::exit(if all_succeeded { 0 } else { 1 });
        }

        tokio::time::sleep(Duration::from_secs(RESCAN_INTERVAL_SECONDS)).await;
    }
}

/// Explicit `--config <path>` and the implicit `.docingest.json` share the
/// same contract: silent fallback to defaults when absent, hard error when
/// present but invalid.
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(_) => return Ok(Config::default()),
            };
            serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("invalid config file {}: {e}", path.display()))
        }
        None => config::load_config(&std::env::current_dir()?),
    }
}

fn build_orchestrator(config: &Config) -> anyhow::Result<Arc<Orchestrator>> {
    let probe = Arc::new(SysinfoProbe::new());
    let lock_manager = Arc::new(LockManager::new(config.lock.lock_timeout_seconds, probe)?);
    Ok(Arc::new(Orchestrator::new(config.orchestrator.clone(), lock_manager, None)))
}

fn build_worker_runtime(worker_id: String, directory: PathBuf, config: &Config) -> anyhow::Result<WorkerRuntime> {
    let probe = Arc::new(SysinfoProbe::new());
    let lock_manager = Arc::new(LockManager::new(config.lock.lock_timeout_seconds, probe)?);
    let filter = Arc::new(FileFilter::new(config.filter.clone())?);
    let scanner = Arc::new(DirectoryScanner::new(config.scanner.clone(), lock_manager, filter));
    let registry = Arc::new(Registry::with_defaults(config.extractor.clone()));
    let chunker = Arc::new(Chunker::new(config.chunker.clone()));
    let processor = Arc::new(FileProcessor::new(
        registry,
        chunker,
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(InMemoryMetadataStore::new()),
    ));
    Ok(WorkerRuntime::new(
        worker_id,
        directory,
        scanner,
        processor,
        config.scanner.clone(),
        config.supervisor.clone(),
    ))
}

/// Runs as the child side of `WorkerSupervisor::start_worker`: drives one
/// directory's `WorkerRuntime`, relaying control lines on stdin
/// (`STOP`/`PAUSE`/`RESUME`) and periodic `WorkerStatus` JSON lines on
/// stdout.
async fn run_worker_mode(directory: PathBuf, config: Config) -> anyhow::Result<()> {
    let runtime = Arc::new(build_worker_runtime("worker".to_string(), directory, &config)?);
    let controls = runtime.controls();

    let stdin_task = tokio::spawn(async move {
        let stdin = tokio::io::stdin();
        let mut lines = tokio::io::BufReader::new(stdin).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match line.trim() {
                "STOP" => {
                    controls.cancel();
                    break;
                }
                "PAUSE" => controls.pause(),
                "RESUME" => controls.resume(),
                _ => {}
            }
        }
    });

    let status_runtime = runtime.clone();
    let emitter = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let status = status_runtime.status().await;
            if let Ok(line) = serde_json::to_string(&status) {
                println!("{line}");
            }
        }
    });

    let result = runtime.run().await;
    emitter.abort();
    stdin_task.abort();

    match result {
        Ok(_) => Ok(()),
        Err(err) => {
            let exit_code = exit_code_for(&err);
            eprintln!("worker failed: {err}");
            std::process::exit(exit_code);
        }
    }
}

fn exit_code_for(err: &IngestError) -> i32 {
    if err.is_retryable() {
        1
    } else {
        2
    }
}

#[allow(dead_code)]
const _WORKER_MODE_FLAG_USED_BY_SUPERVISOR: &str = WORKER_MODE_FLAG;
