//! C7 WorkerRuntime: the loop a worker process runs against one target
//! directory — scan, batch, bounded parallel fan-out over `FileProcessor`,
//! progress emission, pause/resume/cancel. Grounded on
//! `workers/directory_scanner_worker.py` (`WorkerStatus`,
//! `start_scanning`/`pause_scanning`/`resume_scanning`).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};

use crate::config::{ScannerConfig, SupervisorConfig};
use crate::error::IngestError;
use crate::file_processor::{FileProcessingResult, FileProcessor, ProcessingStatus};
use crate::scanner::DirectoryScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Scanning,
    Processing,
    Paused,
    Stopped,
    Completed,
    Failed,
}

/// Round-trips through JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub status: WorkerState,
    pub directory_path: String,
    pub files_found: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub progress_percentage: f64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerStatus {
    fn new(worker_id: String, directory_path: String) -> Self {
        let now = Utc::now();
        Self {
            worker_id,
            status: WorkerState::Idle,
            directory_path,
            files_found: 0,
            files_processed: 0,
            files_failed: 0,
            progress_percentage: 0.0,
            error_message: None,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Cooperative pause/cancel signalling observed at batch boundaries.
#[derive(Clone, Default)]
pub struct RuntimeControls {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl RuntimeControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One batch's outcome, reported up to the supervisor.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: Vec<FileProcessingResult>,
}

pub struct WorkerRuntime {
    worker_id: String,
    directory: PathBuf,
    scanner: Arc<DirectoryScanner>,
    processor: Arc<FileProcessor>,
    scanner_config: ScannerConfig,
    supervisor_config: SupervisorConfig,
    controls: RuntimeControls,
    status: Mutex<WorkerStatus>,
}

impl WorkerRuntime {
    pub fn new(
        worker_id: String,
        directory: PathBuf,
        scanner: Arc<DirectoryScanner>,
        processor: Arc<FileProcessor>,
        scanner_config: ScannerConfig,
        supervisor_config: SupervisorConfig,
    ) -> Self {
        let status = WorkerStatus::new(worker_id.clone(), directory.display().to_string());
        Self {
            worker_id,
            directory,
            scanner,
            processor,
            scanner_config,
            supervisor_config,
            controls: RuntimeControls::new(),
            status: Mutex::new(status),
        }
    }

    pub fn controls(&self) -> RuntimeControls {
        self.controls.clone()
    }

    pub async fn status(&self) -> WorkerStatus {
        self.status.lock().await.clone()
    }

    /// The runtime's main loop: scan, then batch+process, emitting progress
    /// after each batch.
    pub async fn run(&self) -> Result<Vec<BatchReport>, IngestError> {
        {
            let mut status = self.status.lock().await;
            status.status = WorkerState::Scanning;
            status.updated_at = Utc::now();
        }

        if self.controls.is_cancelled() {
            let mut status = self.status.lock().await;
            status.status = WorkerState::Stopped;
            return Ok(Vec::new());
        }

        let files = match self.scanner.scan(&self.directory, None) {
            Ok(files) => files,
            Err(err) => {
                let mut status = self.status.lock().await;
                status.status = WorkerState::Failed;
                status.error_message = Some(err.to_string());
                return Err(err);
            }
        };

        {
            let mut status = self.status.lock().await;
            status.files_found = files.len();
            status.status = WorkerState::Processing;
            status.updated_at = Utc::now();
        }

        let batch_size = self.scanner_config.batch_size.max(1);
        let paths: Vec<PathBuf> = files.into_iter().map(|f| PathBuf::from(f.path)).collect();
        let mut reports = Vec::new();

        for batch in paths.chunks(batch_size) {
            if self.controls.is_cancelled() {
                break;
            }
            while self.controls.is_paused() && !self.controls.is_cancelled() {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            if self.controls.is_cancelled() {
                break;
            }

            let report = self.run_batch(batch).await;
            {
                let mut status = self.status.lock().await;
                for result in &report.results {
                    match result.status {
                        ProcessingStatus::Completed => status.files_processed += 1,
                        ProcessingStatus::Failed => status.files_failed += 1,
                    }
                }
                status.progress_percentage = if status.files_found == 0 {
                    100.0
                } else {
                    ((status.files_processed + status.files_failed) as f64 / status.files_found as f64) * 100.0
                };
                status.updated_at = Utc::now();
            }
            reports.push(report);
        }

        let mut status = self.status.lock().await;
        status.status = if self.controls.is_cancelled() {
            WorkerState::Stopped
        } else {
            WorkerState::Completed
        };
        status.updated_at = Utc::now();

        Ok(reports)
    }

    /// Bounded parallel fan-out over one batch, width `max_workers`.
    /// Cancellation is only observed between chunk commits inside
    /// `FileProcessor::process`, never mid-commit (Open Question 4).
    async fn run_batch(&self, batch: &[PathBuf]) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.supervisor_config.max_workers.max(1)));
        let mut join_set = tokio::task::JoinSet::new();

        for path in batch {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let processor = self.processor.clone();
            let path = path.clone();
            join_set.spawn(async move {
                let _permit = permit;
                processor.process(&path).await
            });
        }

        let mut results = Vec::with_capacity(batch.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => tracing::error!(error = %err, "worker task panicked"),
            }
        }
        BatchReport { results }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkerConfig, ExtractorConfig, FilterConfig};
    use crate::extract::Registry;
    use crate::chunker::Chunker;
    use crate::filter::FileFilter;
    use crate::lock_manager::LockManager;
    use crate::metadata_store::InMemoryMetadataStore;
    use crate::process_probe::{Liveness, ProcessProbe};
    use crate::vector_store::InMemoryVectorStore;
    use tempfile::tempdir;

    struct FixedProbe(Liveness);
    impl ProcessProbe for FixedProbe {
        fn alive(&self, _pid: u32) -> Liveness {
            self.0
        }
    }

    fn make_runtime(dir: &Path) -> WorkerRuntime {
        let lock_manager = Arc::new(LockManager::new(3600, Arc::new(FixedProbe(Liveness::Dead))).unwrap());
        let filter = Arc::new(FileFilter::new(FilterConfig::default()).unwrap());
        let scanner = Arc::new(DirectoryScanner::new(ScannerConfig::default(), lock_manager, filter));
        let registry = Arc::new(Registry::with_defaults(ExtractorConfig::default()));
        let chunker = Arc::new(Chunker::new(ChunkerConfig::default()));
        let processor = Arc::new(FileProcessor::new(
            registry,
            chunker,
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryMetadataStore::new()),
        ));
        WorkerRuntime::new(
            "worker-1".to_string(),
            dir.to_path_buf(),
            scanner,
            processor,
            ScannerConfig::default(),
            SupervisorConfig::default(),
        )
    }

    #[tokio::test]
    async fn run_processes_all_discovered_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# T\n\nA long enough paragraph with real content here.\n").unwrap();
        std::fs::write(dir.path().join("b.md"), "# T\n\nAnother long enough paragraph with real content here.\n").unwrap();

        let runtime = make_runtime(dir.path());
        let reports = runtime.run().await.unwrap();
        let total: usize = reports.iter().map(|r| r.results.len()).sum();
        assert_eq!(total, 2);

        let status = runtime.status().await;
        assert_eq!(status.status, WorkerState::Completed);
        assert_eq!(status.files_processed, 2);
    }

    #[tokio::test]
    async fn cancel_before_run_stops_early() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# T\n\nSomething here.\n").unwrap();
        let runtime = make_runtime(dir.path());
        runtime.controls.cancel();
        let reports = runtime.run().await.unwrap();
        assert!(reports.is_empty());
        assert_eq!(runtime.status().await.status, WorkerState::Stopped);
    }

    #[test]
    fn worker_status_round_trips_through_json() {
        let status = WorkerStatus::new("w1".to_string(), "/tmp".to_string());
        let json = serde_json::to_string(&status).unwrap();
        let back: WorkerStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.worker_id, status.worker_id);
        assert_eq!(back.status, status.status);
    }
}
