//! C9 Orchestrator: the top-level per-directory pipeline. Acquires a
//! concurrency slot, acquires the directory lock, starts (or reuses) a
//! worker process via `WorkerSupervisor`, tracks `DirectoryProcessingStatus`
//! history, and releases the slot/lock on completion or failure. Grounded
//! on `services/directory_orchestrator.py` in full (`process_directory`'s
//! stage ordering and `finally`-based cleanup) and scenario 6.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};

use crate::config::OrchestratorConfig;
use crate::error::IngestError;
use crate::lock_manager::LockManager;
use crate::supervisor::WorkerSupervisor;
use crate::worker_runtime::{RuntimeControls, WorkerRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryState {
    Pending,
    Scanning,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Mirrors the Python reference's `DirectoryProcessingStatus`, appended to
/// `OrchestrationResult.status_updates` as the pipeline advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryProcessingStatus {
    pub directory_path: String,
    pub status: DirectoryState,
    pub files_found: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub progress_percentage: f64,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DirectoryProcessingStatus {
    fn new(directory_path: String, status: DirectoryState) -> Self {
        Self {
            directory_path,
            status,
            files_found: 0,
            files_processed: 0,
            files_failed: 0,
            chunks_created: 0,
            progress_percentage: 0.0,
            error_message: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub directory_path: String,
    pub files_processed: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub processing_time_seconds: f64,
    pub error_message: Option<String>,
    pub status_updates: Vec<DirectoryProcessingStatus>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    lock_manager: Arc<LockManager>,
    supervisor: Option<Arc<WorkerSupervisor>>,
    semaphore: Arc<Semaphore>,
    active: Mutex<HashMap<String, RuntimeControls>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, lock_manager: Arc<LockManager>, supervisor: Option<Arc<WorkerSupervisor>>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_directories.max(1)));
        Self {
            config,
            lock_manager,
            supervisor,
            semaphore,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// `ProcessDirectory(path) -> OrchestrationResult`: acquires a
    /// concurrency slot, acquires the directory lock, drives one
    /// `WorkerRuntime` pass in-process, and releases both regardless of
    /// outcome. Takes `Arc<Self>` so `process_directories` can fan out each
    /// call onto its own task without borrowing across an await point.
    pub async fn process_directory(self: Arc<Self>, directory: PathBuf, runtime: Arc<WorkerRuntime>) -> OrchestrationResult {
        let started = Instant::now();
        let path_str = directory.display().to_string();
        let mut updates = vec![DirectoryProcessingStatus::new(path_str.clone(), DirectoryState::Pending)];

        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.failure_result(path_str, started, updates, "concurrency semaphore closed".to_string());
            }
        };

        {
            let mut active = self.active.lock().await;
            if active.contains_key(&path_str) {
                return self.failure_result(
                    path_str.clone(),
                    started,
                    updates,
                    format!("{path_str} is already being processed"),
                );
            }
            active.insert(path_str.clone(), runtime.controls());
        }

        let result = match self.lock_manager.acquire(&directory) {
            Ok(lock) => {
                let outcome = self.run_with_lock(&directory, runtime.clone(), &mut updates, started).await;
                // Released unconditionally, mirroring the Python reference's
                // `finally: await self.lock_manager.remove_lock(...)`.
                if let Err(err) = self.lock_manager.release(&lock) {
                    tracing::warn!(directory = %path_str, error = %err, "failed to release directory lock");
                }
                outcome
            }
            Err(err) => {
                updates.push(DirectoryProcessingStatus::new(path_str.clone(), DirectoryState::Failed));
                self.failure_result(path_str.clone(), started, updates, err.to_string())
            }
        };

        {
            let mut active = self.active.lock().await;
            active.remove(&path_str);
        }

        result
    }

    async fn run_with_lock(
        &self,
        directory: &Path,
        runtime: Arc<WorkerRuntime>,
        updates: &mut Vec<DirectoryProcessingStatus>,
        started: Instant,
    ) -> OrchestrationResult {
        let path_str = directory.display().to_string();
        updates.push(DirectoryProcessingStatus::new(path_str.clone(), DirectoryState::Scanning));

        match runtime.run().await {
            Ok(reports) => {
                updates.push(DirectoryProcessingStatus::new(path_str.clone(), DirectoryState::Processing));

                let mut files_processed = 0usize;
                let mut files_failed = 0usize;
                let mut chunks_created = 0usize;
                for report in &reports {
                    for r in &report.results {
                        match r.status {
                            crate::file_processor::ProcessingStatus::Completed => {
                                files_processed += 1;
                                chunks_created += r.chunks_created;
                            }
                            crate::file_processor::ProcessingStatus::Failed => files_failed += 1,
                        }
                    }
                }

                let final_state = if runtime.status().await.status == crate::worker_runtime::WorkerState::Stopped {
                    DirectoryState::Cancelled
                } else {
                    DirectoryState::Completed
                };
                let mut final_status = DirectoryProcessingStatus::new(path_str.clone(), final_state);
                final_status.files_found = files_processed + files_failed;
                final_status.files_processed = files_processed;
                final_status.files_failed = files_failed;
                final_status.chunks_created = chunks_created;
                final_status.progress_percentage = 100.0;
                updates.push(final_status);

                OrchestrationResult {
                    success: final_state != DirectoryState::Cancelled,
                    directory_path: path_str,
                    files_processed,
                    files_failed,
                    chunks_created,
                    processing_time_seconds: started.elapsed().as_secs_f64(),
                    error_message: None,
                    status_updates: updates.clone(),
                }
            }
            Err(err) => {
                updates.push(DirectoryProcessingStatus::new(path_str.clone(), DirectoryState::Failed));
                self.failure_result(path_str, started, updates.clone(), err.to_string())
            }
        }
    }

    fn failure_result(
        &self,
        directory_path: String,
        started: Instant,
        status_updates: Vec<DirectoryProcessingStatus>,
        error_message: String,
    ) -> OrchestrationResult {
        OrchestrationResult {
            success: false,
            directory_path,
            files_processed: 0,
            files_failed: 0,
            chunks_created: 0,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            error_message: Some(error_message),
            status_updates,
        }
    }

    /// `ProcessDirectories(paths[]) -> OrchestrationResult[]`: each
    /// directory competes for the same `max_concurrent_directories` gate.
    /// Requires `Arc<Orchestrator>` so each directory's pipeline can run on
    /// its own task.
    pub async fn process_directories(self: &Arc<Self>, directories: Vec<(PathBuf, Arc<WorkerRuntime>)>) -> Vec<OrchestrationResult> {
        let mut set = tokio::task::JoinSet::new();
        for (dir, runtime) in directories {
            let orchestrator = Arc::clone(self);
            set.spawn(orchestrator.process_directory(dir, runtime));
        }
        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => tracing::error!(error = %err, "directory processing task panicked"),
            }
        }
        results
    }

    /// `Cancel(directory_path)`: signals the running
    /// `WorkerRuntime`'s cooperative cancellation flag; does not force-kill.
    pub async fn cancel(&self, directory_path: &str) -> bool {
        let active = self.active.lock().await;
        if let Some(controls) = active.get(directory_path) {
            controls.cancel();
            true
        } else {
            false
        }
    }

    /// `StopAll`: cancels every active directory and, if a
    /// supervisor is wired in, stops its worker processes too.
    pub async fn stop_all(&self) {
        {
            let active = self.active.lock().await;
            for controls in active.values() {
                controls.cancel();
            }
        }
        if let Some(supervisor) = &self.supervisor {
            supervisor.stop_all().await;
        }
    }

    /// `RetryFailed(directory) -> OrchestrationResult`: refuses while the
    /// same directory is already in flight, otherwise re-enters
    /// `ProcessDirectory`.
    pub async fn retry_failed(
        self: Arc<Self>,
        directory: PathBuf,
        runtime: Arc<WorkerRuntime>,
    ) -> Result<OrchestrationResult, IngestError> {
        let path_str = directory.display().to_string();
        {
            let active = self.active.lock().await;
            if active.contains_key(&path_str) {
                return Err(IngestError::ResourceLimitReached(format!(
                    "{path_str} is already being processed, refusing retry"
                )));
            }
        }
        Ok(self.process_directory(directory, runtime).await)
    }

    /// `CleanupProcessed(directory)`: explicit resource sweep. Drops any
    /// in-flight bookkeeping left over for the directory and, when
    /// `enable_cleanup_on_failure` is set, sweeps its lock file if it is
    /// orphaned. Returns the directories whose lock was actually removed.
    pub async fn cleanup_processed(&self, directory: &Path) -> Vec<String> {
        {
            let mut active = self.active.lock().await;
            active.remove(&directory.display().to_string());
        }
        if self.config.enable_cleanup_on_failure {
            self.lock_manager.sweep_orphans(&[directory.to_path_buf()])
        } else {
            Vec::new()
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::config::{ChunkerConfig, ExtractorConfig, FilterConfig, ScannerConfig, SupervisorConfig};
    use crate::extract::Registry;
    use crate::file_processor::FileProcessor;
    use crate::filter::FileFilter;
    use crate::metadata_store::InMemoryMetadataStore;
    use crate::process_probe::{Liveness, ProcessProbe};
    use crate::scanner::DirectoryScanner;
    use crate::vector_store::InMemoryVectorStore;
    use tempfile::tempdir;

    struct FixedProbe(Liveness);
    impl ProcessProbe for FixedProbe {
        fn alive(&self, _pid: u32) -> Liveness {
            self.0
        }
    }

    fn make_runtime(dir: &Path) -> Arc<WorkerRuntime> {
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
        Arc::new(WorkerRuntime::new(
            "worker-1".to_string(),
            dir.to_path_buf(),
            scanner,
            processor,
            ScannerConfig::default(),
            SupervisorConfig::default(),
        ))
    }

    fn make_orchestrator() -> Arc<Orchestrator> {
        let lock_manager = Arc::new(LockManager::new(3600, Arc::new(FixedProbe(Liveness::Dead))).unwrap());
        Arc::new(Orchestrator::new(OrchestratorConfig::default(), lock_manager, None))
    }

    #[tokio::test]
    async fn process_directory_succeeds_and_records_status_history() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# T\n\nA long enough paragraph with real content here.\n").unwrap();

        let orchestrator = make_orchestrator();
        let runtime = make_runtime(dir.path());
        let result = orchestrator.process_directory(dir.path().to_path_buf(), runtime).await;

        assert!(result.success);
        assert_eq!(result.files_processed, 1);
        assert!(result.status_updates.len() >= 3);
        assert_eq!(result.status_updates.first().unwrap().status, DirectoryState::Pending);
        assert_eq!(result.status_updates.last().unwrap().status, DirectoryState::Completed);
    }

    #[tokio::test]
    async fn process_directory_on_missing_path_fails_without_panic() {
        let orchestrator = make_orchestrator();
        let missing = PathBuf::from("/nonexistent/path/for/test");
        let runtime = make_runtime(&missing);
        let result = orchestrator.process_directory(missing.clone(), runtime).await;
        assert!(!result.success);
        assert!(result.error_message.is_some());
    }

    #[tokio::test]
    async fn cancel_unknown_directory_returns_false() {
        let orchestrator = make_orchestrator();
        assert!(!orchestrator.cancel("/not/active").await);
    }

    #[tokio::test]
    async fn retry_failed_reprocesses_a_directory_not_in_flight() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# T\n\nA long enough paragraph with real content here.\n").unwrap();

        let orchestrator = make_orchestrator();
        let runtime = make_runtime(dir.path());
        let result = orchestrator.retry_failed(dir.path().to_path_buf(), runtime).await.unwrap();

        assert!(result.success);
        assert_eq!(result.files_processed, 1);
    }

    #[tokio::test]
    async fn retry_failed_refuses_while_directory_is_in_flight() {
        let dir = tempdir().unwrap();
        let orchestrator = make_orchestrator();
        let path_str = dir.path().display().to_string();
        {
            let mut active = orchestrator.active.lock().await;
            active.insert(path_str, RuntimeControls::new());
        }

        let runtime = make_runtime(dir.path());
        let err = orchestrator.retry_failed(dir.path().to_path_buf(), runtime).await.unwrap_err();
        assert!(matches!(err, IngestError::ResourceLimitReached(_)));
    }

    #[tokio::test]
    async fn process_directory_rejects_same_directory_already_in_flight() {
        let dir = tempdir().unwrap();
        let orchestrator = make_orchestrator();
        let path_str = dir.path().display().to_string();
        {
            let mut active = orchestrator.active.lock().await;
            active.insert(path_str, RuntimeControls::new());
        }

        let runtime = make_runtime(dir.path());
        let result = orchestrator.process_directory(dir.path().to_path_buf(), runtime).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("already being processed"));
    }

    #[tokio::test]
    async fn cleanup_processed_drops_in_flight_entry_and_sweeps_lock() {
        let dir = tempdir().unwrap();
        let orchestrator = make_orchestrator();
        let path_str = dir.path().display().to_string();
        {
            let mut active = orchestrator.active.lock().await;
            active.insert(path_str.clone(), RuntimeControls::new());
        }

        let lock_path = dir.path().join(".processing.lock");
        std::fs::write(
            &lock_path,
            format!(
                r#"{{"process_id":999999,"created_at":"{}","directory":"{}","status":"active","lock_file_path":"{}"}}"#,
                Utc::now().to_rfc3339(),
                dir.path().display(),
                lock_path.display(),
            ),
        )
        .unwrap();

        let cleaned = orchestrator.cleanup_processed(dir.path()).await;

        assert_eq!(cleaned, vec![path_str.clone()]);
        assert!(!lock_path.exists());
        let active = orchestrator.active.lock().await;
        assert!(!active.contains_key(&path_str));
    }
}
