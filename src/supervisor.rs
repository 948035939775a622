//! C8 WorkerSupervisor: starts, stops, restarts, and health-monitors a
//! bounded pool of worker processes. Grounded on
//! `services/child_process_manager.py` (`WorkerProcessInfo`,
//! `start_worker`/`stop_worker`/`restart_worker`/`_monitor_worker_health`)
//! and `services/main_process_manager.py`'s orphan-sweep.
//! True cross-worker isolation
//! is achieved by re-executing the current binary with a hidden worker-mode
//! flag rather than spawning a tokio task — `sysinfo` gives the liveness
//! checks the health monitor needs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config::SupervisorConfig;
use crate::error::IngestError;
use crate::process_probe::{Liveness, ProcessProbe};
use crate::worker_runtime::WorkerStatus;

/// The hidden CLI flag `main.rs` recognizes to re-exec itself as a worker
/// process instead of running the orchestrator loop.
pub const WORKER_MODE_FLAG: &str = "--worker-mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerProcessState {
    Running,
    Stopped,
    Failed,
}

/// Mirrors the Python reference's `WorkerProcessInfo`.
#[derive(Debug, Clone)]
pub struct WorkerProcessInfo {
    pub worker_id: String,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub state: WorkerProcessState,
    pub directory_path: String,
    pub restart_count: u32,
    pub error_message: Option<String>,
    pub last_status: Option<WorkerStatus>,
}

struct WorkerHandle {
    child: Child,
    stdin: tokio::process::ChildStdin,
    info: WorkerProcessInfo,
    spawned_at: Instant,
}

pub struct WorkerSupervisor {
    config: SupervisorConfig,
    worker_binary: PathBuf,
    probe: Arc<dyn ProcessProbe>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl WorkerSupervisor {
    pub fn new(config: SupervisorConfig, worker_binary: PathBuf, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            config,
            worker_binary,
            probe,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// `StartWorker(directory) -> WorkerProcessInfo`.
    pub async fn start_worker(&self, worker_id: String, directory: &Path, config_path: Option<&Path>) -> Result<WorkerProcessInfo, IngestError> {
        let mut workers = self.workers.lock().await;
        if workers.len() >= self.config.max_workers {
            return Err(IngestError::ResourceLimitReached(format!("worker pool exhausted (max_workers={})", self.config.max_workers)));
        }

        let mut command = Command::new(&self.worker_binary);
        command
            .arg(WORKER_MODE_FLAG)
            .arg(directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(path) = config_path {
            command.arg("--config").arg(path);
        }

        let mut child = command
            .spawn()
            .map_err(|e| IngestError::Unknown(format!("failed to spawn worker process: {e}")))?;
        let pid = child.id().ok_or_else(|| IngestError::Unknown("worker process exited immediately".to_string()))?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let info = WorkerProcessInfo {
            worker_id: worker_id.clone(),
            pid,
            start_time: Utc::now(),
            state: WorkerProcessState::Running,
            directory_path: directory.display().to_string(),
            restart_count: 0,
            error_message: None,
            last_status: None,
        };

        tokio::spawn(drain_status_lines(worker_id.clone(), stdout));

        workers.insert(
            worker_id.clone(),
            WorkerHandle {
                child,
                stdin,
                info: info.clone(),
                spawned_at: Instant::now(),
            },
        );
        Ok(info)
    }

    /// `StopWorker(worker_id, graceful=true)`. Sends a `STOP` line
    /// over stdin and waits up to `graceful_shutdown_timeout_seconds`
    /// before force-killing.
    pub async fn stop_worker(&self, worker_id: &str) -> Result<(), IngestError> {
        let mut workers = self.workers.lock().await;
        let handle = workers
            .get_mut(worker_id)
            .ok_or_else(|| IngestError::Unknown(format!("worker not found: {worker_id}")))?;

        if self.config.enable_graceful_shutdown {
            let _ = handle.stdin.write_all(b"STOP\n").await;
            let _ = handle.stdin.flush().await;
            let timeout = Duration::from_secs(self.config.graceful_shutdown_timeout_seconds);
            if tokio::time::timeout(timeout, handle.child.wait()).await.is_ok() {
                handle.info.state = WorkerProcessState::Stopped;
                return Ok(());
            }
        }

        handle
            .child
            .start_kill()
            .map_err(|e| IngestError::Unknown(format!("failed to kill worker process: {e}")))?;
        let _ = handle.child.wait().await;
        handle.info.state = WorkerProcessState::Stopped;
        Ok(())
    }

    /// `RestartWorker(worker_id)`: stop then start against the same
    /// directory, bumping `restart_count`, bounded by `max_restart_attempts`.
    pub async fn restart_worker(&self, worker_id: &str, config_path: Option<&Path>) -> Result<WorkerProcessInfo, IngestError> {
        let (directory, restart_count) = {
            let workers = self.workers.lock().await;
            let handle = workers
                .get(worker_id)
                .ok_or_else(|| IngestError::Unknown(format!("worker not found: {worker_id}")))?;
            (PathBuf::from(&handle.info.directory_path), handle.info.restart_count)
        };

        if restart_count >= self.config.max_restart_attempts {
            return Err(IngestError::ResourceLimitReached(format!("worker {worker_id} exceeded max_restart_attempts")));
        }

        self.stop_worker(worker_id).await?;
        {
            let mut workers = self.workers.lock().await;
            workers.remove(worker_id);
        }
        let mut info = self.start_worker(worker_id.to_string(), &directory, config_path).await?;
        info.restart_count = restart_count + 1;
        let mut workers = self.workers.lock().await;
        if let Some(handle) = workers.get_mut(worker_id) {
            handle.info.restart_count = info.restart_count;
        }
        Ok(info)
    }

    /// `StopAll`, used on graceful process shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = {
            let workers = self.workers.lock().await;
            workers.keys().cloned().collect()
        };
        for id in ids {
            if let Err(err) = self.stop_worker(&id).await {
                tracing::warn!(worker_id = %id, error = %err, "failed to stop worker during shutdown");
            }
        }
    }

    pub async fn list_workers(&self) -> Vec<WorkerProcessInfo> {
        let workers = self.workers.lock().await;
        workers.values().map(|h| h.info.clone()).collect()
    }

    /// One health-monitor tick: reaps
    /// exited children, marks them `Failed` if they exited non-zero or
    /// exceeded `worker_timeout_seconds`, and auto-restarts them when
    /// `auto_restart_failed_workers` is set.
    pub async fn check_health(&self) -> Result<(), IngestError> {
        let failed: Vec<(String, Option<i32>)> = {
            let mut workers = self.workers.lock().await;
            let mut failed = Vec::new();
            for (id, handle) in workers.iter_mut() {
                if handle.info.state != WorkerProcessState::Running {
                    continue;
                }
                match handle.child.try_wait() {
                    Ok(Some(status)) => {
                        handle.info.state = WorkerProcessState::Failed;
                        handle.info.error_message = Some(format!("worker exited with {status}"));
                        failed.push((id.clone(), status.code()));
                    }
                    Ok(None) => {
                        let elapsed = handle.spawned_at.elapsed();
                        if elapsed.as_secs() > self.config.worker_timeout_seconds
                            && matches!(self.probe.alive(handle.info.pid), Liveness::Alive)
                        {
                            handle.info.state = WorkerProcessState::Failed;
                            handle.info.error_message = Some("worker exceeded worker_timeout_seconds".to_string());
                            failed.push((id.clone(), None));
                        }
                    }
                    Err(err) => {
                        tracing::warn!(worker_id = %id, error = %err, "try_wait failed");
                    }
                }
            }
            failed
        };

        for (id, _code) in &failed {
            tracing::warn!(worker_id = %id, "worker marked failed");
            if self.config.auto_restart_failed_workers {
                if let Err(err) = self.restart_worker(id, None).await {
                    tracing::error!(worker_id = %id, error = %err, "auto-restart failed");
                }
            }
        }
        Ok(())
    }

    /// Orphan-process sweep: removes bookkeeping for workers whose
    /// OS process is no longer alive but were never reaped through
    /// `check_health` (e.g. the supervisor itself restarted).
    pub async fn cleanup_orphaned_processes(&self) -> usize {
        let mut workers = self.workers.lock().await;
        let orphaned: Vec<String> = workers
            .iter()
            .filter(|(_, h)| matches!(self.probe.alive(h.info.pid), Liveness::Dead))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &orphaned {
            workers.remove(id);
        }
        orphaned.len()
    }
}

async fn drain_status_lines(worker_id: String, stdout: tokio::process::ChildStdout) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<WorkerStatus>(&line) {
                Ok(status) => tracing::debug!(worker_id = %worker_id, status = ?status.status, "worker status"),
                Err(_) => tracing::trace!(worker_id = %worker_id, line = %line, "non-status worker stdout"),
            },
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(worker_id = %worker_id, error = %err, "error reading worker stdout");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_probe::Liveness;

    struct AlwaysDead;
    impl ProcessProbe for AlwaysDead {
        fn alive(&self, _pid: u32) -> Liveness {
            Liveness::Dead
        }
    }

    #[tokio::test]
    async fn start_worker_rejects_when_pool_is_full() {
        let config = SupervisorConfig {
            max_workers: 0,
            ..SupervisorConfig::default()
        };
        let supervisor = WorkerSupervisor::new(config, PathBuf::from("/bin/true"), Arc::new(AlwaysDead));
        let result = supervisor.start_worker("w1".to_string(), Path::new("/tmp"), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_unknown_worker_returns_not_found() {
        let supervisor = WorkerSupervisor::new(SupervisorConfig::default(), PathBuf::from("/bin/true"), Arc::new(AlwaysDead));
        let result = supervisor.stop_worker("missing").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_workers_starts_empty() {
        let supervisor = WorkerSupervisor::new(SupervisorConfig::default(), PathBuf::from("/bin/true"), Arc::new(AlwaysDead));
        assert!(supervisor.list_workers().await.is_empty());
    }
}
