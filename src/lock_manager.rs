//! C2 LockManager: create/inspect/remove per-directory lock files, with
//! orphan detection via liveness probing. Grounded on
//! `services/lock_manager.py` and §4.2.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::IngestError;
use crate::model::{Lock, LockStatus};
use crate::process_probe::{current_pid, Liveness, ProcessProbe};

pub const LOCK_FILE_NAME: &str = ".processing.lock";
pub const DEFAULT_LOCK_TIMEOUT_SECONDS: u64 = 3600;

pub struct LockManager {
    lock_timeout: u64,
    probe: Arc<dyn ProcessProbe>,
}

impl LockManager {
    pub fn new(lock_timeout_seconds: u64, probe: Arc<dyn ProcessProbe>) -> anyhow::Result<Self> {
        if lock_timeout_seconds == 0 {
            anyhow::bail!("lock_timeout must be positive");
        }
        Ok(Self {
            lock_timeout: lock_timeout_seconds,
            probe,
        })
    }

    fn lock_path(&self, directory: &Path) -> PathBuf {
        directory.join(LOCK_FILE_NAME)
    }

    /// `Acquire(dir)` per §4.2's three-step protocol.
    pub fn acquire(&self, directory: &Path) -> Result<Lock, IngestError> {
        if !directory.exists() {
            return Err(IngestError::FilesystemMissing(directory.display().to_string()));
        }
        if !directory.is_dir() {
            return Err(IngestError::FilesystemMissing(format!(
                "not a directory: {}",
                directory.display()
            )));
        }

        let lock_path = self.lock_path(directory);

        if lock_path.exists() {
            match self.read_lock_file(&lock_path) {
                Ok(existing) => {
                    let expired = self.is_expired(&existing);
                    let alive = self.is_process_alive(existing.process_id);
                    if alive && !expired {
                        return Err(IngestError::LockConflict {
                            pid: existing.process_id,
                        });
                    }
                    tracing::warn!(directory = %directory.display(), pid = existing.process_id, "removing orphaned lock");
                    self.remove_lock_file(&lock_path)?;
                }
                Err(_) => {
                    tracing::warn!(path = %lock_path.display(), "removing corrupted lock file");
                    self.remove_lock_file(&lock_path)?;
                }
            }
        }

        let lock = Lock {
            process_id: current_pid(),
            created_at: Utc::now(),
            directory: directory.display().to_string(),
            status: LockStatus::Active,
            lock_file_path: lock_path.display().to_string(),
            timeout_seconds: Some(self.lock_timeout),
            metadata: Default::default(),
        };
        self.write_lock_file(&lock_path, &lock)?;
        tracing::info!(directory = %directory.display(), "created lock");
        Ok(lock)
    }

    /// `Release(lock)`. Refuses a lock owned by a different process;
    /// idempotent on a missing file.
    pub fn release(&self, lock: &Lock) -> Result<bool, IngestError> {
        if lock.process_id != current_pid() {
            return Err(IngestError::ForeignLock {
                owner: lock.process_id,
                current: current_pid(),
            });
        }
        let lock_path = Path::new(&lock.lock_file_path);
        if !lock_path.exists() {
            tracing::warn!(path = %lock_path.display(), "lock file does not exist");
            return Ok(false);
        }
        let removed = self.remove_lock_file(lock_path)?;
        if removed {
            tracing::info!(directory = %lock.directory, "released lock");
        } else {
            tracing::error!(directory = %lock.directory, "failed to release lock");
        }
        Ok(removed)
    }

    /// `Inspect(dir)`.
    pub fn inspect(&self, directory: &Path) -> Result<Option<Lock>, IngestError> {
        if !directory.exists() {
            return Err(IngestError::FilesystemMissing(directory.display().to_string()));
        }
        let lock_path = self.lock_path(directory);
        if !lock_path.exists() {
            return Ok(None);
        }
        match self.read_lock_file(&lock_path) {
            Ok(lock) => {
                if self.is_process_alive(lock.process_id) && !self.is_expired(&lock) {
                    Ok(Some(lock))
                } else {
                    tracing::warn!(directory = %directory.display(), "found orphaned lock");
                    self.remove_lock_file(&lock_path)?;
                    Ok(None)
                }
            }
            Err(e) => {
                tracing::warn!(path = %lock_path.display(), error = %e, "error reading lock file");
                Ok(None)
            }
        }
    }

    /// `SweepOrphans(dirs[])`.
    pub fn sweep_orphans(&self, directories: &[PathBuf]) -> Vec<String> {
        let mut cleaned = Vec::new();
        for dir in directories {
            let lock_path = self.lock_path(dir);
            if !lock_path.exists() {
                continue;
            }
            let orphaned = match self.read_lock_file(&lock_path) {
                Ok(lock) => self.is_expired(&lock) || !self.is_process_alive(lock.process_id),
                Err(_) => true,
            };
            if orphaned && self.remove_lock_file(&lock_path).unwrap_or(false) {
                cleaned.push(dir.display().to_string());
            }
        }
        cleaned
    }

    fn is_expired(&self, lock: &Lock) -> bool {
        let timeout = lock.timeout_seconds.unwrap_or(self.lock_timeout);
        let age = Utc::now().signed_duration_since(lock.created_at);
        age.num_seconds() > timeout as i64
    }

    /// Probe semantics per §4.2: alive if the process exists and is not a
    /// zombie; also alive on access-denied (assume a peer owned by another
    /// user is alive); dead on not-found or generic probe error.
    fn is_process_alive(&self, pid: u32) -> bool {
        matches!(self.probe.alive(pid), Liveness::Alive)
    }

    fn read_lock_file(&self, path: &Path) -> Result<Lock, IngestError> {
        let content = fs::read_to_string(path).map_err(IngestError::from)?;
        let lock: Lock = serde_json::from_str(&content).map_err(|e| IngestError::LockCorrupt(e.to_string()))?;
        validate_lock(&lock)?;
        Ok(lock)
    }

    fn write_lock_file(&self, path: &Path, lock: &Lock) -> Result<(), IngestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(IngestError::from)?;
        }
        let json = serde_json::to_string_pretty(lock)?;
        fs::write(path, json).map_err(IngestError::from)?;
        Ok(())
    }

    fn remove_lock_file(&self, path: &Path) -> Result<bool, IngestError> {
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path).map_err(IngestError::from)?;
        Ok(true)
    }
}

fn validate_lock(lock: &Lock) -> Result<(), IngestError> {
    if lock.process_id == 0 {
        return Err(IngestError::LockCorrupt("process_id must be positive".into()));
    }
    if lock.directory.is_empty() {
        return Err(IngestError::LockCorrupt("directory must be non-empty".into()));
    }
    if lock.lock_file_path.is_empty() {
        return Err(IngestError::LockCorrupt("lock_file_path must be non-empty".into()));
    }
    Ok(())
}

/// Exposed for callers that want the raw created_at without re-reading the
/// lock file (e.g. the supervisor's health monitor).
pub fn lock_age(lock: &Lock, now: DateTime<Utc>) -> chrono::Duration {
    now.signed_duration_since(lock.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct FixedProbe(Liveness);
    impl ProcessProbe for FixedProbe {
        fn alive(&self, _pid: u32) -> Liveness {
            self.0
        }
    }

    #[test]
    fn acquire_creates_lock_with_current_pid() {
        let dir = tempdir().unwrap();
        let mgr = LockManager::new(3600, Arc::new(FixedProbe(Liveness::Dead))).unwrap();
        let lock = mgr.acquire(dir.path()).unwrap();
        assert_eq!(lock.process_id, current_pid());
        assert!(dir.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn acquire_fails_when_peer_is_alive() {
        let dir = tempdir().unwrap();
        let alive_mgr = LockManager::new(3600, Arc::new(FixedProbe(Liveness::Alive))).unwrap();
        alive_mgr.acquire(dir.path()).unwrap();

        let checker = LockManager::new(3600, Arc::new(FixedProbe(Liveness::Alive))).unwrap();
        let result = checker.acquire(dir.path());
        assert!(matches!(result, Err(IngestError::LockConflict { .. })));
    }

    #[test]
    fn orphaned_lock_is_removed_and_replaced() {
        let dir = tempdir().unwrap();
        let dead_mgr = LockManager::new(3600, Arc::new(FixedProbe(Liveness::Dead))).unwrap();
        let first = dead_mgr.acquire(dir.path()).unwrap();
        dead_mgr.release(&first).unwrap();

        // Simulate an orphan: write a lock file directly without releasing.
        let orphan = Lock {
            process_id: 999999,
            created_at: Utc::now(),
            directory: dir.path().display().to_string(),
            status: LockStatus::Active,
            lock_file_path: dir.path().join(LOCK_FILE_NAME).display().to_string(),
            timeout_seconds: Some(3600),
            metadata: Default::default(),
        };
        dead_mgr.write_lock_file(&dir.path().join(LOCK_FILE_NAME), &orphan).unwrap();

        let result = dead_mgr.acquire(dir.path()).unwrap();
        assert_eq!(result.process_id, current_pid());
    }

    #[test]
    fn release_refuses_foreign_lock() {
        let dir = tempdir().unwrap();
        let mgr = LockManager::new(3600, Arc::new(FixedProbe(Liveness::Dead))).unwrap();
        let mut lock = mgr.acquire(dir.path()).unwrap();
        lock.process_id = current_pid() + 12345;
        let result = mgr.release(&lock);
        assert!(matches!(result, Err(IngestError::ForeignLock { .. })));
    }

    #[test]
    fn corrupted_lock_file_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), "not json").unwrap();
        let mgr = LockManager::new(3600, Arc::new(FixedProbe(Liveness::Alive))).unwrap();
        let lock = mgr.acquire(dir.path()).unwrap();
        assert_eq!(lock.process_id, current_pid());
    }

    #[test]
    fn expired_lock_is_treated_as_orphaned_even_if_alive() {
        let dir = tempdir().unwrap();
        let mgr = LockManager::new(1, Arc::new(FixedProbe(Liveness::Alive))).unwrap();
        let mut stale = mgr.acquire(dir.path()).unwrap();
        stale.created_at = Utc::now() - chrono::Duration::seconds(10);
        mgr.write_lock_file(&dir.path().join(LOCK_FILE_NAME), &stale).unwrap();

        let result = mgr.acquire(dir.path()).unwrap();
        assert_eq!(result.process_id, current_pid());
    }
}
