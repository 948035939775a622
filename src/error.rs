//! Error taxonomy, retry decisions, and backoff-with-jitter (C10
//! ErrorController), per §4.10/§7.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain error taxonomy. Application glue (CLI, config loading)
/// works in `anyhow::Result` and converts via `?`; this enum is what
/// `ErrorController` classifies against.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("path not found: {0}")]
    FilesystemMissing(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unsupported extension: {0}")]
    UnsupportedExtension(String),
    #[error("parse failure on {path}: {message}")]
    ParseFailure { path: String, message: String },
    #[error("filtering error: {0}")]
    FilterError(String),
    #[error("directory already locked by process {pid}")]
    LockConflict { pid: u32 },
    #[error("lock file is owned by process {owner}, not current process {current}")]
    ForeignLock { owner: u32, current: u32 },
    #[error("lock file corrupt: {0}")]
    LockCorrupt(String),
    #[error("resource limit reached: {0}")]
    ResourceLimitReached(String),
    #[error("vector store unavailable: {0}")]
    VectorStoreUnavailable(String),
    #[error("metadata database unavailable: {0}")]
    DatabaseUnavailable(String),
    #[error("operation timed out: {0}")]
    TimeoutExceeded(String),
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IngestError::FilesystemMissing(err.to_string()),
            std::io::ErrorKind::PermissionDenied => IngestError::PermissionDenied(err.to_string()),
            _ => IngestError::Unknown(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Unknown(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    FileSystem,
    Processing,
    Database,
    Network,
    Config,
    Validation,
    Resource,
    Unknown,
}

impl IngestError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            IngestError::FilesystemMissing(_) | IngestError::PermissionDenied(_) => ErrorCategory::FileSystem,
            IngestError::UnsupportedExtension(_)
            | IngestError::ParseFailure { .. }
            | IngestError::FilterError(_) => ErrorCategory::Processing,
            IngestError::LockConflict { .. } | IngestError::ForeignLock { .. } | IngestError::LockCorrupt(_) => {
                ErrorCategory::Resource
            }
            IngestError::ResourceLimitReached(_) => ErrorCategory::Resource,
            IngestError::VectorStoreUnavailable(_) => ErrorCategory::Network,
            IngestError::DatabaseUnavailable(_) => ErrorCategory::Database,
            IngestError::TimeoutExceeded(_) => ErrorCategory::Network,
            IngestError::Cancelled(_) => ErrorCategory::Processing,
            IngestError::Unknown(_) => ErrorCategory::Unknown,
        }
    }

    /// `NotFound`-shaped errors are non-retryable per §7.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            IngestError::FilesystemMissing(_)
                | IngestError::UnsupportedExtension(_)
                | IngestError::ForeignLock { .. }
                | IngestError::Cancelled(_)
        )
    }
}

/// Record of a single error occurrence, as aggregated by `Report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub id: String,
    pub error_type: String,
    pub message: String,
    pub category: ErrorCategory,
    pub operation: String,
    pub context: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub recovery_attempts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ErrorControllerConfig {
    pub max_retry_attempts: u32,
    pub base_retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub error_threshold: u32,
}

impl Default for ErrorControllerConfig {
    fn default() -> Self {
        // Mirrors services/error_handler.py's DEFAULT_MAX_RETRY_ATTEMPTS=3,
        // DEFAULT_RETRY_DELAY=5, DEFAULT_BACKOFF_MULTIPLIER=2.
        Self {
            max_retry_attempts: 3,
            base_retry_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            error_threshold: 10,
        }
    }
}

type RecoveryStrategy = Box<dyn Fn(&ErrorInfo) -> Vec<String> + Send + Sync>;

/// C10: classifies errors, decides whether to retry, computes backoff
/// delay with jitter, and aggregates a running report.
pub struct ErrorController {
    config: ErrorControllerConfig,
    counts_by_type: HashMap<String, u32>,
    recent_errors: Vec<ErrorInfo>,
    recovery_strategies: HashMap<String, RecoveryStrategy>,
    max_recent: usize,
}

impl ErrorController {
    pub fn new(config: ErrorControllerConfig) -> Self {
        Self {
            config,
            counts_by_type: HashMap::new(),
            recent_errors: Vec::new(),
            recovery_strategies: HashMap::new(),
            max_recent: 100,
        }
    }

    pub fn register_recovery(&mut self, error_type: &str, strategy: RecoveryStrategy) {
        self.recovery_strategies.insert(error_type.to_string(), strategy);
    }

    /// `Handle(err, op, retry_count)` from §4.10.
    pub fn handle(&mut self, err: &IngestError, operation: &str, retry_count: u32) -> ErrorDecision {
        let error_type = variant_name(err);
        let category = err.category();
        *self.counts_by_type.entry(error_type.clone()).or_insert(0) += 1;
        let count_for_type = self.counts_by_type[&error_type];

        let mut info = ErrorInfo {
            id: uuid::Uuid::new_v4().to_string(),
            error_type: error_type.clone(),
            message: err.to_string(),
            category,
            operation: operation.to_string(),
            context: HashMap::new(),
            timestamp: Utc::now(),
            retry_count,
            recovery_attempts: Vec::new(),
        };

        if let Some(strategy) = self.recovery_strategies.get(&error_type) {
            info.recovery_attempts = strategy(&info);
        }

        let should_retry = err.is_retryable()
            && retry_count < self.config.max_retry_attempts
            && count_for_type <= self.config.error_threshold;

        let delay = self.compute_delay(retry_count);

        self.recent_errors.push(info);
        if self.recent_errors.len() > self.max_recent {
            self.recent_errors.remove(0);
        }

        ErrorDecision { should_retry, delay }
    }

    /// `delay = base * backoff_multiplier^retry_count * uniform(0.8,1.2)`,
    /// floored at 1s.
    fn compute_delay(&self, retry_count: u32) -> Duration {
        let base = self.config.base_retry_delay.as_secs_f64();
        let scaled = base * self.config.backoff_multiplier.powi(retry_count as i32);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        let seconds = (scaled * jitter).max(1.0);
        Duration::from_secs_f64(seconds)
    }

    pub fn report(&self) -> ErrorReport {
        let mut by_category: HashMap<ErrorCategory, usize> = HashMap::new();
        for e in &self.recent_errors {
            *by_category.entry(e.category).or_insert(0) += 1;
        }
        ErrorReport {
            total: self.recent_errors.len(),
            by_type: self.counts_by_type.clone(),
            by_category,
            recent: self.recent_errors.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub total: usize,
    pub by_type: HashMap<String, u32>,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub recent: Vec<ErrorInfo>,
}

fn variant_name(err: &IngestError) -> String {
    match err {
        IngestError::FilesystemMissing(_) => "FilesystemMissing",
        IngestError::PermissionDenied(_) => "PermissionDenied",
        IngestError::UnsupportedExtension(_) => "UnsupportedExtension",
        IngestError::ParseFailure { .. } => "ParseFailure",
        IngestError::FilterError(_) => "FilterError",
        IngestError::LockConflict { .. } => "LockConflict",
        IngestError::ForeignLock { .. } => "ForeignLock",
        IngestError::LockCorrupt(_) => "LockCorrupt",
        IngestError::ResourceLimitReached(_) => "ResourceLimitReached",
        IngestError::VectorStoreUnavailable(_) => "VectorStoreUnavailable",
        IngestError::DatabaseUnavailable(_) => "DatabaseUnavailable",
        IngestError::TimeoutExceeded(_) => "TimeoutExceeded",
        IngestError::Cancelled(_) => "Cancelled",
        IngestError::Unknown(_) => "Unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_non_retryable() {
        let err = IngestError::FilesystemMissing("x".into());
        let mut ctrl = ErrorController::new(ErrorControllerConfig::default());
        let decision = ctrl.handle(&err, "scan", 0);
        assert!(!decision.should_retry);
    }

    #[test]
    fn transient_error_retries_until_max_attempts() {
        let err = IngestError::VectorStoreUnavailable("timeout".into());
        let mut ctrl = ErrorController::new(ErrorControllerConfig::default());
        assert!(ctrl.handle(&err, "commit", 0).should_retry);
        assert!(ctrl.handle(&err, "commit", 1).should_retry);
        assert!(ctrl.handle(&err, "commit", 2).should_retry);
        assert!(!ctrl.handle(&err, "commit", 3).should_retry);
    }

    #[test]
    fn delay_is_floored_at_one_second_and_grows() {
        let ctrl = ErrorController::new(ErrorControllerConfig::default());
        let d0 = ctrl.compute_delay(0);
        let d2 = ctrl.compute_delay(2);
        assert!(d0.as_secs_f64() >= 1.0);
        assert!(d2.as_secs_f64() > d0.as_secs_f64() * 2.0);
    }

    #[test]
    fn report_aggregates_by_category() {
        let mut ctrl = ErrorController::new(ErrorControllerConfig::default());
        ctrl.handle(&IngestError::DatabaseUnavailable("x".into()), "upsert", 0);
        ctrl.handle(&IngestError::DatabaseUnavailable("y".into()), "upsert", 1);
        let report = ctrl.report();
        assert_eq!(report.total, 2);
        assert_eq!(report.by_category[&ErrorCategory::Database], 2);
    }
}
