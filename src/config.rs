//! Crate-wide configuration. One `Config` struct, serde-default
//! per field group in the teacher's style, loaded from an optional JSON
//! file with silent fallback to defaults when absent and a hard error when
//! present but invalid.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = ".docingest.json";

/// C1 FileFilter options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub supported_extensions: Vec<String>,
    pub max_file_size: u64,
    pub min_file_size: u64,
    pub exclude_patterns: Vec<String>,
    pub include_patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            supported_extensions: vec![],
            max_file_size: 10 * 1024 * 1024,
            min_file_size: 0,
            exclude_patterns: vec![],
            include_patterns: vec![],
        }
    }
}

/// C2 LockManager options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub lock_timeout_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_timeout_seconds: crate::lock_manager::DEFAULT_LOCK_TIMEOUT_SECONDS,
        }
    }
}

/// C3 DirectoryScanner options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub max_depth: usize,
    pub batch_size: usize,
    pub timeout_seconds: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            batch_size: 50,
            timeout_seconds: 300,
        }
    }
}

/// C4 Block Extractors options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub include_imports: bool,
    pub include_docstrings: bool,
    pub include_comments: bool,
    pub min_function_lines: usize,
    pub complexity_threshold: u32,
    pub min_paragraph_length: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            include_imports: true,
            include_docstrings: true,
            include_comments: true,
            min_function_lines: 3,
            complexity_threshold: 10,
            min_paragraph_length: 20,
        }
    }
}

/// C5 Chunker options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    pub overlap_size: usize,
    pub min_importance_score: f64,
    pub min_complexity_score: f64,
    pub preserve_structure: bool,
    pub merge_small_blocks: bool,
    pub split_large_blocks: bool,
    pub include_surrounding_context: bool,
    pub context_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            min_chunk_size: 200,
            overlap_size: 100,
            min_importance_score: 0.0,
            min_complexity_score: 0.0,
            preserve_structure: true,
            merge_small_blocks: true,
            split_large_blocks: true,
            include_surrounding_context: false,
            context_lines: 0,
        }
    }
}

/// C8 WorkerSupervisor options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_workers: usize,
    pub worker_timeout_seconds: u64,
    pub chunk_size: usize,
    pub enable_graceful_shutdown: bool,
    pub auto_restart_failed_workers: bool,
    pub max_restart_attempts: u32,
    pub graceful_shutdown_timeout_seconds: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            worker_timeout_seconds: 600,
            chunk_size: 50,
            enable_graceful_shutdown: true,
            auto_restart_failed_workers: true,
            max_restart_attempts: 3,
            graceful_shutdown_timeout_seconds: 30,
        }
    }
}

/// C9 Orchestrator options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_directories: usize,
    pub enable_cleanup_on_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_directories: 2,
            enable_cleanup_on_failure: true,
        }
    }
}

/// C10 ErrorController options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorControllerSettings {
    pub max_retry_attempts: u32,
    pub base_retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub error_threshold: u32,
}

impl Default for ErrorControllerSettings {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            base_retry_delay_ms: 5000,
            backoff_multiplier: 2.0,
            error_threshold: 10,
        }
    }
}

impl From<&ErrorControllerSettings> for crate::error::ErrorControllerConfig {
    fn from(s: &ErrorControllerSettings) -> Self {
        Self {
            max_retry_attempts: s.max_retry_attempts,
            base_retry_delay: std::time::Duration::from_millis(s.base_retry_delay_ms),
            backoff_multiplier: s.backoff_multiplier,
            error_threshold: s.error_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub filter: FilterConfig,
    pub lock: LockConfig,
    pub scanner: ScannerConfig,
    pub extractor: ExtractorConfig,
    pub chunker: ChunkerConfig,
    pub supervisor: SupervisorConfig,
    pub orchestrator: OrchestratorConfig,
    pub error_controller: ErrorControllerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            lock: LockConfig::default(),
            scanner: ScannerConfig::default(),
            extractor: ExtractorConfig::default(),
            chunker: ChunkerConfig::default(),
            supervisor: SupervisorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            error_controller: ErrorControllerSettings::default(),
        }
    }
}

/// Loads configuration from `<dir>/.docingest.json`. Falls back silently to
/// `Config::default()` when the file is absent; a present-but-invalid file
/// is a hard error (unlike the absent case) since the user clearly intended
/// to override defaults.
pub fn load_config(dir: &Path) -> anyhow::Result<Config> {
    let path = dir.join(DEFAULT_CONFIG_FILE);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(_) => return Ok(Config::default()),
    };
    let config: Config = serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("invalid config file {}: {e}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.chunker.max_chunk_size, ChunkerConfig::default().max_chunk_size);
    }

    #[test]
    fn invalid_config_file_is_a_hard_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "not json").unwrap();
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn partial_config_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            r#"{"chunker": {"max_chunk_size": 500}}"#,
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.chunker.max_chunk_size, 500);
        assert_eq!(config.chunker.min_chunk_size, ChunkerConfig::default().min_chunk_size);
    }
}
