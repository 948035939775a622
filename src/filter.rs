//! C1 FileFilter: decide per file whether to process, by extension, size
//! band, and glob include/exclude patterns. Grounded on
//! `filters/file_filter.py` and §4.1.

use std::path::Path;

use ignore::overrides::OverrideBuilder;

use crate::config::FilterConfig;
use crate::model::FileInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilterResult {
    pub should_process: bool,
    pub reason: String,
    pub filter_name: String,
}

impl FileFilterResult {
    fn accept(reason: impl Into<String>, filter_name: &str) -> Self {
        Self {
            should_process: true,
            reason: reason.into(),
            filter_name: filter_name.to_string(),
        }
    }

    fn reject(reason: impl Into<String>, filter_name: &str) -> Self {
        Self {
            should_process: false,
            reason: reason.into(),
            filter_name: filter_name.to_string(),
        }
    }
}

pub struct FileFilter {
    config: FilterConfig,
    exclude_matcher: Option<ignore::overrides::Override>,
    include_matcher: Option<ignore::overrides::Override>,
}

impl FileFilter {
    pub fn new(config: FilterConfig) -> anyhow::Result<Self> {
        if config.min_file_size > config.max_file_size {
            anyhow::bail!("min_file_size must be <= max_file_size");
        }
        if config.max_file_size == 0 {
            anyhow::bail!("max_file_size must be positive");
        }

        let exclude_matcher = build_matcher(&config.exclude_patterns)?;
        let include_matcher = build_matcher(&config.include_patterns)?;

        Ok(Self {
            config,
            exclude_matcher,
            include_matcher,
        })
    }

    /// `Filter(file) -> {accepted|rejected, reason, filter_name}`.
    /// Evaluation order, first rejection wins: extension -> size band ->
    /// exclude patterns -> include patterns.
    pub fn filter(&self, file: &FileInfo) -> FileFilterResult {
        let extension = self.check_extension(file);
        if !extension.should_process {
            return extension;
        }
        let size = self.check_size(file);
        if !size.should_process {
            return size;
        }
        let exclude = self.check_exclude(file);
        if !exclude.should_process {
            return exclude;
        }
        let include = self.check_include(file);
        if !include.should_process {
            return include;
        }
        FileFilterResult::accept("file passes all filters", "file_filter")
    }

    /// Per-file evaluation errors are isolated: they surface as a rejection
    /// with reason `"filtering error: <text>"`, never abort the batch
    /// (§4.1).
    pub fn filter_files(&self, files: &[FileInfo]) -> Vec<FileFilterResult> {
        files
            .iter()
            .map(|f| {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.filter(f)))
                    .unwrap_or_else(|_| FileFilterResult::reject("filtering error: panic during evaluation", "file_filter"))
            })
            .collect()
    }

    fn check_extension(&self, file: &FileInfo) -> FileFilterResult {
        if self.config.supported_extensions.is_empty() {
            return FileFilterResult::accept("no extension restrictions", "extension_filter");
        }
        let ext = file.extension().unwrap_or("").to_ascii_lowercase();
        let matches = self
            .config
            .supported_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext));
        if matches {
            FileFilterResult::accept(format!("extension {ext} is supported"), "extension_filter")
        } else {
            FileFilterResult::reject(format!("extension {ext} is not supported"), "extension_filter")
        }
    }

    fn check_size(&self, file: &FileInfo) -> FileFilterResult {
        if file.size_bytes < self.config.min_file_size {
            return FileFilterResult::reject(
                format!(
                    "file size {} is below minimum {}",
                    file.size_bytes, self.config.min_file_size
                ),
                "size_filter",
            );
        }
        if file.size_bytes > self.config.max_file_size {
            return FileFilterResult::reject(
                format!(
                    "file size {} exceeds maximum {}",
                    file.size_bytes, self.config.max_file_size
                ),
                "size_filter",
            );
        }
        FileFilterResult::accept(
            format!("file size {} is within acceptable range", file.size_bytes),
            "size_filter",
        )
    }

    fn check_exclude(&self, file: &FileInfo) -> FileFilterResult {
        let Some(matcher) = &self.exclude_matcher else {
            return FileFilterResult::accept("no pattern restrictions", "exclude_filter");
        };
        if matcher.matched(&file.path, false).is_whitelist() {
            FileFilterResult::reject("file matches exclude pattern", "exclude_filter")
        } else {
            FileFilterResult::accept("file does not match exclude patterns", "exclude_filter")
        }
    }

    fn check_include(&self, file: &FileInfo) -> FileFilterResult {
        let Some(matcher) = &self.include_matcher else {
            return FileFilterResult::accept("no pattern restrictions", "include_filter");
        };
        if matcher.matched(&file.path, false).is_whitelist() {
            FileFilterResult::accept("file matches an include pattern", "include_filter")
        } else {
            FileFilterResult::reject("file does not match any include patterns", "include_filter")
        }
    }
}

fn build_matcher(patterns: &[String]) -> anyhow::Result<Option<ignore::overrides::Override>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = OverrideBuilder::new(Path::new("/"));
    for pattern in patterns {
        builder.add(pattern)?;
    }
    Ok(Some(builder.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn file(path: &str, size: u64) -> FileInfo {
        FileInfo {
            path: path.to_string(),
            size_bytes: size,
            mtime: Utc::now(),
            is_dir: false,
            status: crate::model::FileStatus::Pending,
            last_processed: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn extension_rejection_wins_before_size() {
        let filter = FileFilter::new(FilterConfig {
            supported_extensions: vec!["txt".into()],
            max_file_size: 10,
            min_file_size: 0,
            ..Default::default()
        })
        .unwrap();
        let result = filter.filter(&file("/a.py", 1000));
        assert!(!result.should_process);
        assert_eq!(result.filter_name, "extension_filter");
    }

    #[test]
    fn size_below_minimum_is_rejected() {
        let filter = FileFilter::new(FilterConfig {
            min_file_size: 100,
            ..Default::default()
        })
        .unwrap();
        let result = filter.filter(&file("/a.txt", 10));
        assert!(!result.should_process);
        assert_eq!(result.filter_name, "size_filter");
    }

    #[test]
    fn empty_supported_extensions_means_no_restriction() {
        let filter = FileFilter::new(FilterConfig::default()).unwrap();
        let result = filter.filter(&file("/a.whatever", 10));
        assert!(result.should_process);
    }

    #[test]
    fn exclude_pattern_rejects_matching_path() {
        let filter = FileFilter::new(FilterConfig {
            exclude_patterns: vec!["*.log".into()],
            ..Default::default()
        })
        .unwrap();
        let result = filter.filter(&file("/var/app.log", 10));
        assert!(!result.should_process);
        assert_eq!(result.filter_name, "exclude_filter");
    }

    #[test]
    fn nonempty_include_patterns_reject_non_matching() {
        let filter = FileFilter::new(FilterConfig {
            include_patterns: vec!["*.md".into()],
            ..Default::default()
        })
        .unwrap();
        let result = filter.filter(&file("/a.txt", 10));
        assert!(!result.should_process);
        assert_eq!(result.filter_name, "include_filter");
    }

    #[test]
    fn filter_files_isolates_batch_from_panics() {
        let filter = FileFilter::new(FilterConfig::default()).unwrap();
        let files = vec![file("/a.txt", 10), file("/b.txt", 20)];
        let results = filter.filter_files(&files);
        assert_eq!(results.len(), 2);
    }
}
