//! C4 Block Extractors: a capability interface implemented by three
//! concrete extractors, dispatched through a `Registry` by extension (MIME
//! lookup would precede extension per §4.4, but this crate has no MIME
//! sniffing dependency — extension dispatch covers the spec's named
//! extractors). Grounded on the teacher's `LanguageDriver` trait shape in
//! `inspector.rs` and `filters/registry.py`.

pub mod code;
pub mod markdown;
pub mod text;

use std::path::Path;

use crate::config::ExtractorConfig;
use crate::error::IngestError;
use crate::model::FileStructure;

/// `{CanProcess(Path) -> bool, Parse(Path, Option<Content>) -> FileStructure}`
/// (§4.4/§9).
pub trait BlockExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn can_process(&self, path: &Path) -> bool;
    fn parse(&self, path: &Path, content: Option<&str>, bytes: &[u8]) -> Result<FileStructure, IngestError>;
}

/// Extension-keyed dispatch map; falls through extractors in registration
/// order.
pub struct Registry {
    extractors: Vec<Box<dyn BlockExtractor>>,
}

impl Registry {
    pub fn with_defaults(config: ExtractorConfig) -> Self {
        Self {
            extractors: vec![
                Box::new(text::TextExtractor::new()),
                Box::new(markdown::MarkdownExtractor::new()),
                Box::new(code::PythonExtractor::new(config)),
            ],
        }
    }

    pub fn get_for_path(&self, path: &Path) -> Option<&dyn BlockExtractor> {
        self.extractors.iter().find(|e| e.can_process(path)).map(|b| b.as_ref())
    }

    pub fn list_extractors(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }
}

/// Draft/temp files (filename contains draft|tmp|temp) force `chunk_type =
/// DRAFT` regardless of block kind.
pub fn is_draft_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    ["draft", "tmp", "temp"].iter().any(|needle| name.contains(needle))
}
