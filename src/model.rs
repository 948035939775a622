//! Core data model: the value types shared by every component, per §3.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a file as tracked through scan → process → completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// One filesystem entry discovered by the scanner.
///
/// Invariant: `path` is non-empty; for non-directories `size_bytes` matches
/// the stat taken at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size_bytes: u64,
    pub mtime: DateTime<Utc>,
    pub is_dir: bool,
    pub status: FileStatus,
    pub last_processed: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
}

impl FileInfo {
    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(&self.path)
            .extension()
            .and_then(|e| e.to_str())
    }
}

/// Result of one scan pass over a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub path: String,
    pub file_count: usize,
    pub total_size: u64,
    pub supported: Vec<String>,
    pub unsupported: Vec<String>,
    pub subdirectories: Vec<String>,
    pub scan_errors: Vec<String>,
    pub processing_status: String,
    pub last_scan_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Active,
    Expired,
    Orphaned,
    Released,
}

/// On-disk lock at `<directory>/.processing.lock`.
///
/// Invariant: exactly one active lock per directory system-wide;
/// `process_id` must correspond to an alive process for the lock to be
/// considered active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub process_id: u32,
    pub created_at: DateTime<Utc>,
    pub directory: String,
    pub status: LockStatus,
    pub lock_file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Tagged union of block shapes a `BlockExtractor` can emit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BlockKind {
    Paragraph,
    Heading { level: u32 },
    ListItem,
    Quote,
    CodeBlock { language: Option<String> },
    Function { name: String },
    Class { name: String },
    Method { name: String },
    Comment,
    Docstring,
    Section,
    Title,
    Table,
    Image,
    Link,
    Metadata,
    Import,
    Variable,
}

impl BlockKind {
    /// "common invariants" — the total mapping from block kind to
    /// chunk type (draft-file override applied by the caller separately).
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            BlockKind::CodeBlock { .. }
            | BlockKind::Function { .. }
            | BlockKind::Class { .. }
            | BlockKind::Method { .. } => ChunkType::CodeBlock,
            BlockKind::Comment | BlockKind::Docstring => ChunkType::Comment,
            _ => ChunkType::DocBlock,
        }
    }
}

/// Byte/line span of a block within its source file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Span {
    pub start_line: usize,
    pub end_line: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// A semantically coherent span of a source file produced by an extractor.
///
/// Ordering invariant: within a file, blocks are sorted by
/// `(span.start_line, span.start_offset)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub block_id: String,
    pub content: String,
    pub kind: BlockKind,
    pub language: Option<String>,
    pub span: Span,
    pub level: u32,
    pub parent_id: Option<String>,
    pub title: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub tags: Vec<String>,
    pub complexity_score: f64,
    pub importance_score: f64,
}

/// Output of a `BlockExtractor` for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStructure {
    pub file_path: String,
    pub file_size: u64,
    pub file_hash: String,
    pub modified_at: DateTime<Utc>,
    pub blocks: Vec<Block>,
    pub language: Option<String>,
    pub encoding: String,
    pub filter_name: String,
    pub filter_version: String,
    pub parsed_at: DateTime<Utc>,
    pub processing_time: f64,
    pub total_characters: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkType {
    CodeBlock,
    Comment,
    Message,
    DocBlock,
    Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    New,
}

/// A size-bounded unit emitted to the vector store.
///
/// Invariants: `min_chunk_size <= content.len() <= max_chunk_size` (the
/// last chunk of a file may fall below `min` when nothing else merges into
/// it); `ordinal` values are unique and dense per file; `source_id` is
/// identical for every chunk produced from the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: Uuid,
    pub source_id: Uuid,
    pub source_path: String,
    pub content: String,
    pub ordinal: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub source_lines_start: usize,
    pub source_lines_end: usize,
    pub chunk_type: ChunkType,
    pub status: ChunkStatus,
    pub language: Option<String>,
    pub category: Option<String>,
    pub title: Option<String>,
    pub quality_score: f64,
    pub coverage: f64,
    pub cohesion: f64,
    pub block_type: String,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
    /// Always empty at emission: embedding generation is the vector store's
    /// responsibility, not the core pipeline's (§1, §6).
    pub embedding: Vec<f32>,
}

/// One row per processed file in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub record_id: Uuid,
    pub source_id: Uuid,
    pub path: String,
    pub size_bytes: u64,
    pub mtime: DateTime<Utc>,
    pub status: RecordStatus,
    pub chunks_created: usize,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_kind_chunk_type_mapping_is_total() {
        assert_eq!(
            BlockKind::Function { name: "f".into() }.chunk_type(),
            ChunkType::CodeBlock
        );
        assert_eq!(BlockKind::Docstring.chunk_type(), ChunkType::Comment);
        assert_eq!(BlockKind::Paragraph.chunk_type(), ChunkType::DocBlock);
        assert_eq!(BlockKind::Heading { level: 1 }.chunk_type(), ChunkType::DocBlock);
    }

    #[test]
    fn file_record_round_trips_through_json() {
        let record = FileRecord {
            record_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            path: "/tmp/a.txt".into(),
            size_bytes: 10,
            mtime: Utc::now(),
            status: RecordStatus::Completed,
            chunks_created: 2,
            last_error: None,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.record_id, record.record_id);
        assert_eq!(back.source_id, record.source_id);
        assert_eq!(back.chunks_created, record.chunks_created);
    }
}
