//! C6 FileProcessor: drives extractor dispatch -> chunking -> atomic-with-
//! rollback commit to the vector store -> FileRecord upsert, for one file.
//! Grounded on `services/file_processor.py`'s `process_file` workflow and
//! scenario 5.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::error::IngestError;
use crate::extract::Registry;
use crate::ids::source_id;
use crate::metadata_store::MetadataStoreClient;
use crate::model::{Chunk, FileRecord, RecordStatus};
use crate::vector_store::VectorStoreClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FileProcessingResult {
    pub path: String,
    pub status: ProcessingStatus,
    pub chunks_created: usize,
    pub processing_time_seconds: f64,
    pub blocks: Option<usize>,
    pub error_message: Option<String>,
}

pub struct FileProcessor {
    registry: Arc<Registry>,
    chunker: Arc<Chunker>,
    vector_store: Arc<dyn VectorStoreClient>,
    metadata_store: Arc<dyn MetadataStoreClient>,
}

impl FileProcessor {
    pub fn new(
        registry: Arc<Registry>,
        chunker: Arc<Chunker>,
        vector_store: Arc<dyn VectorStoreClient>,
        metadata_store: Arc<dyn MetadataStoreClient>,
    ) -> Self {
        Self {
            registry,
            chunker,
            vector_store,
            metadata_store,
        }
    }

    /// `Process(file_path) -> FileProcessingResult`.
    pub async fn process(&self, path: &Path) -> FileProcessingResult {
        let started = Instant::now();
        let path_str = path.display().to_string();

        match self.process_inner(path, started).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(path = %path_str, error = %err, "file processing failed, attempting rollback");
                self.write_failed_record(path, &err).await;
                FileProcessingResult {
                    path: path_str,
                    status: ProcessingStatus::Failed,
                    chunks_created: 0,
                    processing_time_seconds: started.elapsed().as_secs_f64(),
                    blocks: None,
                    error_message: Some(err.to_string()),
                }
            }
        }
    }

    async fn process_inner(&self, path: &Path, started: Instant) -> Result<FileProcessingResult, IngestError> {
        if !path.exists() || !path.is_file() {
            return Err(IngestError::FilesystemMissing(path.display().to_string()));
        }
        let path_str = path.display().to_string();

        let extractor = self
            .registry
            .get_for_path(path)
            .ok_or_else(|| IngestError::UnsupportedExtension(path_str.clone()))?;

        let bytes = std::fs::read(path).map_err(IngestError::from)?;
        let structure = extractor.parse(path, None, &bytes)?;

        if structure.blocks.is_empty() {
            tracing::info!(path = %path_str, "no blocks extracted, short-circuiting");
            self.upsert_record(path, &bytes, 0, None).await?;
            return Ok(FileProcessingResult {
                path: path_str,
                status: ProcessingStatus::Completed,
                chunks_created: 0,
                processing_time_seconds: started.elapsed().as_secs_f64(),
                blocks: Some(0),
                error_message: None,
            });
        }

        let chunks = self.chunker.chunk_file_structure(&structure);
        if chunks.is_empty() {
            tracing::info!(path = %path_str, "no chunks produced, short-circuiting");
            self.upsert_record(path, &bytes, 0, None).await?;
            return Ok(FileProcessingResult {
                path: path_str,
                status: ProcessingStatus::Completed,
                chunks_created: 0,
                processing_time_seconds: started.elapsed().as_secs_f64(),
                blocks: Some(structure.blocks.len()),
                error_message: None,
            });
        }

        self.commit_with_rollback(&chunks).await?;
        self.upsert_record(path, &bytes, chunks.len(), None).await?;

        tracing::info!(path = %path_str, chunks = chunks.len(), "file processed");

        Ok(FileProcessingResult {
            path: path_str,
            status: ProcessingStatus::Completed,
            chunks_created: chunks.len(),
            processing_time_seconds: started.elapsed().as_secs_f64(),
            blocks: Some(structure.blocks.len()),
            error_message: None,
        })
    }

    /// Atomic-with-rollback commit: commits chunks in
    /// `ordinal` order; on any failure, issues `delete_chunk` for every
    /// previously stored id, best effort, then returns the underlying error.
    async fn commit_with_rollback(&self, chunks: &[Chunk]) -> Result<(), IngestError> {
        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.ordinal);

        let mut committed: Vec<Uuid> = Vec::with_capacity(ordered.len());
        for chunk in ordered {
            match self.vector_store.create_chunk(chunk).await {
                Ok(()) => committed.push(chunk.chunk_id),
                Err(err) => {
                    for id in committed.iter().rev() {
                        if let Err(rollback_err) = self.vector_store.delete_chunk(*id).await {
                            tracing::error!(chunk_id = %id, error = %rollback_err, "rollback delete_chunk failed");
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn upsert_record(&self, path: &Path, bytes: &[u8], chunks_created: usize, error: Option<String>) -> Result<(), IngestError> {
        let meta = std::fs::metadata(path).map_err(IngestError::from)?;
        let mtime = chrono::DateTime::<Utc>::from(meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH));
        let record = FileRecord {
            record_id: Uuid::new_v4(),
            source_id: source_id(&path.display().to_string()),
            path: path.display().to_string(),
            size_bytes: bytes.len() as u64,
            mtime,
            status: if error.is_some() { RecordStatus::Failed } else { RecordStatus::Completed },
            chunks_created,
            last_error: error,
            updated_at: Utc::now(),
        };
        self.metadata_store.create_file_record(record).await
    }

    async fn write_failed_record(&self, path: &Path, err: &IngestError) {
        let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let record = FileRecord {
            record_id: Uuid::new_v4(),
            source_id: source_id(&path.display().to_string()),
            path: path.display().to_string(),
            size_bytes,
            mtime: Utc::now(),
            status: RecordStatus::Failed,
            chunks_created: 0,
            last_error: Some(err.to_string()),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.metadata_store.create_file_record(record).await {
            tracing::error!(path = %path.display(), error = %e, "failed to write failure record");
        }
    }

    /// `ProcessBatch(paths[])`: per-file isolation, one file's failure never
    /// aborts another's.
    pub async fn process_batch(&self, paths: &[std::path::PathBuf]) -> Vec<FileProcessingResult> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            results.push(self.process(path).await);
        }
        results
    }
}
