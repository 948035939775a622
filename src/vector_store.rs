//! Vector-store contract consumed by `FileProcessor`: `health_check`,
//! `create_chunk`, `delete_chunk`. The real service lives outside this
//! crate's scope; `InMemoryVectorStore` is the reference implementation
//! used by tests and as a runnable default. Retargets the teacher's
//! `IndexStore`/`FileIndexEntry` flat-map shape from an embedding/search
//! index to an idempotent chunk store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::IngestError;
use crate::model::Chunk;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
    pub version: Option<String>,
}

#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    async fn health_check(&self) -> Result<HealthStatus, IngestError>;
    async fn create_chunk(&self, chunk: &Chunk) -> Result<(), IngestError>;
    async fn delete_chunk(&self, id: Uuid) -> Result<(), IngestError>;
}

/// Flat map of chunk id -> stored chunk, mirroring the teacher's
/// `IndexStore { entries: HashMap<String, FileIndexEntry> }` shape.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: Mutex<HashMap<Uuid, Chunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("vector store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: Uuid) -> Option<Chunk> {
        self.entries.lock().expect("vector store mutex poisoned").get(&id).cloned()
    }
}

#[async_trait]
impl VectorStoreClient for InMemoryVectorStore {
    async fn health_check(&self) -> Result<HealthStatus, IngestError> {
        Ok(HealthStatus {
            status: "ok".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        })
    }

    async fn create_chunk(&self, chunk: &Chunk) -> Result<(), IngestError> {
        let mut entries = self.entries.lock().expect("vector store mutex poisoned");
        entries.insert(chunk.chunk_id, chunk.clone());
        Ok(())
    }

    async fn delete_chunk(&self, id: Uuid) -> Result<(), IngestError> {
        let mut entries = self.entries.lock().expect("vector store mutex poisoned");
        entries.remove(&id);
        Ok(())
    }
}

/// Test double that fails `create_chunk` past a configured count, used to
/// exercise scenario 5 (rollback on vector-store failure).
#[cfg(test)]
pub struct FlakyVectorStore {
    inner: InMemoryVectorStore,
    succeed_for: usize,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FlakyVectorStore {
    pub fn new(succeed_for: usize) -> Self {
        Self {
            inner: InMemoryVectorStore::new(),
            succeed_for,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl VectorStoreClient for FlakyVectorStore {
    async fn health_check(&self) -> Result<HealthStatus, IngestError> {
        self.inner.health_check().await
    }

    async fn create_chunk(&self, chunk: &Chunk) -> Result<(), IngestError> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call >= self.succeed_for {
            return Err(IngestError::VectorStoreUnavailable("simulated failure".to_string()));
        }
        self.inner.create_chunk(chunk).await
    }

    async fn delete_chunk(&self, id: Uuid) -> Result<(), IngestError> {
        self.inner.delete_chunk(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkStatus, ChunkType};
    use std::collections::HashMap as StdHashMap;

    fn chunk(ordinal: usize) -> Chunk {
        Chunk {
            chunk_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            source_path: "/tmp/a.txt".to_string(),
            content: "hello".to_string(),
            ordinal,
            start_offset: 0,
            end_offset: 5,
            source_lines_start: 0,
            source_lines_end: 0,
            chunk_type: ChunkType::DocBlock,
            status: ChunkStatus::New,
            language: None,
            category: None,
            title: None,
            quality_score: 0.5,
            coverage: 0.5,
            cohesion: 0.0,
            block_type: "Paragraph".to_string(),
            tags: Vec::new(),
            metadata: StdHashMap::new(),
            embedding: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_then_delete_round_trips() {
        let store = InMemoryVectorStore::new();
        let c = chunk(0);
        store.create_chunk(&c).await.unwrap();
        assert_eq!(store.len(), 1);
        store.delete_chunk(c.chunk_id).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn health_check_reports_ok() {
        let store = InMemoryVectorStore::new();
        let health = store.health_check().await.unwrap();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn flaky_store_fails_after_configured_successes() {
        let store = FlakyVectorStore::new(1);
        store.create_chunk(&chunk(0)).await.unwrap();
        let result = store.create_chunk(&chunk(1)).await;
        assert!(result.is_err());
    }
}
