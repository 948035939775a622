//! Metadata-store contract consumed by `FileProcessor`:
//! `create_file_record` (upsert by `source_id`, Open Question 3) and
//! `get_file_record`. The real database lives outside this crate's scope;
//! `InMemoryMetadataStore` is the reference implementation used by tests
//! and as a runnable default, in the same flat-map shape as
//! `vector_store.rs`'s `InMemoryVectorStore`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::IngestError;
use crate::model::FileRecord;

#[async_trait]
pub trait MetadataStoreClient: Send + Sync {
    /// Upsert keyed on `source_id` (Open Question 3, resolved in
    /// `DESIGN.md`: upsert, not insert).
    async fn create_file_record(&self, record: FileRecord) -> Result<(), IngestError>;
    async fn get_file_record(&self, source_id: Uuid) -> Result<Option<FileRecord>, IngestError>;
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<HashMap<Uuid, FileRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("metadata store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetadataStoreClient for InMemoryMetadataStore {
    async fn create_file_record(&self, mut record: FileRecord) -> Result<(), IngestError> {
        record.updated_at = Utc::now();
        let mut records = self.records.lock().expect("metadata store mutex poisoned");
        records.insert(record.source_id, record);
        Ok(())
    }

    async fn get_file_record(&self, source_id: Uuid) -> Result<Option<FileRecord>, IngestError> {
        let records = self.records.lock().expect("metadata store mutex poisoned");
        Ok(records.get(&source_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordStatus;

    fn record(source_id: Uuid, status: RecordStatus) -> FileRecord {
        FileRecord {
            record_id: Uuid::new_v4(),
            source_id,
            path: "/tmp/a.txt".to_string(),
            size_bytes: 10,
            mtime: Utc::now(),
            status,
            chunks_created: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryMetadataStore::new();
        let id = Uuid::new_v4();
        store.create_file_record(record(id, RecordStatus::Completed)).await.unwrap();
        let fetched = store.get_file_record(id).await.unwrap().unwrap();
        assert_eq!(fetched.source_id, id);
        assert_eq!(fetched.status, RecordStatus::Completed);
    }

    #[tokio::test]
    async fn second_write_upserts_rather_than_duplicating() {
        let store = InMemoryMetadataStore::new();
        let id = Uuid::new_v4();
        store.create_file_record(record(id, RecordStatus::Failed)).await.unwrap();
        store.create_file_record(record(id, RecordStatus::Completed)).await.unwrap();
        assert_eq!(store.len(), 1);
        let fetched = store.get_file_record(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RecordStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_source_id_is_none() {
        let store = InMemoryMetadataStore::new();
        assert!(store.get_file_record(Uuid::new_v4()).await.unwrap().is_none());
    }
}
