//! Persistence collaborators
//!
//! Entity storage and binary file storage are owned by the surrounding
//! application; the pipeline depends on these seams only. The in-memory
//! implementations back tests and single-process runs.

use crate::errors::{AppError, Result};
use crate::models::{InvoiceRecord, InvoiceStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Invoice entity storage seam
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn insert(&self, record: InvoiceRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<InvoiceRecord>>;

    /// Persist the given record over its stored version
    async fn update(&self, record: &InvoiceRecord) -> Result<()>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, id: Uuid) -> Result<bool>;

    async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<InvoiceRecord>>;
}

/// Binary file storage seam. Uploaded documents live behind opaque
/// references.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn fetch(&self, file_ref: &str) -> Result<Vec<u8>>;
}

/// In-memory invoice store
pub struct InMemoryInvoiceStore {
    records: RwLock<HashMap<Uuid, InvoiceRecord>>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryInvoiceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn insert(&self, record: InvoiceRecord) -> Result<()> {
        self.records.write().await.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<InvoiceRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(&self, record: &InvoiceRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(AppError::NotFound { id: record.id });
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<InvoiceRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect())
    }
}

/// In-memory file storage
pub struct InMemoryFileStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }

    pub async fn put(&self, file_ref: &str, content: Vec<u8>) {
        self.files.write().await.insert(file_ref.to_string(), content);
    }
}

impl Default for InMemoryFileStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn fetch(&self, file_ref: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .await
            .get(file_ref)
            .cloned()
            .ok_or_else(|| AppError::Storage {
                message: format!("no stored file for reference '{}'", file_ref),
            })
    }
}
