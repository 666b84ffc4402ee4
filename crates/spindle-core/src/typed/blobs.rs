//! Blobs - BlobStorage の型付きファサード

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::StorageError;
use crate::ports::{BlobStorage, WriteCondition};

#[derive(Clone)]
pub struct Blobs {
    storage: Arc<dyn BlobStorage>,
}

impl Blobs {
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn BlobStorage> {
        &self.storage
    }

    pub async fn get_blob<T: DeserializeOwned>(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.storage.get(container, name).await? {
            Some((value, _)) => serde_json::from_value(value)
                .map(Some)
                .map_err(StorageError::Decode),
            None => Ok(None),
        }
    }

    /// Unconditional write.
    pub async fn put_blob<T: Serialize>(
        &self,
        container: &str,
        name: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(StorageError::Encode)?;
        self.storage
            .put(container, name, value, WriteCondition::Always)
            .await?;
        Ok(())
    }

    pub async fn delete_blob(&self, container: &str, name: &str) -> Result<bool, StorageError> {
        self.storage.delete(container, name).await
    }

    pub async fn list_blob_names(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.storage.list(container, prefix).await
    }
}
