//! InMemoryBlobStorage - 開発用・テスト用の blob ストレージ
//!
//! 書き込みのたびに新しい ETag（ULID 文字列）を振るので、
//! 条件付き書き込みの競合を本物と同じ形で再現できます。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::domain::StorageError;
use crate::ports::{BlobStorage, ETag, WriteCondition};

#[derive(Debug, Clone)]
struct StoredBlob {
    value: serde_json::Value,
    etag: ETag,
}

/// In-memory blob storage with optimistic concurrency.
#[derive(Default)]
pub struct InMemoryBlobStorage {
    containers: Mutex<HashMap<String, BTreeMap<String, StoredBlob>>>,
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStorage for InMemoryBlobStorage {
    async fn get(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<(serde_json::Value, ETag)>, StorageError> {
        let containers = self.containers.lock().await;
        Ok(containers
            .get(container)
            .and_then(|c| c.get(name))
            .map(|blob| (blob.value.clone(), blob.etag.clone())))
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        value: serde_json::Value,
        condition: WriteCondition,
    ) -> Result<Option<ETag>, StorageError> {
        let mut containers = self.containers.lock().await;
        let blobs = containers.entry(container.to_string()).or_default();
        let current = blobs.get(name).map(|blob| &blob.etag);

        let allowed = match (&condition, current) {
            (WriteCondition::Always, _) => true,
            (WriteCondition::IfAbsent, None) => true,
            (WriteCondition::IfAbsent, Some(_)) => false,
            (WriteCondition::IfMatch(expected), Some(actual)) => expected == actual,
            (WriteCondition::IfMatch(_), None) => false,
        };
        if !allowed {
            return Ok(None);
        }

        let etag = ETag::new(Ulid::new().to_string());
        blobs.insert(
            name.to_string(),
            StoredBlob {
                value,
                etag: etag.clone(),
            },
        );
        Ok(Some(etag))
    }

    async fn delete(&self, container: &str, name: &str) -> Result<bool, StorageError> {
        let mut containers = self.containers.lock().await;
        Ok(containers
            .get_mut(container)
            .is_some_and(|c| c.remove(name).is_some()))
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let containers = self.containers.lock().await;
        Ok(containers
            .get(container)
            .map(|c| {
                c.keys()
                    .filter(|name| name.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
