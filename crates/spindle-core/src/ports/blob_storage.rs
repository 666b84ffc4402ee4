//! BlobStorage port - ETag 付きの key-value ストレージ
//!
//! 分散カウンタはこの port の条件付き書き込み（楽観的排他）だけで成り立っています。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::StorageError;

/// Opaque version token of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Precondition of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Unconditional overwrite.
    Always,

    /// Only if no blob exists under that name.
    IfAbsent,

    /// Only if the blob is still at this version.
    IfMatch(ETag),
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Read the value and its version token.
    async fn get(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<(serde_json::Value, ETag)>, StorageError>;

    /// Conditional write. `Ok(None)` means the condition did not hold.
    async fn put(
        &self,
        container: &str,
        name: &str,
        value: serde_json::Value,
        condition: WriteCondition,
    ) -> Result<Option<ETag>, StorageError>;

    /// `Ok(false)` when there was nothing to delete.
    async fn delete(&self, container: &str, name: &str) -> Result<bool, StorageError>;

    /// Blob names in `container` starting with `prefix`, sorted.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn etag(&self, container: &str, name: &str) -> Result<Option<ETag>, StorageError> {
        Ok(self.get(container, name).await?.map(|(_, etag)| etag))
    }
}
