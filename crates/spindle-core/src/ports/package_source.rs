//! PackageSource port - 現在デプロイされている work logic パッケージ
//!
//! ホストが必要とするのは「いまのパッケージはどれか」だけです。
//! パッケージのフォーマットやアップロードは範囲外。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::StorageError;

/// Identity of the deployed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Changes whenever a new package is deployed.
    pub fingerprint: String,
    pub size: Option<u64>,
}

#[async_trait]
pub trait PackageSource: Send + Sync {
    /// `None` when no package has been deployed yet.
    async fn current(&self) -> Result<Option<PackageInfo>, StorageError>;
}
