//! BlobPackageSource - blob に置かれたパッケージを「現在のパッケージ」とみなす
//!
//! fingerprint は blob の ETag。アップロードのたびに変わるので、変更検知にそのまま使える。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::StorageError;
use crate::ports::{BlobStorage, PackageInfo, PackageSource};

pub const DEFAULT_PACKAGE_CONTAINER: &str = "spindle-packages";
pub const DEFAULT_PACKAGE_BLOB: &str = "package.bin";

pub struct BlobPackageSource {
    blobs: Arc<dyn BlobStorage>,
    container: String,
    name: String,
}

impl BlobPackageSource {
    pub fn new(
        blobs: Arc<dyn BlobStorage>,
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            blobs,
            container: container.into(),
            name: name.into(),
        }
    }

    pub fn with_defaults(blobs: Arc<dyn BlobStorage>) -> Self {
        Self::new(blobs, DEFAULT_PACKAGE_CONTAINER, DEFAULT_PACKAGE_BLOB)
    }
}

#[async_trait]
impl PackageSource for BlobPackageSource {
    async fn current(&self) -> Result<Option<PackageInfo>, StorageError> {
        let package = self.blobs.get(&self.container, &self.name).await?;
        Ok(package.map(|(value, etag)| PackageInfo {
            fingerprint: etag.to_string(),
            size: Some(value.to_string().len() as u64),
        }))
    }
}
