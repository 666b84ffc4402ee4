//! RuntimeBuilder - 1 世代ぶんのワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 設定の上書きは登録時に一度だけ適用

use std::sync::Arc;

use super::providers::Providers;
use super::runtime::ServiceRuntime;
use crate::config::WorkerConfig;
use crate::domain::{ServiceError, StorageError};
use crate::ports::PackageSource;
use crate::typed::{Message, QueueService, RegistryError, ServiceRegistry};

/// RuntimeBuilder は ServiceRuntime を構築
///
/// # 使用例
/// ```ignore
/// let runtime = RuntimeBuilder::from_config(config)
///     .register(SquareService)?
///     .expect_services(&["square"])
///     .package_source(package)
///     .build(providers)
///     .await?;
/// ```
///
/// # Fail-fast 設計
/// - expect_services() で期待されるサービス名を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
pub struct RuntimeBuilder {
    registry: ServiceRegistry,
    expected_services: Option<Vec<String>>,
    config: WorkerConfig,
    package: Option<Arc<dyn PackageSource>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing services: {0:?}. These services were expected but not registered.")]
    MissingServices(Vec<String>),

    #[error("cannot read the deployed package: {0}")]
    Package(#[source] StorageError),
}

impl From<BuildError> for ServiceError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::MissingServices(missing) => ServiceError::MissingDependency {
                dependency: missing.join(", "),
            },
            BuildError::Package(e) => ServiceError::Storage(e),
        }
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::from_config(WorkerConfig::default())
    }

    /// Overrides in `config` apply to services registered afterwards.
    pub fn from_config(config: WorkerConfig) -> Self {
        Self {
            registry: ServiceRegistry::new().with_overrides(config.overrides.clone()),
            expected_services: None,
            config,
            package: None,
        }
    }

    pub fn register<T: Message, S: QueueService<T>>(
        mut self,
        service: S,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, S>(service)?;
        Ok(self)
    }

    pub fn expect_services(mut self, names: &[&str]) -> Self {
        self.expected_services = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Enables package change detection.
    pub fn package_source(mut self, source: Arc<dyn PackageSource>) -> Self {
        self.package = Some(source);
        self
    }

    pub async fn build(self, mut providers: Providers) -> Result<ServiceRuntime, BuildError> {
        if let Some(expected) = &self.expected_services {
            let registered = self.registry.registered_names();
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !registered.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingServices(missing));
            }
        }

        // 同じワーカー内の producer も上書き後のキュー名に送る
        providers.queues = providers.queues.with_routes(self.registry.routes());

        let mut runtime = ServiceRuntime::new(self.registry, providers)
            .with_enabled(self.config.services.clone())
            .with_idle_delay(self.config.idle_delay());

        if let Some(source) = self.package {
            let fingerprint = source
                .current()
                .await
                .map_err(BuildError::Package)?
                .map(|info| info.fingerprint);
            runtime = runtime.with_package_watch(
                source,
                fingerprint,
                self.config.package_check_interval(),
            );
        }
        Ok(runtime)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueServiceSettings;
    use crate::impls::{
        BlobPackageSource, InMemoryBlobStorage, InMemoryQueueStorage, MemoryEventSink,
    };
    use crate::ports::{BlobStorage, WriteCondition};
    use crate::typed::registry::tests::{Ping, PingService};
    use std::collections::HashMap;

    fn providers() -> (Arc<InMemoryBlobStorage>, Providers) {
        let blobs = Arc::new(InMemoryBlobStorage::new());
        let providers = Providers::new(
            Arc::new(InMemoryQueueStorage::default()),
            blobs.clone(),
            Arc::new(MemoryEventSink::default()),
        );
        (blobs, providers)
    }

    #[tokio::test]
    async fn test_build_success() {
        let (_, providers) = providers();
        let name = std::any::type_name::<PingService>();
        let runtime = RuntimeBuilder::new()
            .register::<Ping, _>(PingService)
            .unwrap()
            .expect_services(&[name])
            .build(providers)
            .await;
        assert!(runtime.is_ok());
    }

    #[tokio::test]
    async fn test_build_missing_services() {
        let (_, providers) = providers();
        let runtime = RuntimeBuilder::new()
            .register::<Ping, _>(PingService)
            .unwrap()
            .expect_services(&["billing"])
            .build(providers)
            .await;
        assert!(matches!(
            runtime,
            Err(BuildError::MissingServices(missing)) if missing == vec!["billing".to_string()]
        ));

        let as_service_error = ServiceError::from(BuildError::MissingServices(vec!["x".into()]));
        assert!(matches!(as_service_error, ServiceError::MissingDependency { .. }));
    }

    #[tokio::test]
    async fn config_override_routes_producers() {
        let (_, providers) = providers();
        let mut config = WorkerConfig::default();
        config.overrides = HashMap::from([(
            std::any::type_name::<PingService>().to_string(),
            QueueServiceSettings::new().queue_name("pings-override"),
        )]);

        let runtime = RuntimeBuilder::from_config(config)
            .register::<Ping, _>(PingService)
            .unwrap()
            .build(providers)
            .await
            .unwrap();

        assert_eq!(
            runtime.providers().queues.queue_for::<Ping>().as_str(),
            "pings-override"
        );
    }

    #[tokio::test]
    async fn records_the_package_fingerprint() {
        let (blobs, providers) = providers();
        let etag = blobs
            .put("pkg", "app", serde_json::json!(1), WriteCondition::Always)
            .await
            .unwrap()
            .unwrap();

        let runtime = RuntimeBuilder::new()
            .package_source(Arc::new(BlobPackageSource::new(blobs.clone(), "pkg", "app")))
            .build(providers)
            .await
            .unwrap();

        assert_eq!(runtime.package_fingerprint(), Some(etag.as_str()));
    }
}
