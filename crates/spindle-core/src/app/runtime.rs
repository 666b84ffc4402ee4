//! ServiceRuntime - 1 世代ぶんのスケジューラループ
//!
//! 登録されたサービスを登録順に 1 回ずつ `run_once` し、それを繰り返します。
//!
//! # 責務
//! - busy / idle の遷移を EventSink に出す
//! - 仕事がなかった周回のあとは `idle_delay` だけ休む（shutdown で中断）
//! - パッケージの fingerprint が変わったら `RestartRequested` を上げる
//! - 失敗は分類せず、実行中だったサービス名を添えてそのまま返す

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::providers::Providers;
use super::shutdown::Shutdown;
use crate::domain::{RuntimeEvent, ServiceError};
use crate::ports::PackageSource;
use crate::typed::{CloudService, ServiceRegistry};

/// A failure that escaped a generation, with the service that was running.
#[derive(Debug, thiserror::Error)]
#[error("{}: {error}", .service.as_deref().unwrap_or("runtime"))]
pub struct ExecutionFailure {
    pub service: Option<String>,
    #[source]
    pub error: ServiceError,
}

impl ExecutionFailure {
    fn runtime(error: ServiceError) -> Self {
        Self {
            service: None,
            error,
        }
    }
}

/// Package change detection state.
struct PackageWatch {
    source: Arc<dyn PackageSource>,
    fingerprint: Option<String>,
    interval: Duration,
}

pub struct ServiceRuntime {
    registry: ServiceRegistry,
    enabled: Option<Vec<String>>,
    providers: Providers,
    idle_delay: Duration,
    package: Option<PackageWatch>,
    in_execution: Mutex<Option<String>>,
}

impl ServiceRuntime {
    pub fn new(registry: ServiceRegistry, providers: Providers) -> Self {
        Self {
            registry,
            enabled: None,
            providers,
            idle_delay: Duration::from_secs(1),
            package: None,
            in_execution: Mutex::new(None),
        }
    }

    /// Restrict the loop to these services, in this order.
    pub fn with_enabled(mut self, services: Option<Vec<String>>) -> Self {
        self.enabled = services;
        self
    }

    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    /// Watch `source` and request a restart once its fingerprint differs from
    /// `fingerprint` (the package this generation was built from).
    pub fn with_package_watch(
        mut self,
        source: Arc<dyn PackageSource>,
        fingerprint: Option<String>,
        interval: Duration,
    ) -> Self {
        self.package = Some(PackageWatch {
            source,
            fingerprint,
            interval,
        });
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    /// Fingerprint of the package this generation runs.
    pub fn package_fingerprint(&self) -> Option<&str> {
        self.package.as_ref()?.fingerprint.as_deref()
    }

    /// Name of the service currently inside `run_once`.
    pub async fn service_in_execution(&self) -> Option<String> {
        self.in_execution.lock().await.clone()
    }

    /// Run until shutdown (`Ok`) or until a failure escapes (`Err`).
    pub async fn execute(&self, shutdown: &Shutdown) -> Result<(), ExecutionFailure> {
        let services = self.active_services().map_err(ExecutionFailure::runtime)?;
        info!(services = services.len(), "service runtime started");

        let mut busy = false;
        let mut last_package_check = Instant::now();
        loop {
            if shutdown.is_requested() {
                return Ok(());
            }

            if let Some(watch) = &self.package {
                if last_package_check.elapsed() >= watch.interval {
                    last_package_check = Instant::now();
                    self.check_package(watch).await?;
                }
            }

            let mut found_work = false;
            for service in &services {
                if shutdown.is_requested() {
                    break;
                }
                let name = service.name().to_string();
                *self.in_execution.lock().await = Some(name.clone());
                let result = service.run_once(&self.providers, shutdown).await;
                *self.in_execution.lock().await = None;

                match result {
                    Ok(feedback) => found_work |= feedback.found_work(),
                    Err(error) => {
                        return Err(ExecutionFailure {
                            service: Some(name),
                            error,
                        });
                    }
                }
            }

            let now = self.providers.clock.now();
            if found_work && !busy {
                busy = true;
                self.providers.events.emit(RuntimeEvent::scheduler_busy(now));
            } else if !found_work && busy {
                busy = false;
                self.providers.events.emit(RuntimeEvent::scheduler_idle(now));
            }

            if !found_work && shutdown.sleep(self.idle_delay).await {
                return Ok(());
            }
        }
    }

    fn active_services(&self) -> Result<Vec<Arc<dyn CloudService>>, ServiceError> {
        let Some(enabled) = &self.enabled else {
            return Ok(self.registry.services().to_vec());
        };
        enabled
            .iter()
            .map(|name| {
                self.registry
                    .get(name)
                    .ok_or_else(|| ServiceError::TypeLoad {
                        type_name: name.clone(),
                    })
            })
            .collect()
    }

    async fn check_package(&self, watch: &PackageWatch) -> Result<(), ExecutionFailure> {
        let current = match watch.source.current().await {
            Ok(current) => current.map(|info| info.fingerprint),
            Err(e) => {
                // 取得失敗は次の周期で再確認する
                warn!("package check failed: {e}");
                return Ok(());
            }
        };
        debug!(?current, "package checked");
        if current != watch.fingerprint {
            return Err(ExecutionFailure::runtime(ServiceError::restart(format!(
                "package changed: {} -> {}",
                watch.fingerprint.as_deref().unwrap_or("none"),
                current.as_deref().unwrap_or("none"),
            ))));
        }
        Ok(())
    }
}
