//! IsolatedHost - 再起動可能な実行境界
//!
//! 世代（generation）= 現在のパッケージから組み立てた依存グラフ一式。
//! ホストは世代を作り、走らせ、漏れてきた障害を分類し、壊して作り直します。
//!
//! # 状態遷移
//! ```text
//! Idle ──build──▶ Running ──┬─ Continue ──(failure_backoff)──▶ Idle
//!                           ├─ Restart ──▶ Idle（InPlace）/ 終了（ExitProcess）
//!                           └─ Stop ──▶ 終了
//! ```
//!
//! # 障害の扱い（判定はここだけで行う）
//! - RestartRequested: エラーではない。作り直す
//! - TypeLoad / MissingDependency / SecurityDenied / その他: error イベントを出して続行
//! - キャンセル: shutdown 中なら停止、execution timeout なら warn を出して続行
//! - panic: spawn したタスクの JoinError として捕まえ、実行中だったサービス名を添えてその他扱い
//! - teardown の失敗だけは致命的で、`run` がエラーを返す

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use super::runtime::{ExecutionFailure, ServiceRuntime};
use super::shutdown::Shutdown;
use crate::config::{RestartMode, WorkerConfig};
use crate::domain::{
    BoxError, EventKind, FailureKind, RuntimeEvent, ServiceError, Severity,
};
use crate::ports::{Clock, EventSink, SystemClock};

/// Builds one generation from the currently deployed package.
#[async_trait]
pub trait WorkerBootstrap: Send + Sync {
    async fn build(&self, generation: u64) -> Result<ServiceRuntime, ServiceError>;

    /// Release what `build` acquired. A failure here stops the host.
    async fn teardown(&self, runtime: Arc<ServiceRuntime>) -> Result<(), BoxError> {
        drop(runtime);
        Ok(())
    }
}

/// Why `IsolatedHost::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    Shutdown,

    /// Restart requested while running in `RestartMode::ExitProcess`.
    RestartRequested,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("teardown of generation {generation} failed: {source}")]
    Teardown {
        generation: u64,
        #[source]
        source: BoxError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Restart,
    Stop,
}

pub struct IsolatedHost {
    bootstrap: Arc<dyn WorkerBootstrap>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    failure_backoff: Duration,
    restart_mode: RestartMode,
}

impl IsolatedHost {
    pub fn new(bootstrap: Arc<dyn WorkerBootstrap>, events: Arc<dyn EventSink>) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            bootstrap,
            events,
            clock: Arc::new(SystemClock),
            failure_backoff: defaults.failure_backoff(),
            restart_mode: defaults.restart_mode,
        }
    }

    pub fn with_config(mut self, config: &WorkerConfig) -> Self {
        self.failure_backoff = config.failure_backoff();
        self.restart_mode = config.restart_mode;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run generations until shutdown, a restart in exit-process mode, or a
    /// fatal teardown failure.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<HostExit, HostError> {
        let mut generation = 0;
        loop {
            if shutdown.is_requested() {
                return Ok(HostExit::Shutdown);
            }
            generation += 1;

            let step = match self.bootstrap.build(generation).await {
                Ok(runtime) => {
                    let runtime = Arc::new(runtime);
                    self.emit(
                        Severity::Info,
                        None,
                        EventKind::WorkerStarted {
                            generation,
                            package: runtime.package_fingerprint().map(str::to_string),
                        },
                    );

                    let step = self.run_generation(Arc::clone(&runtime), shutdown).await;

                    self.bootstrap
                        .teardown(runtime)
                        .await
                        .map_err(|source| HostError::Teardown { generation, source })?;
                    self.emit(
                        Severity::Debug,
                        None,
                        EventKind::GenerationStopped { generation },
                    );
                    step
                }
                Err(error) => self.handle_failure(None, &error, shutdown),
            };

            match step {
                Step::Stop => return Ok(HostExit::Shutdown),
                Step::Restart => {
                    if self.restart_mode == RestartMode::ExitProcess {
                        info!(generation, "exiting for restart");
                        return Ok(HostExit::RestartRequested);
                    }
                }
                Step::Continue => {
                    if shutdown.sleep(self.failure_backoff).await {
                        return Ok(HostExit::Shutdown);
                    }
                }
            }
        }
    }

    async fn run_generation(&self, runtime: Arc<ServiceRuntime>, shutdown: &Shutdown) -> Step {
        let task_shutdown = shutdown.clone();
        let task_runtime = Arc::clone(&runtime);
        let joined =
            tokio::spawn(async move { task_runtime.execute(&task_shutdown).await }).await;

        match joined {
            Ok(Ok(())) => Step::Stop,
            Ok(Err(ExecutionFailure { service, error })) => {
                self.handle_failure(service, &error, shutdown)
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    format!("work logic panicked: {}", panic_message(join_error.into_panic()))
                } else {
                    "generation task was aborted".to_string()
                };
                // panic で抜けたサービスは in_execution に残っている
                let service = runtime.service_in_execution().await;
                error!(service = service.as_deref().unwrap_or("runtime"), "{message}");
                self.report(Severity::Error, service, FailureKind::Unclassified, message);
                Step::Continue
            }
        }
    }

    fn handle_failure(
        &self,
        service: Option<String>,
        error: &ServiceError,
        shutdown: &Shutdown,
    ) -> Step {
        let kind = FailureKind::classify(error);
        match kind {
            FailureKind::RestartRequested => {
                let reason = match error {
                    ServiceError::RestartRequested { reason } => reason.clone(),
                    other => other.to_string(),
                };
                info!(%reason, "restart requested");
                self.emit(Severity::Info, service, EventKind::RestartRequested { reason });
                Step::Restart
            }
            FailureKind::Cancellation if shutdown.is_requested() => Step::Stop,
            FailureKind::Cancellation => {
                self.report(Severity::Warn, service, kind, error.to_string());
                Step::Continue
            }
            FailureKind::MissingDependency => {
                let message = format!("{error} (a referenced package is probably missing)");
                self.report(Severity::Error, service, kind, message);
                Step::Continue
            }
            FailureKind::TypeLoad | FailureKind::SecurityDenied | FailureKind::Unclassified => {
                self.report(Severity::Error, service, kind, error.to_string());
                Step::Continue
            }
        }
    }

    fn report(
        &self,
        severity: Severity,
        service: Option<String>,
        failure: FailureKind,
        message: String,
    ) {
        self.events.emit(RuntimeEvent::service_failed(
            self.clock.now(),
            severity,
            service,
            failure,
            message,
        ));
    }

    fn emit(&self, severity: Severity, service: Option<String>, kind: EventKind) {
        self.events
            .emit(RuntimeEvent::new(self.clock.now(), severity, service, kind));
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
