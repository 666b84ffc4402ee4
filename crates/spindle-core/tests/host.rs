//! Isolated host: failure classification, restart and shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use spindle_core::app::{
    BatchContext, HostError, HostExit, IsolatedHost, Providers, ServiceRuntime, ShutdownHandle,
    WorkerBootstrap, shutdown_channel,
};
use spindle_core::domain::{
    BoxError, EventKind, FailureKind, LeasedMessage, QueueServiceSettings, ServiceError,
    Severity, StorageError,
};
use spindle_core::impls::{InMemoryBlobStorage, InMemoryQueueStorage, MemoryEventSink};
use spindle_core::ports::{PackageInfo, PackageSource, QueueStorage};
use spindle_core::typed::{Message, QueueService, ServiceRegistry};
use spindle_core::{RestartMode, WorkerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Job;

impl Message for Job {
    const TYPE: &'static str = "host.job.v1";
}

#[derive(Clone, Copy)]
enum Behavior {
    Fail,
    Panic,
    Hang,
}

struct JobService {
    behavior: Behavior,
    timeout: Duration,
}

#[async_trait]
impl QueueService<Job> for JobService {
    fn settings(&self) -> QueueServiceSettings {
        QueueServiceSettings::new()
            .service_name("job")
            .execution_timeout(self.timeout)
    }

    async fn start(
        &self,
        _ctx: &BatchContext<Job>,
        _message: &LeasedMessage<Job>,
    ) -> Result<(), ServiceError> {
        match self.behavior {
            Behavior::Fail => Err(ServiceError::failed("job exploded")),
            Behavior::Panic => panic!("job panicked"),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

struct FixedPackage(&'static str);

#[async_trait]
impl PackageSource for FixedPackage {
    async fn current(&self) -> Result<Option<PackageInfo>, StorageError> {
        Ok(Some(PackageInfo {
            fingerprint: self.0.to_string(),
            size: None,
        }))
    }
}

/// What generation `n` does.
enum Plan {
    FailBuild(ServiceError),
    Run(Behavior, Duration),
    /// Built from package "v1" while "v2" is deployed.
    StalePackage,
    Shutdown,
}

struct ScriptedBootstrap {
    providers: Providers,
    handle: ShutdownHandle,
    plan: Box<dyn Fn(u64) -> Plan + Send + Sync>,
    fail_teardown: bool,
    torn_down: AtomicU64,
}

#[async_trait]
impl WorkerBootstrap for ScriptedBootstrap {
    async fn build(&self, generation: u64) -> Result<ServiceRuntime, ServiceError> {
        let runtime = match (self.plan)(generation) {
            Plan::FailBuild(error) => return Err(error),
            Plan::Shutdown => {
                self.handle.request();
                return Err(ServiceError::Cancelled);
            }
            Plan::Run(behavior, timeout) => {
                let mut registry = ServiceRegistry::new();
                registry
                    .register::<Job, _>(JobService { behavior, timeout })
                    .map_err(ServiceError::failed)?;
                ServiceRuntime::new(registry, self.providers.clone())
            }
            Plan::StalePackage => ServiceRuntime::new(ServiceRegistry::new(), self.providers.clone())
                .with_package_watch(Arc::new(FixedPackage("v2")), Some("v1".into()), Duration::ZERO),
        };
        Ok(runtime.with_idle_delay(Duration::from_millis(5)))
    }

    async fn teardown(&self, _runtime: Arc<ServiceRuntime>) -> Result<(), BoxError> {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        if self.fail_teardown {
            return Err("cannot unload generation".into());
        }
        Ok(())
    }
}

struct Harness {
    host: IsolatedHost,
    bootstrap: Arc<ScriptedBootstrap>,
    queues: Arc<InMemoryQueueStorage>,
    events: Arc<MemoryEventSink>,
    shutdown: spindle_core::app::Shutdown,
}

fn harness(
    plan: impl Fn(u64) -> Plan + Send + Sync + 'static,
    restart_mode: RestartMode,
    fail_teardown: bool,
) -> Harness {
    let queues = Arc::new(InMemoryQueueStorage::default());
    let events = Arc::new(MemoryEventSink::default());
    let providers = Providers::new(
        queues.clone(),
        Arc::new(InMemoryBlobStorage::new()),
        events.clone(),
    );
    let (handle, shutdown) = shutdown_channel();
    let bootstrap = Arc::new(ScriptedBootstrap {
        providers,
        handle,
        plan: Box::new(plan),
        fail_teardown,
        torn_down: AtomicU64::new(0),
    });
    let config = WorkerConfig {
        failure_backoff_ms: 1,
        restart_mode,
        ..WorkerConfig::default()
    };
    let host = IsolatedHost::new(bootstrap.clone(), events.clone()).with_config(&config);
    Harness {
        host,
        bootstrap,
        queues,
        events,
        shutdown,
    }
}

fn failures(events: &MemoryEventSink) -> Vec<(Severity, Option<String>, FailureKind, String)> {
    events
        .events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::ServiceFailed { failure, message } => {
                Some((e.severity, e.service, failure, message))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn deployment_failures_are_logged_and_the_host_continues() {
    let h = harness(
        |generation| match generation {
            1 => Plan::FailBuild(ServiceError::TypeLoad {
                type_name: "demo.square.v1".into(),
            }),
            2 => Plan::FailBuild(ServiceError::MissingDependency {
                dependency: "blob-client".into(),
            }),
            3 => Plan::FailBuild(ServiceError::SecurityDenied {
                resource: "/etc/secrets".into(),
            }),
            _ => Plan::Shutdown,
        },
        RestartMode::InPlace,
        false,
    );

    let exit = h.host.run(&h.shutdown).await.unwrap();
    assert_eq!(exit, HostExit::Shutdown);

    let failures = failures(&h.events);
    let kinds: Vec<FailureKind> = failures.iter().map(|f| f.2).collect();
    assert_eq!(
        kinds,
        vec![
            FailureKind::TypeLoad,
            FailureKind::MissingDependency,
            FailureKind::SecurityDenied
        ]
    );
    assert!(failures.iter().all(|f| f.0 == Severity::Error));
    assert!(failures[0].3.contains("demo.square.v1"));
    assert!(failures[1].3.contains("probably missing"));
    assert!(failures[2].3.contains("/etc/secrets"));
}

#[tokio::test]
async fn work_failure_is_reported_with_the_service_name() {
    let h = harness(
        |generation| match generation {
            1 => Plan::Run(Behavior::Fail, Duration::from_secs(60)),
            _ => Plan::Shutdown,
        },
        RestartMode::InPlace,
        false,
    );
    h.queues
        .put(&Job::queue_name(), serde_json::json!(null))
        .await
        .unwrap();

    assert_eq!(h.host.run(&h.shutdown).await.unwrap(), HostExit::Shutdown);

    let failures = failures(&h.events);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.as_deref(), Some("job"));
    assert_eq!(failures[0].2, FailureKind::Unclassified);
    assert!(failures[0].3.contains("job exploded"));
    assert_eq!(h.bootstrap.torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panic_is_contained_at_the_boundary() {
    let h = harness(
        |generation| match generation {
            1 => Plan::Run(Behavior::Panic, Duration::from_secs(60)),
            _ => Plan::Shutdown,
        },
        RestartMode::InPlace,
        false,
    );
    h.queues
        .put(&Job::queue_name(), serde_json::json!(null))
        .await
        .unwrap();

    assert_eq!(h.host.run(&h.shutdown).await.unwrap(), HostExit::Shutdown);

    let failures = failures(&h.events);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.as_deref(), Some("job"));
    assert_eq!(failures[0].2, FailureKind::Unclassified);
    assert!(failures[0].3.contains("job panicked"));

    // panic したバッチは abandon 済みで、試行として数えられている
    let poisoned = h.queues.poisoned(&Job::queue_name()).await;
    let leased = h
        .queues
        .get(&Job::queue_name(), 32, Duration::from_secs(30), 5)
        .await
        .unwrap();
    assert!(poisoned.is_empty());
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].dequeue_count, 2);
}

#[tokio::test(start_paused = true)]
async fn execution_timeout_is_a_warning_and_resumes_the_message() {
    let h = harness(
        |generation| match generation {
            1 => Plan::Run(Behavior::Hang, Duration::from_secs(2)),
            _ => Plan::Shutdown,
        },
        RestartMode::InPlace,
        false,
    );
    h.queues
        .put(&Job::queue_name(), serde_json::json!(null))
        .await
        .unwrap();

    assert_eq!(h.host.run(&h.shutdown).await.unwrap(), HostExit::Shutdown);

    let failures = failures(&h.events);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, Severity::Warn);
    assert_eq!(failures[0].2, FailureKind::Cancellation);

    let leased = h
        .queues
        .get(&Job::queue_name(), 32, Duration::from_secs(30), 5)
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].dequeue_count, 1);
}

#[tokio::test]
async fn shutdown_during_execution_stops_without_failure() {
    let h = harness(
        |_| Plan::Run(Behavior::Hang, Duration::from_secs(3600)),
        RestartMode::InPlace,
        false,
    );
    h.queues
        .put(&Job::queue_name(), serde_json::json!(null))
        .await
        .unwrap();

    let bootstrap = Arc::clone(&h.bootstrap);
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        bootstrap.handle.request();
    });

    assert_eq!(h.host.run(&h.shutdown).await.unwrap(), HostExit::Shutdown);
    stopper.await.unwrap();

    assert!(failures(&h.events).is_empty());
    // キャンセルされたメッセージは試行に数えない
    let leased = h
        .queues
        .get(&Job::queue_name(), 32, Duration::from_secs(30), 5)
        .await
        .unwrap();
    assert_eq!(leased[0].dequeue_count, 1);
}

#[tokio::test]
async fn package_change_rebuilds_in_place() {
    let h = harness(
        |generation| match generation {
            1 => Plan::StalePackage,
            _ => Plan::Shutdown,
        },
        RestartMode::InPlace,
        false,
    );

    assert_eq!(h.host.run(&h.shutdown).await.unwrap(), HostExit::Shutdown);

    let kinds = h.events.kinds();
    assert!(matches!(
        kinds.as_slice(),
        [
            EventKind::WorkerStarted { generation: 1, .. },
            EventKind::RestartRequested { .. },
            EventKind::GenerationStopped { generation: 1 },
        ]
    ));
    assert!(failures(&h.events).is_empty());
    assert_eq!(h.bootstrap.torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exit_process_mode_returns_restart() {
    let h = harness(|_| Plan::StalePackage, RestartMode::ExitProcess, false);

    assert_eq!(
        h.host.run(&h.shutdown).await.unwrap(),
        HostExit::RestartRequested
    );
    assert_eq!(h.bootstrap.torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn teardown_failure_is_fatal() {
    let h = harness(|_| Plan::StalePackage, RestartMode::InPlace, true);

    let result = h.host.run(&h.shutdown).await;
    assert!(matches!(result, Err(HostError::Teardown { generation: 1, .. })));
}
