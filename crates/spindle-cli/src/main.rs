mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spindle_core::app::{HostExit, IsolatedHost, shutdown_channel};
use spindle_core::impls::{InMemoryBlobStorage, InMemoryQueueStorage, TracingEventSink};
use spindle_core::ports::{BlobStorage, EventSink, QueueStorage, WriteCondition};
use spindle_core::typed::{Blobs, Queues};
use spindle_core::{RestartMode, WorkerConfig};

use crate::demo::{DemoBootstrap, SquareRequest};

/// Exit status asking the supervisor to start a fresh process (EX_TEMPFAIL).
const RESTART_EXIT_CODE: i32 = 75;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RestartModeArg {
    InPlace,
    ExitProcess,
}

impl From<RestartModeArg> for RestartMode {
    fn from(arg: RestartModeArg) -> Self {
        match arg {
            RestartModeArg::InPlace => RestartMode::InPlace,
            RestartModeArg::ExitProcess => RestartMode::ExitProcess,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "spindle")]
#[command(about = "Lease-based queue worker (in-memory square fan-out demo)", long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long, env = "SPINDLE_CONFIG")]
    config: Option<PathBuf>,

    /// What to do when a restart is requested
    #[arg(long, value_enum)]
    restart_mode: Option<RestartModeArg>,

    /// Sleep after a pass that found no work
    #[arg(long)]
    idle_delay_ms: Option<u64>,

    /// Number of input blobs squared by the demo fan-out
    #[arg(long, default_value = "10")]
    demo_blobs: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration, then let CLI flags win
    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(mode) = args.restart_mode {
        config.restart_mode = mode.into();
    }
    if let Some(idle_delay_ms) = args.idle_delay_ms {
        config.idle_delay_ms = idle_delay_ms;
    }
    config.validate()?;

    let queues: Arc<dyn QueueStorage> = Arc::new(InMemoryQueueStorage::default());
    let blobs: Arc<dyn BlobStorage> = Arc::new(InMemoryBlobStorage::new());
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    // The "deployed package"; overwriting this blob triggers a restart.
    blobs
        .put(
            &config.package.container,
            &config.package.blob,
            json!({ "version": env!("CARGO_PKG_VERSION") }),
            WriteCondition::Always,
        )
        .await?;
    let run = format!("run-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"));
    demo::seed_inputs(&Blobs::new(Arc::clone(&blobs)), &run, args.demo_blobs).await?;
    Queues::new(Arc::clone(&queues))
        .put(&SquareRequest { run: run.clone() })
        .await?;
    info!(%run, inputs = args.demo_blobs, "demo run queued");

    let bootstrap = Arc::new(DemoBootstrap {
        queues,
        blobs,
        events: Arc::clone(&events),
        config: config.clone(),
    });
    let host = IsolatedHost::new(bootstrap, events).with_config(&config);

    let (handle, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            handle.request();
        }
    });

    match host.run(&shutdown).await? {
        HostExit::Shutdown => {
            info!("worker stopped");
            Ok(())
        }
        HostExit::RestartRequested => {
            info!(code = RESTART_EXIT_CODE, "exiting for restart");
            std::process::exit(RESTART_EXIT_CODE);
        }
    }
}
