//! Square fan-out demo
//!
//! 1. 入力 blob `{run}/input/{n}` を用意し、`SquareRequest { run }` を 1 件投入する
//! 2. `SquareRequest` → 入力を列挙し、1 入力につき 1 件の `SquareMessage` を投入（Aleph で公開）
//! 3. `SquareMessage` → 入力を 2 乗して書き戻し、カウンタを 1 減らす
//! 4. 最後の兄弟だけが `SumMessage` を投入 → 合計を `{run}/result` に書く
//!
//! 入力が `0..10` なら結果は 0² + 1² + … + 9² = 285。

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use spindle_core::WorkerConfig;
use spindle_core::app::{
    ALEPH, BatchContext, CounterName, Providers, RuntimeBuilder, ServiceRuntime, WorkerBootstrap,
};
use spindle_core::domain::{LeasedMessage, QueueServiceSettings, ServiceError, StorageError};
use spindle_core::impls::BlobPackageSource;
use spindle_core::ports::{BlobStorage, EventSink, QueueStorage};
use spindle_core::typed::{Blobs, Message, QueueService};

pub const DEMO_CONTAINER: &str = "spindle-demo";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareRequest {
    pub run: String,
}

impl Message for SquareRequest {
    const TYPE: &'static str = "demo.square.request.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareMessage {
    pub run: String,
    pub input: String,
    pub output: String,
    pub counter: CounterName,
}

impl Message for SquareMessage {
    const TYPE: &'static str = "demo.square.compute.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumMessage {
    pub run: String,
}

impl Message for SumMessage {
    const TYPE: &'static str = "demo.square.sum.v1";
}

fn inputs_prefix(run: &str) -> String {
    format!("{run}/input/")
}

fn squares_prefix(run: &str) -> String {
    format!("{run}/squares/")
}

/// Blob holding the final sum of `run`.
pub fn result_blob(run: &str) -> String {
    format!("{run}/result")
}

/// Write the inputs `0..count` of `run`.
pub async fn seed_inputs(blobs: &Blobs, run: &str, count: u32) -> Result<(), StorageError> {
    for n in 0..count {
        blobs
            .put_blob(DEMO_CONTAINER, &format!("{}{n}", inputs_prefix(run)), &u64::from(n))
            .await?;
    }
    Ok(())
}

pub struct FanoutService;

#[async_trait]
impl QueueService<SquareRequest> for FanoutService {
    fn settings(&self) -> QueueServiceSettings {
        QueueServiceSettings::new()
            .service_name("fanout")
            .description("fans out one square per input blob")
    }

    async fn start(
        &self,
        ctx: &BatchContext<SquareRequest>,
        message: &LeasedMessage<SquareRequest>,
    ) -> Result<(), ServiceError> {
        let run = &message.payload().run;
        let inputs = ctx
            .blobs()
            .list_blob_names(DEMO_CONTAINER, &inputs_prefix(run))
            .await?;
        let expiration = ctx.clock().now() + chrono::Duration::hours(1);
        let counter = ctx.counter(CounterName::temporary(expiration));
        counter.reset(ALEPH).await?;

        let parts: Vec<SquareMessage> = inputs
            .into_iter()
            .map(|input| SquareMessage {
                run: run.clone(),
                output: input.replacen(&inputs_prefix(run), &squares_prefix(run), 1),
                input,
                counter: counter.name().clone(),
            })
            .collect();
        ctx.put_range(&parts).await?;
        info!(%run, count = parts.len(), "fan-out started");

        if counter.increment(-ALEPH + Decimal::from(parts.len())).await? <= Decimal::ZERO {
            // 兄弟が先に全部終わっていた（入力 0 件を含む）
            counter.delete().await?;
            ctx.put(&SumMessage { run: run.clone() }).await?;
        }
        Ok(())
    }
}

pub struct SquareService;

#[async_trait]
impl QueueService<SquareMessage> for SquareService {
    fn settings(&self) -> QueueServiceSettings {
        QueueServiceSettings::new().service_name("square")
    }

    async fn start(
        &self,
        ctx: &BatchContext<SquareMessage>,
        message: &LeasedMessage<SquareMessage>,
    ) -> Result<(), ServiceError> {
        let part = message.payload();
        let n: u64 = ctx
            .blobs()
            .get_blob(DEMO_CONTAINER, &part.input)
            .await?
            .ok_or_else(|| ServiceError::failed(format!("input blob {} is missing", part.input)))?;
        ctx.blobs()
            .put_blob(DEMO_CONTAINER, &part.output, &(n * n))
            .await?;

        let counter = ctx.counter(part.counter.clone());
        if counter.increment(Decimal::NEGATIVE_ONE).await? <= Decimal::ZERO {
            counter.delete().await?;
            ctx.put(&SumMessage {
                run: part.run.clone(),
            })
            .await?;
        }
        Ok(())
    }
}

pub struct SumService;

#[async_trait]
impl QueueService<SumMessage> for SumService {
    fn settings(&self) -> QueueServiceSettings {
        QueueServiceSettings::new().service_name("sum")
    }

    async fn start(
        &self,
        ctx: &BatchContext<SumMessage>,
        message: &LeasedMessage<SumMessage>,
    ) -> Result<(), ServiceError> {
        let run = &message.payload().run;
        let names = ctx
            .blobs()
            .list_blob_names(DEMO_CONTAINER, &squares_prefix(run))
            .await?;

        let mut total: u64 = 0;
        for name in &names {
            let square: Option<u64> = ctx.blobs().get_blob(DEMO_CONTAINER, name).await?;
            total += square.unwrap_or_default();
        }
        ctx.blobs()
            .put_blob(DEMO_CONTAINER, &result_blob(run), &total)
            .await?;
        info!(%run, parts = names.len(), total, "fan-in complete");
        Ok(())
    }
}

/// Builds a generation over the process-wide in-memory storage.
pub struct DemoBootstrap {
    pub queues: Arc<dyn QueueStorage>,
    pub blobs: Arc<dyn BlobStorage>,
    pub events: Arc<dyn EventSink>,
    pub config: WorkerConfig,
}

#[async_trait]
impl WorkerBootstrap for DemoBootstrap {
    async fn build(&self, generation: u64) -> Result<ServiceRuntime, ServiceError> {
        info!(generation, "building generation");
        let providers = Providers::new(
            Arc::clone(&self.queues),
            Arc::clone(&self.blobs),
            Arc::clone(&self.events),
        );
        let package = Arc::new(BlobPackageSource::new(
            Arc::clone(&self.blobs),
            self.config.package.container.clone(),
            self.config.package.blob.clone(),
        ));

        let runtime = RuntimeBuilder::from_config(self.config.clone())
            .register::<SquareRequest, _>(FanoutService)
            .and_then(|b| b.register::<SquareMessage, _>(SquareService))
            .and_then(|b| b.register::<SumMessage, _>(SumService))
            .map_err(ServiceError::failed)?
            .expect_services(&["fanout", "square", "sum"])
            .package_source(package)
            .build(providers)
            .await?;
        Ok(runtime)
    }
}
