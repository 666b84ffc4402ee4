//! BatchProcessor - lease ベースのバッチ実行
//!
//! 1 回の `run_once` = 最大 32 件を lease → work logic → 未解決分の後始末。
//!
//! # 後始末の規則
//! | work logic の結果 | 未解決メッセージ |
//! |---|---|
//! | 成功 | delete |
//! | キャンセル（shutdown・execution timeout） | resume_later（試行回数に数えない） |
//! | それ以外の失敗 | abandon（試行回数に数える） |
//! | panic | abandon してから panic を再送出 |
//!
//! エラーはここでは握りつぶさず、そのまま上（ランタイム → ホスト）へ返します。

use std::collections::HashSet;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::counter::{BlobCounter, CounterName};
use super::providers::Providers;
use super::shutdown::Shutdown;
use crate::domain::{
    ExecutionFeedback, LeaseHandle, LeasedMessage, MessageId, ServiceError, ServiceSettings,
    StorageError,
};
use crate::ports::Clock;
use crate::typed::{Blobs, CloudService, Message, QueueService, Queues};

/// Upper bound of messages leased by one `run_once`.
pub const MAX_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Delete,
    Abandon,
    ResumeLater,
}

/// What work logic sees during one batch.
///
/// `delete` / `abandon` / `resume_later` resolve a message. Resolving an already
/// resolved message is a no-op, and resolved messages are left alone when the
/// batch is settled.
pub struct BatchContext<T> {
    queues: Queues,
    blobs: Blobs,
    clock: Arc<dyn Clock>,
    settings: ServiceSettings,
    shutdown: Shutdown,
    resolved: Mutex<HashSet<MessageId>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Message> BatchContext<T> {
    pub fn new(providers: &Providers, settings: ServiceSettings, shutdown: Shutdown) -> Self {
        Self {
            queues: providers.queues.clone(),
            blobs: providers.blobs.clone(),
            clock: Arc::clone(&providers.clock),
            settings,
            shutdown,
            resolved: Mutex::new(HashSet::new()),
            _payload: PhantomData,
        }
    }

    pub async fn delete(&self, message: &LeasedMessage<T>) -> Result<(), StorageError> {
        self.resolve(message.handle(), Disposition::Delete).await
    }

    pub async fn abandon(&self, message: &LeasedMessage<T>) -> Result<(), StorageError> {
        self.resolve(message.handle(), Disposition::Abandon).await
    }

    pub async fn resume_later(&self, message: &LeasedMessage<T>) -> Result<(), StorageError> {
        self.resolve(message.handle(), Disposition::ResumeLater).await
    }

    /// Extend the lease by one visibility timeout. Does not resolve the message.
    ///
    /// `false` when the lease was already lost.
    pub async fn keep_alive(&self, message: &LeasedMessage<T>) -> Result<bool, StorageError> {
        if self.is_resolved(&message.handle().message_id).await {
            return Ok(false);
        }
        self.queues
            .storage()
            .keep_alive(message.handle(), self.settings.visibility_timeout())
            .await
    }

    pub async fn is_resolved(&self, message_id: &MessageId) -> bool {
        self.resolved.lock().await.contains(message_id)
    }

    pub async fn put<M: Message>(&self, message: &M) -> Result<(), StorageError> {
        self.queues.put(message).await
    }

    pub async fn put_range<M: Message>(&self, messages: &[M]) -> Result<(), StorageError> {
        self.queues.put_range(messages).await
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    pub fn blobs(&self) -> &Blobs {
        &self.blobs
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn counter(&self, name: CounterName) -> BlobCounter {
        BlobCounter::new(Arc::clone(self.blobs.storage()), name)
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Work logic with long loops should poll this between steps.
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_requested()
    }

    async fn resolve(
        &self,
        handle: &LeaseHandle,
        disposition: Disposition,
    ) -> Result<(), StorageError> {
        // lock を握ったまま storage を呼ぶ: 同じメッセージへの二重処理を防ぐ
        let mut resolved = self.resolved.lock().await;
        if resolved.contains(&handle.message_id) {
            return Ok(());
        }

        let storage = self.queues.storage();
        let applied = match disposition {
            Disposition::Delete => storage.delete(handle).await?,
            Disposition::Abandon => storage.abandon(handle).await?,
            Disposition::ResumeLater => storage.resume_later(handle).await?,
        };
        if !applied {
            debug!(message_id = %handle.message_id, ?disposition, "lease already lost");
        }
        resolved.insert(handle.message_id);
        Ok(())
    }

    async fn settle(
        &self,
        messages: &[LeasedMessage<T>],
        disposition: Disposition,
    ) -> Result<(), StorageError> {
        for message in messages {
            self.resolve(message.handle(), disposition).await?;
        }
        Ok(())
    }
}

/// Wraps a `QueueService<T>` into a `CloudService`.
pub struct BatchProcessor<T: Message, S: QueueService<T>> {
    service: Arc<S>,
    settings: ServiceSettings,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Message, S: QueueService<T>> BatchProcessor<T, S> {
    pub fn new(service: Arc<S>, settings: ServiceSettings) -> Self {
        Self {
            service,
            settings,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Message, S: QueueService<T>> CloudService for BatchProcessor<T, S> {
    fn name(&self) -> &str {
        self.settings.service_name()
    }

    fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    fn message_type(&self) -> &'static str {
        T::TYPE
    }

    async fn run_once(
        &self,
        providers: &Providers,
        shutdown: &Shutdown,
    ) -> Result<ExecutionFeedback, ServiceError> {
        let settings = &self.settings;
        let messages = providers
            .queues
            .get::<T>(
                settings.queue_name(),
                MAX_BATCH_SIZE,
                settings.visibility_timeout(),
                settings.max_processing_trials(),
            )
            .await?;
        if messages.is_empty() {
            return Ok(ExecutionFeedback::Skipped);
        }
        debug!(service = %settings.service_name(), count = messages.len(), "batch leased");

        let ctx = BatchContext::<T>::new(providers, settings.clone(), shutdown.clone());
        let timeout = settings.execution_timeout();
        let dispatch = AssertUnwindSafe(self.service.start_range(&ctx, &messages)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = shutdown.requested() => Ok(Err(ServiceError::Cancelled)),
            outcome = tokio::time::timeout(timeout, dispatch) => {
                outcome.unwrap_or(Ok(Err(ServiceError::TimedOut(timeout))))
            }
        };
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                // panic は host 側の境界で扱う。メッセージだけ先に返しておく
                if let Err(e) = ctx.settle(&messages, Disposition::Abandon).await {
                    warn!(service = %settings.service_name(), "abandoning panicked batch failed: {e}");
                }
                std::panic::resume_unwind(panic);
            }
        };

        match result {
            Ok(()) => {
                ctx.settle(&messages, Disposition::Delete).await?;
                Ok(ExecutionFeedback::WorkAvailable)
            }
            Err(err) => {
                let disposition = if err.is_cancellation() {
                    Disposition::ResumeLater
                } else {
                    Disposition::Abandon
                };
                if let Err(e) = ctx.settle(&messages, disposition).await {
                    warn!(service = %settings.service_name(), ?disposition, "settling batch failed: {e}");
                }
                Err(err)
            }
        }
    }
}
