//! QueueService trait - work logic の定義
//!
//! # 二層構造
//! - **表層（Typed）**: `QueueService<T>` - payload 型 `T` ごとの work logic
//! - **内部（Dyn）**: `CloudService` - object-safe、レジストリとランタイムが扱う形
//!
//! `BatchProcessor<T, S>` が `QueueService<T>` を `CloudService` に型消去します。

use async_trait::async_trait;
use tracing::warn;

use super::message::Message;
use crate::app::batch::BatchContext;
use crate::app::providers::Providers;
use crate::app::shutdown::Shutdown;
use crate::domain::{
    ExecutionFeedback, LeasedMessage, QueueServiceSettings, ServiceError, ServiceSettings,
};

/// Work logic for messages of type `T`.
///
/// Override `start` to handle messages one at a time, or `start_range` to
/// handle the whole batch (fan-out patterns).
///
/// # 使用例
/// ```ignore
/// struct SquareService;
///
/// #[async_trait]
/// impl QueueService<SquareMessage> for SquareService {
///     async fn start(
///         &self,
///         ctx: &BatchContext<SquareMessage>,
///         message: &LeasedMessage<SquareMessage>,
///     ) -> Result<(), ServiceError> {
///         // ...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait QueueService<T: Message>: Send + Sync + 'static {
    /// Settings attached to the service. Read once, at registration.
    fn settings(&self) -> QueueServiceSettings {
        QueueServiceSettings::default()
    }

    async fn start(
        &self,
        ctx: &BatchContext<T>,
        message: &LeasedMessage<T>,
    ) -> Result<(), ServiceError> {
        let _ = (ctx, message);
        Err(ServiceError::NotImplemented)
    }

    /// Default: `start` for each message in pull order.
    ///
    /// - 成功したメッセージはその場で delete
    /// - 失敗したメッセージは abandon してエラーを返す（残りはバッチ側で abandon）
    /// - キャンセルされたメッセージは resume_later してエラーを返す
    async fn start_range(
        &self,
        ctx: &BatchContext<T>,
        messages: &[LeasedMessage<T>],
    ) -> Result<(), ServiceError> {
        for message in messages {
            match self.start(ctx, message).await {
                Ok(()) => ctx.delete(message).await?,
                Err(err) => {
                    let disposed = if err.is_cancellation() {
                        ctx.resume_later(message).await
                    } else {
                        ctx.abandon(message).await
                    };
                    // 元のエラーを優先して返す
                    if let Err(e) = disposed {
                        warn!(message_id = %message.handle().message_id, "disposition failed: {e}");
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

/// Object-safe view of a registered queue service.
#[async_trait]
pub trait CloudService: Send + Sync {
    fn name(&self) -> &str;

    fn settings(&self) -> &ServiceSettings;

    /// `Message::TYPE` of the payloads this service consumes.
    fn message_type(&self) -> &'static str;

    /// Process at most one batch.
    async fn run_once(
        &self,
        providers: &Providers,
        shutdown: &Shutdown,
    ) -> Result<ExecutionFeedback, ServiceError>;
}
