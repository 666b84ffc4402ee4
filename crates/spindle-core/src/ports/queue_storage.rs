//! QueueStorage port - lease 付きメッセージキュー
//!
//! 実体（クラウドのキュー、InMemory など）は外部協力者です。ここでは境界の契約だけを定義します。
//!
//! # 契約
//! - `get` は lease を取り、visibility timeout の間ほかの consumer から見えなくする
//! - `get` は poison threshold を超えたメッセージを通常配送から外す（隔離は実装の責務）
//! - `delete` / `abandon` / `resume_later` は冪等。古い receipt での呼び出しは何もしない
//! - `abandon` は試行回数を 1 増やし、`resume_later` は増やさない

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{LeaseHandle, QueueName, RawMessage, StorageError};

#[async_trait]
pub trait QueueStorage: Send + Sync {
    /// Lease up to `max_count` visible messages.
    ///
    /// A message whose delivery count would exceed `max_processing_trials`
    /// is quarantined instead of being returned.
    async fn get(
        &self,
        queue: &QueueName,
        max_count: usize,
        visibility_timeout: Duration,
        max_processing_trials: u32,
    ) -> Result<Vec<RawMessage>, StorageError>;

    /// Permanently remove the message. Idempotent.
    async fn delete(&self, handle: &LeaseHandle) -> Result<bool, StorageError>;

    /// Make the message visible again now, counting the attempt as a trial.
    async fn abandon(&self, handle: &LeaseHandle) -> Result<bool, StorageError>;

    /// Make the message visible again now without counting a trial.
    async fn resume_later(&self, handle: &LeaseHandle) -> Result<bool, StorageError>;

    /// Extend the current lease by `visibility_timeout` from now.
    async fn keep_alive(
        &self,
        handle: &LeaseHandle,
        visibility_timeout: Duration,
    ) -> Result<bool, StorageError>;

    /// Move the leased message out of normal delivery.
    async fn quarantine(&self, handle: &LeaseHandle, reason: &str) -> Result<bool, StorageError>;

    /// Messages still in the queue, leased or not.
    async fn approximate_count(&self, queue: &QueueName) -> Result<usize, StorageError>;

    async fn put(&self, queue: &QueueName, payload: serde_json::Value) -> Result<(), StorageError>;

    async fn put_range(
        &self,
        queue: &QueueName,
        payloads: Vec<serde_json::Value>,
    ) -> Result<(), StorageError> {
        for payload in payloads {
            self.put(queue, payload).await?;
        }
        Ok(())
    }
}
