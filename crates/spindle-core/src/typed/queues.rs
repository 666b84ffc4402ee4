//! Queues - QueueStorage の型付きファサード

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::message::Message;
use crate::domain::{LeaseHandle, LeasedMessage, QueueName, StorageError};
use crate::ports::QueueStorage;

/// Typed access to the queue storage.
///
/// `routes` maps `Message::TYPE` to the queue actually consumed for that type,
/// so a queue-name override applies to producers in this worker as well.
#[derive(Clone)]
pub struct Queues {
    storage: Arc<dyn QueueStorage>,
    routes: Arc<HashMap<String, QueueName>>,
}

impl Queues {
    pub fn new(storage: Arc<dyn QueueStorage>) -> Self {
        Self {
            storage,
            routes: Arc::new(HashMap::new()),
        }
    }

    pub fn with_routes(mut self, routes: HashMap<String, QueueName>) -> Self {
        self.routes = Arc::new(routes);
        self
    }

    pub fn storage(&self) -> &Arc<dyn QueueStorage> {
        &self.storage
    }

    /// Queue that messages of type `T` are routed to.
    pub fn queue_for<T: Message>(&self) -> QueueName {
        self.routes
            .get(T::TYPE)
            .cloned()
            .unwrap_or_else(T::queue_name)
    }

    /// Lease and decode up to `max_count` messages.
    ///
    /// デコードできない payload は work logic に渡さず隔離する。
    pub async fn get<T: DeserializeOwned>(
        &self,
        queue: &QueueName,
        max_count: usize,
        visibility_timeout: Duration,
        max_processing_trials: u32,
    ) -> Result<Vec<LeasedMessage<T>>, StorageError> {
        let raw = self
            .storage
            .get(queue, max_count, visibility_timeout, max_processing_trials)
            .await?;

        let mut messages = Vec::with_capacity(raw.len());
        for message in raw {
            match serde_json::from_value::<T>(message.payload.clone()) {
                Ok(payload) => messages.push(LeasedMessage::new(&message, payload)),
                Err(e) => {
                    let message_id = message.handle.message_id;
                    warn!(queue = %queue, %message_id, "undecodable payload: {e}");
                    let reason = format!("payload decode: {e}");
                    if let Err(qe) = self.storage.quarantine(&message.handle, &reason).await {
                        // 同じ pull で lease 済みのメッセージは巻き込まない。
                        // 隔離できなかった分は試行として数え、trials 上限で隔離させる
                        warn!(queue = %queue, %message_id, "quarantine failed: {qe}");
                        if let Err(ae) = self.storage.abandon(&message.handle).await {
                            warn!(queue = %queue, %message_id, "abandon failed: {ae}");
                        }
                    }
                }
            }
        }
        Ok(messages)
    }

    pub async fn put<T: Message>(&self, message: &T) -> Result<(), StorageError> {
        self.put_to(&self.queue_for::<T>(), message).await
    }

    pub async fn put_range<T: Message>(&self, messages: &[T]) -> Result<(), StorageError> {
        let payloads = messages
            .iter()
            .map(|m| serde_json::to_value(m).map_err(StorageError::Encode))
            .collect::<Result<Vec<_>, _>>()?;
        self.storage.put_range(&self.queue_for::<T>(), payloads).await
    }

    pub async fn put_to<T: Serialize>(
        &self,
        queue: &QueueName,
        message: &T,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_value(message).map_err(StorageError::Encode)?;
        self.storage.put(queue, payload).await
    }

    pub async fn approximate_count(&self, queue: &QueueName) -> Result<usize, StorageError> {
        self.storage.approximate_count(queue).await
    }

    pub async fn delete(&self, handle: &LeaseHandle) -> Result<bool, StorageError> {
        self.storage.delete(handle).await
    }
}
