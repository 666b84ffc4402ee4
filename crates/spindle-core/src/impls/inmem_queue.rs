//! InMemoryQueueStorage - 開発用・テスト用の lease キュー
//!
//! # 実装詳細
//! - キューごとに `messages`（正本）と `order`（配送順、MessageId のみ）を持つ
//! - lease は receipt + 期限。期限切れの lease は次の `get` で回収し、試行として数える
//! - `abandon` / `resume_later` されたメッセージは末尾に回す（再投入と同じ扱い）
//! - poison threshold を超えたメッセージは `{queue}-poison` 側に移し、二度と配送しない

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::{LeaseHandle, MessageId, QueueName, RawMessage, ReceiptId, StorageError};
use crate::ports::clock::chrono_duration;
use crate::ports::{Clock, QueueStorage, SystemClock};

const TRIALS_EXCEEDED: &str = "max processing trials exceeded";

#[derive(Debug, Clone)]
struct Lease {
    receipt: ReceiptId,
    until: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: serde_json::Value,
    /// 数えられた試行回数（配送回数は trials + 1）
    trials: u32,
    inserted_at: DateTime<Utc>,
    lease: Option<Lease>,
}

/// A message removed from normal delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct PoisonedMessage {
    /// Poison queue holding the message (`{queue}-poison`).
    pub queue: QueueName,
    pub message_id: MessageId,
    pub payload: serde_json::Value,
    pub trials: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: HashMap<MessageId, StoredMessage>,
    order: VecDeque<MessageId>,
}

impl QueueState {
    /// 現在の lease を持っている handle の場合だけメッセージを返す
    fn leased_by(&mut self, handle: &LeaseHandle) -> Option<&mut StoredMessage> {
        self.messages
            .get_mut(&handle.message_id)
            .filter(|m| m.lease.as_ref().is_some_and(|l| l.receipt == handle.receipt))
    }

    fn move_to_back(&mut self, id: MessageId) {
        self.order.retain(|x| *x != id);
        self.order.push_back(id);
    }

    fn remove(&mut self, id: MessageId) -> Option<StoredMessage> {
        self.order.retain(|x| *x != id);
        self.messages.remove(&id)
    }

    /// Remove `id` and turn it into a record for `poison_queue`.
    fn take_poisoned(
        &mut self,
        id: MessageId,
        poison_queue: &QueueName,
        reason: &str,
    ) -> Option<PoisonedMessage> {
        let message = self.remove(id)?;
        Some(PoisonedMessage {
            queue: poison_queue.clone(),
            message_id: id,
            payload: message.payload,
            trials: message.trials,
            reason: reason.to_string(),
        })
    }
}

struct InMemoryQueueState {
    queues: HashMap<QueueName, QueueState>,
    /// poison queue 名 → 隔離済みメッセージ
    poison: HashMap<QueueName, Vec<PoisonedMessage>>,
}

impl InMemoryQueueState {
    fn quarantine(&mut self, queue: &QueueName, id: MessageId, reason: &str) -> bool {
        let poison_queue = queue.poison();
        let Some(poisoned) = self
            .queues
            .get_mut(queue)
            .and_then(|q| q.take_poisoned(id, &poison_queue, reason))
        else {
            return false;
        };
        warn!(queue = %queue, poison = %poison_queue, message_id = %id, %reason, "message quarantined");
        self.poison.entry(poison_queue).or_default().push(poisoned);
        true
    }
}

/// In-memory lease queue.
pub struct InMemoryQueueStorage {
    state: Arc<Mutex<InMemoryQueueState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueueStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryQueueState {
                queues: HashMap::new(),
                poison: HashMap::new(),
            })),
            clock,
        }
    }

    /// Messages quarantined from `queue` (held in `queue.poison()`), oldest first.
    pub async fn poisoned(&self, queue: &QueueName) -> Vec<PoisonedMessage> {
        let state = self.state.lock().await;
        state
            .poison
            .get(&queue.poison())
            .cloned()
            .unwrap_or_default()
    }

    /// 共通: handle のキューに対して `f` を適用する
    async fn with_queue<R>(
        &self,
        handle: &LeaseHandle,
        f: impl FnOnce(&mut QueueState, DateTime<Utc>) -> R,
    ) -> Option<R> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.queues.get_mut(&handle.queue).map(|q| f(q, now))
    }
}

impl Default for InMemoryQueueStorage {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl QueueStorage for InMemoryQueueStorage {
    async fn get(
        &self,
        queue: &QueueName,
        max_count: usize,
        visibility_timeout: Duration,
        max_processing_trials: u32,
    ) -> Result<Vec<RawMessage>, StorageError> {
        let now = self.clock.now();
        let until = now + chrono_duration(visibility_timeout);

        let mut state = self.state.lock().await;
        let Some(q) = state.queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut leased = Vec::new();
        let mut over_threshold = Vec::new();
        let candidates: Vec<MessageId> = q.order.iter().copied().collect();

        for id in candidates {
            if leased.len() >= max_count {
                break;
            }
            let Some(message) = q.messages.get_mut(&id) else {
                continue;
            };
            if let Some(lease) = &message.lease {
                if lease.until > now {
                    continue;
                }
                // lease 切れ = 前の consumer が結果を報告できなかった試行
                message.trials += 1;
                message.lease = None;
            }
            if message.trials >= max_processing_trials {
                over_threshold.push(id);
                continue;
            }

            let receipt = ReceiptId::generate(now);
            message.lease = Some(Lease { receipt, until });
            leased.push(RawMessage {
                handle: LeaseHandle {
                    queue: queue.clone(),
                    message_id: id,
                    receipt,
                },
                payload: message.payload.clone(),
                dequeue_count: message.trials + 1,
                inserted_at: message.inserted_at,
                leased_until: until,
            });
        }

        for id in over_threshold {
            state.quarantine(queue, id, TRIALS_EXCEEDED);
        }

        Ok(leased)
    }

    async fn delete(&self, handle: &LeaseHandle) -> Result<bool, StorageError> {
        let deleted = self
            .with_queue(handle, |q, _| {
                if q.leased_by(handle).is_none() {
                    return false;
                }
                q.remove(handle.message_id).is_some()
            })
            .await;
        Ok(deleted.unwrap_or(false))
    }

    async fn abandon(&self, handle: &LeaseHandle) -> Result<bool, StorageError> {
        let abandoned = self
            .with_queue(handle, |q, _| {
                let Some(message) = q.leased_by(handle) else {
                    return false;
                };
                message.trials += 1;
                message.lease = None;
                q.move_to_back(handle.message_id);
                true
            })
            .await;
        Ok(abandoned.unwrap_or(false))
    }

    async fn resume_later(&self, handle: &LeaseHandle) -> Result<bool, StorageError> {
        let resumed = self
            .with_queue(handle, |q, _| {
                let Some(message) = q.leased_by(handle) else {
                    return false;
                };
                message.lease = None;
                q.move_to_back(handle.message_id);
                true
            })
            .await;
        Ok(resumed.unwrap_or(false))
    }

    async fn keep_alive(
        &self,
        handle: &LeaseHandle,
        visibility_timeout: Duration,
    ) -> Result<bool, StorageError> {
        let renewed = self
            .with_queue(handle, |q, now| {
                let Some(message) = q.leased_by(handle) else {
                    return false;
                };
                message.lease = Some(Lease {
                    receipt: handle.receipt,
                    until: now + chrono_duration(visibility_timeout),
                });
                true
            })
            .await;
        Ok(renewed.unwrap_or(false))
    }

    async fn quarantine(&self, handle: &LeaseHandle, reason: &str) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        let leased = state
            .queues
            .get_mut(&handle.queue)
            .is_some_and(|q| q.leased_by(handle).is_some());
        if !leased {
            return Ok(false);
        }
        Ok(state.quarantine(&handle.queue, handle.message_id, reason))
    }

    async fn approximate_count(&self, queue: &QueueName) -> Result<usize, StorageError> {
        let state = self.state.lock().await;
        Ok(state.queues.get(queue).map_or(0, |q| q.messages.len()))
    }

    async fn put(&self, queue: &QueueName, payload: serde_json::Value) -> Result<(), StorageError> {
        self.put_range(queue, vec![payload]).await
    }

    async fn put_range(
        &self,
        queue: &QueueName,
        payloads: Vec<serde_json::Value>,
    ) -> Result<(), StorageError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let q = state.queues.entry(queue.clone()).or_default();
        for payload in payloads {
            let id = MessageId::generate(now);
            q.messages.insert(
                id,
                StoredMessage {
                    payload,
                    trials: 0,
                    inserted_at: now,
                    lease: None,
                },
            );
            q.order.push_back(id);
        }
        Ok(())
    }
}
