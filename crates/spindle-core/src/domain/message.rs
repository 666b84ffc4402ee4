//! Leased messages: payload + queue metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{MessageId, ReceiptId};
use super::queue_name::QueueName;

/// Opaque handle needed to delete / abandon / resume a leased message.
///
/// The identity of a leased message is this handle, not its payload.
/// `receipt` changes every time the message is leased again, so a disposition
/// made through an expired lease does not touch the new holder's lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseHandle {
    pub queue: QueueName,
    pub message_id: MessageId,
    pub receipt: ReceiptId,
}

/// Untyped message as returned by the queue storage port.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub handle: LeaseHandle,
    pub payload: serde_json::Value,
    /// 1-based delivery count (counted trials + 1).
    pub dequeue_count: u32,
    pub inserted_at: DateTime<Utc>,
    pub leased_until: DateTime<Utc>,
}

/// A message of payload type `T` currently leased by this worker.
#[derive(Debug, Clone)]
pub struct LeasedMessage<T> {
    handle: LeaseHandle,
    payload: T,
    dequeue_count: u32,
    inserted_at: DateTime<Utc>,
    leased_until: DateTime<Utc>,
}

impl<T> LeasedMessage<T> {
    pub fn new(raw: &RawMessage, payload: T) -> Self {
        Self {
            handle: raw.handle.clone(),
            payload,
            dequeue_count: raw.dequeue_count,
            inserted_at: raw.inserted_at,
            leased_until: raw.leased_until,
        }
    }

    pub fn handle(&self) -> &LeaseHandle {
        &self.handle
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn dequeue_count(&self) -> u32 {
        self.dequeue_count
    }

    pub fn inserted_at(&self) -> DateTime<Utc> {
        self.inserted_at
    }

    /// Visibility deadline of the current lease.
    pub fn leased_until(&self) -> DateTime<Utc> {
        self.leased_until
    }
}
