//! Providers - 1 世代ぶんの依存（ストレージ・診断・時刻）

use std::sync::Arc;

use crate::ports::{BlobStorage, Clock, EventSink, QueueStorage, SystemClock};
use crate::typed::{Blobs, Queues};

/// Everything a service execution may touch, built once per generation.
#[derive(Clone)]
pub struct Providers {
    pub queues: Queues,
    pub blobs: Blobs,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

impl Providers {
    pub fn new(
        queues: Arc<dyn QueueStorage>,
        blobs: Arc<dyn BlobStorage>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            queues: Queues::new(queues),
            blobs: Blobs::new(blobs),
            events,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
