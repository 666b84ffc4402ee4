//! EventSink の実装
//!
//! - TracingEventSink: `tracing` の構造化イベントとして出力
//! - MemoryEventSink: テスト用に溜めておく

use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::domain::{EventKind, RuntimeEvent, Severity};
use crate::ports::EventSink;

/// Forwards runtime events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: RuntimeEvent) {
        let service = event.service.as_deref().unwrap_or("unknown");
        let (failure, message) = match &event.kind {
            EventKind::ServiceFailed { failure, message } => (failure.as_str(), message.clone()),
            other => ("", describe(other)),
        };

        // tracing のマクロはレベルが静的なので severity ごとに分岐する
        match event.severity {
            Severity::Debug => debug!(service, failure, at = %event.timestamp, "{message}"),
            Severity::Info => info!(service, failure, at = %event.timestamp, "{message}"),
            Severity::Warn => warn!(service, failure, at = %event.timestamp, "{message}"),
            Severity::Error | Severity::Fatal => {
                error!(service, failure, at = %event.timestamp, "{message}")
            }
        }
    }
}

fn describe(kind: &EventKind) -> String {
    match kind {
        EventKind::WorkerStarted {
            generation,
            package,
        } => format!(
            "isolated worker started (generation {generation}, package {})",
            package.as_deref().unwrap_or("none")
        ),
        EventKind::SchedulerBusy => "scheduler busy".to_string(),
        EventKind::SchedulerIdle => "scheduler idle".to_string(),
        EventKind::ServiceFailed { message, .. } => message.clone(),
        EventKind::RestartRequested { reason } => format!("restart requested: {reason}"),
        EventKind::GenerationStopped { generation } => {
            format!("generation {generation} stopped")
        }
    }
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: RuntimeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
