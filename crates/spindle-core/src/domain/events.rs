//! Events - 診断イベント
//!
//! EventSink に流れる構造化イベントです。タイムスタンプ・重大度・サービス名は
//! すべてのイベントが持ちます。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::failure::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A new generation (dependency graph) started running.
    WorkerStarted {
        generation: u64,
        package: Option<String>,
    },

    /// The scheduler found work after being idle.
    SchedulerBusy,

    /// A full pass over the services found no work after being busy.
    SchedulerIdle,

    /// A failure escaped to the host and was classified.
    ServiceFailed {
        failure: FailureKind,
        message: String,
    },

    RestartRequested { reason: String },

    GenerationStopped { generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub service: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl RuntimeEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        severity: Severity,
        service: Option<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            timestamp,
            severity,
            service,
            kind,
        }
    }

    pub fn scheduler_busy(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, Severity::Debug, None, EventKind::SchedulerBusy)
    }

    pub fn scheduler_idle(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, Severity::Debug, None, EventKind::SchedulerIdle)
    }

    pub fn service_failed(
        timestamp: DateTime<Utc>,
        severity: Severity,
        service: Option<String>,
        failure: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            timestamp,
            severity,
            service,
            EventKind::ServiceFailed {
                failure,
                message: message.into(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_flat_with_kind_tag() {
        let event = RuntimeEvent::service_failed(
            Utc::now(),
            Severity::Error,
            Some("square".into()),
            FailureKind::TypeLoad,
            "type `demo.square.v1` could not be loaded",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "service_failed");
        assert_eq!(json["failure"], "type_load");
        assert_eq!(json["severity"], "error");
        assert_eq!(json["service"], "square");
    }
}
