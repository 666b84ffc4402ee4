//! Per-service settings.
//!
//! `QueueServiceSettings` は「添付される」任意設定（サービス実装と設定ファイルの両方から来る）、
//! `ServiceSettings` はそこから一度だけ導出される確定値です。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::queue_name::QueueName;

/// Poison threshold used when nothing else is configured.
pub const DEFAULT_MAX_PROCESSING_TRIALS: u32 = 5;

/// Execution timeout used when nothing else is configured.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub const MIN_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Optional settings attached to a queue service.
///
/// Every field is optional; `None` keeps the default. A zero
/// `max_processing_trials` is ignored as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueServiceSettings {
    pub queue_name: Option<String>,
    pub service_name: Option<String>,
    pub max_processing_trials: Option<u32>,
    pub execution_timeout_secs: Option<u64>,
    pub description: Option<String>,
}

impl QueueServiceSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = Some(name.into());
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn max_processing_trials(mut self, trials: u32) -> Self {
        self.max_processing_trials = Some(trials);
        self
    }

    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// `other` の `Some` が勝つ（設定ファイルの上書き用）
    pub fn overridden_by(self, other: &QueueServiceSettings) -> Self {
        Self {
            queue_name: other.queue_name.clone().or(self.queue_name),
            service_name: other.service_name.clone().or(self.service_name),
            max_processing_trials: other.max_processing_trials.or(self.max_processing_trials),
            execution_timeout_secs: other.execution_timeout_secs.or(self.execution_timeout_secs),
            description: other.description.clone().or(self.description),
        }
    }
}

/// `clamp(1s, 2h, round(1.25 × execution_timeout))`
pub fn visibility_timeout_for(execution_timeout: Duration) -> Duration {
    let secs = (1.25 * execution_timeout.as_secs_f64()).round().clamp(
        MIN_VISIBILITY_TIMEOUT.as_secs_f64(),
        MAX_VISIBILITY_TIMEOUT.as_secs_f64(),
    );
    Duration::from_secs(secs as u64)
}

/// Resolved, immutable settings of one queue service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    queue_name: QueueName,
    service_name: String,
    execution_timeout: Duration,
    visibility_timeout: Duration,
    max_processing_trials: u32,
}

impl ServiceSettings {
    /// Derive the settings once, at construction time.
    ///
    /// `default_queue` comes from the payload type naming convention and
    /// `default_service_name` from the service type.
    pub fn derive(
        default_queue: QueueName,
        default_service_name: &str,
        attached: &QueueServiceSettings,
    ) -> Self {
        let queue_name = attached
            .queue_name
            .as_deref()
            .map(QueueName::new)
            .unwrap_or(default_queue);
        let service_name = attached
            .service_name
            .clone()
            .unwrap_or_else(|| default_service_name.to_string());
        let max_processing_trials = attached
            .max_processing_trials
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_PROCESSING_TRIALS);
        let execution_timeout = attached
            .execution_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXECUTION_TIMEOUT);

        Self {
            queue_name,
            service_name,
            execution_timeout,
            visibility_timeout: visibility_timeout_for(execution_timeout),
            max_processing_trials,
        }
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    pub fn max_processing_trials(&self) -> u32 {
        self.max_processing_trials
    }
}
