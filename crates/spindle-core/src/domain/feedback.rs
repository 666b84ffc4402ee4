//! ExecutionFeedback - 1 回の `run_once` の結果

use serde::{Deserialize, Serialize};

/// Outcome of one batch-processor invocation, used for busy/idle signaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionFeedback {
    /// At least one message was pulled and processed.
    WorkAvailable,

    /// The queue was empty at pull time.
    Skipped,
}

impl ExecutionFeedback {
    pub fn found_work(self) -> bool {
        matches!(self, ExecutionFeedback::WorkAvailable)
    }
}
