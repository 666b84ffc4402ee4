//! FailureKind - ホスト境界まで漏れてきた障害の分類
//!
//! # 設計原則
//! - 閉じた enum（型パターンの catch 連鎖ではなく、catch 地点で一度だけ計算）
//! - 判定順は `classify` の match の並び順そのもの

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Explicit restart request (hot redeployment). Not an error.
    RestartRequested,

    /// Requested code / type is not part of the deployed package.
    TypeLoad,

    /// A dependent package is missing or failed to load.
    MissingDependency,

    /// The isolation boundary denied an operation.
    SecurityDenied,

    /// Cooperative cancellation (shutdown or execution timeout).
    Cancellation,

    Unclassified,
}

impl FailureKind {
    pub fn classify(error: &ServiceError) -> Self {
        match error {
            ServiceError::RestartRequested { .. } => FailureKind::RestartRequested,
            ServiceError::TypeLoad { .. } => FailureKind::TypeLoad,
            ServiceError::MissingDependency { .. } => FailureKind::MissingDependency,
            ServiceError::SecurityDenied { .. } => FailureKind::SecurityDenied,
            ServiceError::Cancelled | ServiceError::TimedOut(_) => FailureKind::Cancellation,
            _ => FailureKind::Unclassified,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::RestartRequested => "restart_requested",
            FailureKind::TypeLoad => "type_load",
            FailureKind::MissingDependency => "missing_dependency",
            FailureKind::SecurityDenied => "security_denied",
            FailureKind::Cancellation => "cancellation",
            FailureKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
