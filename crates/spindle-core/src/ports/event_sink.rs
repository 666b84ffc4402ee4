//! EventSink port - 診断イベントの出力先
//!
//! # 実装
//! - TracingEventSink: tracing へ構造化ログとして出す（本番用）
//! - MemoryEventSink: イベントを溜めるだけ（テスト用）

use crate::domain::RuntimeEvent;

/// EventSink は診断イベントを記録
///
/// 出力の失敗でワーカーを止めないよう、戻り値は持たせない。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RuntimeEvent);
}
