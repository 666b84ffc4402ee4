//! Message trait - 型付きメッセージの定義
//!
//! `TYPE` がキュー名の唯一の入力です。producer と consumer は同じ `TYPE` から
//! 同じ `QueueName` を導出します。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::QueueName;

/// Message は型とキューを対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SquareMessage {
///     blob_name: String,
/// }
///
/// impl Message for SquareMessage {
///     const TYPE: &'static str = "demo.square.compute.v1";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: キュー上は JSON で運ぶため
/// - `Send + Sync + 'static`: バッチを跨いで Arc で共有するため
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// `{namespace}.{domain}.{action}.v{major}`
    const TYPE: &'static str;

    fn queue_name() -> QueueName {
        QueueName::for_type(Self::TYPE)
    }
}
