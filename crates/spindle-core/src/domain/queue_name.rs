//! QueueName - payload 型からストレージ名への命名規約
//!
//! producer と consumer が同じ名前に行き着くことが唯一の不変条件です。
//! そのため変換は純粋関数で、入力は `Message::TYPE` だけに依存します。

use serde::{Deserialize, Serialize};
use std::fmt;

/// ストレージ側の名前長の上限
const MAX_STORAGE_NAME_LEN: usize = 63;

/// キュー名
///
/// # 命名規約
/// - 小文字化
/// - `[a-z0-9]` 以外の連続は `-` 1 文字に畳む
/// - 先頭と末尾の `-` は落とす
/// - 63 文字で切る
///
/// 例: `acme.billing.Charge.v1` → `acme-billing-charge-v1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    /// 設定で上書きされた名前など、すでに確定している名前をそのまま使う
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// 型名（`Message::TYPE`）から決定的にキュー名を導出
    pub fn for_type(type_name: &str) -> Self {
        let mut name = String::with_capacity(type_name.len());
        let mut pending_dash = false;
        for c in type_name.chars() {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                if pending_dash && !name.is_empty() {
                    name.push('-');
                }
                pending_dash = false;
                name.push(c);
            } else {
                pending_dash = true;
            }
        }
        name.truncate(MAX_STORAGE_NAME_LEN);
        while name.ends_with('-') {
            name.pop();
        }
        Self(name)
    }

    /// 隔離先（poison）キューの名前
    pub fn poison(&self) -> Self {
        Self(format!("{}-poison", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
