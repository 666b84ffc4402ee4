//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryQueueStorage**: lease・poison 隔離付きのキュー
//! - **InMemoryBlobStorage**: ETag 付きの blob ストレージ
//! - **BlobPackageSource**: blob の ETag を fingerprint にするパッケージ配布元
//! - **TracingEventSink / MemoryEventSink**
//!
//! 本番用のストレージ実装は別クレートに置く前提です。

pub mod blob_package;
pub mod event_sinks;
pub mod inmem_blob;
pub mod inmem_queue;

pub use self::blob_package::BlobPackageSource;
pub use self::event_sinks::{MemoryEventSink, TracingEventSink};
pub use self::inmem_blob::InMemoryBlobStorage;
pub use self::inmem_queue::{InMemoryQueueStorage, PoisonedMessage};
