//! spindle-core
//!
//! Lease-based queue worker engine: batch processing with poison-message
//! quarantine, a blob-backed distributed counter, and a restartable host.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, queue_name, message, settings, failure, events, errors）
//! - **ports**: 抽象化レイヤー（QueueStorage, BlobStorage, EventSink, PackageSource, Clock）
//! - **typed**: 型付きメッセージ API（Message trait, QueueService trait, ServiceRegistry）
//! - **app**: 実行ロジック（batch, counter, runtime, builder, host, shutdown）
//! - **impls**: 実装（InMemoryQueueStorage など開発用）
//! - **config**: ワーカー設定（YAML）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use self::config::{ConfigError, RestartMode, WorkerConfig};
