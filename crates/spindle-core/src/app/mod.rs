//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてワーカーの実行ロジックを実装します。
//!
//! # 主要コンポーネント
//! - **BatchProcessor**: lease → work logic → delete / abandon / resume_later
//! - **BlobCounter**: ETag による楽観的排他の分散カウンタ（fan-out / fan-in）
//! - **ServiceRuntime**: 登録済みサービスを巡回するスケジューラループ
//! - **RuntimeBuilder**: 1 世代ぶんのワイヤリングと起動時検証
//! - **IsolatedHost**: 世代の構築・障害分類・再起動
//! - **Shutdown**: 協調的キャンセルの信号

pub mod batch;
pub mod builder;
pub mod counter;
pub mod host;
pub mod providers;
pub mod runtime;
pub mod shutdown;

// 主要な型を再エクスポート
pub use self::batch::{BatchContext, BatchProcessor, MAX_BATCH_SIZE};
pub use self::builder::{BuildError, RuntimeBuilder};
pub use self::counter::{
    ALEPH, BlobCounter, COUNTER_CONTAINER, ContentionPolicy, CounterName, TEMPORARY_CONTAINER,
};
pub use self::host::{HostError, HostExit, IsolatedHost, WorkerBootstrap};
pub use self::providers::Providers;
pub use self::runtime::{ExecutionFailure, ServiceRuntime};
pub use self::shutdown::{Shutdown, ShutdownHandle, shutdown_channel};
