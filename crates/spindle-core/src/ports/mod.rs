//! Ports - 抽象化レイヤー
//!
//! 外部協力者（キュー、blob ストレージ、診断出力、パッケージ配布元）への
//! インターフェースです。実装は `impls` か、別クレートに置きます。

pub mod blob_storage;
pub mod clock;
pub mod event_sink;
pub mod package_source;
pub mod queue_storage;

pub use self::blob_storage::{BlobStorage, ETag, WriteCondition};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::package_source::{PackageInfo, PackageSource};
pub use self::queue_storage::QueueStorage;
