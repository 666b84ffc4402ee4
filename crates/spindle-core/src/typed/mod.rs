//! Typed - 型付きメッセージ API
//!
//! payload 型とキュー名・work logic の対応を型で保証します。

pub mod blobs;
pub mod message;
pub mod queues;
pub mod registry;
pub mod service;

pub use self::blobs::Blobs;
pub use self::message::Message;
pub use self::queues::Queues;
pub use self::registry::{RegistryError, ServiceRegistry};
pub use self::service::{CloudService, QueueService};
