//! Domain model (ids, queue names, leased messages, settings, failures, events).

pub mod errors;
pub mod events;
pub mod failure;
pub mod feedback;
pub mod ids;
pub mod message;
pub mod queue_name;
pub mod settings;

pub use self::errors::{BoxError, CounterError, ServiceError, StorageError};
pub use self::events::{EventKind, RuntimeEvent, Severity};
pub use self::failure::FailureKind;
pub use self::feedback::ExecutionFeedback;
pub use self::ids::{MessageId, ReceiptId};
pub use self::message::{LeaseHandle, LeasedMessage, RawMessage};
pub use self::queue_name::QueueName;
pub use self::settings::{QueueServiceSettings, ServiceSettings};
