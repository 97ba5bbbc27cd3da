//! Domain model (IDs, families, statuses, lifecycles, records, events, errors).

pub mod errors;
pub mod events;
pub mod family;
pub mod ids;
pub mod lifecycle;
pub mod record;
pub mod status;
pub mod submission;

pub use self::errors::{ErrorKind, FetchError, StorageError, TrackerError};
pub use self::events::TaskEvent;
pub use self::family::TaskFamily;
pub use self::ids::{ContainerRef, TaskId, PLACEHOLDER_PREFIX};
pub use self::lifecycle::Lifecycle;
pub use self::record::TaskRecord;
pub use self::status::{TaskStatus, TerminalOutcome};
pub use self::submission::{Assignment, SubmissionItem};
