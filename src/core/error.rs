//! Error types for store, broker, and scheduler operations.

use thiserror::Error;

use crate::core::model::TaskId;

/// Errors produced by the task store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with this id already exists.
    #[error("task with id {0} already exists")]
    Duplicate(TaskId),
    /// No record exists for this id.
    #[error("failed to retrieve task with id {0}")]
    NotFound(TaskId),
    /// Stored bytes could not be parsed back into a record.
    #[error("failed to build task with id {id} from retrieved data: {reason}")]
    Decode {
        /// Key or id of the corrupt record.
        id: String,
        /// Parser failure.
        reason: String,
    },
    /// A record could not be serialized for writing.
    #[error("failed to encode task with id {id}: {reason}")]
    Encode {
        /// Id of the record being written.
        id: String,
        /// Serializer failure.
        reason: String,
    },
    /// Backing store unreachable or the command failed.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// The task-created listener has gone away.
    #[error("failed to publish task created event: listener closed")]
    EventChannelClosed,
    /// The task-created stream already has its consumer.
    #[error("task created events already have a listener")]
    ListenerTaken,
}

/// Errors produced by the broker client.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Publish, ack, or channel operation failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// Connection to the broker dropped. Handled by the reconnect supervisor.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The status stream already has its consumer.
    #[error("status deliveries already have a consumer")]
    StreamTaken,
}

/// Errors that stop the scheduler from starting.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store notification stream unavailable.
    #[error("store unavailable to scheduler: {0}")]
    Store(#[from] StoreError),
    /// Broker status stream unavailable.
    #[error("broker unavailable to scheduler: {0}")]
    Broker(#[from] BrokerError),
}

/// Errors surfaced to submitters by the intake layer.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Intake queue is at `task_queue_size`.
    #[error("failed to create task, task queue has reached its limit of {capacity}")]
    QueueFull {
        /// Configured intake capacity.
        capacity: u64,
    },
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// Config text could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// Config values failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
