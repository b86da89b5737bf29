//! Core models, task store, broker client, and scheduler.

pub mod broker;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod store;

pub use broker::{
    Acker, BrokerClient, BrokerStats, Connector, Delivery, QueueTopology, ReconnectPolicy, Session,
    WorkPublisher,
};
pub use error::{AppResult, BrokerError, ConfigError, SchedulerError, StoreError, SubmitError};
pub use model::{FailureCause, StatusType, TaskId, TaskSpec, TaskStatus};
pub use scheduler::{Admission, Scheduler, SchedulerMonitor, SchedulerStats};
pub use store::{StoreBackend, TaskStore};
