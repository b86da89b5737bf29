//! Intake API: the functions an HTTP or RPC layer calls to submit and inspect tasks.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ManagerConfig;
use crate::core::error::{StoreError, SubmitError};
use crate::core::model::{TaskId, TaskSpec, TaskStatus};
use crate::core::store::{StoreBackend, TaskStore};

/// Response to a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSubmitted {
    /// Identifier assigned to the task.
    pub id: TaskId,
    /// Intake queue slots left after this submission.
    pub remaining_capacity: u64,
}

/// Task spec together with its latest status record, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Stored specification.
    pub task: TaskSpec,
    /// Latest recorded status. Absent until a worker reports.
    pub status: Option<TaskStatus>,
}

/// Submit a task: check intake capacity, store, enqueue, and notify the scheduler.
///
/// Each step's failure is returned as-is; nothing is retried or undone.
pub async fn submit_task<B: StoreBackend>(
    store: &TaskStore<B>,
    config: &ManagerConfig,
    spec: TaskSpec,
) -> Result<TaskSubmitted, SubmitError> {
    let queued = store.task_queue_size().await?;
    if queued >= config.task_queue_size {
        return Err(SubmitError::QueueFull {
            capacity: config.task_queue_size,
        });
    }

    let id = store.store_task(spec).await?;
    let queued = store.push_task(&id).await?;
    let remaining_capacity = config.task_queue_size.saturating_sub(queued);
    info!(task_id = %id, remaining_capacity, "task accepted");

    store.publish_task_created_event(&id).await?;
    Ok(TaskSubmitted {
        id,
        remaining_capacity,
    })
}

/// Look up a stored task.
pub async fn get_task<B: StoreBackend>(
    store: &TaskStore<B>,
    id: &TaskId,
) -> Result<TaskSpec, StoreError> {
    store.get_task(id).await
}

/// Look up a stored task and its latest status.
pub async fn get_task_status<B: StoreBackend>(
    store: &TaskStore<B>,
    id: &TaskId,
) -> Result<TaskStatusResponse, StoreError> {
    let task = store.get_task(id).await?;
    let status = store.get_task_info(id).await?;
    Ok(TaskStatusResponse { task, status })
}
