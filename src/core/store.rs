//! Durable task store: specifications, intake queue, executing set, and status records.
//!
//! The store owns every piece of durable task state. It relies only on the atomic
//! primitives of its [`StoreBackend`] (create-if-absent writes, list push/pop, set
//! membership) and takes no in-process locks around them.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::error::StoreError;
use crate::core::model::{TaskId, TaskSpec, TaskStatus};
use crate::util::id::{IdGenerator, UuidGenerator};

/// List key holding the FIFO intake queue.
pub const TASK_QUEUE_KEY: &str = "taskQ";
/// Set key holding ids currently admitted for execution.
pub const EXECUTING_SET_KEY: &str = "executing";
/// Prefix of per-task keys.
pub const TASK_PREFIX: &str = "task";
/// Minimum buffer for task-created notifications.
pub const MIN_EVENT_BUFFER: usize = 100;

/// Key of a stored specification: `task:<id>`.
pub fn task_key(id: &TaskId) -> String {
    format!("{TASK_PREFIX}:{id}")
}

/// Key of a task's status record: `task:<id>:info`.
pub fn info_key(id: &TaskId) -> String {
    format!("{TASK_PREFIX}:{id}:info")
}

/// Atomic key-value, list, and set primitives of a backing store.
///
/// Every method is a single atomic command on the backing store. Implementations
/// must be safe for concurrent use by multiple callers.
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Write `value` only if `key` is absent. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StoreError>;
    /// Write `value` unconditionally.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Push onto the head of a list, returning the new length.
    async fn push_head(&self, list: &str, value: &str) -> Result<u64, StoreError>;
    /// Pop from the tail of a list, suspending until an item exists.
    async fn blocking_pop_tail(&self, list: &str) -> Result<String, StoreError>;
    /// Length of a list.
    async fn list_len(&self, list: &str) -> Result<u64, StoreError>;
    /// Add a set member. Returns whether it was newly added.
    async fn set_add(&self, set: &str, member: &str) -> Result<bool, StoreError>;
    /// Remove a set member. Returns whether it was present.
    async fn set_remove(&self, set: &str, member: &str) -> Result<bool, StoreError>;
    /// Whether `member` is in the set.
    async fn set_contains(&self, set: &str, member: &str) -> Result<bool, StoreError>;
    /// Cardinality of a set.
    async fn set_len(&self, set: &str) -> Result<u64, StoreError>;
    /// All members of a set.
    async fn set_members(&self, set: &str) -> Result<Vec<String>, StoreError>;
}

/// Task store over a [`StoreBackend`], with an in-process task-created channel.
///
/// The created channel has exactly one consumer. Running more than one scheduler
/// against the same backing store is not supported; the single-listener rule
/// enforces that within one process.
pub struct TaskStore<B> {
    backend: B,
    ids: Arc<dyn IdGenerator>,
    created_tx: mpsc::Sender<TaskId>,
    created_rx: Mutex<Option<mpsc::Receiver<TaskId>>>,
}

impl<B: StoreBackend> TaskStore<B> {
    /// Create a store with random ids and the default event buffer.
    pub fn new(backend: B) -> Self {
        Self::with_generator(backend, Arc::new(UuidGenerator), MIN_EVENT_BUFFER)
    }

    /// Create a store with a custom id generator and event buffer size.
    ///
    /// `event_buffer` is raised to [`MIN_EVENT_BUFFER`] if smaller.
    pub fn with_generator(backend: B, ids: Arc<dyn IdGenerator>, event_buffer: usize) -> Self {
        let (created_tx, created_rx) = mpsc::channel(event_buffer.max(MIN_EVENT_BUFFER));
        Self {
            backend,
            ids,
            created_tx,
            created_rx: Mutex::new(Some(created_rx)),
        }
    }

    /// Access the backing store.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Stamp an id into `spec` and write it create-if-absent.
    ///
    /// A caller-supplied id is kept; otherwise the generator provides one.
    pub async fn store_task(&self, mut spec: TaskSpec) -> Result<TaskId, StoreError> {
        let id = *spec.id.get_or_insert_with(|| self.ids.generate());
        let bytes = serde_json::to_vec(&spec).map_err(|e| StoreError::Encode {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        let created = self
            .backend
            .set_if_absent(&task_key(&id), &bytes)
            .await
            .map_err(|e| StoreError::Persistence(format!("storing task with id {id} failed: {e}")))?;
        if !created {
            return Err(StoreError::Duplicate(id));
        }
        debug!(task_id = %id, "task stored");
        Ok(id)
    }

    /// Fetch a stored specification.
    pub async fn get_task(&self, id: &TaskId) -> Result<TaskSpec, StoreError> {
        let bytes = self
            .backend
            .get(&task_key(id))
            .await?
            .ok_or(StoreError::NotFound(*id))?;
        let mut spec: TaskSpec = serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        spec.id.get_or_insert(*id);
        Ok(spec)
    }

    /// Append `id` to the tail of the intake queue, returning the new length.
    pub async fn push_task(&self, id: &TaskId) -> Result<u64, StoreError> {
        self.backend.push_head(TASK_QUEUE_KEY, &id.to_string()).await
    }

    /// Current intake queue length.
    pub async fn task_queue_size(&self) -> Result<u64, StoreError> {
        self.backend.list_len(TASK_QUEUE_KEY).await
    }

    /// Pop the head of the intake queue, suspending until one is available.
    pub async fn pop_task(&self) -> Result<TaskId, StoreError> {
        let raw = self
            .backend
            .blocking_pop_tail(TASK_QUEUE_KEY)
            .await
            .map_err(|e| StoreError::Persistence(format!("failed to retrieve next task to execute : {e}")))?;
        raw.parse().map_err(|e: uuid::Error| StoreError::Decode {
            id: raw.clone(),
            reason: e.to_string(),
        })
    }

    /// Charge capacity for `id`.
    pub async fn add_to_executing_set(&self, id: &TaskId) -> Result<(), StoreError> {
        self.backend
            .set_add(EXECUTING_SET_KEY, &id.to_string())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Persistence(format!("failed to add task to executing set : {e}")))
    }

    /// Release the capacity held by `id`.
    pub async fn remove_from_executing_set(&self, id: &TaskId) -> Result<(), StoreError> {
        self.backend
            .set_remove(EXECUTING_SET_KEY, &id.to_string())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Persistence(format!("failed to remove task from executing set : {e}")))
    }

    /// Whether `id` currently holds capacity.
    pub async fn is_executing(&self, id: &TaskId) -> Result<bool, StoreError> {
        self.backend.set_contains(EXECUTING_SET_KEY, &id.to_string()).await
    }

    /// Number of tasks currently holding capacity.
    pub async fn executing_set_size(&self) -> Result<u64, StoreError> {
        self.backend.set_len(EXECUTING_SET_KEY).await
    }

    /// Ids currently holding capacity. Unparseable members are skipped.
    pub async fn executing_tasks(&self) -> Result<Vec<TaskId>, StoreError> {
        let members = self.backend.set_members(EXECUTING_SET_KEY).await?;
        Ok(members.iter().filter_map(|m| m.parse().ok()).collect())
    }

    /// Notify the scheduler that `id` has been stored and queued.
    ///
    /// Suspends only while the notification buffer is full.
    pub async fn publish_task_created_event(&self, id: &TaskId) -> Result<(), StoreError> {
        self.created_tx
            .send(*id)
            .await
            .map_err(|_| StoreError::EventChannelClosed)
    }

    /// Claim the task-created notification stream. Only one caller succeeds.
    pub fn listen_for_task_created_events(&self) -> Result<mpsc::Receiver<TaskId>, StoreError> {
        self.created_rx.lock().take().ok_or(StoreError::ListenerTaken)
    }

    /// Record a status report under `task:<id>:info`.
    ///
    /// Progress reports are written create-if-absent so they never replace an
    /// existing record; outcome reports always overwrite.
    pub async fn update_task_info(&self, status: &TaskStatus) -> Result<(), StoreError> {
        let key = info_key(&status.id);
        let bytes = serde_json::to_vec(status).map_err(|e| StoreError::Encode {
            id: status.id.to_string(),
            reason: e.to_string(),
        })?;
        if status.kind.is_terminal() {
            self.backend.set(&key, &bytes).await?;
        } else if !self.backend.set_if_absent(&key, &bytes).await? {
            debug!(task_id = %status.id, "status record exists, progress update not written");
        }
        info!(task_id = %status.id, status = %status.kind, "task info updated");
        Ok(())
    }

    /// Read back a task's status record.
    pub async fn get_task_info(&self, id: &TaskId) -> Result<Option<TaskStatus>, StoreError> {
        let Some(bytes) = self.backend.get(&info_key(id)).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Decode {
                id: info_key(id),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id: TaskId = "0b5c6f1e-9a54-4a8e-9d4c-2f1a7b3c9e01".parse().unwrap();
        assert_eq!(task_key(&id), "task:0b5c6f1e-9a54-4a8e-9d4c-2f1a7b3c9e01");
        assert_eq!(info_key(&id), "task:0b5c6f1e-9a54-4a8e-9d4c-2f1a7b3c9e01:info");
    }
}
