//! In-memory store backend for development and testing.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::error::StoreError;
use crate::core::store::StoreBackend;

/// Backend command, used to inject failures into specific operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    /// `set_if_absent`
    SetIfAbsent,
    /// `set`
    Set,
    /// `get`
    Get,
    /// `push_head`
    PushHead,
    /// `blocking_pop_tail`
    PopTail,
    /// `list_len`
    ListLen,
    /// `set_add`
    SetAdd,
    /// `set_remove`
    SetRemove,
    /// `set_contains`
    SetContains,
    /// `set_len`
    SetLen,
    /// `set_members`
    SetMembers,
}

#[derive(Default)]
struct State {
    strings: HashMap<String, Vec<u8>>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    faults: Mutex<HashSet<BackendOp>>,
    pushed: Notify,
    closed: AtomicBool,
}

/// Shared in-memory store. Clones refer to the same data.
///
/// Each operation holds the state lock for its whole duration, so every command
/// is atomic with respect to the others.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl InMemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the store were unreachable.
    ///
    /// Blocked pops are woken and return an error.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.pushed.notify_waiters();
    }

    /// Undo [`close`](Self::close).
    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
    }

    /// Make `op` fail until [`recover`](Self::recover) is called.
    pub fn fail_on(&self, op: BackendOp) {
        self.inner.faults.lock().insert(op);
    }

    /// Stop failing `op`.
    pub fn recover(&self, op: BackendOp) {
        self.inner.faults.lock().remove(&op);
    }

    fn check(&self, op: BackendOp) -> Result<(), StoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Persistence("store connection closed".into()));
        }
        if self.inner.faults.lock().contains(&op) {
            return Err(StoreError::Persistence(format!("injected failure on {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for InMemoryBackend {
    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StoreError> {
        self.check(BackendOp::SetIfAbsent)?;
        let mut state = self.inner.state.lock();
        if state.strings.contains_key(key) {
            return Ok(false);
        }
        state.strings.insert(key.to_owned(), value.to_vec());
        Ok(true)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check(BackendOp::Set)?;
        self.inner
            .state
            .lock()
            .strings
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check(BackendOp::Get)?;
        Ok(self.inner.state.lock().strings.get(key).cloned())
    }

    async fn push_head(&self, list: &str, value: &str) -> Result<u64, StoreError> {
        self.check(BackendOp::PushHead)?;
        let len = {
            let mut state = self.inner.state.lock();
            let entry = state.lists.entry(list.to_owned()).or_default();
            entry.push_front(value.to_owned());
            entry.len() as u64
        };
        self.inner.pushed.notify_waiters();
        Ok(len)
    }

    async fn blocking_pop_tail(&self, list: &str) -> Result<String, StoreError> {
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check(BackendOp::PopTail)?;
            if let Some(item) = self
                .inner
                .state
                .lock()
                .lists
                .get_mut(list)
                .and_then(VecDeque::pop_back)
            {
                return Ok(item);
            }
            notified.await;
        }
    }

    async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
        self.check(BackendOp::ListLen)?;
        Ok(self
            .inner
            .state
            .lock()
            .lists
            .get(list)
            .map_or(0, |l| l.len() as u64))
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.check(BackendOp::SetAdd)?;
        Ok(self
            .inner
            .state
            .lock()
            .sets
            .entry(set.to_owned())
            .or_default()
            .insert(member.to_owned()))
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.check(BackendOp::SetRemove)?;
        Ok(self
            .inner
            .state
            .lock()
            .sets
            .get_mut(set)
            .is_some_and(|s| s.remove(member)))
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.check(BackendOp::SetContains)?;
        Ok(self
            .inner
            .state
            .lock()
            .sets
            .get(set)
            .is_some_and(|s| s.contains(member)))
    }

    async fn set_len(&self, set: &str) -> Result<u64, StoreError> {
        self.check(BackendOp::SetLen)?;
        Ok(self
            .inner
            .state
            .lock()
            .sets
            .get(set)
            .map_or(0, |s| s.len() as u64))
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, StoreError> {
        self.check(BackendOp::SetMembers)?;
        Ok(self
            .inner
            .state
            .lock()
            .sets
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}
