//! Task identifier generation.

use parking_lot::Mutex;

use crate::core::model::TaskId;

/// Source of collision-resistant task identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produce the next identifier.
    fn generate(&self) -> TaskId;
}

/// Random (v4) UUID generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> TaskId {
        TaskId::new_v4()
    }
}

/// Generator that replays a fixed sequence, then repeats the last id.
///
/// Used to force id collisions in tests and benchmarks.
#[derive(Debug)]
pub struct SequenceGenerator {
    ids: Mutex<(Vec<TaskId>, usize)>,
}

impl SequenceGenerator {
    /// Replay `ids` in order. An empty sequence falls back to random ids.
    pub fn new(ids: Vec<TaskId>) -> Self {
        Self {
            ids: Mutex::new((ids, 0)),
        }
    }

    /// Always return `id`.
    pub fn repeating(id: TaskId) -> Self {
        Self::new(vec![id])
    }
}

impl IdGenerator for SequenceGenerator {
    fn generate(&self) -> TaskId {
        let mut guard = self.ids.lock();
        let (ids, next) = &mut *guard;
        let Some(last) = ids.len().checked_sub(1) else {
            return TaskId::new_v4();
        };
        let id = ids[(*next).min(last)];
        *next += 1;
        id
    }
}
