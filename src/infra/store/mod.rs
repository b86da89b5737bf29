//! Store backends.

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

pub use memory::{BackendOp, InMemoryBackend};
#[cfg(feature = "redis-store")]
pub use self::redis::RedisBackend;
