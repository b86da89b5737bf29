//! Infrastructure adapters for the backing store and the message broker.

pub mod broker;
pub mod store;

pub use broker::{InMemoryBroker, InMemoryConnector};
pub use store::{BackendOp, InMemoryBackend};
