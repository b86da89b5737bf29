//! Builders wiring components together from configuration.

pub mod system_builder;

pub use system_builder::{
    build_store, build_store_with_ids, build_system, connect_broker, AdmissionSystem,
};
#[cfg(all(feature = "redis-store", feature = "amqp-broker"))]
pub use system_builder::connect_system;
