//! Broker connectors.

#[cfg(feature = "amqp-broker")]
pub mod amqp;
pub mod memory;

#[cfg(feature = "amqp-broker")]
pub use amqp::AmqpConnector;
pub use memory::{InMemoryBroker, InMemoryConnector};
