//! Configuration models for admission limits, store, broker, and HTTP intake.

pub mod settings;

pub use settings::{
    AppConfig, BrokerConfig, HttpConfig, ManagerConfig, OverflowPolicy, ReconnectConfig,
    StoreConfig,
};
