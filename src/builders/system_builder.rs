//! Builders to construct the store, broker client, and scheduler from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::{AppConfig, BrokerConfig, ManagerConfig};
use crate::core::broker::{BrokerClient, Connector};
use crate::core::error::{AppResult, BrokerError};
use crate::core::scheduler::Scheduler;
use crate::core::store::{StoreBackend, TaskStore};
use crate::util::id::{IdGenerator, UuidGenerator};

/// A wired store, broker client, and scheduler ready to run.
pub struct AdmissionSystem<B> {
    /// Shared task store, also used by the intake API.
    pub store: Arc<TaskStore<B>>,
    /// Shared broker client.
    pub broker: Arc<BrokerClient>,
    /// Scheduler, not yet started.
    pub scheduler: Scheduler<B>,
}

/// Build a task store over `backend` sized per `cfg`.
pub fn build_store<B: StoreBackend>(backend: B, cfg: &ManagerConfig) -> Arc<TaskStore<B>> {
    build_store_with_ids(backend, cfg, Arc::new(UuidGenerator))
}

/// Build a task store with a custom id generator.
pub fn build_store_with_ids<B: StoreBackend>(
    backend: B,
    cfg: &ManagerConfig,
    ids: Arc<dyn IdGenerator>,
) -> Arc<TaskStore<B>> {
    Arc::new(TaskStore::with_generator(backend, ids, cfg.event_buffer))
}

/// Connect a broker client using the queue layout and reconnect schedule in `cfg`.
pub async fn connect_broker(
    connector: Arc<dyn Connector>,
    cfg: &BrokerConfig,
) -> Result<Arc<BrokerClient>, BrokerError> {
    let client = BrokerClient::connect(connector, cfg.topology(), cfg.reconnect.policy()).await?;
    Ok(Arc::new(client))
}

/// Validate `cfg` and wire a complete system over the given backend and connector.
pub async fn build_system<B: StoreBackend>(
    cfg: &AppConfig,
    backend: B,
    connector: Arc<dyn Connector>,
) -> AppResult<AdmissionSystem<B>> {
    cfg.validate().context("configuration rejected")?;

    let store = build_store(backend, &cfg.manager);
    let broker = connect_broker(connector, &cfg.broker)
        .await
        .context("initial broker connection failed")?;
    let scheduler = Scheduler::new(Arc::clone(&store), Arc::clone(&broker), cfg.manager.clone());

    info!(
        execution_queue_size = cfg.manager.execution_queue_size,
        task_queue_size = cfg.manager.task_queue_size,
        "admission system built"
    );
    Ok(AdmissionSystem {
        store,
        broker,
        scheduler,
    })
}

/// Connect to Redis and RabbitMQ at the URLs in `cfg` and wire a complete system.
#[cfg(all(feature = "redis-store", feature = "amqp-broker"))]
pub async fn connect_system(
    cfg: &AppConfig,
) -> AppResult<AdmissionSystem<crate::infra::store::RedisBackend>> {
    let backend = crate::infra::store::RedisBackend::from_url(&cfg.store.url)
        .await
        .context("failed to connect to the task store")?;
    let connector = Arc::new(crate::infra::broker::AmqpConnector::new(cfg.broker.url.clone()));
    build_system(cfg, backend, connector).await
}
