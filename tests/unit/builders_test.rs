//! Tests for builder modules

use std::sync::Arc;

use prometheus_task_admission::builders::{build_store_with_ids, build_system, connect_broker};
use prometheus_task_admission::config::{AppConfig, BrokerConfig, ManagerConfig};
use prometheus_task_admission::core::{BrokerError, TaskId, TaskSpec};
use prometheus_task_admission::infra::{InMemoryBackend, InMemoryBroker};
use prometheus_task_admission::util::id::SequenceGenerator;

fn fast_broker_config() -> BrokerConfig {
    let mut cfg = BrokerConfig::default();
    cfg.reconnect.delay_ms = 10;
    cfg.reconnect.max_delay_ms = 10;
    cfg
}

#[tokio::test]
async fn test_build_system_wires_shared_components() {
    let broker = InMemoryBroker::new();
    let mut cfg = AppConfig::new(ManagerConfig::new(2, 10));
    cfg.broker = fast_broker_config();

    let system = build_system(&cfg, InMemoryBackend::new(), Arc::new(broker.connector()))
        .await
        .unwrap();

    assert!(system.broker.is_connected());
    assert_eq!(broker.connections(), 1);
    assert_eq!(broker.declarations("work_queue"), 1);
    assert_eq!(system.scheduler.stats().admitted, 0);

    let id = system.store.store_task(TaskSpec::new("alpine", "init.sh")).await.unwrap();
    assert_eq!(system.store.get_task(&id).await.unwrap().id, Some(id));
}

#[tokio::test]
async fn test_build_system_rejects_invalid_config() {
    let broker = InMemoryBroker::new();
    let mut cfg = AppConfig::new(ManagerConfig::new(2, 10));
    cfg.broker.prefetch_count = 0;

    let err = build_system(&cfg, InMemoryBackend::new(), Arc::new(broker.connector()))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("configuration rejected"));
    assert_eq!(broker.connections(), 0);
}

#[tokio::test]
async fn test_build_system_surfaces_initial_connect_failure() {
    let broker = InMemoryBroker::new();
    broker.refuse_connections(true);
    let cfg = AppConfig::new(ManagerConfig::new(2, 10));

    let err = build_system(&cfg, InMemoryBackend::new(), Arc::new(broker.connector()))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("initial broker connection failed"));
    assert!(err.downcast_ref::<BrokerError>().is_some());
}

#[tokio::test]
async fn test_connect_broker_uses_configured_queues() {
    let broker = InMemoryBroker::new();
    let mut cfg = fast_broker_config();
    cfg.work_queue = "jobs".into();
    cfg.status_queue = "job_status".into();
    cfg.prefetch_count = 2;

    let client = connect_broker(Arc::new(broker.connector()), &cfg).await.unwrap();
    assert!(client.is_connected());
    assert_eq!(broker.declarations("jobs"), 1);
    assert_eq!(broker.declarations("job_status"), 1);
    assert_eq!(broker.prefetch(), Some(2));
}

#[tokio::test]
async fn test_build_store_with_custom_ids() {
    let id = TaskId::new_v4();
    let store = build_store_with_ids(
        InMemoryBackend::new(),
        &ManagerConfig::new(1, 1),
        Arc::new(SequenceGenerator::repeating(id)),
    );
    assert_eq!(store.store_task(TaskSpec::new("alpine", "init.sh")).await.unwrap(), id);
}
