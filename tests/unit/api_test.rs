//! Tests for the intake API

use std::sync::Arc;

use prometheus_task_admission::config::ManagerConfig;
use prometheus_task_admission::core::{
    StatusType, StoreError, SubmitError, TaskId, TaskSpec, TaskStatus, TaskStore,
};
use prometheus_task_admission::infra::{BackendOp, InMemoryBackend};
use prometheus_task_admission::runtime::{get_task, get_task_status, submit_task};
use prometheus_task_admission::util::id::SequenceGenerator;

fn spec() -> TaskSpec {
    TaskSpec::new("alpine", "init.sh").with_name("test").with_args(["10"])
}

#[tokio::test]
async fn test_submit_stores_queues_and_notifies() {
    let store = TaskStore::new(InMemoryBackend::new());
    let mut created = store.listen_for_task_created_events().unwrap();
    let config = ManagerConfig::new(1, 3);

    let submitted = submit_task(&store, &config, spec()).await.unwrap();
    assert_eq!(submitted.remaining_capacity, 2);
    assert_eq!(store.task_queue_size().await.unwrap(), 1);
    assert_eq!(created.recv().await, Some(submitted.id));

    let stored = get_task(&store, &submitted.id).await.unwrap();
    assert_eq!(stored.id, Some(submitted.id));
    assert_eq!(stored.image, "alpine");
}

#[tokio::test]
async fn test_submit_rejects_when_queue_full() {
    let store = TaskStore::new(InMemoryBackend::new());
    let _created = store.listen_for_task_created_events().unwrap();
    let config = ManagerConfig::new(1, 2);

    submit_task(&store, &config, spec()).await.unwrap();
    submit_task(&store, &config, spec()).await.unwrap();
    let err = submit_task(&store, &config, spec()).await.unwrap_err();
    assert!(matches!(err, SubmitError::QueueFull { capacity: 2 }));
    assert_eq!(store.task_queue_size().await.unwrap(), 2);
}

#[tokio::test]
async fn test_zero_task_queue_size_accepts_nothing() {
    let store = TaskStore::new(InMemoryBackend::new());
    let err = submit_task(&store, &ManagerConfig::new(5, 0), spec())
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::QueueFull { capacity: 0 }));
}

#[tokio::test]
async fn test_duplicate_submission_is_not_queued() {
    let id = TaskId::new_v4();
    let store = TaskStore::with_generator(
        InMemoryBackend::new(),
        Arc::new(SequenceGenerator::repeating(id)),
        100,
    );
    let _created = store.listen_for_task_created_events().unwrap();
    let config = ManagerConfig::new(1, 10);

    submit_task(&store, &config, spec()).await.unwrap();
    let err = submit_task(&store, &config, spec()).await.unwrap_err();
    assert!(matches!(err, SubmitError::Store(StoreError::Duplicate(dup)) if dup == id));
    assert_eq!(store.task_queue_size().await.unwrap(), 1);
}

#[tokio::test]
async fn test_push_failure_skips_notification() {
    let backend = InMemoryBackend::new();
    let store = TaskStore::new(backend.clone());
    let mut created = store.listen_for_task_created_events().unwrap();
    backend.fail_on(BackendOp::PushHead);

    let err = submit_task(&store, &ManagerConfig::new(1, 10), spec())
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Store(StoreError::Persistence(_))));
    assert!(created.try_recv().is_err());
}

#[tokio::test]
async fn test_submit_without_listener_reports_closed_channel() {
    let store = TaskStore::new(InMemoryBackend::new());
    drop(store.listen_for_task_created_events().unwrap());

    let err = submit_task(&store, &ManagerConfig::new(1, 10), spec())
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Store(StoreError::EventChannelClosed)));
}

#[tokio::test]
async fn test_status_lookup_includes_latest_report() {
    let store = TaskStore::new(InMemoryBackend::new());
    let _created = store.listen_for_task_created_events().unwrap();
    let submitted = submit_task(&store, &ManagerConfig::new(1, 10), spec())
        .await
        .unwrap();

    let before = get_task_status(&store, &submitted.id).await.unwrap();
    assert!(before.status.is_none());

    store
        .update_task_info(&TaskStatus::succeeded(submitted.id))
        .await
        .unwrap();
    let after = get_task_status(&store, &submitted.id).await.unwrap();
    assert_eq!(after.status.unwrap().kind, StatusType::Succeeded);
    assert_eq!(after.task.name.as_deref(), Some("test"));
}

#[tokio::test]
async fn test_status_lookup_for_unknown_task() {
    let store = TaskStore::new(InMemoryBackend::new());
    let id = TaskId::new_v4();
    assert!(matches!(
        get_task_status(&store, &id).await,
        Err(StoreError::NotFound(missing)) if missing == id
    ));
}
