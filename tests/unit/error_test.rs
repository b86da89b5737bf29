//! Tests for error types

use prometheus_task_admission::core::{
    BrokerError, SchedulerError, StoreError, SubmitError, TaskId,
};

fn fixed_id() -> TaskId {
    "6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b".parse().unwrap()
}

#[test]
fn test_duplicate_error() {
    let err = StoreError::Duplicate(fixed_id());
    assert_eq!(
        format!("{err}"),
        "task with id 6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b already exists"
    );
}

#[test]
fn test_not_found_error() {
    let err = StoreError::NotFound(fixed_id());
    assert_eq!(
        format!("{err}"),
        "failed to retrieve task with id 6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b"
    );
}

#[test]
fn test_decode_error_names_record() {
    let err = StoreError::Decode {
        id: "abc".into(),
        reason: "expected value".into(),
    };
    let msg = err.to_string();
    assert!(msg.contains("abc"));
    assert!(msg.contains("expected value"));
}

#[test]
fn test_encode_error_is_not_a_decode_error() {
    let err = StoreError::Encode {
        id: fixed_id().to_string(),
        reason: "key must be a string".into(),
    };
    assert_eq!(
        format!("{err}"),
        "failed to encode task with id 6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b: key must be a string"
    );
    assert!(!matches!(err, StoreError::Decode { .. }));
}

#[test]
fn test_queue_full_error() {
    let err = SubmitError::QueueFull { capacity: 100 };
    assert_eq!(
        format!("{err}"),
        "failed to create task, task queue has reached its limit of 100"
    );
}

#[test]
fn test_submit_error_is_transparent_over_store() {
    let err: SubmitError = StoreError::Persistence("connection refused".into()).into();
    assert_eq!(format!("{err}"), "persistence error: connection refused");
}

#[test]
fn test_scheduler_error_wraps_sources() {
    let err: SchedulerError = StoreError::ListenerTaken.into();
    assert!(err.to_string().contains("already have a listener"));

    let err: SchedulerError = BrokerError::StreamTaken.into();
    assert!(err.to_string().contains("already have a consumer"));
}

#[test]
fn test_anyhow_conversion() {
    let result: prometheus_task_admission::core::AppResult<()> =
        Err(BrokerError::Transport("publish failed".into()).into());
    assert_eq!(
        result.unwrap_err().to_string(),
        "transport error: publish failed"
    );
}
