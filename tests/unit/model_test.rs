//! Wire-format tests for task specs and status reports.

use prometheus_task_admission::core::{StatusType, TaskId, TaskSpec, TaskStatus};

#[test]
fn test_stored_spec_carries_its_id() {
    let id = TaskId::new_v4();
    let mut spec = TaskSpec::new("alpine", "init.sh").with_metadata("team", "ml");
    spec.id = Some(id);

    let json = serde_json::to_value(&spec).unwrap();
    assert_eq!(json["id"], id.to_string());
    assert_eq!(json["metadata"]["team"], "ml");
    assert_eq!(json["initArgs"], serde_json::json!([]));
}

#[test]
fn test_null_args_and_metadata_read_as_empty() {
    let id = TaskId::new_v4();
    let body = format!(
        r#"{{"id":"{id}","metadata":null,"image":"alpine","init":"init.sh","initArgs":null}}"#
    );
    let spec: TaskSpec = serde_json::from_str(&body).unwrap();
    assert_eq!(spec.id, Some(id));
    assert!(spec.init_args.is_empty());
    assert!(spec.metadata.is_none());

    let missing: TaskSpec = serde_json::from_str(r#"{"image":"alpine","init":"init.sh"}"#).unwrap();
    assert!(missing.init_args.is_empty());
}

#[test]
fn test_status_serializes_lowercase_type_field() {
    let status = TaskStatus::executing(TaskId::new_v4());
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["type"], "Executing");
    assert!(json.get("Type").is_none());
    assert!(json.get("metadata").is_none());
}

#[test]
fn test_status_keeps_free_form_metadata() {
    let id = TaskId::new_v4();
    let body = format!(r#"{{"id":"{id}","type":"Executing","metadata":{{"node":"worker-3","attempt":2}}}}"#);
    let status: TaskStatus = serde_json::from_str(&body).unwrap();
    assert_eq!(status.kind, StatusType::Executing);
    assert_eq!(status.metadata["node"], "worker-3");
    assert_eq!(status.metadata["attempt"], 2);
    assert!(status.failure_cause().is_none());
}

#[test]
fn test_unknown_status_type_is_rejected() {
    let id = TaskId::new_v4();
    let body = format!(r#"{{"id":"{id}","type":"Paused"}}"#);
    assert!(serde_json::from_str::<TaskStatus>(&body).is_err());
}

#[test]
fn test_status_with_bad_id_is_rejected() {
    let body = r#"{"id":"not-a-uuid","type":"Succeeded"}"#;
    assert!(serde_json::from_str::<TaskStatus>(body).is_err());
}

#[test]
fn test_failed_status_without_cause_metadata() {
    let id = TaskId::new_v4();
    let body = format!(r#"{{"id":"{id}","type":"Failed"}}"#);
    let status: TaskStatus = serde_json::from_str(&body).unwrap();
    assert!(status.kind.is_terminal());
    // A failure with no cause tree still parses; the cause itself does not.
    assert!(status.failure_cause().unwrap().is_err());
}
