//! Tests for configuration parsing and validation

use std::time::Duration;

use prometheus_task_admission::config::{AppConfig, ManagerConfig, OverflowPolicy};
use prometheus_task_admission::core::{ConfigError, ReconnectPolicy};

fn valid_config() -> AppConfig {
    AppConfig::new(ManagerConfig::new(10, 100))
}

#[test]
fn test_default_config_is_valid() {
    assert!(valid_config().validate().is_ok());
}

#[test]
fn test_zero_limits_are_allowed() {
    let config = AppConfig::new(ManagerConfig::new(0, 0));
    assert!(config.validate().is_ok());
}

#[test]
fn test_small_event_buffer_rejected() {
    let mut config = valid_config();
    config.manager.event_buffer = 10;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_same_queue_names_rejected() {
    let mut config = valid_config();
    config.broker.status_queue = config.broker.work_queue.clone();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("must differ"));
}

#[test]
fn test_zero_prefetch_rejected() {
    let mut config = valid_config();
    config.broker.prefetch_count = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_reconnect_cap_below_delay_rejected() {
    let mut config = valid_config();
    config.broker.reconnect.delay_ms = 5000;
    config.broker.reconnect.max_delay_ms = 1000;
    assert!(config.validate().is_err());
}

#[test]
fn test_reconnect_multiplier_below_one_rejected() {
    let mut config = valid_config();
    config.broker.reconnect.multiplier = 0.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_full_toml_parses() {
    let input = r#"
[manager]
execution_queue_size = 3
task_queue_size = 50
overflow = "requeue"
reconcile_interval_secs = 15
event_buffer = 256

[store]
url = "redis://cache:6379"

[http]
listen = "0.0.0.0:9090"

[broker]
url = "amqp://rabbit:5672/%2f"
prefetch_count = 8

[broker.reconnect]
delay_ms = 500
max_delay_ms = 8000
multiplier = 2.0
jitter = true
"#;
    let config = AppConfig::from_toml_str(input).unwrap();
    assert_eq!(config.manager.overflow, OverflowPolicy::Requeue);
    assert_eq!(config.manager.reconcile_interval(), Some(Duration::from_secs(15)));
    assert_eq!(config.manager.event_buffer, 256);
    assert_eq!(config.store.url, "redis://cache:6379");
    assert_eq!(config.http.listen, "0.0.0.0:9090");
    assert_eq!(config.broker.work_queue, "work_queue");
    assert_eq!(config.broker.topology().prefetch_count, 8);

    let policy = config.broker.reconnect.policy();
    assert!(policy.jitter);
    assert_eq!(policy.max_delay, Duration::from_secs(8));
}

#[test]
fn test_json_parses() {
    let input = r#"{"manager": {"execution_queue_size": 2, "task_queue_size": 4}}"#;
    let config = AppConfig::from_json_str(input).unwrap();
    assert_eq!(config.manager.execution_queue_size, 2);
    assert_eq!(config.broker.reconnect.policy(), ReconnectPolicy::default());
    assert_eq!(config.manager.reconcile_interval(), None);
    assert_eq!(config.http.listen, "127.0.0.1:8080");
}

#[test]
fn test_empty_http_listen_rejected() {
    let mut config = valid_config();
    config.http.listen = " ".into();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("http"));
}

#[test]
fn test_missing_manager_section_is_parse_error() {
    let result = AppConfig::from_toml_str("[store]\nurl = \"redis://x\"\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_unknown_overflow_policy_is_parse_error() {
    let input = "[manager]\nexecution_queue_size = 1\ntask_queue_size = 1\noverflow = \"spill\"\n";
    assert!(matches!(
        AppConfig::from_toml_str(input),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_from_file_picks_format_by_extension() {
    let dir = std::env::temp_dir().join(format!("task-admission-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let toml_path = dir.join("config.toml");
    std::fs::write(&toml_path, "[manager]\nexecution_queue_size = 7\ntask_queue_size = 9\n").unwrap();
    assert_eq!(AppConfig::from_file(&toml_path).unwrap().manager.execution_queue_size, 7);

    let json_path = dir.join("config.json");
    std::fs::write(&json_path, r#"{"manager":{"execution_queue_size":5,"task_queue_size":9}}"#).unwrap();
    assert_eq!(AppConfig::from_file(&json_path).unwrap().manager.execution_queue_size, 5);

    let missing = AppConfig::from_file(dir.join("absent.toml"));
    assert!(matches!(missing, Err(ConfigError::Io(_))));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_shipped_config_file_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/config.toml");
    let config = AppConfig::from_file(path).unwrap();
    assert_eq!(config.manager.execution_queue_size, 10);
    assert_eq!(config.manager.task_queue_size, 100);
    assert_eq!(config.http.listen, "127.0.0.1:8080");
}
