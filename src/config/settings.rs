//! Application, scheduler, store, and broker configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::broker::{QueueTopology, ReconnectPolicy};
use crate::core::error::ConfigError;
use crate::core::store::MIN_EVENT_BUFFER;

/// What the scheduler does with a task it cannot admit because capacity is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Log and discard the notification.
    #[default]
    Drop,
    /// Hold the task in an in-memory FIFO and admit it when capacity frees.
    Requeue,
}

/// Admission limits and scheduler tuning. Read from the `[manager]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Maximum tasks concurrently charged against capacity. `0` admits nothing.
    pub execution_queue_size: u64,
    /// Maximum length of the intake queue. `0` accepts no submissions.
    pub task_queue_size: u64,
    /// Capacity of the task-created notification buffer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Handling of tasks that arrive while capacity is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Seconds between reconciliation passes. `0` disables them.
    #[serde(default)]
    pub reconcile_interval_secs: u64,
}

const fn default_event_buffer() -> usize {
    MIN_EVENT_BUFFER
}

impl ManagerConfig {
    /// Limits with every tuning knob at its default.
    pub const fn new(execution_queue_size: u64, task_queue_size: u64) -> Self {
        Self {
            execution_queue_size,
            task_queue_size,
            event_buffer: MIN_EVENT_BUFFER,
            overflow: OverflowPolicy::Drop,
            reconcile_interval_secs: 0,
        }
    }

    /// Set the overflow policy.
    #[must_use]
    pub const fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Set the reconciliation interval in seconds.
    #[must_use]
    pub const fn with_reconcile_interval(mut self, secs: u64) -> Self {
        self.reconcile_interval_secs = secs;
        self
    }

    /// Reconciliation interval, if enabled.
    pub const fn reconcile_interval(&self) -> Option<Duration> {
        if self.reconcile_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.reconcile_interval_secs))
        }
    }

    /// Validate manager configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_buffer < MIN_EVENT_BUFFER {
            return Err(format!("event_buffer must be at least {MIN_EVENT_BUFFER}"));
        }
        Ok(())
    }
}

/// Backing store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL.
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".into(),
        }
    }
}

/// HTTP intake listener. Read from the `[http]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Address the intake server binds, e.g. `127.0.0.1:8080`.
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".into(),
        }
    }
}

/// Delay schedule between broker reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First delay in milliseconds.
    pub delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Growth per failed attempt.
    pub multiplier: f64,
    /// Randomise each delay.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 2000,
            max_delay_ms: 2000,
            multiplier: 1.0,
            jitter: false,
        }
    }
}

impl ReconnectConfig {
    /// Validate reconnect values.
    pub fn validate(&self) -> Result<(), String> {
        if self.delay_ms == 0 {
            return Err("reconnect.delay_ms must be greater than 0".into());
        }
        if self.max_delay_ms < self.delay_ms {
            return Err("reconnect.max_delay_ms must be at least delay_ms".into());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("reconnect.multiplier must be a finite number >= 1.0".into());
        }
        Ok(())
    }

    /// Reconnect policy described by this section.
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::exponential(
            Duration::from_millis(self.delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
        )
        .with_jitter(self.jitter)
    }
}

/// Broker connection and queue layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// AMQP URL.
    pub url: String,
    /// Queue receiving admitted work.
    pub work_queue: String,
    /// Queue carrying worker status reports.
    pub status_queue: String,
    /// Maximum unacknowledged status deliveries.
    pub prefetch_count: u16,
    /// Reconnect schedule.
    pub reconnect: ReconnectConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let topology = QueueTopology::default();
        Self {
            url: "amqp://localhost:5672/%2f".into(),
            work_queue: topology.work_queue,
            status_queue: topology.status_queue,
            prefetch_count: topology.prefetch_count,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Validate broker configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("broker url must not be empty".into());
        }
        if self.work_queue.trim().is_empty() || self.status_queue.trim().is_empty() {
            return Err("queue names must not be empty".into());
        }
        if self.work_queue == self.status_queue {
            return Err("work_queue and status_queue must differ".into());
        }
        if self.prefetch_count == 0 {
            return Err("prefetch_count must be greater than 0".into());
        }
        self.reconnect.validate()
    }

    /// Queue layout declared on every connect.
    pub fn topology(&self) -> QueueTopology {
        QueueTopology {
            work_queue: self.work_queue.clone(),
            status_queue: self.status_queue.clone(),
            prefetch_count: self.prefetch_count,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Admission limits.
    pub manager: ManagerConfig,
    /// Backing store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Message broker.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// HTTP intake.
    #[serde(default)]
    pub http: HttpConfig,
}

impl AppConfig {
    /// Configuration with the given limits and default connections.
    pub fn new(manager: ManagerConfig) -> Self {
        Self {
            manager,
            store: StoreConfig::default(),
            broker: BrokerConfig::default(),
            http: HttpConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.manager
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("manager: {e}")))?;
        if self.store.url.trim().is_empty() {
            return Err(ConfigError::Invalid("store: url must not be empty".into()));
        }
        if self.http.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("http: listen must not be empty".into()));
        }
        self.broker
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("broker: {e}")))
    }

    /// Parse configuration from a TOML string and validate.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a `.json` file, or TOML for any other extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&input),
            _ => Self::from_toml_str(&input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_manager_section_parses() {
        let cfg = AppConfig::from_toml_str(
            "[manager]\nexecution_queue_size = 10\ntask_queue_size = 100\n",
        )
        .unwrap();
        assert_eq!(cfg.manager.execution_queue_size, 10);
        assert_eq!(cfg.manager.task_queue_size, 100);
        assert_eq!(cfg.manager.overflow, OverflowPolicy::Drop);
        assert_eq!(cfg.manager.event_buffer, 100);
        assert_eq!(cfg.broker.prefetch_count, 5);
        assert_eq!(cfg.store.url, "redis://localhost:6379");
    }

    #[test]
    fn test_default_reconnect_is_fixed_two_seconds() {
        let policy = ReconnectConfig::default().policy();
        assert_eq!(policy, ReconnectPolicy::default());
    }
}
