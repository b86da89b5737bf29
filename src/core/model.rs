//! Task specification and status models shared by the store, broker, and scheduler.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Unique task identifier.
pub type TaskId = uuid::Uuid;

/// Immutable description of a unit of work.
///
/// `id` is absent until the store stamps it and never changes afterwards.
/// The wire form uses the field names `id`, `name`, `image`, `init`,
/// `initArgs`, and `metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Assigned at store time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    /// Optional label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Execution artifact reference.
    pub image: String,
    /// Entry-point command.
    pub init: String,
    /// Ordered entry-point arguments. `null` reads as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub init_args: Vec<String>,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Option::<Vec<String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl TaskSpec {
    /// Create a spec with no id, name, arguments, or metadata.
    pub fn new(image: impl Into<String>, init: impl Into<String>) -> Self {
        Self {
            id: None,
            name: None,
            image: image.into(),
            init: init.into(),
            init_args: Vec::new(),
            metadata: None,
        }
    }

    /// Set the label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the entry-point arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.init_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Kind of status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusType {
    /// Task is running on a worker.
    Executing,
    /// Task finished successfully.
    Succeeded,
    /// Task failed.
    Failed,
}

impl StatusType {
    /// Whether this report ends the task's execution and frees capacity.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Executing => "Executing",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Report about a task's outcome, as delivered on the status queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task the report refers to.
    pub id: TaskId,
    /// Report kind. Older workers send the field as `Type`.
    #[serde(rename = "type", alias = "Type")]
    pub kind: StatusType,
    /// Free-form outcome detail. For `Failed` this holds a [`FailureCause`].
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl TaskStatus {
    /// A status with no metadata.
    pub fn new(id: TaskId, kind: StatusType) -> Self {
        Self {
            id,
            kind,
            metadata: Map::new(),
        }
    }

    /// A progress report.
    pub fn executing(id: TaskId) -> Self {
        Self::new(id, StatusType::Executing)
    }

    /// A success report.
    pub fn succeeded(id: TaskId) -> Self {
        Self::new(id, StatusType::Succeeded)
    }

    /// A failure report carrying the cause tree as metadata.
    pub fn failed(id: TaskId, cause: &FailureCause) -> Self {
        let metadata = match serde_json::to_value(cause) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            id,
            kind: StatusType::Failed,
            metadata,
        }
    }

    /// Parse the failure cause tree out of the metadata.
    ///
    /// Returns `None` for non-failure reports.
    pub fn failure_cause(&self) -> Option<Result<FailureCause, serde_json::Error>> {
        if self.kind != StatusType::Failed {
            return None;
        }
        Some(serde_json::from_value(Value::Object(self.metadata.clone())))
    }
}

/// Nested description of why a task failed.
///
/// `children` reports sub-failures, e.g. a container failure under a pod failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    /// Failing resource kind, e.g. `Pod` or `Container`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Failing resource name.
    #[serde(default)]
    pub name: String,
    /// Short machine-readable reason.
    #[serde(default)]
    pub reason: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Nested sub-failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FailureCause>,
}

impl FailureCause {
    /// A leaf cause.
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            reason: reason.into(),
            message: message.into(),
            children: Vec::new(),
        }
    }

    /// Attach a nested cause.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }
}
