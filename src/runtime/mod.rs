//! Intake API surface and its HTTP front end.

pub mod api;
#[cfg(feature = "http-api")]
pub mod http;

pub use api::{get_task, get_task_status, submit_task, TaskStatusResponse, TaskSubmitted};
