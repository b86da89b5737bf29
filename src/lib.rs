//! # Prometheus Task Admission
//!
//! Durable task admission and broker-backed scheduling for containerised workloads.
//!
//! Submitted task specifications are persisted in a backing store, queued FIFO, and
//! released to an external worker fleet over a message broker under a bounded
//! concurrency limit. Workers report progress and outcomes on a status queue; the
//! scheduler records them and frees capacity when a task finishes.
//!
//! ## Components
//!
//! - **Task store** ([`core::store::TaskStore`]): write-once specs under `task:<id>`,
//!   the `taskQ` intake list, the `executing` capacity set, and `task:<id>:info`
//!   status records, over any [`core::store::StoreBackend`] (Redis or in-memory).
//! - **Broker client** ([`core::broker::BrokerClient`]): publishes admitted specs to
//!   `work_queue`, consumes `task_status_queue`, and reconnects forever after a
//!   dropped connection.
//! - **Scheduler** ([`core::scheduler::Scheduler`]): one `tokio::select!` loop over
//!   task-created notifications, status deliveries, an optional reconciliation tick,
//!   and a cancellation token.
//! - **Intake API** ([`runtime::api`]): `submit_task`, `get_task`, `get_task_status`,
//!   served over HTTP by `runtime::http` when the `http-api` feature is on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use prometheus_task_admission::builders::build_system;
//! use prometheus_task_admission::config::{AppConfig, ManagerConfig};
//! use prometheus_task_admission::core::TaskSpec;
//! use prometheus_task_admission::infra::{InMemoryBackend, InMemoryBroker};
//! use prometheus_task_admission::runtime::submit_task;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let cfg = AppConfig::new(ManagerConfig::new(10, 100));
//! let broker = InMemoryBroker::new();
//! let system = build_system(&cfg, InMemoryBackend::new(), Arc::new(broker.connector())).await?;
//!
//! let cancel = CancellationToken::new();
//! let handle = system.scheduler.spawn(cancel.clone());
//! submit_task(&system.store, &cfg.manager, TaskSpec::new("alpine", "init.sh")).await?;
//! ```
//!
//! For complete scenarios, see `tests/scheduler_test.rs`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core models, task store, broker client, and scheduler.
pub mod core;
/// Configuration models for admission limits, store, and broker.
pub mod config;
/// Builders wiring components together from configuration.
pub mod builders;
/// Infrastructure adapters for the backing store and the message broker.
pub mod infra;
/// Intake API surface and its HTTP front end.
pub mod runtime;
/// Shared utilities.
pub mod util;
