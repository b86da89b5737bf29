//! Scheduler loop: admits created tasks under the execution limit and processes
//! worker status reports.
//!
//! The loop multiplexes four inputs with `tokio::select!`: task-created
//! notifications from the [`TaskStore`], status deliveries from the
//! [`BrokerClient`], an optional reconciliation tick, and a cancellation token.
//! Every store or broker failure is logged and the offending event discarded;
//! the loop itself only stops on cancellation.
//!
//! Admission charges capacity before dispatch and rolls the charge back if the
//! publish fails, so a failed dispatch never holds capacity. A crash between
//! charge and rollback leaves a stale member that reconciliation removes once a
//! terminal status exists for it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ManagerConfig, OverflowPolicy};
use crate::core::broker::{BrokerClient, Delivery};
use crate::core::error::{SchedulerError, StoreError};
use crate::core::model::{StatusType, TaskId, TaskStatus};
use crate::core::store::{StoreBackend, TaskStore};

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Capacity charged and the spec published.
    Dispatched,
    /// The execution limit is reached; nothing was charged.
    AtCapacity,
    /// The task already holds capacity; nothing was charged.
    AlreadyExecuting,
    /// A store or broker step failed; retrying later may succeed.
    Failed,
    /// The task's spec is missing or unreadable, so it can never be admitted.
    Discarded,
}

/// Snapshot of scheduler activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks dispatched to the work queue.
    pub admitted: u64,
    /// Admission attempts refused at the execution limit.
    pub at_capacity: u64,
    /// Notifications skipped because the task already held capacity.
    pub already_executing: u64,
    /// Tasks currently waiting in the deferred FIFO.
    pub deferred: u64,
    /// Tasks dropped because the deferred FIFO was full.
    pub overflow_dropped: u64,
    /// Admissions discarded because a store read failed.
    pub store_failures: u64,
    /// Admissions discarded because the capacity charge failed.
    pub charge_failures: u64,
    /// Admissions discarded because publishing failed.
    pub dispatch_failures: u64,
    /// Failed publishes whose charge could not be rolled back.
    pub rollback_failures: u64,
    /// Status reports recorded.
    pub statuses_processed: u64,
    /// Status reports that could not be recorded.
    pub status_failures: u64,
    /// Capacity releases after terminal statuses.
    pub released: u64,
    /// Terminal statuses whose release failed.
    pub release_failures: u64,
    /// Deliveries rejected because their body did not parse.
    pub malformed_deliveries: u64,
    /// Stale executing-set members removed by reconciliation.
    pub reconciled: u64,
}

#[derive(Debug, Default)]
struct SchedulerCounters {
    admitted: AtomicU64,
    at_capacity: AtomicU64,
    already_executing: AtomicU64,
    deferred: AtomicU64,
    overflow_dropped: AtomicU64,
    store_failures: AtomicU64,
    charge_failures: AtomicU64,
    dispatch_failures: AtomicU64,
    rollback_failures: AtomicU64,
    statuses_processed: AtomicU64,
    status_failures: AtomicU64,
    released: AtomicU64,
    release_failures: AtomicU64,
    malformed_deliveries: AtomicU64,
    reconciled: AtomicU64,
}

impl SchedulerCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            at_capacity: self.at_capacity.load(Ordering::Relaxed),
            already_executing: self.already_executing.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            charge_failures: self.charge_failures.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            statuses_processed: self.statuses_processed.load(Ordering::Relaxed),
            status_failures: self.status_failures.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            malformed_deliveries: self.malformed_deliveries.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of a scheduler's counters, usable after the scheduler moves
/// into its task.
#[derive(Debug, Clone)]
pub struct SchedulerMonitor {
    counters: Arc<SchedulerCounters>,
}

impl SchedulerMonitor {
    /// Current counters.
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }
}

/// The admission and status-processing loop.
pub struct Scheduler<B> {
    store: Arc<TaskStore<B>>,
    broker: Arc<BrokerClient>,
    config: ManagerConfig,
    deferred: VecDeque<TaskId>,
    counters: Arc<SchedulerCounters>,
}

impl<B: StoreBackend> Scheduler<B> {
    /// Create a scheduler over a store and broker client.
    pub fn new(store: Arc<TaskStore<B>>, broker: Arc<BrokerClient>, config: ManagerConfig) -> Self {
        Self {
            store,
            broker,
            config,
            deferred: VecDeque::new(),
            counters: Arc::new(SchedulerCounters::default()),
        }
    }

    /// Handle for reading counters.
    pub fn monitor(&self) -> SchedulerMonitor {
        SchedulerMonitor {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    /// Tasks waiting for capacity, oldest first.
    pub fn deferred(&self) -> impl Iterator<Item = &TaskId> {
        self.deferred.iter()
    }

    /// Run the loop on a new task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<(), SchedulerError>> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until `cancel` fires.
    ///
    /// Fails only if another consumer already claimed the store's notification
    /// stream or the broker's status stream.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        let mut created = self.store.listen_for_task_created_events()?;
        let mut statuses = self.broker.status_deliveries()?;
        let mut ticker = self.config.reconcile_interval().map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        info!(
            execution_queue_size = self.config.execution_queue_size,
            overflow = ?self.config.overflow,
            reconcile_interval_secs = self.config.reconcile_interval_secs,
            "scheduler started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(deferred = self.deferred.len(), "scheduler stopping");
                    return Ok(());
                }
                Some(id) = created.recv() => self.on_task_created(id).await,
                Some(delivery) = statuses.recv() => self.handle_delivery(delivery).await,
                () = next_tick(ticker.as_mut()) => {
                    self.reconcile().await;
                }
            }
        }
    }

    /// React to a task-created notification according to the overflow policy.
    pub async fn on_task_created(&mut self, id: TaskId) {
        if self.config.overflow == OverflowPolicy::Requeue && !self.deferred.is_empty() {
            // Keep FIFO order behind tasks already waiting.
            self.defer(id);
            self.drain_deferred().await;
            return;
        }
        if self.admit(id).await == Admission::AtCapacity {
            match self.config.overflow {
                OverflowPolicy::Drop => {
                    info!(task_id = %id, "execution queue full, task notification dropped");
                }
                OverflowPolicy::Requeue => self.defer(id),
            }
        }
    }

    /// Try to admit one task: charge capacity, then publish its spec.
    pub async fn admit(&self, id: TaskId) -> Admission {
        match self.store.is_executing(&id).await {
            Ok(true) => {
                SchedulerCounters::bump(&self.counters.already_executing);
                debug!(task_id = %id, "task already executing, not charged again");
                return Admission::AlreadyExecuting;
            }
            Ok(false) => {}
            Err(e) => {
                SchedulerCounters::bump(&self.counters.store_failures);
                error!(task_id = %id, error = %e, "failed to check executing set");
                return Admission::Failed;
            }
        }

        let executing = match self.store.executing_set_size().await {
            Ok(size) => size,
            Err(e) => {
                SchedulerCounters::bump(&self.counters.store_failures);
                error!(task_id = %id, error = %e, "failed to read executing set size");
                return Admission::Failed;
            }
        };
        if executing >= self.config.execution_queue_size {
            SchedulerCounters::bump(&self.counters.at_capacity);
            debug!(
                task_id = %id,
                executing,
                limit = self.config.execution_queue_size,
                "execution queue full"
            );
            return Admission::AtCapacity;
        }

        let spec = match self.store.get_task(&id).await {
            Ok(spec) => spec,
            Err(e @ (StoreError::NotFound(_) | StoreError::Decode { .. })) => {
                SchedulerCounters::bump(&self.counters.store_failures);
                error!(task_id = %id, error = %e, "task spec unusable, admission discarded");
                return Admission::Discarded;
            }
            Err(e) => {
                SchedulerCounters::bump(&self.counters.store_failures);
                error!(task_id = %id, error = %e, "failed to load task for dispatch");
                return Admission::Failed;
            }
        };

        if let Err(e) = self.store.add_to_executing_set(&id).await {
            SchedulerCounters::bump(&self.counters.charge_failures);
            error!(task_id = %id, error = %e, "failed to charge capacity, task not dispatched");
            return Admission::Failed;
        }

        if let Err(e) = self.broker.publish_work(&spec).await {
            SchedulerCounters::bump(&self.counters.dispatch_failures);
            error!(task_id = %id, error = %e, "failed to publish task to work queue");
            if let Err(e) = self.store.remove_from_executing_set(&id).await {
                SchedulerCounters::bump(&self.counters.rollback_failures);
                error!(
                    task_id = %id,
                    error = %e,
                    "failed to roll back capacity charge after publish failure"
                );
            }
            return Admission::Failed;
        }

        SchedulerCounters::bump(&self.counters.admitted);
        info!(task_id = %id, executing = executing + 1, "task dispatched");
        Admission::Dispatched
    }

    /// Decode and process one status delivery, then settle it.
    ///
    /// Undecodable bodies are rejected without requeue. Everything else is
    /// acknowledged once processed, whether or not processing succeeded.
    pub async fn handle_delivery(&mut self, delivery: Delivery) {
        let status: TaskStatus = match serde_json::from_slice(&delivery.body) {
            Ok(status) => status,
            Err(e) => {
                SchedulerCounters::bump(&self.counters.malformed_deliveries);
                warn!(error = %e, len = delivery.body.len(), "undecodable status delivery rejected");
                if let Err(e) = delivery.nack(false).await {
                    warn!(error = %e, "failed to reject status delivery");
                }
                return;
            }
        };

        self.handle_status(&status).await;

        if let Err(e) = delivery.ack().await {
            warn!(task_id = %status.id, error = %e, "failed to acknowledge status delivery");
        }
    }

    /// Record a status and, for outcomes, release the task's capacity.
    pub async fn handle_status(&mut self, status: &TaskStatus) {
        let id = status.id;
        if let Err(e) = self.store.update_task_info(status).await {
            SchedulerCounters::bump(&self.counters.status_failures);
            error!(task_id = %id, error = %e, "failed to record task status");
            return;
        }
        SchedulerCounters::bump(&self.counters.statuses_processed);

        match status.kind {
            StatusType::Executing => return,
            StatusType::Succeeded => info!(task_id = %id, "task succeeded"),
            StatusType::Failed => match status.failure_cause() {
                Some(Ok(cause)) => warn!(
                    task_id = %id,
                    kind = %cause.kind,
                    reason = %cause.reason,
                    message = %cause.message,
                    "task failed"
                ),
                _ => warn!(task_id = %id, "task failed"),
            },
        }

        if let Err(e) = self.store.remove_from_executing_set(&id).await {
            SchedulerCounters::bump(&self.counters.release_failures);
            error!(task_id = %id, error = %e, "failed to release task capacity");
            return;
        }
        SchedulerCounters::bump(&self.counters.released);
        self.drain_deferred().await;
    }

    /// Remove executing-set members whose recorded status is terminal, then
    /// admit deferred tasks. Returns the number of members removed.
    pub async fn reconcile(&mut self) -> usize {
        let members = match self.store.executing_tasks().await {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, "reconciliation could not list executing tasks");
                return 0;
            }
        };

        let mut repaired = 0;
        for id in members {
            match self.store.get_task_info(&id).await {
                Ok(Some(status)) if status.kind.is_terminal() => {
                    match self.store.remove_from_executing_set(&id).await {
                        Ok(()) => {
                            repaired += 1;
                            SchedulerCounters::bump(&self.counters.reconciled);
                        }
                        Err(e) => warn!(task_id = %id, error = %e, "reconciliation release failed"),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(task_id = %id, error = %e, "reconciliation could not read status"),
            }
        }
        if repaired > 0 {
            info!(repaired, "reconciliation released stale capacity");
        }
        self.drain_deferred().await;
        repaired
    }

    fn defer(&mut self, id: TaskId) {
        if self.deferred.contains(&id) {
            return;
        }
        let limit = usize::try_from(self.config.task_queue_size).unwrap_or(usize::MAX);
        if self.deferred.len() >= limit {
            SchedulerCounters::bump(&self.counters.overflow_dropped);
            warn!(task_id = %id, limit, "deferred admission queue full, task notification dropped");
            return;
        }
        self.deferred.push_back(id);
        self.sync_deferred_gauge();
        debug!(task_id = %id, waiting = self.deferred.len(), "task deferred until capacity frees");
    }

    /// Admit deferred tasks in order. Stops at the execution limit or on a
    /// transient failure, leaving the head in place for the next drain.
    async fn drain_deferred(&mut self) {
        while let Some(&id) = self.deferred.front() {
            match self.admit(id).await {
                Admission::Dispatched | Admission::AlreadyExecuting | Admission::Discarded => {
                    self.deferred.pop_front();
                }
                Admission::AtCapacity | Admission::Failed => break,
            }
        }
        self.sync_deferred_gauge();
    }

    fn sync_deferred_gauge(&self) {
        self.counters
            .deferred
            .store(self.deferred.len() as u64, Ordering::Relaxed);
    }
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
