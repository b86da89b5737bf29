//! Broker client: work publishing, status consumption, and reconnect supervision.
//!
//! A [`Connector`] opens one [`Session`] against a transport. The [`BrokerClient`]
//! owns the current session and a supervisor task that, when the session's
//! connection drops, waits per the [`ReconnectPolicy`] and opens a new one,
//! forever, until shutdown. A fan-in task per session forwards its status
//! deliveries into one stream that survives reconnects.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::error::BrokerError;
use crate::core::model::TaskSpec;

/// Buffer between the supervisor and the status consumer.
pub const STATUS_BUFFER: usize = 100;

/// Queue names and consumer settings declared on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    /// Queue that receives admitted task specs.
    pub work_queue: String,
    /// Queue that workers report status on.
    pub status_queue: String,
    /// Maximum unacknowledged status deliveries in flight.
    pub prefetch_count: u16,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            work_queue: "work_queue".into(),
            status_queue: "task_status_queue".into(),
            prefetch_count: 5,
        }
    }
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Acknowledge the delivery.
    async fn ack(&self) -> Result<(), BrokerError>;
    /// Reject the delivery, optionally returning it to the queue.
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// One message received from the status queue.
pub struct Delivery {
    /// Raw message body.
    pub body: Vec<u8>,
    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
    acker: Box<dyn Acker>,
}

impl Delivery {
    /// Wrap a received body with the handle that settles it.
    pub fn new(body: Vec<u8>, redelivered: bool, acker: Box<dyn Acker>) -> Self {
        Self {
            body,
            redelivered,
            acker,
        }
    }

    /// Acknowledge the delivery.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// Reject the delivery.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

/// Publishes persistent messages to the work queue of one session.
#[async_trait]
pub trait WorkPublisher: Send + Sync {
    /// Publish `body` and wait for the broker to accept it.
    async fn publish(&self, body: &[u8]) -> Result<(), BrokerError>;
}

/// A live connection with its queues declared and the status consumer started.
pub struct Session {
    /// Work queue publisher.
    pub publisher: Arc<dyn WorkPublisher>,
    /// Status deliveries. Ends when the consumer is cancelled.
    pub deliveries: BoxStream<'static, Result<Delivery, BrokerError>>,
    /// Resolves with a reason once the connection has dropped.
    pub closed: BoxFuture<'static, String>,
}

/// Opens sessions against a broker transport.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect, declare both queues durable, set prefetch, and start consuming
    /// the status queue.
    async fn connect(&self, topology: &QueueTopology) -> Result<Session, BrokerError>;

    /// Endpoint description for logs. Must not contain credentials.
    fn endpoint(&self) -> String;
}

/// Delay schedule between reconnect attempts.
///
/// The default is a fixed 2 second delay. Attempts never stop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per failed attempt. `1.0` keeps the delay fixed.
    pub multiplier: f64,
    /// Randomise each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2))
    }
}

impl ReconnectPolicy {
    /// Same delay before every attempt.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay growing by `multiplier` per failed attempt, capped at `max_delay`.
    pub const fn exponential(delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            delay,
            max_delay,
            multiplier,
            jitter: false,
        }
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before reconnect attempt `attempt`, counting from zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay.max(self.delay).as_secs_f64());
        let secs = if self.jitter {
            capped * rand::rng().random_range(0.5..=1.0)
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

/// Snapshot of broker client activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Work messages accepted by the broker.
    pub published: u64,
    /// Publish attempts that failed.
    pub publish_failures: u64,
    /// Status deliveries forwarded to the consumer.
    pub deliveries: u64,
    /// Successful reconnects after a lost connection.
    pub reconnects: u64,
    /// Whether a session is currently live.
    pub connected: bool,
}

#[derive(Debug, Default)]
struct BrokerCounters {
    published: AtomicU64,
    publish_failures: AtomicU64,
    deliveries: AtomicU64,
    reconnects: AtomicU64,
    connected: AtomicBool,
}

impl BrokerCounters {
    fn snapshot(&self) -> BrokerStats {
        BrokerStats {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}

type PublisherSlot = Arc<RwLock<Option<Arc<dyn WorkPublisher>>>>;

/// Broker client with automatic, unbounded reconnection.
pub struct BrokerClient {
    endpoint: String,
    publisher: PublisherSlot,
    status_rx: Mutex<Option<mpsc::Receiver<Delivery>>>,
    counters: Arc<BrokerCounters>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerClient {
    /// Open the first session and start the reconnect supervisor.
    ///
    /// Failure of the first connection is returned to the caller. Later drops
    /// are recovered in the background.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        topology: QueueTopology,
        policy: ReconnectPolicy,
    ) -> Result<Self, BrokerError> {
        let endpoint = connector.endpoint();
        let session = connector.connect(&topology).await?;
        info!(
            endpoint = %endpoint,
            work_queue = %topology.work_queue,
            status_queue = %topology.status_queue,
            prefetch = topology.prefetch_count,
            "broker connected"
        );

        let (status_tx, status_rx) = mpsc::channel(STATUS_BUFFER);
        // Live before `connect` returns so an immediate publish succeeds.
        let publisher: PublisherSlot = Arc::new(RwLock::new(Some(Arc::clone(&session.publisher))));
        let counters = Arc::new(BrokerCounters::default());
        counters.connected.store(true, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            connector,
            topology,
            policy,
            publisher: Arc::clone(&publisher),
            status_tx,
            counters: Arc::clone(&counters),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(supervisor.run(session));

        Ok(Self {
            endpoint,
            publisher,
            status_rx: Mutex::new(Some(status_rx)),
            counters,
            cancel,
            supervisor: Mutex::new(Some(handle)),
        })
    }

    /// Serialize `spec` and publish it as a persistent JSON message on the work queue.
    pub async fn publish_work(&self, spec: &TaskSpec) -> Result<(), BrokerError> {
        let body =
            serde_json::to_vec(spec).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let publisher = self.publisher.read().clone();
        let Some(publisher) = publisher else {
            self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
            return Err(BrokerError::Transport(format!(
                "not connected to broker at {}",
                self.endpoint
            )));
        };
        match publisher.publish(&body).await {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Claim the status delivery stream. Only one caller succeeds.
    ///
    /// The stream continues across reconnects and ends after [`shutdown`](Self::shutdown).
    pub fn status_deliveries(&self) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        self.status_rx.lock().take().ok_or(BrokerError::StreamTaken)
    }

    /// Whether a session is currently live.
    pub fn is_connected(&self) -> bool {
        self.counters.connected.load(Ordering::Relaxed)
    }

    /// Current activity counters.
    pub fn stats(&self) -> BrokerStats {
        self.counters.snapshot()
    }

    /// Stop reconnecting and wait for the supervisor to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "broker supervisor panicked");
            }
        }
        info!(endpoint = %self.endpoint, "broker client shut down");
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClient")
            .field("endpoint", &self.endpoint)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

struct Supervisor {
    connector: Arc<dyn Connector>,
    topology: QueueTopology,
    policy: ReconnectPolicy,
    publisher: PublisherSlot,
    status_tx: mpsc::Sender<Delivery>,
    counters: Arc<BrokerCounters>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Supervise `session`, whose publisher is already installed, and every
    /// session opened after it.
    async fn run(self, mut session: Session) {
        loop {
            let Session { deliveries, closed, .. } = session;

            let session_cancel = self.cancel.child_token();
            let mut fan_in = tokio::spawn(fan_in(
                deliveries,
                self.status_tx.clone(),
                Arc::clone(&self.counters),
                session_cancel.clone(),
            ));

            let (lost, joined) = tokio::select! {
                () = self.cancel.cancelled() => (None, None),
                reason = closed => (Some(reason), None),
                joined = &mut fan_in => (Some("status consumer ended".to_string()), Some(joined)),
            };

            *self.publisher.write() = None;
            self.counters.connected.store(false, Ordering::Relaxed);
            session_cancel.cancel();
            let joined = match joined {
                Some(joined) => joined,
                None => fan_in.await,
            };
            if let Err(e) = joined {
                error!(error = %e, "status fan-in task panicked");
            }

            let Some(reason) = lost else {
                debug!("broker supervisor stopping");
                return;
            };
            warn!(endpoint = %self.connector.endpoint(), reason = %reason, "broker connection lost, reconnecting");

            match self.reconnect().await {
                Some(next) => {
                    *self.publisher.write() = Some(Arc::clone(&next.publisher));
                    self.counters.connected.store(true, Ordering::Relaxed);
                    session = next;
                }
                None => return,
            }
        }
    }

    async fn reconnect(&self) -> Option<Session> {
        let mut attempt: u32 = 0;
        loop {
            let delay = self.policy.delay_for(attempt);
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
            match self.connector.connect(&self.topology).await {
                Ok(session) => {
                    self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(endpoint = %self.connector.endpoint(), attempt = attempt + 1, "broker reconnected");
                    return Some(session);
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.connector.endpoint(),
                        attempt = attempt + 1,
                        error = %e,
                        "broker reconnect failed"
                    );
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

/// Forward one session's status deliveries into the long-lived stream until
/// the session ends or is cancelled.
async fn fan_in(
    mut deliveries: BoxStream<'static, Result<Delivery, BrokerError>>,
    status_tx: mpsc::Sender<Delivery>,
    counters: Arc<BrokerCounters>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = deliveries.next() => next,
        };
        match next {
            Some(Ok(delivery)) => {
                counters.deliveries.fetch_add(1, Ordering::Relaxed);
                tokio::select! {
                    () = cancel.cancelled() => return,
                    sent = status_tx.send(delivery) => {
                        if sent.is_err() {
                            debug!("status consumer gone, delivery left unsettled");
                        }
                    }
                }
            }
            Some(Err(e)) => warn!(error = %e, "status delivery error"),
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_fixed_two_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(10), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_policy_is_capped() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
        );
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(1000)).with_jitter(true);
        for attempt in 0..50 {
            let d = policy.delay_for(attempt);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_default_topology_names() {
        let topology = QueueTopology::default();
        assert_eq!(topology.work_queue, "work_queue");
        assert_eq!(topology.status_queue, "task_status_queue");
        assert_eq!(topology.prefetch_count, 5);
    }
}
