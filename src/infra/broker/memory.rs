//! In-memory broker for development and testing.
//!
//! Models the parts of an AMQP broker the client relies on: durable queues that
//! outlive connections, per-connection prefetch, unacknowledged deliveries that
//! return to the queue when their connection drops, and connection close
//! notification.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::core::broker::{Acker, Connector, Delivery, QueueTopology, Session, WorkPublisher};
use crate::core::error::BrokerError;
use crate::core::model::TaskSpec;

struct Message {
    body: Vec<u8>,
    redelivered: bool,
}

struct LiveConnection {
    generation: u64,
    close_tx: Option<oneshot::Sender<String>>,
    consumer_tx: mpsc::UnboundedSender<Delivery>,
    prefetch: usize,
    unacked: HashMap<u64, Vec<u8>>,
}

#[derive(Default)]
struct State {
    topology: QueueTopology,
    queues: HashMap<String, VecDeque<Message>>,
    declarations: HashMap<String, u32>,
    connections: u64,
    live: Option<LiveConnection>,
    next_tag: u64,
    refuse_connections: bool,
    fail_publishes: bool,
    acked: u64,
    rejected: u64,
}

impl State {
    fn status_queue(&mut self) -> &mut VecDeque<Message> {
        let name = self.topology.status_queue.clone();
        self.queues.entry(name).or_default()
    }

    /// Push queued status messages to the live consumer up to its prefetch.
    fn dispatch(&mut self, broker: &InMemoryBroker) {
        loop {
            let Some(live) = self.live.as_ref() else { return };
            if live.unacked.len() >= live.prefetch {
                return;
            }
            let generation = live.generation;
            let Some(message) = self.status_queue().pop_front() else {
                return;
            };
            self.next_tag += 1;
            let tag = self.next_tag;
            let delivery = Delivery::new(
                message.body.clone(),
                message.redelivered,
                Box::new(InMemoryAcker {
                    broker: broker.clone(),
                    generation,
                    tag,
                }),
            );
            let Some(live) = self.live.as_mut() else { return };
            live.unacked.insert(tag, message.body);
            if live.consumer_tx.send(delivery).is_err() {
                // Consumer gone; the message stays unacked until the connection drops.
                return;
            }
        }
    }

    fn drop_live(&mut self, reason: &str) {
        let Some(mut live) = self.live.take() else { return };
        let queue = self.status_queue();
        let mut tags: Vec<_> = live.unacked.keys().copied().collect();
        tags.sort_unstable();
        for tag in tags.into_iter().rev() {
            if let Some(body) = live.unacked.remove(&tag) {
                queue.push_front(Message {
                    body,
                    redelivered: true,
                });
            }
        }
        if let Some(close_tx) = live.close_tx.take() {
            let _ = close_tx.send(reason.to_string());
        }
    }
}

/// Shared in-memory broker. Clones refer to the same server.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that opens sessions against this broker.
    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            broker: self.clone(),
        }
    }

    /// Enqueue a status message, as a worker would.
    pub fn deliver_status(&self, body: impl Into<Vec<u8>>) {
        let mut state = self.state.lock();
        state.status_queue().push_back(Message {
            body: body.into(),
            redelivered: false,
        });
        state.dispatch(self);
    }

    /// Drop the live connection. Unacknowledged deliveries return to the queue.
    pub fn drop_connections(&self, reason: &str) {
        self.state.lock().drop_live(reason);
    }

    /// Refuse (or accept again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Reject (or accept again) publishes.
    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().fail_publishes = fail;
    }

    /// Raw bodies currently on the work queue, oldest first.
    pub fn work_messages(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock();
        state
            .queues
            .get(&state.topology.work_queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Task specs currently on the work queue, oldest first.
    pub fn published_specs(&self) -> Vec<TaskSpec> {
        self.work_messages()
            .iter()
            .filter_map(|body| serde_json::from_slice(body).ok())
            .collect()
    }

    /// Messages waiting on the status queue, not yet delivered.
    pub fn status_backlog(&self) -> usize {
        let state = self.state.lock();
        state
            .queues
            .get(&state.topology.status_queue)
            .map_or(0, VecDeque::len)
    }

    /// Deliveries on the live connection awaiting settlement.
    pub fn unacked(&self) -> usize {
        self.state.lock().live.as_ref().map_or(0, |l| l.unacked.len())
    }

    /// Deliveries acknowledged so far.
    pub fn acked(&self) -> u64 {
        self.state.lock().acked
    }

    /// Deliveries rejected without requeue so far.
    pub fn rejected(&self) -> u64 {
        self.state.lock().rejected
    }

    /// Times `queue` has been declared.
    pub fn declarations(&self, queue: &str) -> u32 {
        self.state.lock().declarations.get(queue).copied().unwrap_or(0)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> u64 {
        self.state.lock().connections
    }

    /// Prefetch of the live connection.
    pub fn prefetch(&self) -> Option<usize> {
        self.state.lock().live.as_ref().map(|l| l.prefetch)
    }

    fn settle(&self, generation: u64, tag: u64, outcome: Settle) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let live = state
            .live
            .as_mut()
            .filter(|l| l.generation == generation)
            .ok_or_else(|| BrokerError::Transport("channel closed".into()))?;
        let body = live
            .unacked
            .remove(&tag)
            .ok_or_else(|| BrokerError::Transport(format!("unknown delivery tag {tag}")))?;
        match outcome {
            Settle::Ack => state.acked += 1,
            Settle::Reject => state.rejected += 1,
            Settle::Requeue => state.status_queue().push_front(Message {
                body,
                redelivered: true,
            }),
        }
        state.dispatch(self);
        Ok(())
    }
}

enum Settle {
    Ack,
    Reject,
    Requeue,
}

struct InMemoryAcker {
    broker: InMemoryBroker,
    generation: u64,
    tag: u64,
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.broker.settle(self.generation, self.tag, Settle::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let outcome = if requeue { Settle::Requeue } else { Settle::Reject };
        self.broker.settle(self.generation, self.tag, outcome)
    }
}

struct InMemoryPublisher {
    broker: InMemoryBroker,
    generation: u64,
}

#[async_trait]
impl WorkPublisher for InMemoryPublisher {
    async fn publish(&self, body: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.broker.state.lock();
        if state.live.as_ref().map(|l| l.generation) != Some(self.generation) {
            return Err(BrokerError::Transport("channel closed".into()));
        }
        if state.fail_publishes {
            return Err(BrokerError::Transport("publish not confirmed".into()));
        }
        let work_queue = state.topology.work_queue.clone();
        state.queues.entry(work_queue).or_default().push_back(Message {
            body: body.to_vec(),
            redelivered: false,
        });
        Ok(())
    }
}

/// Opens sessions against an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryConnector {
    broker: InMemoryBroker,
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, topology: &QueueTopology) -> Result<Session, BrokerError> {
        let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();

        let generation = {
            let mut state = self.broker.state.lock();
            if state.refuse_connections {
                return Err(BrokerError::ConnectionLost("connection refused".into()));
            }
            state.drop_live("replaced by new connection");
            state.topology = topology.clone();
            for queue in [&topology.work_queue, &topology.status_queue] {
                *state.declarations.entry(queue.clone()).or_default() += 1;
                state.queues.entry(queue.clone()).or_default();
            }
            state.connections += 1;
            let generation = state.connections;
            state.live = Some(LiveConnection {
                generation,
                close_tx: Some(close_tx),
                consumer_tx,
                prefetch: usize::from(topology.prefetch_count.max(1)),
                unacked: HashMap::new(),
            });
            state.dispatch(&self.broker);
            generation
        };

        let deliveries = futures::stream::unfold(consumer_rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), rx))
        })
        .boxed();
        let closed = async move {
            close_rx
                .await
                .unwrap_or_else(|_| "broker shut down".to_string())
        }
        .boxed();

        Ok(Session {
            publisher: Arc::new(InMemoryPublisher {
                broker: self.broker.clone(),
                generation,
            }),
            deliveries,
            closed,
        })
    }

    fn endpoint(&self) -> String {
        "memory://".into()
    }
}
