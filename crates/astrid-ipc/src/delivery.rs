//! Delayed-message delivery.
//!
//! Producers submit messages with a relative schedule; a [`DeliveryQueue`]
//! orders them by absolute delivery time and a [`DeliveryLoop`] pumps the
//! queue on a fixed cadence, handing each due message to a [`MessageSink`].
//!
//! ```text
//! submitters → inbox (mpsc) → DeliveryQueue (min-heap) → pump → sink
//! ```

use crate::error::{IpcError, Result};
use crate::protocol::Message;
use astrid_core::clock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::time::MissedTickBehavior;

/// Destination for due messages.
pub trait MessageSink {
    /// Hand `message` to its destination.
    ///
    /// [`IpcError::Unroutable`] means the destination will never accept it and
    /// the message is dropped. Any other error leaves it queued for the next
    /// pump.
    fn deliver(&mut self, message: &Message) -> Result<()>;
}

/// Delivery loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Pump cadence.
    pub interval: Duration,
    /// Bounded inbox between submitters and the loop.
    pub inbox_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_micros(250),
            inbox_capacity: 1024,
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(IpcError::Protocol("delivery interval must be non-zero".into()));
        }
        if self.interval > Duration::from_millis(100) {
            return Err(IpcError::Protocol(format!(
                "delivery interval {:?} is too coarse (max 100ms)",
                self.interval
            )));
        }
        if self.inbox_capacity == 0 {
            return Err(IpcError::Protocol("inbox capacity must be non-zero".into()));
        }
        Ok(())
    }
}

struct QueueNode {
    deliver_at: u64,
    seq: u64,
    message: Message,
}

impl QueueNode {
    fn key(&self) -> (u64, u64) {
        (self.deliver_at, self.seq)
    }
}

impl PartialEq for QueueNode {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueNode {}

impl PartialOrd for QueueNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueNode {
    // Reversed: BinaryHeap is a max-heap and the earliest node must be on top
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Result of a single [`DeliveryQueue::pump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Queue empty or head not yet due.
    Idle,
    /// Head was delivered and removed.
    Delivered,
    /// Head is due but the sink refused it; it stays at the head.
    Retry,
    /// Head is due but has no destination; it was removed.
    Dropped,
    /// A loop shutdown pill reached the head and was removed.
    Shutdown,
}

/// Totals of a [`DeliveryQueue::pump_due`] round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpRound {
    pub delivered: usize,
    pub dropped: usize,
    pub stalled: bool,
    pub shutdown: bool,
}

/// Min-heap of messages keyed by delivery time, ties in enqueue order.
#[derive(Default)]
pub struct DeliveryQueue {
    heap: BinaryHeap<QueueNode>,
    next_seq: u64,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `message` for `initiated + scheduled`.
    pub fn enqueue(&mut self, message: Message) {
        let deliver_at = message.deliver_at();
        self.enqueue_at(message, deliver_at);
    }

    /// Queue `message` for an explicit absolute time in nanoseconds.
    pub fn enqueue_at(&mut self, message: Message, deliver_at: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::trace!(
            instrument = %message.instrument,
            voice = message.voice,
            kind = %message.kind,
            deliver_at,
            "message queued"
        );
        self.heap.push(QueueNode {
            deliver_at,
            seq,
            message,
        });
    }

    /// Earliest message, without removing it.
    pub fn peek(&self) -> Option<&Message> {
        self.heap.peek().map(|node| &node.message)
    }

    /// Delivery time of the earliest message.
    pub fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|node| node.deliver_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Deliver the head if it is due at `now`. Never waits.
    ///
    /// A shutdown message with no instrument stops the loop rather than being
    /// delivered; one addressed to an instrument is delivered like any other.
    pub fn pump<S: MessageSink + ?Sized>(&mut self, now: u64, sink: &mut S) -> PumpOutcome {
        let Some(head) = self.heap.peek() else {
            return PumpOutcome::Idle;
        };
        if head.deliver_at > now {
            return PumpOutcome::Idle;
        }

        if head.message.is_shutdown() && head.message.instrument.is_empty() {
            self.heap.pop();
            tracing::debug!(now, "shutdown reached head of delivery queue");
            return PumpOutcome::Shutdown;
        }

        match sink.deliver(&head.message) {
            Ok(()) => {
                if let Some(node) = self.heap.pop() {
                    tracing::trace!(
                        instrument = %node.message.instrument,
                        voice = node.message.voice,
                        late_ns = now - node.deliver_at,
                        "message delivered"
                    );
                }
                PumpOutcome::Delivered
            }
            Err(e @ IpcError::Unroutable { .. }) => {
                if let Some(node) = self.heap.pop() {
                    tracing::warn!(
                        instrument = %node.message.instrument,
                        voice = node.message.voice,
                        kind = %node.message.kind,
                        error = %e,
                        "dropping undeliverable message"
                    );
                }
                PumpOutcome::Dropped
            }
            Err(e) => {
                tracing::debug!(
                    instrument = %head.message.instrument,
                    voice = head.message.voice,
                    error = %e,
                    "delivery failed, retrying next pump"
                );
                PumpOutcome::Retry
            }
        }
    }

    /// Pump until nothing more is due, the sink refuses the head, or a
    /// shutdown pill is reached. A refused head blocks the messages behind it
    /// so delivery order stays non-decreasing in time.
    pub fn pump_due<S: MessageSink + ?Sized>(&mut self, now: u64, sink: &mut S) -> PumpRound {
        let mut round = PumpRound::default();
        loop {
            match self.pump(now, sink) {
                PumpOutcome::Delivered => round.delivered += 1,
                PumpOutcome::Dropped => round.dropped += 1,
                PumpOutcome::Idle => break,
                PumpOutcome::Retry => {
                    round.stalled = true;
                    break;
                }
                PumpOutcome::Shutdown => {
                    round.shutdown = true;
                    break;
                }
            }
        }
        round
    }

    /// Remove every queued message in delivery order.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.heap.len());
        while let Some(node) = self.heap.pop() {
            messages.push(node.message);
        }
        messages
    }
}

/// Routes messages to per-instrument bounded channels.
///
/// A full channel is retried on the next pump. An unknown instrument or a
/// channel whose receiver is gone can never accept the message, so it is
/// dropped.
#[derive(Default)]
pub struct ChannelRouter {
    routes: HashMap<String, mpsc::Sender<Message>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel for `instrument` and return its receiving end.
    pub fn register(&mut self, instrument: &str, capacity: usize) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.route(instrument, tx);
        rx
    }

    /// Route `instrument` to an existing sender.
    pub fn route(&mut self, instrument: &str, sender: mpsc::Sender<Message>) {
        if self.routes.insert(instrument.to_string(), sender).is_some() {
            tracing::debug!(instrument, "replaced delivery route");
        }
    }

    pub fn unregister(&mut self, instrument: &str) -> bool {
        self.routes.remove(instrument).is_some()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

impl MessageSink for ChannelRouter {
    fn deliver(&mut self, message: &Message) -> Result<()> {
        let sender = self
            .routes
            .get(&message.instrument)
            .ok_or_else(|| IpcError::Unroutable {
                destination: message.instrument.clone(),
                reason: "no such instrument".into(),
            })?;

        sender.try_send(message.clone()).map_err(|e| match e {
            TrySendError::Full(_) => IpcError::Delivery {
                destination: message.instrument.clone(),
                reason: "channel full".into(),
            },
            TrySendError::Closed(_) => IpcError::Unroutable {
                destination: message.instrument.clone(),
                reason: "channel closed".into(),
            },
        })
    }
}

/// Producer side of a delivery loop. Cheap to clone.
#[derive(Clone)]
pub struct MessageSubmitter {
    tx: mpsc::Sender<Message>,
}

impl MessageSubmitter {
    /// Submit without waiting. Fails if the inbox is full or the loop has ended.
    pub fn submit(&self, message: Message) -> Result<()> {
        message.validate()?;
        self.tx.try_send(message).map_err(|e| {
            let (message, reason) = match e {
                TrySendError::Full(m) => (m, "inbox full"),
                TrySendError::Closed(m) => (m, "delivery loop stopped"),
            };
            IpcError::Delivery {
                destination: message.instrument,
                reason: reason.into(),
            }
        })
    }

    /// Submit, waiting for inbox space.
    pub async fn submit_async(&self, message: Message) -> Result<()> {
        message.validate()?;
        self.tx
            .send(message)
            .await
            .map_err(|e| IpcError::Delivery {
                destination: e.0.instrument,
                reason: "delivery loop stopped".into(),
            })
    }

    /// Queue the loop's shutdown pill. Messages due before it still go out.
    pub fn shutdown(&self) -> Result<()> {
        self.submit(Message::shutdown())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What a finished delivery loop did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Due messages that had no destination.
    pub dropped: usize,
    /// Messages still queued when the loop stopped, in delivery order.
    pub discarded: Vec<Message>,
}

/// Pumps a [`DeliveryQueue`] into a sink on a fixed cadence.
pub struct DeliveryLoop<S> {
    queue: DeliveryQueue,
    inbox: mpsc::Receiver<Message>,
    sink: S,
    config: DeliveryConfig,
}

impl<S: MessageSink> DeliveryLoop<S> {
    pub fn new(config: DeliveryConfig, sink: S) -> Result<(Self, MessageSubmitter)> {
        config.validate()?;
        let (tx, inbox) = mpsc::channel(config.inbox_capacity);
        let this = Self {
            queue: DeliveryQueue::new(),
            inbox,
            sink,
            config,
        };
        Ok((this, MessageSubmitter { tx }))
    }

    /// Run until a shutdown pill is due or every submitter is gone and the
    /// queue is empty.
    pub async fn run(mut self) -> DeliveryReport {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(interval = ?self.config.interval, "delivery loop started");

        let mut delivered = 0;
        let mut dropped = 0;
        loop {
            interval.tick().await;

            let inbox_closed = self.drain_inbox();
            let round = self.queue.pump_due(clock::now_nanos(), &mut self.sink);
            delivered += round.delivered;
            dropped += round.dropped;

            if round.shutdown || (inbox_closed && self.queue.is_empty()) {
                break;
            }
        }

        // Nothing more is accepted; every queued node is accounted for
        self.inbox.close();
        self.drain_inbox();
        let discarded = self.queue.drain();
        for message in &discarded {
            tracing::debug!(
                instrument = %message.instrument,
                voice = message.voice,
                kind = %message.kind,
                "discarding undelivered message"
            );
        }

        tracing::debug!(
            delivered,
            dropped,
            discarded = discarded.len(),
            "delivery loop stopped"
        );
        DeliveryReport {
            delivered,
            dropped,
            discarded,
        }
    }

    /// Move every submitted message into the queue. True once all
    /// submitters are gone.
    fn drain_inbox(&mut self) -> bool {
        loop {
            match self.inbox.try_recv() {
                Ok(message) => self.queue.enqueue(message),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }
}


impl<S: MessageSink + Send + 'static> DeliveryLoop<S> {
    /// Run on a dedicated thread with its own single-threaded runtime.
    ///
    /// `submitter` must come from the same [`DeliveryLoop::new`] call; the
    /// handle keeps it to send the shutdown pill.
    pub fn spawn(self, submitter: MessageSubmitter) -> Result<DeliveryHandle> {
        let thread = thread::Builder::new()
            .name("astrid-delivery".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build delivery runtime");
                        return DeliveryReport::default();
                    }
                };
                runtime.block_on(self.run())
            })?;

        Ok(DeliveryHandle {
            submitter,
            thread: Some(thread),
        })
    }
}

/// Owns a delivery thread. Shuts it down when dropped.
pub struct DeliveryHandle {
    submitter: MessageSubmitter,
    thread: Option<thread::JoinHandle<DeliveryReport>>,
}

impl DeliveryHandle {
    pub fn submitter(&self) -> MessageSubmitter {
        self.submitter.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Send the shutdown pill and wait for the thread. Messages due before
    /// the pill are delivered first.
    pub fn shutdown(&mut self) -> Option<DeliveryReport> {
        let thread = self.thread.take()?;

        loop {
            match self.submitter.tx.try_send(Message::shutdown()) {
                Ok(()) | Err(TrySendError::Closed(_)) => break,
                Err(TrySendError::Full(_)) => thread::sleep(Duration::from_micros(100)),
            }
        }

        match thread.join() {
            Ok(report) => Some(report),
            Err(_) => {
                tracing::error!("delivery thread panicked");
                None
            }
        }
    }
}

impl Drop for DeliveryHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
