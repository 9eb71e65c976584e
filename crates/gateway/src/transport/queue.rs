//! Bounded single-consumer event queues
//!
//! One queue per broker source stream. Producers are the broker session's
//! callbacks (cloneable [`QueueSender`]); the only consumer is the engine
//! loop ([`QueueReceiver`]).
//!
//! When the queue is full the [`OverflowPolicy`] decides:
//! - `DropOldest`: evict the oldest message and count it (market data, where
//!   freshness beats completeness). Backed by a crossbeam bounded channel;
//!   the producer keeps a receiver handle to evict with.
//! - `Backpressure`: the producer waits for space (order and account events,
//!   which must never be lost). Backed by a tokio bounded mpsc channel.

use crate::error::TransportError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Notify, mpsc};

/// What a full queue does with a new message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    DropOldest,
    Backpressure,
}

/// Factory for a sender/receiver pair
pub struct EventQueue;

impl EventQueue {
    /// Create a queue holding at most `capacity` messages
    pub fn bounded<M>(capacity: usize, policy: OverflowPolicy) -> (QueueSender<M>, QueueReceiver<M>) {
        let capacity = capacity.max(1);
        match policy {
            OverflowPolicy::Backpressure => {
                let (tx, rx) = mpsc::channel(capacity);
                (
                    QueueSender {
                        inner: Producer::Fifo(tx),
                    },
                    QueueReceiver {
                        inner: Consumer::Fifo(rx),
                    },
                )
            }
            OverflowPolicy::DropOldest => {
                let (tx, rx) = crossbeam_channel::bounded(capacity);
                let shared = Arc::new(LatestShared {
                    item_ready: Notify::new(),
                    dropped: AtomicU64::new(0),
                    receiver_closed: AtomicBool::new(false),
                });
                let producer = LatestProducer {
                    tx: Some(tx),
                    evict: rx.clone(),
                    shared: shared.clone(),
                };
                (
                    QueueSender {
                        inner: Producer::Latest(Arc::new(producer)),
                    },
                    QueueReceiver {
                        inner: Consumer::Latest { rx, shared },
                    },
                )
            }
        }
    }
}

/// State both ends of a drop-oldest queue see
struct LatestShared {
    item_ready: Notify,
    dropped: AtomicU64,
    receiver_closed: AtomicBool,
}

/// Drop-oldest producer; the last clone to go closes the queue
struct LatestProducer<M> {
    tx: Option<crossbeam_channel::Sender<M>>,
    evict: crossbeam_channel::Receiver<M>,
    shared: Arc<LatestShared>,
}

impl<M> LatestProducer<M> {
    fn push(&self, mut msg: M) -> Result<(), TransportError> {
        if self.shared.receiver_closed.load(Ordering::Acquire) {
            return Err(TransportError::ChannelClosed);
        }
        let Some(tx) = &self.tx else {
            return Err(TransportError::ChannelClosed);
        };

        loop {
            match tx.try_send(msg) {
                Ok(()) => {
                    self.shared.item_ready.notify_one();
                    return Ok(());
                }
                Err(crossbeam_channel::TrySendError::Full(back)) => {
                    if self.evict.try_recv().is_ok() {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    msg = back;
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                    return Err(TransportError::ChannelClosed);
                }
            }
        }
    }
}

impl<M> Drop for LatestProducer<M> {
    fn drop(&mut self) {
        // Disconnect first so the woken receiver sees the close
        self.tx.take();
        self.shared.item_ready.notify_one();
    }
}

enum Producer<M> {
    Fifo(mpsc::Sender<M>),
    Latest(Arc<LatestProducer<M>>),
}

/// Producer side; cheap to clone
pub struct QueueSender<M> {
    inner: Producer<M>,
}

impl<M> Clone for QueueSender<M> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            Producer::Fifo(tx) => Producer::Fifo(tx.clone()),
            Producer::Latest(producer) => Producer::Latest(producer.clone()),
        };
        Self { inner }
    }
}

impl<M> QueueSender<M> {
    /// Enqueue without waiting
    ///
    /// A full `DropOldest` queue evicts its oldest message; a full
    /// `Backpressure` queue returns `TransportError::Full`.
    pub fn try_send(&self, msg: M) -> Result<(), TransportError> {
        match &self.inner {
            Producer::Fifo(tx) => tx.try_send(msg).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Full,
                mpsc::error::TrySendError::Closed(_) => TransportError::ChannelClosed,
            }),
            Producer::Latest(producer) => producer.push(msg),
        }
    }

    /// Enqueue, waiting for space when the policy is `Backpressure`
    pub async fn send(&self, msg: M) -> Result<(), TransportError> {
        match &self.inner {
            Producer::Fifo(tx) => tx
                .send(msg)
                .await
                .map_err(|_| TransportError::ChannelClosed),
            Producer::Latest(producer) => producer.push(msg),
        }
    }

    /// Messages evicted by `DropOldest` so far
    pub fn dropped(&self) -> u64 {
        match &self.inner {
            Producer::Fifo(_) => 0,
            Producer::Latest(producer) => producer.shared.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.inner {
            Producer::Fifo(tx) => tx.is_closed(),
            Producer::Latest(producer) => producer.shared.receiver_closed.load(Ordering::Acquire),
        }
    }
}

enum Consumer<M> {
    Fifo(mpsc::Receiver<M>),
    Latest {
        rx: crossbeam_channel::Receiver<M>,
        shared: Arc<LatestShared>,
    },
}

/// Consumer side; there is exactly one per queue
pub struct QueueReceiver<M> {
    inner: Consumer<M>,
}

impl<M> Drop for QueueReceiver<M> {
    fn drop(&mut self) {
        if let Consumer::Latest { shared, .. } = &self.inner {
            shared.receiver_closed.store(true, Ordering::Release);
        }
    }
}

impl<M> QueueReceiver<M> {
    /// Wait for the next message
    ///
    /// Messages still buffered when the queue closes are delivered before
    /// `ChannelClosed`. Cancel-safe: a dropped call loses nothing.
    pub async fn recv(&mut self) -> Result<M, TransportError> {
        match &mut self.inner {
            Consumer::Fifo(rx) => rx.recv().await.ok_or(TransportError::ChannelClosed),
            Consumer::Latest { rx, shared } => loop {
                match rx.try_recv() {
                    Ok(msg) => return Ok(msg),
                    Err(crossbeam_channel::TryRecvError::Empty) => {
                        shared.item_ready.notified().await;
                    }
                    Err(crossbeam_channel::TryRecvError::Disconnected) => {
                        return Err(TransportError::ChannelClosed);
                    }
                }
            },
        }
    }

    /// Take the next message if one is buffered
    pub fn try_recv(&mut self) -> Result<Option<M>, TransportError> {
        match &mut self.inner {
            Consumer::Fifo(rx) => match rx.try_recv() {
                Ok(msg) => Ok(Some(msg)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::ChannelClosed),
            },
            Consumer::Latest { rx, .. } => match rx.try_recv() {
                Ok(msg) => Ok(Some(msg)),
                Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    Err(TransportError::ChannelClosed)
                }
            },
        }
    }

    /// Take everything currently buffered
    pub fn drain(&mut self) -> Vec<M> {
        let mut drained = Vec::new();
        while let Ok(Some(msg)) = self.try_recv() {
            drained.push(msg);
        }
        drained
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            Consumer::Fifo(rx) => rx.len(),
            Consumer::Latest { rx, .. } => rx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages evicted by `DropOldest` so far
    pub fn dropped(&self) -> u64 {
        match &self.inner {
            Consumer::Fifo(_) => 0,
            Consumer::Latest { shared, .. } => shared.dropped.load(Ordering::Relaxed),
        }
    }
}
