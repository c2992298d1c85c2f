//! Subscriber fan-out for unsolicited events and status transitions

use crate::{error::AmiError, event::AmiEvent, session::ConnectionStatus};
use dashmap::DashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::warn;

struct Subscriber<T> {
    tx: mpsc::Sender<Result<T, AmiError>>,
    overflow: AtomicBool,
}

/// Bounded multi-subscriber broadcast.
///
/// Every subscriber gets its own queue. A subscriber that falls behind loses
/// items instead of stalling the reader, and is told so once per overflow
/// episode with [`AmiError::QueueFull`].
pub(crate) struct Subscribers<T> {
    subscribers: DashMap<u64, Subscriber<T>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T: Clone> Subscribers<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> mpsc::Receiver<Result<T, AmiError>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self
            .next_id
            .fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .insert(
                id,
                Subscriber {
                    tx,
                    overflow: AtomicBool::new(false),
                },
            );
        rx
    }

    /// Deliver `item` to every live subscriber; returns how many took it.
    pub(crate) fn publish(&self, item: &T) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self
            .subscribers
            .iter()
        {
            match deliver(entry.value(), item) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {
                    self.dropped
                        .fetch_add(1, Ordering::Relaxed);
                }
                Delivery::Closed => closed.push(*entry.key()),
            }
        }

        for id in closed {
            self.subscribers
                .remove(&id);
        }
        delivered
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscribers
            .len()
    }

    /// Items dropped across all subscribers because their queues were full.
    pub(crate) fn dropped_count(&self) -> u64 {
        self.dropped
            .load(Ordering::Relaxed)
    }
}

enum Delivery {
    Sent,
    Dropped,
    Closed,
}

fn deliver<T: Clone>(subscriber: &Subscriber<T>, item: &T) -> Delivery {
    if subscriber
        .overflow
        .load(Ordering::Relaxed)
    {
        match subscriber
            .tx
            .try_send(Err(AmiError::QueueFull))
        {
            Ok(()) => {
                subscriber
                    .overflow
                    .store(false, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Delivery::Closed,
            Err(mpsc::error::TrySendError::Full(_)) => {}
        }
    }

    match subscriber
        .tx
        .try_send(Ok(item.clone()))
    {
        Ok(()) => Delivery::Sent,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        Err(mpsc::error::TrySendError::Full(_)) => {
            if !subscriber
                .overflow
                .swap(true, Ordering::Relaxed)
            {
                warn!("Subscriber queue full, dropping items");
            }
            Delivery::Dropped
        }
    }
}

/// Stream of unsolicited events, from [`AmiClient::subscribe_events`](crate::AmiClient::subscribe_events).
///
/// Dropping the stream unsubscribes.
pub struct AmiEventStream {
    rx: mpsc::Receiver<Result<AmiEvent, AmiError>>,
}

impl AmiEventStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<AmiEvent, AmiError>>) -> Self {
        Self { rx }
    }

    /// Receive the next event, or `None` once the session is gone.
    ///
    /// Returns `Err(AmiError::QueueFull)` once per overflow episode when events
    /// were dropped because this subscriber was not draining fast enough.
    pub async fn recv(&mut self) -> Option<Result<AmiEvent, AmiError>> {
        self.rx
            .recv()
            .await
    }
}

impl std::fmt::Debug for AmiEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiEventStream")
            .finish_non_exhaustive()
    }
}

impl futures_util::Stream for AmiEventStream {
    type Item = Result<AmiEvent, AmiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}

/// Stream of [`ConnectionStatus`] transitions, from
/// [`AmiClient::subscribe_status`](crate::AmiClient::subscribe_status).
pub struct StatusStream {
    rx: mpsc::Receiver<Result<ConnectionStatus, AmiError>>,
}

impl StatusStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<ConnectionStatus, AmiError>>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<Result<ConnectionStatus, AmiError>> {
        self.rx
            .recv()
            .await
    }
}

impl std::fmt::Debug for StatusStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStream")
            .finish_non_exhaustive()
    }
}

impl futures_util::Stream for StatusStream {
    type Item = Result<ConnectionStatus, AmiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}

pub(crate) type EventBus = Arc<Subscribers<AmiEvent>>;
pub(crate) type StatusBus = Arc<Subscribers<ConnectionStatus>>;
