//! Bounded FIFO shared between the link and the dispatcher.
//!
//! Producers push from the ingestion side, one consumer pops with a timeout.
//! Order is preserved per producer and overall in push order.
//!
//! Items travel over a `crossbeam_channel::bounded` channel. The queue keeps
//! its own receiver so `DropOldest` can evict from the front. A second,
//! never-written channel signals close: dropping its sender disconnects it,
//! which wakes every blocked push and pop at once.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Select, Sender, TryRecvError, TrySendError};

use crate::config::OverflowPolicy;
use crate::error::{Result, StationError};
use crate::message::Command;

/// Queue of decoded commands awaiting dispatch.
pub type CommandQueue = BoundedQueue<Command>;

/// Thread-safe bounded FIFO with a configurable overflow policy.
pub struct BoundedQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    close_tx: Mutex<Option<Sender<()>>>,
    closed_rx: Receiver<()>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> BoundedQueue<T> {
    /// Create a queue. Capacity is at least one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        let (close_tx, closed_rx) = bounded(0);
        Self {
            sender,
            receiver,
            close_tx: Mutex::new(Some(close_tx)),
            closed_rx,
            capacity,
            policy,
        }
    }

    /// Maximum number of queued items.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy in effect.
    #[inline]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Push an item at the back.
    ///
    /// Returns the evicted item when `DropOldest` had to make room.
    ///
    /// # Errors
    ///
    /// - `QueueFull` under `Reject` when at capacity
    /// - `QueueClosed` after [`close`](Self::close)
    pub fn push(&self, item: T) -> Result<Option<T>> {
        if self.is_closed() {
            return Err(StationError::QueueClosed);
        }

        match self.policy {
            OverflowPolicy::Reject => match self.sender.try_send(item) {
                Ok(()) => Ok(None),
                Err(TrySendError::Full(_)) => Err(StationError::QueueFull {
                    capacity: self.capacity,
                }),
                Err(TrySendError::Disconnected(_)) => Err(StationError::QueueClosed),
            },
            OverflowPolicy::DropOldest => self.push_evicting(item),
            OverflowPolicy::Block => self.push_blocking(item),
        }
    }

    fn push_evicting(&self, mut item: T) -> Result<Option<T>> {
        let mut evicted = None;
        loop {
            match self.sender.try_send(item) {
                Ok(()) => return Ok(evicted),
                Err(TrySendError::Full(rejected)) => {
                    item = rejected;
                    // a concurrent pop may already have made room
                    if let Ok(oldest) = self.receiver.try_recv() {
                        if evicted.is_none() {
                            evicted = Some(oldest);
                        }
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Err(StationError::QueueClosed),
            }
        }
    }

    fn push_blocking(&self, item: T) -> Result<Option<T>> {
        let mut select = Select::new();
        let send = select.send(&self.sender);
        select.recv(&self.closed_rx);

        let operation = select.select();
        if operation.index() == send {
            operation
                .send(&self.sender, item)
                .map(|()| None)
                .map_err(|_| StationError::QueueClosed)
        } else {
            let _ = operation.recv(&self.closed_rx);
            Err(StationError::QueueClosed)
        }
    }

    /// Pop the front item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Pop the front item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout, or once the queue is closed and empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        select! {
            recv(self.receiver) -> item => item.ok(),
            recv(self.closed_rx) -> _closed => self.receiver.try_recv().ok(),
            default(timeout) => None,
        }
    }

    /// Pop the front item, waiting until one arrives.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub fn pop(&self) -> Option<T> {
        select! {
            recv(self.receiver) -> item => item.ok(),
            recv(self.closed_rx) -> _closed => self.receiver.try_recv().ok(),
        }
    }

    /// Drop every queued item and return how many were dropped.
    pub fn clear(&self) -> usize {
        self.receiver.try_iter().count()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Refuse further pushes and wake every waiter.
    ///
    /// Items already queued can still be popped.
    pub fn close(&self) {
        self.close_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Check if [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        matches!(self.closed_rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("closed", &self.is_closed())
            .finish()
    }
}
