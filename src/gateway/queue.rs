//! Bounded hand-off between HTTP worker threads and the flow trigger.
//!
//! `offer` never blocks: a full queue rejects immediately and the handler
//! answers 503, which is the gateway's only admission control. `drain` takes
//! up to a batch of containers in arrival order without waiting for more.

use super::container::HttpRequestContainer;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use tracing::{debug, warn};

/// Counters for one bridge queue.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    offered: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    drained: AtomicU64,
    depth: AtomicUsize,
}

/// Point-in-time copy of [`QueueMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub capacity: usize,
    pub offered: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub drained: u64,
    pub depth: usize,
}

/// Fixed-capacity FIFO of [`HttpRequestContainer`]s.
pub struct RequestBridgeQueue {
    capacity: usize,
    tx: SyncSender<HttpRequestContainer>,
    rx: Mutex<Receiver<HttpRequestContainer>>,
    metrics: QueueMetrics,
}

impl std::fmt::Debug for RequestBridgeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBridgeQueue")
            .field("capacity", &self.capacity)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl RequestBridgeQueue {
    /// Queue holding at most `capacity` containers (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::sync_channel(capacity);
        Self {
            capacity,
            tx,
            rx: Mutex::new(rx),
            metrics: QueueMetrics::default(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue without blocking. Returns false when the queue is full; the
    /// container is dropped in that case.
    pub fn offer(&self, container: HttpRequestContainer) -> bool {
        self.metrics.offered.fetch_add(1, Ordering::Relaxed);
        let request_id = container.request_id();
        // depth goes up first so drain can never observe it below zero
        self.metrics.depth.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(container) {
            Ok(()) => {
                self.metrics.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.depth.fetch_sub(1, Ordering::AcqRel);
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(%request_id, capacity = self.capacity, "Bridge queue full");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.metrics.depth.fetch_sub(1, Ordering::AcqRel);
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(%request_id, "Bridge queue disconnected");
                false
            }
        }
    }

    /// Remove up to `max_batch` containers in FIFO order.
    #[must_use]
    pub fn drain(&self, max_batch: usize) -> Vec<HttpRequestContainer> {
        let rx = self.rx.lock();
        let mut batch = Vec::with_capacity(max_batch.min(self.capacity));
        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(container) => batch.push(container),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        drop(rx);

        if !batch.is_empty() {
            self.metrics
                .depth
                .fetch_sub(batch.len(), Ordering::AcqRel);
            self.metrics
                .drained
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
        }
        batch
    }

    /// Approximate number of queued containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.depth.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            capacity: self.capacity,
            offered: self.metrics.offered.load(Ordering::Relaxed),
            accepted: self.metrics.accepted.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            drained: self.metrics.drained.load(Ordering::Relaxed),
            depth: self.len(),
        }
    }
}
