//! Task queue adapter — transport between job submission and the worker pool.
//!
//! The pipeline only needs enqueue and dequeue-with-ack semantics from its
//! transport. Delivery is at-least-once: a message may be redelivered or
//! arrive out of submission order, and the core never relies on queue-level
//! deduplication — the job store's compare-and-set is the correctness
//! mechanism (see [`crate::store::JobStore::transition`]).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::types::JobId;
use crate::Result;

/// One dequeued message, held until acked or nacked
#[derive(Debug)]
pub struct Delivery {
    /// The job this message refers to
    pub job_id: JobId,
    /// Delivery attempt, starting at 1 and incremented on each redelivery
    pub attempt: u32,
}

/// Message transport abstraction
///
/// Implementations must provide at-least-once delivery with manual
/// acknowledgment. No ordering or exactly-once guarantee is assumed.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a job id for some worker to pick up (fire-and-forget)
    async fn enqueue(&self, job_id: JobId) -> Result<()>;

    /// Block until a message is available
    ///
    /// Returns `None` once the queue is closed and drained, which is the
    /// workers' shutdown signal.
    async fn dequeue(&self) -> Option<Delivery>;

    /// Confirm processing of a delivery
    async fn ack(&self, delivery: Delivery);

    /// Request redelivery of a delivery (e.g., store temporarily unavailable)
    async fn nack(&self, delivery: Delivery);

    /// Stop accepting messages and wake blocked dequeuers once drained
    async fn close(&self);
}

/// In-process task queue over an unbounded mpsc channel
///
/// Honors the full adapter contract: redelivery via `nack`, competing
/// consumers, and no deduplication of repeated enqueues.
pub struct InMemoryQueue {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

impl InMemoryQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Delivery>> {
        self.tx.lock().ok().and_then(|guard| guard.clone())
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, job_id: JobId) -> Result<()> {
        let Some(tx) = self.sender() else {
            return Err(Error::ShuttingDown);
        };
        tx.send(Delivery { job_id, attempt: 1 })
            .map_err(|_| Error::Queue("queue channel closed".to_string()))
    }

    async fn dequeue(&self) -> Option<Delivery> {
        // Serializes competing consumers; the mutex is released as soon as
        // one message is handed out
        self.rx.lock().await.recv().await
    }

    async fn ack(&self, delivery: Delivery) {
        tracing::debug!(job_id = %delivery.job_id, attempt = delivery.attempt, "Delivery acked");
    }

    async fn nack(&self, delivery: Delivery) {
        let Some(tx) = self.sender() else {
            tracing::warn!(
                job_id = %delivery.job_id,
                "Dropping nacked delivery: queue is closed"
            );
            return;
        };
        let redelivery = Delivery {
            job_id: delivery.job_id,
            attempt: delivery.attempt + 1,
        };
        if tx.send(redelivery).is_err() {
            tracing::warn!(job_id = %delivery.job_id, "Failed to requeue nacked delivery");
        }
    }

    async fn close(&self) {
        // Dropping the sender lets dequeuers drain remaining messages and
        // then observe None
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }
}
