//! Delivery queue
//!
//! Unbounded FIFO between the ingress listener (single producer) and the
//! delivery worker (single consumer).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::DeliveryJob;

/// Result of waiting on the queue
#[derive(Debug)]
pub enum Pop {
    /// Next job in arrival order
    Job(DeliveryJob),
    /// Nothing arrived within the idle timeout
    Idle,
    /// Producer is gone and the queue is empty
    Closed,
}

/// Constructor for the sender/receiver pair
pub struct DeliveryQueue;

impl DeliveryQueue {
    pub fn unbounded() -> (JobSender, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        (
            JobSender {
                tx,
                pending: pending.clone(),
            },
            JobReceiver { rx, pending },
        )
    }
}

/// Producer half, held by the ingress listener
#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::UnboundedSender<DeliveryJob>,
    pending: Arc<AtomicUsize>,
}

impl JobSender {
    /// Append a job without blocking
    ///
    /// Fails only once the receiver has been dropped or closed, handing the
    /// job back.
    pub fn push(&self, job: DeliveryJob) -> Result<(), DeliveryJob> {
        // Count before sending so the receiver never sees the counter go negative
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(job).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            e.0
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor(self.pending.clone())
    }
}

/// Read-only view of the pending count, kept by the controller
#[derive(Debug, Clone)]
pub struct QueueMonitor(Arc<AtomicUsize>);

impl QueueMonitor {
    pub fn pending(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Consumer half, owned by the delivery worker
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<DeliveryJob>,
    pending: Arc<AtomicUsize>,
}

impl JobReceiver {
    /// Wait up to `idle_timeout` for the next job
    ///
    /// Cancel safe: a job is only removed from the queue when this returns it.
    pub async fn pop(&mut self, idle_timeout: Duration) -> Pop {
        match tokio::time::timeout(idle_timeout, self.rx.recv()).await {
            Ok(Some(job)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Pop::Job(job)
            }
            Ok(None) => Pop::Closed,
            Err(_) => Pop::Idle,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Close the queue and drop everything still in it
    ///
    /// Returns how many jobs were dropped. Later pushes fail.
    pub fn discard_remaining(&mut self) -> usize {
        self.rx.close();
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            dropped += 1;
        }
        dropped
    }
}
