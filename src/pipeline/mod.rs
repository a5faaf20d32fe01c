//! Routing and delivery pipeline
//!
//! ```text
//! feed ──► IngressListener ──► DeliveryQueue ──► DeliveryWorker ──► store
//!              │ (RouteTable)                         │ (RetryPolicy)
//!              └──────────── DeliveryStats ◄──────────┘
//! ```
//!
//! The listener never does I/O; everything that can block lives in the
//! single worker task, so jobs are stored in arrival order.

mod ingress;
mod queue;
mod retry;
mod worker;


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::routing::Route;

pub use ingress::{IngressError, IngressListener, IngressOutcome};
pub use queue::{DeliveryQueue, JobReceiver, JobSender, Pop, QueueMonitor};
pub use retry::{Backoff, RetryPolicy};
pub use worker::{AbandonReason, DeliveryNotifier, DeliveryOutcome, DeliveryWorker};

/// One decoded message on its way to the store
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    /// Full topic the message arrived on
    pub topic: String,
    /// Last topic level
    pub subtopic: String,
    /// Decoded JSON body
    pub payload: Value,
    /// Route that matched the topic
    pub route: Arc<Route>,
}

/// Pipeline counters, shared by ingress, worker and controller
#[derive(Debug, Default)]
pub struct DeliveryStats {
    enqueued: AtomicU64,
    no_route: AtomicU64,
    decode_failed: AtomicU64,
    refused: AtomicU64,
    delivered: AtomicU64,
    abandoned: AtomicU64,
    dry_run: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub no_route: u64,
    pub decode_failed: u64,
    pub refused: u64,
    pub delivered: u64,
    pub abandoned: u64,
    pub dry_run: u64,
    pub discarded: u64,
}

impl DeliveryStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn record_ingress(&self, outcome: &IngressOutcome) {
        let counter = match outcome {
            IngressOutcome::Enqueued => &self.enqueued,
            IngressOutcome::NoRoute => &self.no_route,
            IngressOutcome::DecodeFailed(_) => &self.decode_failed,
            IngressOutcome::Refused => &self.refused,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self, outcome: &DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Delivered { .. } => &self.delivered,
            DeliveryOutcome::DryRun { .. } => &self.dry_run,
            DeliveryOutcome::Abandoned { .. } => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, count: usize) {
        self.discarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            no_route: self.no_route.load(Ordering::Relaxed),
            decode_failed: self.decode_failed.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            dry_run: self.dry_run.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
