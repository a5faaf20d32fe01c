//! Delivery worker
//!
//! The single task that drains the queue and writes each job to the store.
//! Jobs are handled strictly one at a time: job N+1 is not attempted until
//! every retry of job N has finished.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::{DeliveryJob, DeliveryStats, JobReceiver, Pop, RetryPolicy};
use crate::feed::FeedPublisher;
use crate::lifecycle::ShutdownFlag;
use crate::store::{document_url, DocumentStore, StoreError};

/// Why a job was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// Every attempt timed out
    RetriesExhausted,
    /// The store failed in a way another attempt would not fix
    Rejected(StoreError),
    /// Shutdown arrived while waiting to retry
    Shutdown,
    /// The delivery panicked
    Panicked,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::RetriesExhausted => write!(f, "retries exhausted"),
            AbandonReason::Rejected(e) => write!(f, "{}", e),
            AbandonReason::Shutdown => write!(f, "shutdown before retry"),
            AbandonReason::Panicked => write!(f, "delivery panicked"),
        }
    }
}

/// Final state of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Stored; `key` is the child key the store generated
    Delivered { key: Option<String>, attempts: u32 },
    /// Dry-run mode, nothing was sent
    DryRun { url: String },
    /// Dropped for good
    Abandoned { reason: AbandonReason, attempts: u32 },
}

/// Publishes delivery results back through the feed
#[derive(Debug, Clone)]
pub struct DeliveryNotifier {
    publisher: FeedPublisher,
    notify_topic: Option<String>,
    error_topic: Option<String>,
}

impl DeliveryNotifier {
    pub fn new(
        publisher: FeedPublisher,
        notify_topic: Option<String>,
        error_topic: Option<String>,
    ) -> Self {
        Self {
            publisher,
            notify_topic,
            error_topic,
        }
    }

    fn notify(&self, job: &DeliveryJob, url: &str, outcome: &DeliveryOutcome) {
        let (topic, payload) = match outcome {
            DeliveryOutcome::Delivered { key: Some(key), .. } => match &self.notify_topic {
                Some(topic) => (topic, key.clone()),
                None => return,
            },
            DeliveryOutcome::Abandoned { reason, attempts } => match &self.error_topic {
                Some(topic) => {
                    let record = json!({
                        "topic": job.topic,
                        "url": url,
                        "reason": reason.to_string(),
                        "attempts": attempts,
                    });
                    (topic, record.to_string())
                }
                None => return,
            },
            _ => return,
        };

        if let Err(e) = self.publisher.publish(topic, payload) {
            debug!(topic = %topic, error = %e, "Notification not published");
        }
    }
}

/// Background consumer of the delivery queue
pub struct DeliveryWorker {
    queue: JobReceiver,
    delivery: Delivery,
}

/// Everything the worker needs besides the queue itself
struct Delivery {
    store: Arc<dyn DocumentStore>,
    base_url: String,
    policy: RetryPolicy,
    dry_run: bool,
    idle_timeout: Duration,
    shutdown: ShutdownFlag,
    stats: Arc<DeliveryStats>,
    notifier: Option<DeliveryNotifier>,
}

impl DeliveryWorker {
    pub fn new(
        queue: JobReceiver,
        store: Arc<dyn DocumentStore>,
        base_url: impl Into<String>,
        shutdown: ShutdownFlag,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            queue,
            delivery: Delivery {
                store,
                base_url: base_url.into(),
                policy: RetryPolicy::default(),
                dry_run: false,
                idle_timeout: Duration::from_secs(5),
                shutdown,
                stats,
                notifier: None,
            },
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.delivery.policy = policy;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.delivery.dry_run = dry_run;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.delivery.idle_timeout = idle_timeout;
        self
    }

    pub fn with_notifier(mut self, notifier: DeliveryNotifier) -> Self {
        self.delivery.notifier = Some(notifier);
        self
    }

    /// Drain the queue until shutdown or until the producer goes away
    ///
    /// Hands the receiver back so the caller can discard what is left.
    pub async fn run(self) -> JobReceiver {
        let DeliveryWorker {
            mut queue,
            delivery,
        } = self;

        info!(
            base_url = %delivery.base_url,
            dry_run = delivery.dry_run,
            max_attempts = delivery.policy.max_attempts,
            "Delivery worker started"
        );

        loop {
            let pop = tokio::select! {
                biased;
                _ = delivery.shutdown.wait() => break,
                pop = queue.pop(delivery.idle_timeout) => pop,
            };

            match pop {
                Pop::Job(job) => {
                    let path = job.route.resolve_path(&job.subtopic);
                    let (url, outcome) = match document_url(&delivery.base_url, &path) {
                        Ok(url) => {
                            let outcome = delivery.deliver(&job, &url).await;
                            (url, outcome)
                        }
                        Err(e) => {
                            let outcome = DeliveryOutcome::Abandoned {
                                reason: AbandonReason::Rejected(e),
                                attempts: 0,
                            };
                            (path, outcome)
                        }
                    };
                    delivery.record(&job, &url, &outcome);
                }
                Pop::Idle => continue,
                Pop::Closed => {
                    debug!("Delivery queue closed");
                    break;
                }
            }
        }

        info!(pending = queue.pending(), "Delivery worker stopped");
        queue
    }
}

impl Delivery {
    async fn deliver(&self, job: &DeliveryJob, url: &str) -> DeliveryOutcome {
        if self.dry_run {
            info!(topic = %job.topic, url, payload = %job.payload, "Dry run, write skipped");
            return DeliveryOutcome::DryRun {
                url: url.to_string(),
            };
        }

        let attempts = AtomicU32::new(0);
        match AssertUnwindSafe(self.attempt(url, &job.payload, &attempts))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    topic = %job.topic,
                    url,
                    "Delivery panicked: {}",
                    panic_message(panic.as_ref())
                );
                DeliveryOutcome::Abandoned {
                    reason: AbandonReason::Panicked,
                    attempts: attempts.load(Ordering::Relaxed),
                }
            }
        }
    }

    /// Post with the per-attempt timeout, retrying timeouts only
    async fn attempt(&self, url: &str, body: &Value, attempts: &AtomicU32) -> DeliveryOutcome {
        let per_attempt = self.policy.per_attempt_timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            attempts.store(attempt, Ordering::Relaxed);
            debug!(url, attempt, "Posting document");

            let result = tokio::time::timeout(per_attempt, self.store.post(url, body, per_attempt))
                .await
                .unwrap_or(Err(StoreError::Timeout(per_attempt)));

            let err = match result {
                Ok(response) => {
                    return DeliveryOutcome::Delivered {
                        key: response.key,
                        attempts: attempt,
                    }
                }
                Err(e) => e,
            };

            if !err.is_timeout() {
                return DeliveryOutcome::Abandoned {
                    reason: AbandonReason::Rejected(err),
                    attempts: attempt,
                };
            }
            if !self.policy.allows_retry_after(attempt) {
                return DeliveryOutcome::Abandoned {
                    reason: AbandonReason::RetriesExhausted,
                    attempts: attempt,
                };
            }

            let delay = self.policy.delay_after(attempt);
            warn!(url, attempt, "Write timed out, retrying in {:?}", delay);
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    return DeliveryOutcome::Abandoned {
                        reason: AbandonReason::Shutdown,
                        attempts: attempt,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn record(&self, job: &DeliveryJob, url: &str, outcome: &DeliveryOutcome) {
        self.stats.record_delivery(outcome);

        match outcome {
            DeliveryOutcome::Delivered { key, attempts } => {
                info!(
                    topic = %job.topic,
                    url,
                    key = key.as_deref().unwrap_or("-"),
                    attempts,
                    "Document delivered"
                );
            }
            DeliveryOutcome::DryRun { .. } => {}
            DeliveryOutcome::Abandoned { reason, attempts } => {
                warn!(
                    topic = %job.topic,
                    url,
                    attempts,
                    "Delivery abandoned: {}",
                    reason
                );
            }
        }

        if let Some(notifier) = &self.notifier {
            notifier.notify(job, url, outcome);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
