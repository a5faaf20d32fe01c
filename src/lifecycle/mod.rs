//! Lifecycle controller
//!
//! Wires the route table, queue, worker and feed together, and tears them
//! down in order: stop ingress, let the worker finish its current job,
//! discard what is left, close the store, disconnect from the broker.

mod shutdown;
mod signal;


use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigError};
use crate::feed::{FeedClient, FeedHandle, FeedPublisher, FeedStatus};
use crate::pipeline::{
    DeliveryNotifier, DeliveryQueue, DeliveryStats, DeliveryWorker, IngressListener, JobReceiver,
    QueueMonitor, RetryPolicy, StatsSnapshot,
};
use crate::routing::{RouteError, RouteTable};
use crate::store::DocumentStore;

pub use shutdown::ShutdownFlag;
pub use signal::wait_for_termination;

/// Startup failure
#[derive(Debug)]
pub enum BridgeError {
    Config(ConfigError),
    Route(RouteError),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Config(e) => write!(f, "{}", e),
            BridgeError::Route(e) => write!(f, "Invalid route: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Config(e) => Some(e),
            BridgeError::Route(e) => Some(e),
        }
    }
}

impl From<ConfigError> for BridgeError {
    fn from(e: ConfigError) -> Self {
        BridgeError::Config(e)
    }
}

impl From<RouteError> for BridgeError {
    fn from(e: RouteError) -> Self {
        BridgeError::Route(e)
    }
}

/// Summary of a completed shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs still queued when the worker stopped
    pub discarded: usize,
    /// The worker missed its deadline and was aborted
    pub worker_aborted: bool,
    pub stats: StatsSnapshot,
}

struct Running {
    worker: JoinHandle<JobReceiver>,
    feed: FeedHandle,
}

/// A running bridge
pub struct Bridge {
    routes: Arc<RouteTable>,
    stats: Arc<DeliveryStats>,
    shutdown: ShutdownFlag,
    queue: QueueMonitor,
    store: Arc<dyn DocumentStore>,
    worker_deadline: Duration,
    feed_grace: Duration,
    running: Mutex<Option<Running>>,
}

impl Bridge {
    /// Validate the configuration, then spawn the worker and the feed
    ///
    /// Must be called from inside a tokio runtime. Nothing touches the
    /// network before validation passes.
    pub fn start(config: &Config, store: Arc<dyn DocumentStore>) -> Result<Self, BridgeError> {
        config.validate_startup()?;

        let routes = Arc::new(RouteTable::from_config(
            config.routing.match_mode,
            &config.route,
        )?);
        let base_url = config.store.resolve_base_url().ok_or_else(|| {
            ConfigError::Validation("store.app_name or store.base_url is required".to_string())
        })?;

        let (sender, receiver) = DeliveryQueue::unbounded();
        let queue = sender.monitor();
        let stats = DeliveryStats::new();
        let shutdown = ShutdownFlag::new();
        let (publisher, commands) = FeedPublisher::channel();

        let delivery = &config.delivery;
        let mut worker = DeliveryWorker::new(
            receiver,
            store.clone(),
            base_url.clone(),
            shutdown.clone(),
            stats.clone(),
        )
        .with_policy(RetryPolicy::from_config(delivery))
        .with_dry_run(delivery.dry_run)
        .with_idle_timeout(delivery.idle_timeout);
        if config.mqtt.notify_topic.is_some() || config.mqtt.error_topic.is_some() {
            worker = worker.with_notifier(DeliveryNotifier::new(
                publisher,
                config.mqtt.notify_topic.clone(),
                config.mqtt.error_topic.clone(),
            ));
        }
        let worker = tokio::spawn(worker.run());

        let ingress = Arc::new(IngressListener::new(
            routes.clone(),
            sender,
            shutdown.clone(),
            stats.clone(),
        ));
        let feed = FeedClient::new(config.mqtt.clone(), routes.filters()).spawn(ingress, commands);

        info!(
            broker = %config.mqtt.address,
            store = %base_url,
            dry_run = delivery.dry_run,
            "Bridge started"
        );
        info!(
            "  Routes ({} matching, first match wins):",
            routes.mode()
        );
        for route in routes.iter() {
            let child = if route.appends_topic_as_child() {
                "/<subtopic>"
            } else {
                ""
            };
            info!("    {} -> {}{}", route.pattern(), route.destination(), child);
        }

        Ok(Self {
            routes,
            stats,
            shutdown,
            queue,
            store,
            worker_deadline: delivery.shutdown_deadline(),
            feed_grace: delivery.shutdown_grace,
            running: Mutex::new(Some(Running { worker, feed })),
        })
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Jobs waiting for the worker
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn feed_status(&self) -> FeedStatus {
        self.running
            .lock()
            .as_ref()
            .map_or(FeedStatus::Disconnected, |running| running.feed.status())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_set()
    }

    /// Stop the bridge
    ///
    /// Returns `None` when a shutdown already ran.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        let running = self.running.lock().take()?;
        info!("Shutting down bridge");

        self.shutdown.trigger();

        let abort = running.worker.abort_handle();
        let (discarded, worker_aborted) =
            match tokio::time::timeout(self.worker_deadline, running.worker).await {
                Ok(Ok(mut queue)) => (queue.discard_remaining(), false),
                Ok(Err(e)) => {
                    error!("Delivery worker failed: {}", e);
                    (self.queue.pending(), true)
                }
                Err(_) => {
                    warn!(
                        "Delivery worker did not stop within {:?}, aborting",
                        self.worker_deadline
                    );
                    abort.abort();
                    (self.queue.pending(), true)
                }
            };

        self.stats.record_discarded(discarded);
        if discarded > 0 {
            warn!(discarded, "Undelivered jobs discarded");
        }

        self.store.close().await;
        running.feed.disconnect(self.feed_grace).await;

        let report = ShutdownReport {
            discarded,
            worker_aborted,
            stats: self.stats.snapshot(),
        };
        info!(
            delivered = report.stats.delivered,
            abandoned = report.stats.abandoned,
            discarded = report.discarded,
            "Shutdown complete"
        );
        Some(report)
    }
}
