//! Ingress listener
//!
//! Turns feed messages into delivery jobs. Runs inside the feed task, so it
//! never waits on anything.

use std::fmt;
use std::str::Utf8Error;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{DeliveryJob, DeliveryStats, JobSender};
use crate::feed::FeedHandler;
use crate::lifecycle::ShutdownFlag;
use crate::routing::{self, RouteTable};

/// Why a payload could not be turned into a job
#[derive(Debug)]
pub enum IngressError {
    Utf8(Utf8Error),
    Json(serde_json::Error),
    /// Last topic level cannot be used as a child key
    InvalidChildKey {
        key: String,
        reason: &'static str,
    },
}

impl fmt::Display for IngressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngressError::Utf8(e) => write!(f, "payload is not UTF-8: {}", e),
            IngressError::Json(e) => write!(f, "payload is not JSON: {}", e),
            IngressError::InvalidChildKey { key, reason } => {
                write!(f, "cannot store under {:?}: {}", key, reason)
            }
        }
    }
}

impl std::error::Error for IngressError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngressError::Utf8(e) => Some(e),
            IngressError::Json(e) => Some(e),
            IngressError::InvalidChildKey { .. } => None,
        }
    }
}

impl From<Utf8Error> for IngressError {
    fn from(e: Utf8Error) -> Self {
        IngressError::Utf8(e)
    }
}

impl From<serde_json::Error> for IngressError {
    fn from(e: serde_json::Error) -> Self {
        IngressError::Json(e)
    }
}

/// What happened to one inbound message
#[derive(Debug)]
pub enum IngressOutcome {
    /// A job is waiting for the worker
    Enqueued,
    /// No route matched the topic
    NoRoute,
    /// Payload was not UTF-8 JSON, or the topic cannot name a child key
    DecodeFailed(IngressError),
    /// Shutdown has started, or the worker's queue is gone
    Refused,
}

impl IngressOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, IngressOutcome::Enqueued)
    }
}

/// Feed callback that matches, decodes and enqueues
pub struct IngressListener {
    routes: Arc<RouteTable>,
    queue: JobSender,
    shutdown: ShutdownFlag,
    stats: Arc<DeliveryStats>,
}

impl IngressListener {
    pub fn new(
        routes: Arc<RouteTable>,
        queue: JobSender,
        shutdown: ShutdownFlag,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            routes,
            queue,
            shutdown,
            stats,
        }
    }

    /// Handle one inbound message
    pub fn handle(&self, topic: &str, payload: &[u8]) -> IngressOutcome {
        let outcome = self.process(topic, payload);
        self.stats.record_ingress(&outcome);
        outcome
    }

    fn process(&self, topic: &str, payload: &[u8]) -> IngressOutcome {
        if self.shutdown.is_set() {
            debug!(topic, "Shutting down, message refused");
            return IngressOutcome::Refused;
        }

        let Some(route) = self.routes.match_topic(topic) else {
            debug!(topic, "No route for topic");
            return IngressOutcome::NoRoute;
        };

        let subtopic = routing::subtopic(topic);
        if route.appends_topic_as_child() {
            if let Err(reason) = routing::check_child_key(subtopic) {
                let e = IngressError::InvalidChildKey {
                    key: subtopic.to_string(),
                    reason,
                };
                warn!(topic, error = %e, "Dropping message");
                return IngressOutcome::DecodeFailed(e);
            }
        }

        let payload = match decode_payload(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(topic, error = %e, "Dropping undecodable message");
                return IngressOutcome::DecodeFailed(e);
            }
        };
        debug!(topic, route = route.pattern(), payload = %payload, "Message routed");

        let job = DeliveryJob {
            topic: topic.to_string(),
            subtopic: subtopic.to_string(),
            payload,
            route: route.clone(),
        };

        match self.queue.push(job) {
            Ok(()) => IngressOutcome::Enqueued,
            Err(job) => {
                debug!(topic = %job.topic, "Delivery queue closed, message refused");
                IngressOutcome::Refused
            }
        }
    }
}

fn decode_payload(payload: &[u8]) -> Result<serde_json::Value, IngressError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

impl FeedHandler for IngressListener {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.handle(topic, payload);
    }

    fn on_connect(&self) {
        debug!(routes = self.routes.len(), "Feed connected");
    }

    fn on_disconnect(&self, reason: &str) {
        debug!(
            reason,
            pending = self.queue.pending(),
            "Feed disconnected, queued jobs are kept"
        );
    }
}
