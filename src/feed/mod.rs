//! Subscription feed
//!
//! MQTT client side of the bridge: keeps one connection to the upstream
//! broker, subscribes to every route filter on each (re)connect and hands
//! inbound messages to a [`FeedHandler`]. Notifications go back out through
//! a [`FeedPublisher`] at QoS 0.

mod client;

#[cfg(test)]
mod tests;

use std::fmt;
use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::protocol::{DecodeError, EncodeError, ReasonCode};

pub use client::{FeedClient, FeedHandle};

/// Receiver of feed events
///
/// Called from the feed task. Implementations must not block.
pub trait FeedHandler: Send + Sync {
    /// An application message arrived
    fn on_message(&self, topic: &str, payload: &[u8]);

    /// The broker accepted our session and subscriptions were sent
    fn on_connect(&self) {}

    /// The connection was lost or closed
    fn on_disconnect(&self, _reason: &str) {}
}

/// Connection state of the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Not connected
    Disconnected,
    /// TCP connect or CONNECT/CONNACK in progress
    Connecting,
    /// Session established
    Connected,
    /// Waiting before the next connection attempt
    Backoff,
}

/// Error type for feed operations
#[derive(Debug)]
pub enum FeedError {
    /// Socket failure
    Io(io::Error),
    /// Connect or CONNACK took too long
    Timeout,
    /// Broker sent a failing CONNACK
    ConnectionRefused(ReasonCode),
    /// Broker sent something out of sequence or closed the session
    Protocol(String),
    Decode(DecodeError),
    Encode(EncodeError),
    /// The feed task is gone
    Closed,
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Io(e) => write!(f, "I/O error: {}", e),
            FeedError::Timeout => write!(f, "Connection timed out"),
            FeedError::ConnectionRefused(rc) => write!(f, "Connection refused: {}", rc),
            FeedError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            FeedError::Decode(e) => write!(f, "Decode error: {}", e),
            FeedError::Encode(e) => write!(f, "Encode error: {}", e),
            FeedError::Closed => write!(f, "Feed closed"),
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FeedError::Io(e) => Some(e),
            FeedError::Decode(e) => Some(e),
            FeedError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FeedError {
    fn from(e: io::Error) -> Self {
        FeedError::Io(e)
    }
}

impl From<DecodeError> for FeedError {
    fn from(e: DecodeError) -> Self {
        FeedError::Decode(e)
    }
}

impl From<EncodeError> for FeedError {
    fn from(e: EncodeError) -> Self {
        FeedError::Encode(e)
    }
}

/// Outbound request to the feed task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Publish at QoS 0
    Publish { topic: String, payload: Bytes },
}

/// Handle for publishing through the feed connection
///
/// Messages queue while the feed is reconnecting and go out once the
/// session is back.
#[derive(Debug, Clone)]
pub struct FeedPublisher {
    tx: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FeedCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), FeedError> {
        self.tx
            .send(FeedCommand::Publish {
                topic: topic.to_string(),
                payload: payload.into(),
            })
            .map_err(|_| FeedError::Closed)
    }
}
