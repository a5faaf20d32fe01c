//! Firebridge - MQTT to Firebase Realtime Database bridge
//!
//! Subscribes to an MQTT broker, matches each message against an ordered
//! list of topic routes and POSTs the JSON payload to the matching path of
//! a Firebase Realtime Database, retrying writes that time out.

pub mod codec;
pub mod config;
pub mod feed;
pub mod lifecycle;
pub mod pipeline;
pub mod protocol;
pub mod routing;
pub mod store;

pub use config::Config;
pub use feed::{FeedClient, FeedHandler, FeedPublisher};
pub use lifecycle::{Bridge, BridgeError, ShutdownFlag, ShutdownReport};
pub use pipeline::{DeliveryOutcome, DeliveryWorker, IngressListener, RetryPolicy};
pub use protocol::{ProtocolVersion, QoS};
pub use routing::{Route, RouteTable};
pub use store::{Credential, DocumentStore, FirebaseStore};
