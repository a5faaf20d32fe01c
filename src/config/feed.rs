//! Subscription feed configuration
//!
//! The `[mqtt]` section: how the bridge connects to its upstream broker.

use std::time::Duration;

use serde::Deserialize;

use crate::protocol::{ProtocolVersion, QoS};

/// Default broker port for plain MQTT
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Configuration for the upstream broker connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Broker address (host:port or just host)
    pub address: String,

    /// MQTT protocol level (4 = v3.1.1, 5 = v5.0)
    pub protocol_version: u8,

    /// Client ID used when connecting
    pub client_id: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    pub keepalive: u16,

    /// Use clean start (no session persistence)
    pub clean_start: bool,

    /// Maximum QoS requested for every route subscription (0 or 1)
    pub qos: u8,

    /// First reconnect delay (e.g., "1s")
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Upper bound for the doubling reconnect delay
    #[serde(with = "humantime_serde")]
    pub max_reconnect_interval: Duration,

    /// TCP connect plus CONNACK timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Largest inbound packet accepted from the broker
    pub max_packet_size: usize,

    /// Topic that receives the generated key after each stored message
    pub notify_topic: Option<String>,

    /// Topic that receives a JSON record for each abandoned message
    pub error_topic: Option<String>,
}

fn default_client_id() -> String {
    format!("firebridge-{}", std::process::id())
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_MQTT_PORT),
            protocol_version: ProtocolVersion::V311 as u8,
            client_id: default_client_id(),
            username: None,
            password: None,
            keepalive: 60,
            clean_start: true,
            qos: 0,
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            max_packet_size: crate::codec::DEFAULT_MAX_PACKET_SIZE,
            notify_topic: None,
            error_topic: None,
        }
    }
}

impl FeedConfig {
    /// Parse address into host and port
    pub fn parse_address(&self) -> (String, u16) {
        if let Some((host, port_str)) = self.address.rsplit_once(':') {
            if let Ok(port) = port_str.parse::<u16>() {
                return (host.to_string(), port);
            }
        }
        (self.address.clone(), DEFAULT_MQTT_PORT)
    }

    /// Protocol version, if the configured level is one we speak
    pub fn protocol(&self) -> Option<ProtocolVersion> {
        ProtocolVersion::from_u8(self.protocol_version)
    }

    /// Subscription QoS, if the configured level is 0 or 1
    pub fn subscribe_qos(&self) -> Option<QoS> {
        match QoS::from_u8(self.qos)? {
            QoS::ExactlyOnce => None,
            qos => Some(qos),
        }
    }
}
