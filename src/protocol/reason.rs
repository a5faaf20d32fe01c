//! MQTT reason codes as seen by a client
//!
//! Kept as a raw byte so that codes a broker adds later still decode; the
//! named constants cover the ones the bridge reacts to or logs.

use std::fmt;

/// MQTT v5.0 reason code, or a v3.1.1 return code mapped onto it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReasonCode(pub u8);

impl ReasonCode {
    pub const SUCCESS: Self = Self(0x00);
    pub const GRANTED_QOS_1: Self = Self(0x01);
    pub const GRANTED_QOS_2: Self = Self(0x02);
    pub const NO_SUBSCRIPTION_EXISTED: Self = Self(0x11);
    pub const UNSPECIFIED_ERROR: Self = Self(0x80);
    pub const MALFORMED_PACKET: Self = Self(0x81);
    pub const PROTOCOL_ERROR: Self = Self(0x82);
    pub const IMPLEMENTATION_ERROR: Self = Self(0x83);
    pub const UNSUPPORTED_PROTOCOL_VERSION: Self = Self(0x84);
    pub const CLIENT_ID_NOT_VALID: Self = Self(0x85);
    pub const BAD_USERNAME_OR_PASSWORD: Self = Self(0x86);
    pub const NOT_AUTHORIZED: Self = Self(0x87);
    pub const SERVER_UNAVAILABLE: Self = Self(0x88);
    pub const SERVER_BUSY: Self = Self(0x89);
    pub const BANNED: Self = Self(0x8A);
    pub const SERVER_SHUTTING_DOWN: Self = Self(0x8B);
    pub const KEEP_ALIVE_TIMEOUT: Self = Self(0x8D);
    pub const SESSION_TAKEN_OVER: Self = Self(0x8E);
    pub const TOPIC_FILTER_INVALID: Self = Self(0x8F);
    pub const QUOTA_EXCEEDED: Self = Self(0x97);
    pub const WILDCARD_SUBS_NOT_SUPPORTED: Self = Self(0xA2);

    /// Check if this reason code indicates success
    #[inline]
    pub fn is_success(self) -> bool {
        self.0 < 0x80
    }

    /// Check if this reason code indicates failure
    #[inline]
    pub fn is_error(self) -> bool {
        self.0 >= 0x80
    }

    /// Map a v3.1.1 CONNACK return code onto the v5.0 code space
    pub fn from_v3_connack_code(code: u8) -> Self {
        match code {
            0x00 => Self::SUCCESS,
            0x01 => Self::UNSUPPORTED_PROTOCOL_VERSION,
            0x02 => Self::CLIENT_ID_NOT_VALID,
            0x03 => Self::SERVER_UNAVAILABLE,
            0x04 => Self::BAD_USERNAME_OR_PASSWORD,
            0x05 => Self::NOT_AUTHORIZED,
            _ => Self::UNSPECIFIED_ERROR,
        }
    }

    /// Map a v3.1.1 SUBACK return code onto the v5.0 code space
    pub fn from_v3_suback_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::SUCCESS),
            0x01 => Some(Self::GRANTED_QOS_1),
            0x02 => Some(Self::GRANTED_QOS_2),
            0x80 => Some(Self::UNSPECIFIED_ERROR),
            _ => None,
        }
    }

    fn description(self) -> Option<&'static str> {
        let text = match self {
            Self::SUCCESS => "Success",
            Self::GRANTED_QOS_1 => "Granted QoS 1",
            Self::GRANTED_QOS_2 => "Granted QoS 2",
            Self::NO_SUBSCRIPTION_EXISTED => "No subscription existed",
            Self::UNSPECIFIED_ERROR => "Unspecified error",
            Self::MALFORMED_PACKET => "Malformed Packet",
            Self::PROTOCOL_ERROR => "Protocol Error",
            Self::IMPLEMENTATION_ERROR => "Implementation specific error",
            Self::UNSUPPORTED_PROTOCOL_VERSION => "Unsupported Protocol Version",
            Self::CLIENT_ID_NOT_VALID => "Client Identifier not valid",
            Self::BAD_USERNAME_OR_PASSWORD => "Bad User Name or Password",
            Self::NOT_AUTHORIZED => "Not authorized",
            Self::SERVER_UNAVAILABLE => "Server unavailable",
            Self::SERVER_BUSY => "Server busy",
            Self::BANNED => "Banned",
            Self::SERVER_SHUTTING_DOWN => "Server shutting down",
            Self::KEEP_ALIVE_TIMEOUT => "Keep Alive timeout",
            Self::SESSION_TAKEN_OVER => "Session taken over",
            Self::TOPIC_FILTER_INVALID => "Topic Filter invalid",
            Self::QUOTA_EXCEEDED => "Quota exceeded",
            Self::WILDCARD_SUBS_NOT_SUPPORTED => "Wildcard Subscriptions not supported",
            _ => return None,
        };
        Some(text)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(text) => write!(f, "{} (0x{:02X})", text, self.0),
            None => write!(f, "reason code 0x{:02X}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_error_ranges() {
        assert!(ReasonCode::SUCCESS.is_success());
        assert!(ReasonCode::GRANTED_QOS_1.is_success());
        assert!(ReasonCode::NOT_AUTHORIZED.is_error());
        assert!(ReasonCode(0xFF).is_error());
    }

    #[test]
    fn test_v3_connack_mapping() {
        assert_eq!(ReasonCode::from_v3_connack_code(0), ReasonCode::SUCCESS);
        assert_eq!(
            ReasonCode::from_v3_connack_code(5),
            ReasonCode::NOT_AUTHORIZED
        );
        assert_eq!(
            ReasonCode::from_v3_connack_code(42),
            ReasonCode::UNSPECIFIED_ERROR
        );
    }

    #[test]
    fn test_display_unknown_code() {
        assert_eq!(ReasonCode(0x9C).to_string(), "reason code 0x9C");
        assert_eq!(ReasonCode::BANNED.to_string(), "Banned (0x8A)");
    }
}
