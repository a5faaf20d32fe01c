//! MQTT Packet Decoder
//!
//! Decodes the packets a broker sends to a subscriber, for both v3.1.1 and
//! v5.0. Server-sent v5.0 properties are skipped.

use bytes::Bytes;

use super::{read_string, read_u16, read_variable_int, skip_properties, DEFAULT_MAX_PACKET_SIZE};
use crate::protocol::{
    ConnAck, DecodeError, Disconnect, Packet, ProtocolVersion, PubAck, Publish, QoS, ReasonCode,
    SubAck,
};

/// MQTT Packet Decoder
pub struct Decoder {
    /// Maximum remaining length accepted
    max_packet_size: usize,
    /// Version negotiated by our own CONNECT
    protocol_version: ProtocolVersion,
}

impl Decoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            protocol_version: version,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    fn is_v5(&self) -> bool {
        self.protocol_version == ProtocolVersion::V5
    }

    /// Decode a packet from the front of the buffer
    ///
    /// Returns `Ok(None)` while the buffer holds less than one whole packet,
    /// otherwise the packet and the number of bytes it occupied.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let body = &buf[1 + len_bytes..total_len];

        let packet = match packet_type {
            2 => self.decode_connack(flags, body)?,
            3 => self.decode_publish(flags, body)?,
            4 => self.decode_puback(flags, body)?,
            9 => self.decode_suback(flags, body)?,
            13 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlags);
                }
                Packet::PingResp
            }
            14 => self.decode_disconnect(flags, body)?,
            other => return Err(DecodeError::UnexpectedPacketType(other)),
        };

        Ok(Some((packet, total_len)))
    }

    fn decode_connack(&self, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        if body.len() < 2 {
            return Err(DecodeError::MalformedPacket("CONNACK too short"));
        }

        let acknowledge_flags = body[0];
        if (acknowledge_flags & 0xFE) != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let reason_code = if self.is_v5() {
            if body.len() > 2 {
                skip_properties(&body[2..])?;
            }
            ReasonCode(body[1])
        } else {
            ReasonCode::from_v3_connack_code(body[1])
        };

        Ok(Packet::ConnAck(ConnAck {
            session_present: (acknowledge_flags & 0x01) != 0,
            reason_code,
        }))
    }

    fn decode_publish(&self, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        let dup = (flags & 0x08) != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let retain = (flags & 0x01) != 0;

        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;
        if qos == QoS::AtMostOnce && dup {
            return Err(DecodeError::MalformedPacket("DUP must be 0 for QoS 0"));
        }

        let (topic, mut pos) = read_string(body)?;
        if topic.contains(['+', '#']) {
            return Err(DecodeError::MalformedPacket("topic contains wildcard"));
        }

        let packet_id = if qos != QoS::AtMostOnce {
            let id = read_u16(&body[pos..])
                .map_err(|_| DecodeError::MalformedPacket("missing packet id"))?;
            if id == 0 {
                return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
            }
            pos += 2;
            Some(id)
        } else {
            None
        };

        if self.is_v5() {
            pos += skip_properties(&body[pos..])?;
        }

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id,
            payload: Bytes::copy_from_slice(&body[pos..]),
        }))
    }

    fn decode_puback(&self, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let packet_id =
            read_u16(body).map_err(|_| DecodeError::MalformedPacket("PUBACK too short"))?;

        let reason_code = match body.get(2) {
            Some(&code) if self.is_v5() => ReasonCode(code),
            _ => ReasonCode::SUCCESS,
        };

        Ok(Packet::PubAck(PubAck {
            packet_id,
            reason_code,
        }))
    }

    fn decode_suback(&self, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let packet_id =
            read_u16(body).map_err(|_| DecodeError::MalformedPacket("SUBACK too short"))?;

        let mut pos = 2;
        if self.is_v5() {
            pos += skip_properties(&body[pos..])?;
        }

        let reason_codes = body[pos..]
            .iter()
            .map(|&code| {
                if self.is_v5() {
                    Ok(ReasonCode(code))
                } else {
                    ReasonCode::from_v3_suback_code(code)
                        .ok_or(DecodeError::InvalidReasonCode(code))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        if reason_codes.is_empty() {
            return Err(DecodeError::MalformedPacket("SUBACK without reason codes"));
        }

        Ok(Packet::SubAck(SubAck {
            packet_id,
            reason_codes,
        }))
    }

    fn decode_disconnect(&self, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        // Only v5.0 brokers send DISCONNECT; v3.1.1 brokers just close
        let reason_code = match body.first() {
            Some(&code) if self.is_v5() => ReasonCode(code),
            Some(_) => {
                return Err(DecodeError::MalformedPacket(
                    "v3.1.1 DISCONNECT has no payload",
                ))
            }
            None => ReasonCode::SUCCESS,
        };

        Ok(Packet::Disconnect(Disconnect { reason_code }))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(ProtocolVersion::V311)
    }
}
