//! MQTT Packet Encoder
//!
//! Encodes the packets a subscriber sends, for both v3.1.1 and v5.0.
//! v5.0 property blocks are always written empty.

use bytes::{BufMut, BytesMut};

use super::{write_binary, write_string, write_variable_int};
use crate::protocol::{
    Connect, EncodeError, Packet, ProtocolVersion, PubAck, Publish, QoS, ReasonCode, Subscribe,
};

/// MQTT Packet Encoder
pub struct Encoder {
    protocol_version: ProtocolVersion,
}

impl Encoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            protocol_version: version,
        }
    }

    fn is_v5(&self) -> bool {
        self.protocol_version == ProtocolVersion::V5
    }

    /// Length of an empty property block, or nothing for v3.1.1
    fn props_len(&self) -> usize {
        usize::from(self.is_v5())
    }

    fn put_empty_props(&self, buf: &mut BytesMut) {
        if self.is_v5() {
            buf.put_u8(0x00);
        }
    }

    /// Encode a packet to the buffer
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match packet {
            Packet::Connect(p) => self.encode_connect(p, buf),
            Packet::Publish(p) => self.encode_publish(p, buf),
            Packet::PubAck(p) => self.encode_puback(p, buf),
            Packet::Subscribe(p) => self.encode_subscribe(p, buf),
            Packet::PingReq => {
                buf.put_u8(0xC0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::Disconnect(_) => {
                // Normal disconnection needs no reason code in either version
                buf.put_u8(0xE0);
                buf.put_u8(0x00);
                Ok(())
            }
            other => Err(EncodeError::Unsupported(other.name())),
        }
    }

    fn encode_connect(&self, packet: &Connect, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let is_v5 = packet.protocol_version == ProtocolVersion::V5;

        // "MQTT" + level + flags + keep alive
        let mut remaining_length = 6 + 1 + 1 + 2;
        if is_v5 {
            remaining_length += 1;
        }
        remaining_length += 2 + packet.client_id.len();
        if let Some(ref username) = packet.username {
            remaining_length += 2 + username.len();
        }
        if let Some(ref password) = packet.password {
            remaining_length += 2 + password.len();
        }

        buf.put_u8(0x10);
        write_variable_int(buf, remaining_length as u32)?;
        write_string(buf, "MQTT")?;
        buf.put_u8(packet.protocol_version as u8);

        let mut connect_flags: u8 = 0;
        if packet.clean_start {
            connect_flags |= 0x02;
        }
        if packet.password.is_some() {
            connect_flags |= 0x40;
        }
        if packet.username.is_some() {
            connect_flags |= 0x80;
        }
        buf.put_u8(connect_flags);
        buf.put_u16(packet.keep_alive);

        if is_v5 {
            buf.put_u8(0x00);
        }

        write_string(buf, &packet.client_id)?;
        if let Some(ref username) = packet.username {
            write_string(buf, username)?;
        }
        if let Some(ref password) = packet.password {
            write_binary(buf, password)?;
        }

        Ok(())
    }

    fn encode_publish(&self, packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let mut remaining_length = 2 + packet.topic.len();
        if packet.qos != QoS::AtMostOnce {
            remaining_length += 2;
        }
        remaining_length += self.props_len();
        remaining_length += packet.payload.len();

        let mut first_byte: u8 = 0x30;
        if packet.dup {
            first_byte |= 0x08;
        }
        first_byte |= (packet.qos as u8) << 1;
        if packet.retain {
            first_byte |= 0x01;
        }
        buf.put_u8(first_byte);
        write_variable_int(buf, remaining_length as u32)?;

        write_string(buf, &packet.topic)?;
        if packet.qos != QoS::AtMostOnce {
            buf.put_u16(packet.packet_id.ok_or(EncodeError::MissingPacketId)?);
        }
        self.put_empty_props(buf);
        buf.put_slice(&packet.payload);

        Ok(())
    }

    fn encode_puback(&self, packet: &PubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(0x40);
        if self.is_v5() && packet.reason_code != ReasonCode::SUCCESS {
            buf.put_u8(0x03);
            buf.put_u16(packet.packet_id);
            buf.put_u8(packet.reason_code.0);
        } else {
            buf.put_u8(0x02);
            buf.put_u16(packet.packet_id);
        }
        Ok(())
    }

    fn encode_subscribe(&self, packet: &Subscribe, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let mut remaining_length = 2 + self.props_len();
        for sub in &packet.subscriptions {
            remaining_length += 2 + sub.filter.len() + 1;
        }

        buf.put_u8(0x82);
        write_variable_int(buf, remaining_length as u32)?;
        buf.put_u16(packet.packet_id);
        self.put_empty_props(buf);

        // v5.0 options byte carries QoS in its low bits with every other
        // option left at zero, so both versions write the same byte
        for sub in &packet.subscriptions {
            write_string(buf, &sub.filter)?;
            buf.put_u8(sub.qos as u8);
        }

        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(ProtocolVersion::V311)
    }
}
