//! Codec tests against hand-assembled wire bytes

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;

use crate::codec::{read_variable_int, write_variable_int, Decoder, Encoder};
use crate::protocol::{
    ConnAck, Connect, DecodeError, Disconnect, EncodeError, Packet, ProtocolVersion, PubAck,
    Publish, QoS, ReasonCode, SubAck, Subscribe, Subscription,
};

fn encode(packet: &Packet, version: ProtocolVersion) -> Vec<u8> {
    let mut buf = BytesMut::new();
    Encoder::new(version).encode(packet, &mut buf).unwrap();
    buf.to_vec()
}

fn decode(buf: &[u8], version: ProtocolVersion) -> Result<Packet, DecodeError> {
    match Decoder::new(version).decode(buf)? {
        Some((packet, consumed)) => {
            assert_eq!(consumed, buf.len());
            Ok(packet)
        }
        None => Err(DecodeError::InsufficientData),
    }
}

// ============================================================================
// Outbound
// ============================================================================

#[test]
fn test_connect_v311_bytes() {
    let packet = Packet::Connect(Box::new(Connect {
        client_id: "fb".to_string(),
        ..Default::default()
    }));
    assert_eq!(
        encode(&packet, ProtocolVersion::V311),
        vec![
            0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x02,
            b'f', b'b'
        ]
    );
}

#[test]
fn test_connect_v5_has_empty_properties() {
    let packet = Packet::Connect(Box::new(Connect {
        protocol_version: ProtocolVersion::V5,
        client_id: "fb".to_string(),
        ..Default::default()
    }));
    assert_eq!(
        encode(&packet, ProtocolVersion::V5),
        vec![
            0x10, 0x0F, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x02, 0x00, 0x3C, 0x00, 0x00,
            0x02, b'f', b'b'
        ]
    );
}

#[test]
fn test_connect_with_credentials() {
    let packet = Packet::Connect(Box::new(Connect {
        client_id: "fb".to_string(),
        username: Some("u".to_string()),
        password: Some(Bytes::from_static(b"p")),
        ..Default::default()
    }));
    let bytes = encode(&packet, ProtocolVersion::V311);
    assert_eq!(bytes[1], 20);
    assert_eq!(bytes[9], 0xC2);
    assert_eq!(&bytes[bytes.len() - 6..], &[0x00, 0x01, b'u', 0x00, 0x01, b'p']);
}

#[test]
fn test_subscribe_bytes() {
    let packet = Packet::Subscribe(Subscribe {
        packet_id: 1,
        subscriptions: vec![Subscription {
            filter: "a/#".to_string(),
            qos: QoS::AtLeastOnce,
        }],
    });
    assert_eq!(
        encode(&packet, ProtocolVersion::V311),
        vec![0x82, 0x08, 0x00, 0x01, 0x00, 0x03, b'a', b'/', b'#', 0x01]
    );
    assert_eq!(
        encode(&packet, ProtocolVersion::V5),
        vec![0x82, 0x09, 0x00, 0x01, 0x00, 0x00, 0x03, b'a', b'/', b'#', 0x01]
    );
}

#[test]
fn test_publish_qos0_bytes() {
    let packet = Packet::Publish(Publish {
        topic: "t".to_string(),
        payload: Bytes::from_static(b"k"),
        ..Default::default()
    });
    assert_eq!(
        encode(&packet, ProtocolVersion::V311),
        vec![0x30, 0x04, 0x00, 0x01, b't', b'k']
    );
    assert_eq!(
        encode(&packet, ProtocolVersion::V5),
        vec![0x30, 0x05, 0x00, 0x01, b't', 0x00, b'k']
    );
}

#[test]
fn test_publish_qos1_requires_packet_id() {
    let packet = Packet::Publish(Publish {
        qos: QoS::AtLeastOnce,
        topic: "t".to_string(),
        ..Default::default()
    });
    let mut buf = BytesMut::new();
    let err = Encoder::new(ProtocolVersion::V311)
        .encode(&packet, &mut buf)
        .unwrap_err();
    assert_eq!(err, EncodeError::MissingPacketId);
}

#[test]
fn test_puback_pingreq_disconnect_bytes() {
    assert_eq!(
        encode(&Packet::PubAck(PubAck::new(7)), ProtocolVersion::V5),
        vec![0x40, 0x02, 0x00, 0x07]
    );
    assert_eq!(
        encode(&Packet::PingReq, ProtocolVersion::V311),
        vec![0xC0, 0x00]
    );
    assert_eq!(
        encode(
            &Packet::Disconnect(Disconnect::default()),
            ProtocolVersion::V5
        ),
        vec![0xE0, 0x00]
    );
}

#[test]
fn test_server_packets_are_not_encoded() {
    let mut buf = BytesMut::new();
    let err = Encoder::default()
        .encode(&Packet::ConnAck(ConnAck::default()), &mut buf)
        .unwrap_err();
    assert_eq!(err, EncodeError::Unsupported("CONNACK"));
    assert!(buf.is_empty());
}

// ============================================================================
// Inbound
// ============================================================================

#[test]
fn test_connack_v311() {
    assert_eq!(
        decode(&[0x20, 0x02, 0x00, 0x00], ProtocolVersion::V311).unwrap(),
        Packet::ConnAck(ConnAck {
            session_present: false,
            reason_code: ReasonCode::SUCCESS,
        })
    );
    assert_eq!(
        decode(&[0x20, 0x02, 0x01, 0x05], ProtocolVersion::V311).unwrap(),
        Packet::ConnAck(ConnAck {
            session_present: true,
            reason_code: ReasonCode::NOT_AUTHORIZED,
        })
    );
}

#[test]
fn test_connack_v5_skips_properties() {
    let bytes = [
        0x20, 0x08, 0x00, 0x00, 0x05, 0x21, 0x00, 0x0A, 0x24, 0x01,
    ];
    assert_eq!(
        decode(&bytes, ProtocolVersion::V5).unwrap(),
        Packet::ConnAck(ConnAck::default())
    );
}

#[test]
fn test_connack_reserved_flags_rejected() {
    let err = decode(&[0x20, 0x02, 0x02, 0x00], ProtocolVersion::V311).unwrap_err();
    assert_eq!(err, DecodeError::InvalidFlags);
}

#[test]
fn test_publish_qos1_v311() {
    let mut bytes = vec![0x32, 0x0E, 0x00, 0x03, b's', b'/', b'1', 0x00, 0x07];
    bytes.extend_from_slice(br#"{"a":1}"#);
    assert_eq!(
        decode(&bytes, ProtocolVersion::V311).unwrap(),
        Packet::Publish(Publish {
            qos: QoS::AtLeastOnce,
            topic: "s/1".to_string(),
            packet_id: Some(7),
            payload: Bytes::from_static(br#"{"a":1}"#),
            ..Default::default()
        })
    );
}

#[test]
fn test_publish_v5_properties_not_in_payload() {
    let mut bytes = vec![
        0x32, 0x11, 0x00, 0x03, b's', b'/', b'1', 0x00, 0x07, 0x02, 0x01, 0x01,
    ];
    bytes.extend_from_slice(br#"{"a":1}"#);
    match decode(&bytes, ProtocolVersion::V5).unwrap() {
        Packet::Publish(p) => assert_eq!(p.payload, Bytes::from_static(br#"{"a":1}"#)),
        other => panic!("unexpected packet {:?}", other),
    }
}

#[test]
fn test_publish_invalid_forms() {
    // DUP with QoS 0
    let err = decode(&[0x38, 0x03, 0x00, 0x01, b't'], ProtocolVersion::V311).unwrap_err();
    assert!(matches!(err, DecodeError::MalformedPacket(_)));

    // wildcard in topic name
    let err = decode(&[0x30, 0x03, 0x00, 0x01, b'#'], ProtocolVersion::V311).unwrap_err();
    assert!(matches!(err, DecodeError::MalformedPacket(_)));

    // QoS 3
    let err = decode(&[0x36, 0x03, 0x00, 0x01, b't'], ProtocolVersion::V311).unwrap_err();
    assert_eq!(err, DecodeError::InvalidQoS(3));

    // packet id 0
    let err = decode(
        &[0x32, 0x05, 0x00, 0x01, b't', 0x00, 0x00],
        ProtocolVersion::V311,
    )
    .unwrap_err();
    assert!(matches!(err, DecodeError::MalformedPacket(_)));
}

#[test]
fn test_partial_packet_waits_for_more() {
    let bytes = [0x30, 0x04, 0x00, 0x01, b't', b'k'];
    let decoder = Decoder::new(ProtocolVersion::V311);
    for cut in 0..bytes.len() {
        assert!(decoder.decode(&bytes[..cut]).unwrap().is_none());
    }
    assert!(decoder.decode(&bytes).unwrap().is_some());
}

#[test]
fn test_back_to_back_packets() {
    let bytes = [0xD0, 0x00, 0x40, 0x02, 0x00, 0x09];
    let decoder = Decoder::new(ProtocolVersion::V311);

    let (first, used) = decoder.decode(&bytes).unwrap().unwrap();
    assert_eq!(first, Packet::PingResp);
    let (second, rest) = decoder.decode(&bytes[used..]).unwrap().unwrap();
    assert_eq!(second, Packet::PubAck(PubAck::new(9)));
    assert_eq!(used + rest, bytes.len());
}

#[test]
fn test_suback_codes() {
    assert_eq!(
        decode(&[0x90, 0x03, 0x00, 0x01, 0x01], ProtocolVersion::V311).unwrap(),
        Packet::SubAck(SubAck {
            packet_id: 1,
            reason_codes: vec![ReasonCode::GRANTED_QOS_1],
        })
    );
    assert_eq!(
        decode(&[0x90, 0x04, 0x00, 0x01, 0x00, 0x87], ProtocolVersion::V5).unwrap(),
        Packet::SubAck(SubAck {
            packet_id: 1,
            reason_codes: vec![ReasonCode::NOT_AUTHORIZED],
        })
    );
    let err = decode(&[0x90, 0x03, 0x00, 0x01, 0x03], ProtocolVersion::V311).unwrap_err();
    assert_eq!(err, DecodeError::InvalidReasonCode(3));
}

#[test]
fn test_server_disconnect() {
    assert_eq!(
        decode(&[0xE0, 0x01, 0x8B], ProtocolVersion::V5).unwrap(),
        Packet::Disconnect(Disconnect {
            reason_code: ReasonCode::SERVER_SHUTTING_DOWN,
        })
    );
    assert!(decode(&[0xE0, 0x01, 0x00], ProtocolVersion::V311).is_err());
}

#[test]
fn test_unexpected_packets_rejected_on_receive() {
    let err = decode(&[0x10, 0x00], ProtocolVersion::V311).unwrap_err();
    assert_eq!(err, DecodeError::UnexpectedPacketType(1));
    // The bridge never unsubscribes
    let err = decode(&[0xB0, 0x02, 0x00, 0x02], ProtocolVersion::V311).unwrap_err();
    assert_eq!(err, DecodeError::UnexpectedPacketType(11));
}

#[test]
fn test_packet_size_limit() {
    let decoder = Decoder::new(ProtocolVersion::V311).with_max_packet_size(4);
    assert_eq!(
        decoder.decode(&[0x30, 0x05]).unwrap_err(),
        DecodeError::PacketTooLarge
    );
}

#[test]
fn test_variable_int_boundaries() {
    for value in [0u32, 127, 128, 16_383, 16_384, 268_435_455] {
        let mut buf = BytesMut::new();
        let written = write_variable_int(&mut buf, value).unwrap();
        assert_eq!(read_variable_int(&buf).unwrap(), (value, written));
    }
    assert_eq!(
        read_variable_int(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]).unwrap_err(),
        DecodeError::InvalidRemainingLength
    );
    assert_eq!(
        read_variable_int(&[0x80]).unwrap_err(),
        DecodeError::InsufficientData
    );
}
