//! Feed client against a scripted broker

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::*;
use crate::config::FeedConfig;

/// Forwards every callback into a channel
struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Connected,
    Message(String, Vec<u8>),
    Disconnected,
}

impl FeedHandler for Recorder {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        let _ = self.tx.send(Event::Message(topic.to_string(), payload.to_vec()));
    }

    fn on_connect(&self) {
        let _ = self.tx.send(Event::Connected);
    }

    fn on_disconnect(&self, _reason: &str) {
        let _ = self.tx.send(Event::Disconnected);
    }
}

fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), rx)
}

fn test_config(address: String) -> FeedConfig {
    FeedConfig {
        address,
        client_id: "feed-test".to_string(),
        keepalive: 0,
        reconnect_interval: Duration::from_millis(50),
        max_reconnect_interval: Duration::from_millis(200),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Read one MQTT frame: first header byte and body
async fn read_frame(socket: &mut TcpStream) -> (u8, Vec<u8>) {
    let first = socket.read_u8().await.unwrap();
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = socket.read_u8().await.unwrap();
        len |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    socket.read_exact(&mut body).await.unwrap();
    (first, body)
}

fn utf8_field(s: &str) -> Vec<u8> {
    let mut out = (s.len() as u16).to_be_bytes().to_vec();
    out.extend_from_slice(s.as_bytes());
    out
}

/// Accept a client, answer CONNECT with `connack_code` and, on success,
/// the SUBSCRIBE with a granting SUBACK
async fn accept_session(listener: &TcpListener, connack_code: u8) -> TcpStream {
    let (mut socket, _) = listener.accept().await.unwrap();
    let (first, body) = read_frame(&mut socket).await;
    assert_eq!(first, 0x10);
    assert_eq!(&body[..7], &[0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04]);
    socket
        .write_all(&[0x20, 0x02, 0x00, connack_code])
        .await
        .unwrap();
    socket
}

#[tokio::test]
async fn test_subscribes_and_acks_qos1_messages() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (handler, mut events) = recorder();
    let (_publisher, commands) = FeedPublisher::channel();

    let config = FeedConfig {
        qos: 1,
        ..test_config(address)
    };
    let handle = FeedClient::new(config, vec!["sensors/#".to_string()]).spawn(handler, commands);

    let mut socket = accept_session(&listener, 0x00).await;

    let (first, body) = read_frame(&mut socket).await;
    assert_eq!(first, 0x82);
    let mut expected = vec![0x00, 0x01];
    expected.extend(utf8_field("sensors/#"));
    expected.push(0x01);
    assert_eq!(body, expected);
    socket.write_all(&[0x90, 0x03, 0x00, 0x01, 0x01]).await.unwrap();

    assert_eq!(events.recv().await, Some(Event::Connected));
    assert_eq!(handle.status(), FeedStatus::Connected);

    let payload = br#"{"t":1}"#;
    let mut publish = utf8_field("sensors/temp1");
    publish.extend_from_slice(&[0x00, 0x07]);
    publish.extend_from_slice(payload);
    let mut frame = vec![0x32, publish.len() as u8];
    frame.extend(publish);
    socket.write_all(&frame).await.unwrap();

    assert_eq!(
        events.recv().await,
        Some(Event::Message("sensors/temp1".to_string(), payload.to_vec()))
    );
    assert_eq!(read_frame(&mut socket).await, (0x40, vec![0x00, 0x07]));

    handle.disconnect(Duration::from_secs(1)).await;
    assert_eq!(read_frame(&mut socket).await, (0xE0, vec![]));
}

#[tokio::test]
async fn test_publish_sharing_connack_segment_is_delivered() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (handler, mut events) = recorder();
    let (_publisher, commands) = FeedPublisher::channel();

    let config = FeedConfig {
        qos: 1,
        clean_start: false,
        ..test_config(address)
    };
    let handle = FeedClient::new(config, vec!["sensors/#".to_string()]).spawn(handler, commands);

    let (mut socket, _) = listener.accept().await.unwrap();
    let (first, _) = read_frame(&mut socket).await;
    assert_eq!(first, 0x10);

    // Resumed session: CONNACK and a queued QoS 1 message in one write,
    // then the broker stays silent
    let mut publish = utf8_field("sensors/queued");
    publish.extend_from_slice(&[0x00, 0x09]);
    publish.extend_from_slice(b"{}");
    let mut segment = vec![0x20, 0x02, 0x01, 0x00, 0x32, publish.len() as u8];
    segment.extend(publish);
    socket.write_all(&segment).await.unwrap();

    assert_eq!(events.recv().await, Some(Event::Connected));
    let message = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap();
    assert_eq!(
        message,
        Some(Event::Message("sensors/queued".to_string(), b"{}".to_vec()))
    );

    let (first, _) = read_frame(&mut socket).await;
    assert_eq!(first, 0x82);
    assert_eq!(read_frame(&mut socket).await, (0x40, vec![0x00, 0x09]));

    handle.disconnect(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_publisher_sends_qos0() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (handler, mut events) = recorder();
    let (publisher, commands) = FeedPublisher::channel();

    // Queued before the session exists
    publisher.publish("firebase/new", "-Nkey").unwrap();

    let handle = FeedClient::new(test_config(address), Vec::new()).spawn(handler, commands);
    let mut socket = accept_session(&listener, 0x00).await;
    assert_eq!(events.recv().await, Some(Event::Connected));

    let (first, body) = read_frame(&mut socket).await;
    assert_eq!(first, 0x30);
    let mut expected = utf8_field("firebase/new");
    expected.extend_from_slice(b"-Nkey");
    assert_eq!(body, expected);

    handle.disconnect(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_reconnects_after_refusal_and_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (handler, mut events) = recorder();
    let (_publisher, commands) = FeedPublisher::channel();

    let handle = FeedClient::new(test_config(address), Vec::new()).spawn(handler, commands);

    // Not authorized
    let refused = accept_session(&listener, 0x05).await;
    drop(refused);

    let socket = accept_session(&listener, 0x00).await;
    assert_eq!(events.recv().await, Some(Event::Connected));

    drop(socket);
    assert_eq!(events.recv().await, Some(Event::Disconnected));

    let _socket = accept_session(&listener, 0x00).await;
    assert_eq!(events.recv().await, Some(Event::Connected));

    handle.disconnect(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_disconnect_while_broker_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let (handler, _events) = recorder();
    let (_publisher, commands) = FeedPublisher::channel();
    let handle = FeedClient::new(test_config(address), Vec::new()).spawn(handler, commands);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_ne!(handle.status(), FeedStatus::Connected);

    tokio::time::timeout(Duration::from_secs(1), handle.disconnect(Duration::from_secs(1)))
        .await
        .unwrap();
}

#[test]
fn test_publisher_fails_once_feed_is_gone() {
    let (publisher, commands) = FeedPublisher::channel();
    drop(commands);
    assert!(matches!(
        publisher.publish("t", "x"),
        Err(FeedError::Closed)
    ));
}
