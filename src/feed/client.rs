//! Feed client
//!
//! Connects to the upstream broker, subscribes to the route filters and
//! hands inbound messages to the handler. Reconnects with exponential
//! backoff until stopped.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{FeedCommand, FeedError, FeedHandler, FeedStatus};
use crate::codec::{Decoder, Encoder};
use crate::config::FeedConfig;
use crate::lifecycle::ShutdownFlag;
use crate::protocol::{
    Connect, Disconnect, Packet, ProtocolVersion, PubAck, Publish, QoS, Subscribe, Subscription,
};

const READ_CHUNK: usize = 4096;

/// MQTT subscriber for the bridge's inbound side
pub struct FeedClient {
    config: FeedConfig,
    protocol: ProtocolVersion,
    qos: QoS,
    filters: Vec<String>,
}

impl FeedClient {
    /// Create a client that will subscribe to `filters`
    ///
    /// Unsupported protocol levels fall back to v3.1.1 and QoS 2 to QoS 1;
    /// `Config::validate` rejects both before we get here.
    pub fn new(config: FeedConfig, filters: Vec<String>) -> Self {
        let protocol = config.protocol().unwrap_or_default();
        let qos = config.subscribe_qos().unwrap_or(QoS::AtLeastOnce);
        Self {
            config,
            protocol,
            qos,
            filters,
        }
    }

    /// Spawn the connection task
    pub fn spawn(
        self,
        handler: Arc<dyn FeedHandler>,
        commands: mpsc::UnboundedReceiver<FeedCommand>,
    ) -> FeedHandle {
        let status = Arc::new(RwLock::new(FeedStatus::Disconnected));
        let stop = ShutdownFlag::new();

        let task = {
            let status = status.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                self.connection_loop(handler, commands, status, stop).await;
            })
        };

        FeedHandle { status, stop, task }
    }

    async fn connection_loop(
        self,
        handler: Arc<dyn FeedHandler>,
        mut commands: mpsc::UnboundedReceiver<FeedCommand>,
        status: Arc<RwLock<FeedStatus>>,
        stop: ShutdownFlag,
    ) {
        let mut retry_interval = self.config.reconnect_interval;
        let max_retry = self.config.max_reconnect_interval;

        while !stop.is_set() {
            *status.write() = FeedStatus::Connecting;
            debug!("Feed: connecting to {}", self.config.address);

            let mut session = Session {
                client: &self,
                handler: handler.as_ref(),
                status: &status,
                connected: false,
            };
            let result = session.run(&mut commands, &stop).await;

            if session.connected {
                // A session that got as far as CONNACK resets the backoff
                retry_interval = self.config.reconnect_interval;
            }

            match result {
                Ok(()) => {
                    info!("Feed: disconnected");
                    break;
                }
                Err(e) => {
                    error!("Feed: connection failed: {}", e);
                    if session.connected {
                        handler.on_disconnect(&e.to_string());
                    }
                    *status.write() = FeedStatus::Backoff;
                    debug!("Feed: reconnecting in {:?}", retry_interval);

                    tokio::select! {
                        _ = stop.wait() => break,
                        _ = tokio::time::sleep(retry_interval) => {}
                    }
                    retry_interval = std::cmp::min(retry_interval * 2, max_retry);
                }
            }
        }

        *status.write() = FeedStatus::Disconnected;
    }
}

/// One connection attempt and, if it succeeds, its message loop
struct Session<'a> {
    client: &'a FeedClient,
    handler: &'a dyn FeedHandler,
    status: &'a RwLock<FeedStatus>,
    connected: bool,
}

impl Session<'_> {
    /// Returns `Ok(())` only when stopped
    async fn run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<FeedCommand>,
        stop: &ShutdownFlag,
    ) -> Result<(), FeedError> {
        let config = &self.client.config;
        let encoder = Encoder::new(self.client.protocol);
        let decoder =
            Decoder::new(self.client.protocol).with_max_packet_size(config.max_packet_size);
        let mut read_buf = BytesMut::with_capacity(READ_CHUNK);
        let mut buf = BytesMut::new();

        let (mut reader, mut writer) = tokio::select! {
            _ = stop.wait() => return Ok(()),
            r = self.handshake(&encoder, &decoder, &mut read_buf) => r?,
        };

        self.connected = true;
        *self.status.write() = FeedStatus::Connected;
        self.subscribe(&encoder, &mut writer, &mut buf).await?;
        self.handler.on_connect();

        // Packets that arrived in the same read as CONNACK
        self.drain_buffered(&decoder, &encoder, &mut read_buf, &mut writer, &mut buf)
            .await?;

        let keepalive = Duration::from_secs(u64::from(config.keepalive.max(1)));
        let keepalive_enabled = config.keepalive > 0;
        let mut keepalive_timer = tokio::time::interval(keepalive);
        keepalive_timer.reset();

        loop {
            tokio::select! {
                biased;

                _ = stop.wait() => {
                    let disconnect = Packet::Disconnect(Disconnect::default());
                    buf.clear();
                    encoder.encode(&disconnect, &mut buf)?;
                    let _ = writer.write_all(&buf).await;
                    let _ = writer.shutdown().await;
                    return Ok(());
                }

                result = reader.read_buf(&mut read_buf) => {
                    if result? == 0 {
                        return Err(FeedError::Protocol("connection closed by broker".to_string()));
                    }
                    self.drain_buffered(&decoder, &encoder, &mut read_buf, &mut writer, &mut buf)
                        .await?;
                }

                Some(cmd) = commands.recv() => {
                    match cmd {
                        FeedCommand::Publish { topic, payload } => {
                            let publish = Packet::Publish(Publish {
                                topic,
                                payload,
                                ..Default::default()
                            });
                            buf.clear();
                            encoder.encode(&publish, &mut buf)?;
                            writer.write_all(&buf).await?;
                        }
                    }
                }

                _ = keepalive_timer.tick(), if keepalive_enabled => {
                    buf.clear();
                    encoder.encode(&Packet::PingReq, &mut buf)?;
                    writer.write_all(&buf).await?;
                }
            }
        }
    }

    /// TCP connect, CONNECT, wait for a successful CONNACK
    async fn handshake(
        &self,
        encoder: &Encoder,
        decoder: &Decoder,
        read_buf: &mut BytesMut,
    ) -> Result<(OwnedReadHalf, OwnedWriteHalf), FeedError> {
        let config = &self.client.config;
        let (host, port) = config.parse_address();

        let stream = timeout(
            config.connect_timeout,
            TcpStream::connect((host.as_str(), port)),
        )
        .await
        .map_err(|_| FeedError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!("Feed: TCP connected to {}:{}", host, port);

        let (mut reader, mut writer) = stream.into_split();

        let connect = Packet::Connect(Box::new(Connect {
            protocol_version: self.client.protocol,
            client_id: config.client_id.clone(),
            clean_start: config.clean_start,
            keep_alive: config.keepalive,
            username: config.username.clone(),
            password: config.password.clone().map(Into::into),
        }));
        let mut buf = BytesMut::new();
        encoder.encode(&connect, &mut buf)?;
        writer.write_all(&buf).await?;
        debug!("Feed: CONNECT sent (MQTT {})", self.client.protocol);

        let packet = timeout(
            config.connect_timeout,
            read_packet(&mut reader, decoder, read_buf),
        )
        .await
        .map_err(|_| FeedError::Timeout)??;

        match packet {
            Packet::ConnAck(connack) if connack.reason_code.is_success() => {
                info!(
                    "Feed: connected to {} (session_present={})",
                    config.address, connack.session_present
                );
                Ok((reader, writer))
            }
            Packet::ConnAck(connack) => Err(FeedError::ConnectionRefused(connack.reason_code)),
            other => Err(FeedError::Protocol(format!(
                "expected CONNACK, got {}",
                other.name()
            ))),
        }
    }

    async fn subscribe(
        &self,
        encoder: &Encoder,
        writer: &mut OwnedWriteHalf,
        buf: &mut BytesMut,
    ) -> Result<(), FeedError> {
        if self.client.filters.is_empty() {
            return Ok(());
        }

        let subscribe = Packet::Subscribe(Subscribe {
            packet_id: 1,
            subscriptions: self
                .client
                .filters
                .iter()
                .map(|filter| Subscription {
                    filter: filter.clone(),
                    qos: self.client.qos,
                })
                .collect(),
        });
        buf.clear();
        encoder.encode(&subscribe, buf)?;
        writer.write_all(buf).await?;

        debug!(
            "Feed: subscribed to {} filters at {:?}",
            self.client.filters.len(),
            self.client.qos
        );
        Ok(())
    }

    /// Handle every whole packet in `read_buf`, keeping any partial tail
    async fn drain_buffered(
        &self,
        decoder: &Decoder,
        encoder: &Encoder,
        read_buf: &mut BytesMut,
        writer: &mut OwnedWriteHalf,
        buf: &mut BytesMut,
    ) -> Result<(), FeedError> {
        while let Some((packet, consumed)) = decoder.decode(read_buf)? {
            read_buf.advance(consumed);
            self.handle_packet(packet, encoder, writer, buf).await?;
        }
        Ok(())
    }

    async fn handle_packet(
        &self,
        packet: Packet,
        encoder: &Encoder,
        writer: &mut OwnedWriteHalf,
        buf: &mut BytesMut,
    ) -> Result<(), FeedError> {
        match packet {
            Packet::Publish(publish) => {
                self.handler.on_message(&publish.topic, &publish.payload);

                if publish.qos == QoS::AtLeastOnce {
                    if let Some(packet_id) = publish.packet_id {
                        buf.clear();
                        encoder.encode(&Packet::PubAck(PubAck::new(packet_id)), buf)?;
                        writer.write_all(buf).await?;
                    }
                } else if publish.qos == QoS::ExactlyOnce {
                    warn!("Feed: QoS 2 message on '{}' was not requested", publish.topic);
                }
            }
            Packet::SubAck(suback) => {
                for (filter, code) in self.client.filters.iter().zip(&suback.reason_codes) {
                    if code.is_error() {
                        warn!("Feed: subscription to '{}' rejected: {}", filter, code);
                    }
                }
                debug!("Feed: SUBACK received");
            }
            Packet::PingResp => debug!("Feed: PINGRESP received"),
            Packet::PubAck(_) => {}
            Packet::Disconnect(disconnect) => {
                warn!("Feed: broker sent DISCONNECT: {}", disconnect.reason_code);
                return Err(FeedError::Protocol(format!(
                    "disconnected by broker: {}",
                    disconnect.reason_code
                )));
            }
            other => {
                return Err(FeedError::Protocol(format!(
                    "unexpected {} from broker",
                    other.name()
                )));
            }
        }
        Ok(())
    }
}

/// Read until one whole packet is buffered
async fn read_packet(
    reader: &mut OwnedReadHalf,
    decoder: &Decoder,
    read_buf: &mut BytesMut,
) -> Result<Packet, FeedError> {
    loop {
        if let Some((packet, consumed)) = decoder.decode(read_buf)? {
            read_buf.advance(consumed);
            return Ok(packet);
        }
        if reader.read_buf(read_buf).await? == 0 {
            return Err(FeedError::Protocol("connection closed by broker".to_string()));
        }
    }
}

/// Running feed task
pub struct FeedHandle {
    status: Arc<RwLock<FeedStatus>>,
    stop: ShutdownFlag,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn status(&self) -> FeedStatus {
        *self.status.read()
    }

    /// Send DISCONNECT and wait for the task, aborting it after `grace`
    pub async fn disconnect(self, grace: Duration) {
        self.stop.trigger();
        let abort = self.task.abort_handle();
        if timeout(grace, self.task).await.is_err() {
            warn!("Feed: did not stop within {:?}, aborting", grace);
            abort.abort();
        }
    }
}
