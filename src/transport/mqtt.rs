//! MQTT gateway transport.
//!
//! Downlinks are published to the gateway's send-data topic for the node and
//! endpoint pair; uplinks arrive on the gateway's received-data topics and
//! are forwarded as raw payloads.
//!
//! A send completes once the broker acknowledges the publish (QoS 1).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::{
    DOWNLINK_DST_EP, DOWNLINK_SRC_EP, Destination, Transport, UPLINK_CHANNEL_CAPACITY,
    UPLINK_DST_EP, UPLINK_SRC_EP,
};

/// Default broker port (TLS).
pub const DEFAULT_PORT: u16 = 8883;

/// Default broker username.
pub const DEFAULT_USERNAME: &str = "mqttmasteruser";

/// Default keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default time allowed for one publish.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Time allowed for the DISCONNECT packet to reach the broker.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// Configuration for the MQTT transport.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username.
    pub username: String,
    /// Password.
    pub password: Option<String>,
    /// Use TLS with the platform's root certificates.
    pub tls: bool,
    /// MQTT client identifier.
    pub client_id: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Time allowed for one publish.
    pub send_timeout: Duration,
    /// Gateway whose uplinks are received (`None` = all).
    pub gateway: Option<String>,
    /// Sink whose uplinks are received (`None` = all).
    pub sink: Option<String>,
}

impl MqttConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: DEFAULT_USERNAME.to_owned(),
            password: None,
            tls: true,
            client_id: format!("meshbus-{}", std::process::id()),
            keep_alive: DEFAULT_KEEP_ALIVE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            gateway: None,
            sink: None,
        }
    }

    /// Sets the broker port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = Some(password.into());
        self
    }

    /// Disables TLS.
    #[must_use]
    pub const fn insecure(mut self) -> Self {
        self.tls = false;
        self
    }

    /// Sets the client identifier.
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Sets the publish timeout.
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Receives uplinks only from this destination's gateway and sink.
    #[must_use]
    pub fn uplinks_from(mut self, destination: &Destination) -> Self {
        self.gateway = Some(destination.gateway.clone());
        self.sink = Some(destination.sink.clone());
        self
    }
}

/// Topic a downlink for `destination` is published to.
#[must_use]
pub fn downlink_topic(destination: &Destination) -> String {
    format!(
        "gw-request/send_data/{}/{}/{}/{DOWNLINK_SRC_EP}/{DOWNLINK_DST_EP}",
        destination.gateway, destination.sink, destination.node
    )
}

/// Subscription filter for device uplinks.
#[must_use]
pub fn uplink_topic_filter(gateway: Option<&str>, sink: Option<&str>) -> String {
    format!(
        "gw-event/received_data/{}/{}/+/{UPLINK_SRC_EP}/{UPLINK_DST_EP}",
        gateway.unwrap_or("+"),
        sink.unwrap_or("+")
    )
}

/// Extracts the source address from an uplink topic.
///
/// Returns `None` for topics outside the uplink endpoint pair.
#[must_use]
pub fn parse_uplink_topic(topic: &str) -> Option<Destination> {
    let mut parts = topic.split('/');
    if parts.next()? != "gw-event" || parts.next()? != "received_data" {
        return None;
    }
    let gateway = parts.next()?;
    let sink = parts.next()?;
    let node = parts.next()?.parse().ok()?;
    let src_ep: u8 = parts.next()?.parse().ok()?;
    let dst_ep: u8 = parts.next()?.parse().ok()?;
    if src_ep != UPLINK_SRC_EP || dst_ep != UPLINK_DST_EP || parts.next().is_some() {
        return None;
    }
    Some(Destination::new(gateway).sink(sink).node(node))
}

/// Pairs publishes with their broker acknowledgments.
///
/// Senders queue a waiter in the order they hand publishes to the client.
/// The event loop gives each outgoing packet id to the oldest queued waiter
/// and releases it on the matching `PubAck`. Dropped waiters fail the send.
#[derive(Debug, Default)]
struct PublishAcks {
    queued: VecDeque<oneshot::Sender<()>>,
    in_flight: HashMap<u16, oneshot::Sender<()>>,
}

impl PublishAcks {
    fn on_outgoing(&mut self, pkid: u16) {
        if let Some(waiter) = self.queued.pop_front() {
            self.in_flight.insert(pkid, waiter);
        }
    }

    fn on_puback(&mut self, pkid: u16) {
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            let _ = waiter.send(());
        }
    }

    fn clear(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }
}

type SharedAcks = Arc<Mutex<PublishAcks>>;

fn lock(acks: &SharedAcks) -> MutexGuard<'_, PublishAcks> {
    acks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MQTT transport to a mesh gateway.
pub struct MqttTransport {
    config: MqttConfig,
    client: Option<AsyncClient>,
    event_loop: Option<JoinHandle<()>>,
    connected: Arc<watch::Sender<bool>>,
    acks: SharedAcks,
    uplink_tx: mpsc::Sender<Bytes>,
    uplink_rx: Option<mpsc::Receiver<Bytes>>,
}

impl MqttTransport {
    /// Creates a new MQTT transport with the given configuration.
    #[must_use]
    pub fn new(config: MqttConfig) -> Self {
        let (uplink_tx, uplink_rx) = mpsc::channel(UPLINK_CHANNEL_CAPACITY);
        Self {
            config,
            client: None,
            event_loop: None,
            connected: Arc::new(watch::Sender::new(false)),
            acks: SharedAcks::default(),
            uplink_tx,
            uplink_rx: Some(uplink_rx),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive);
        options.set_credentials(
            self.config.username.clone(),
            self.config.password.clone().unwrap_or_default(),
        );
        if self.config.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        options
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.client.is_some() {
                return Ok(());
            }

            tracing::info!(
                host = %self.config.host,
                port = self.config.port,
                tls = self.config.tls,
                "connecting to broker"
            );
            let (client, event_loop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);
            let filter =
                uplink_topic_filter(self.config.gateway.as_deref(), self.config.sink.as_deref());

            let handle = tokio::spawn(run_event_loop(
                event_loop,
                client.clone(),
                filter,
                self.uplink_tx.clone(),
                Arc::clone(&self.connected),
                Arc::clone(&self.acks),
            ));

            self.client = Some(client);
            self.event_loop = Some(handle);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let was_connected = *self.connected.borrow();
            let mut queued = false;
            if let Some(client) = self.client.take() {
                match client.try_disconnect() {
                    Ok(()) => queued = true,
                    Err(e) => tracing::debug!("disconnect request failed: {}", e),
                }
            }
            if let Some(mut handle) = self.event_loop.take() {
                // The event loop exits once DISCONNECT is written.
                let flushed = was_connected
                    && queued
                    && tokio::time::timeout(DISCONNECT_TIMEOUT, &mut handle)
                        .await
                        .is_ok();
                if !flushed {
                    handle.abort();
                }
            }
            self.connected.send_replace(false);
            lock(&self.acks).clear();
            Ok(())
        })
    }

    fn send(
        &mut self,
        destination: &Destination,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let client = self.client.clone();
        let topic = downlink_topic(destination);
        let timeout = self.config.send_timeout;
        let mut connected = self.connected.subscribe();
        let acks = Arc::clone(&self.acks);

        Box::pin(async move {
            let client = client.ok_or(Error::NotConnected)?;
            tracing::debug!(%topic, len = data.len(), "publishing downlink");

            let delivery = async {
                if connected.wait_for(|up| *up).await.is_err() {
                    return Err(Error::NotConnected);
                }
                let acked = {
                    let mut pending = lock(&acks);
                    let (tx, rx) = oneshot::channel();
                    pending.queued.push_back(tx);
                    let published =
                        client.try_publish(topic, QoS::AtLeastOnce, false, data.to_vec());
                    if let Err(e) = published {
                        pending.queued.pop_back();
                        return Err(Error::from(e));
                    }
                    rx
                };
                // A dropped waiter means the connection went down first.
                acked.await.map_err(|_| Error::NotConnected)
            };

            tokio::time::timeout(timeout, delivery)
                .await
                .map_err(|_| Error::TransportTimeout {
                    timeout_ms: Error::millis(timeout),
                })?
        })
    }

    fn take_uplink(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.uplink_rx.take()
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && *self.connected.borrow()
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
    }
}

/// Polls the broker connection until DISCONNECT is sent or the uplink
/// receiver goes away.
///
/// The uplink subscription is renewed on every connection acknowledgment,
/// so it survives reconnects.
async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    filter: String,
    uplink_tx: mpsc::Sender<Bytes>,
    connected: Arc<watch::Sender<bool>>,
    acks: SharedAcks,
) {
    loop {
        match event_loop.poll().await {
            Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => {
                connected.send_replace(true);
                tracing::info!(%filter, "broker connected, subscribing to uplinks");
                if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                    tracing::error!("uplink subscription failed: {}", e);
                }
            }
            Ok(rumqttc::Event::Incoming(Packet::Publish(publish))) => {
                match parse_uplink_topic(&publish.topic) {
                    Some(source) => {
                        tracing::trace!(%source, len = publish.payload.len(), "uplink received");
                    }
                    None => {
                        tracing::debug!(topic = %publish.topic, "ignoring publish on foreign topic");
                        continue;
                    }
                }
                if uplink_tx.send(publish.payload).await.is_err() {
                    tracing::debug!("uplink receiver dropped, stopping event loop");
                    break;
                }
            }
            Ok(rumqttc::Event::Outgoing(Outgoing::Publish(pkid))) => {
                lock(&acks).on_outgoing(pkid);
            }
            Ok(rumqttc::Event::Incoming(Packet::PubAck(ack))) => {
                lock(&acks).on_puback(ack.pkid);
            }
            Ok(rumqttc::Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("disconnected from broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                lock(&acks).clear();
                if connected.send_replace(false) {
                    tracing::warn!("broker connection lost: {}", e);
                } else {
                    tracing::debug!("broker connection failed: {}", e);
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    connected.send_replace(false);
    lock(&acks).clear();
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    /// Reads one MQTT packet, returning the fixed header byte and the body.
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= usize::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Accepts one client, acknowledges CONNECT and every PUBLISH, and
    /// returns the published topics once DISCONNECT arrives.
    async fn loopback_broker(listener: TcpListener) -> Vec<String> {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut topics = Vec::new();
        loop {
            let (header, body) = read_packet(&mut stream).await.unwrap();
            match header >> 4 {
                1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
                3 => {
                    let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
                    let topic = &body[2..2 + topic_len];
                    let pkid = &body[2 + topic_len..4 + topic_len];
                    topics.push(String::from_utf8(topic.to_vec()).unwrap());
                    stream
                        .write_all(&[0x40, 0x02, pkid[0], pkid[1]])
                        .await
                        .unwrap();
                }
                14 => return topics,
                _ => {}
            }
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = MqttConfig::new("broker.local");
        assert_eq!(config.port, 8883);
        assert_eq!(config.username, "mqttmasteruser");
        assert!(config.tls);
        assert!(!config.insecure().tls);
    }

    #[test]
    fn test_downlink_topic() {
        let dest = Destination::new("gw1").sink("sink0").node(21);
        assert_eq!(downlink_topic(&dest), "gw-request/send_data/gw1/sink0/21/77/66");
    }

    #[test]
    fn test_uplink_topic_filter() {
        assert_eq!(
            uplink_topic_filter(Some("gw1"), Some("sink0")),
            "gw-event/received_data/gw1/sink0/+/66/77"
        );
        assert_eq!(
            uplink_topic_filter(None, None),
            "gw-event/received_data/+/+/+/66/77"
        );
    }

    #[test]
    fn test_parse_uplink_topic() {
        let source = parse_uplink_topic("gw-event/received_data/gw1/sink0/21/66/77").unwrap();
        assert_eq!(source, Destination::new("gw1").sink("sink0").node(21));

        assert!(parse_uplink_topic("gw-event/received_data/gw1/sink0/21/77/66").is_none());
        assert!(parse_uplink_topic("gw-event/received_data/gw1/sink0/x/66/77").is_none());
        assert!(parse_uplink_topic("gw-request/send_data/gw1/sink0/21/66/77").is_none());
    }

    #[test]
    fn test_publish_acks_pairing() {
        let mut acks = PublishAcks::default();
        let (first_tx, mut first) = oneshot::channel();
        let (second_tx, mut second) = oneshot::channel();
        acks.queued.push_back(first_tx);
        acks.queued.push_back(second_tx);

        acks.on_outgoing(7);
        acks.on_outgoing(8);
        acks.on_puback(8);
        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv(), Ok(()));

        // Unknown packet ids and replays without a waiter are ignored.
        acks.on_puback(99);
        acks.on_outgoing(9);

        acks.clear();
        assert_eq!(first.try_recv(), Err(oneshot::error::TryRecvError::Closed));
    }

    #[tokio::test]
    async fn test_send_times_out_without_broker() {
        let config = MqttConfig::new("127.0.0.1")
            .port(1)
            .insecure()
            .send_timeout(Duration::from_millis(200));
        let mut transport = MqttTransport::new(config);
        transport.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!transport.is_connected());

        let result = transport
            .send(&Destination::new("gw"), Bytes::from_static(b"x"))
            .await;
        assert!(matches!(
            result,
            Err(Error::TransportTimeout { timeout_ms: 200 })
        ));
        assert!(lock(&transport.acks).queued.is_empty());

        // Nothing to flush, so disconnecting does not wait.
        tokio::time::timeout(DISCONNECT_TIMEOUT / 2, transport.disconnect())
            .await
            .unwrap()
            .unwrap();
        assert!(transport.event_loop.is_none());
    }

    #[tokio::test]
    async fn test_send_completes_on_broker_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(loopback_broker(listener));

        let config = MqttConfig::new("127.0.0.1")
            .port(port)
            .insecure()
            .send_timeout(Duration::from_secs(5));
        let mut transport = MqttTransport::new(config);
        transport.connect().await.unwrap();

        let dest = Destination::new("gw1").node(21);
        transport
            .send(&dest, Bytes::from_static(b"cmd"))
            .await
            .unwrap();
        assert!(transport.is_connected());

        // The broker only returns after reading DISCONNECT.
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        let topics = tokio::time::timeout(Duration::from_secs(2), broker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(topics, vec![downlink_topic(&dest)]);
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let mut transport = MqttTransport::new(MqttConfig::new("localhost").insecure());
        assert!(!transport.is_connected());
        let result = transport
            .send(&Destination::new("gw"), Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(transport.take_uplink().is_some());
    }
}
