//! The `rumqttc`-backed [`MqttClient`].
//!
//! `MqttHandler::connect` performs a single attempt: build a fresh client and
//! event loop, wait for CONNACK, subscribe, then hand the event loop to a
//! background pump. The pump delivers PUBLISH packets to the registered
//! [`MessageHandler`] and keeps the session alive across network drops.
//!
//! ```text
//! connect ──> CONNACK ──> SUBSCRIBE ──> spawn pump
//!                                          │
//!                      PUBLISH ──> handler.handle(topic, payload)
//!                      error   ──> sleep(reconnect_delay) ──> poll again
//!                      fatal error ──> pump exits, session ended
//!                      DISCONNECT sent ──> pump exits
//! ```
//!
//! A pump that exits on its own ends the session; [`MqttClient::closed`]
//! reports it so the controller can connect again.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
    StateError, SubscribeFilter, SubscribeReasonCode,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use validator::Validate;

use super::{
    client::ClientBuilder,
    config::Config,
    error::TransferError,
    traits::{MessageHandler, MqttClient},
    Result,
};

/// Prefix of generated client ids.
const CLIENT_ID_PREFIX: &str = "mqtt-logger-";

/// Longest accepted client id, mirrored by the `client_id` validator.
const MAX_CLIENT_ID_LEN: usize = 36;

/// `mqtt-logger-` followed by UUID hex digits, exactly [`MAX_CLIENT_ID_LEN`] long.
fn generate_client_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    let digits = MAX_CLIENT_ID_LEN - CLIENT_ID_PREFIX.len();
    format!("{}{}", CLIENT_ID_PREFIX, &uuid[..digits])
}

/// An open broker session: the client half plus the task polling the event loop.
struct Session {
    client: AsyncClient,
    pump: JoinHandle<()>,
    /// Cancelled when the pump exits for any reason.
    ended: CancellationToken,
    /// Hard stop for the pump, used when DISCONNECT cannot be flushed in time.
    stop: CancellationToken,
    /// Set before DISCONNECT is sent, so the pump treats the following
    /// connection error as the end of the session instead of reconnecting.
    closing: Arc<AtomicBool>,
}

/// MQTT subscriber that forwards every received message to a handler.
pub struct MqttHandler {
    config: Config,
    handler: Arc<dyn MessageHandler>,
    session: Option<Session>,
}

impl MqttHandler {
    /// Binds the client to its configuration and message handler.
    ///
    /// No network I/O happens here. An empty client id is replaced by a
    /// generated one so every connect attempt presents the same identity.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::ConfigError` if `config` fails validation.
    pub fn new(mut config: Config, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        config.validate()?;
        if config.client_id.is_empty() {
            config.client_id = generate_client_id();
        }

        Ok(Self {
            config,
            handler,
            session: None,
        })
    }

    pub fn topics(&self) -> &[String] {
        &self.config.topics
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn subscribe_filters(&self) -> Vec<SubscribeFilter> {
        let qos = self.config.qos();
        self.config
            .topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), qos))
            .collect()
    }
}

#[async_trait]
impl MqttClient for MqttHandler {
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            warn!("MQTT session already open, ignoring connect");
            return Ok(());
        }

        debug!(
            "Connecting to MQTT broker {}:{} as '{}'",
            self.config.host, self.config.port, self.config.client_id
        );
        let (client, mut event_loop) = ClientBuilder::from_config(&self.config)?.build()?;

        let timeout_secs = self.config.connection_timeout;
        let session_present = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            wait_for_connack(&mut event_loop),
        )
        .await
        .map_err(|_| TransferError::ConnectTimeout(timeout_secs))??;

        let filters = self.subscribe_filters();
        client.subscribe_many(filters.clone()).await?;

        let stop = CancellationToken::new();
        let ended = CancellationToken::new();
        let closing = Arc::new(AtomicBool::new(false));
        let pump = EventPump {
            event_loop,
            client: client.clone(),
            handler: self.handler.clone(),
            filters,
            stop: stop.clone(),
            closing: closing.clone(),
            reconnect_delay: Duration::from_secs(self.config.reconnect_delay),
        };
        let guard = ended.clone().drop_guard();
        let pump = tokio::spawn(async move {
            let _guard = guard;
            pump.run().await;
        });

        info!(
            "Connected to MQTT broker {}:{} (session present: {}), subscribed to: {}",
            self.config.host,
            self.config.port,
            session_present,
            self.config.topics.join(", ")
        );

        self.session = Some(Session {
            client,
            pump,
            ended,
            stop,
            closing,
        });
        Ok(())
    }

    async fn disconnect(&mut self) {
        let Some(Session {
            client,
            mut pump,
            stop,
            closing,
            ..
        }) = self.session.take()
        else {
            debug!("No open MQTT session, nothing to disconnect");
            return;
        };

        closing.store(true, Ordering::Release);
        let deadline = Duration::from_secs(self.config.disconnect_timeout);
        let flushed = tokio::time::timeout(deadline, async {
            if let Err(e) = client.disconnect().await {
                warn!("Error sending disconnect packet: {:?}", e);
                stop.cancel();
            }
            if let Err(e) = (&mut pump).await {
                warn!("MQTT event pump ended abnormally: {}", e);
            }
        })
        .await;

        if flushed.is_err() {
            warn!(
                "DISCONNECT not flushed within {} seconds, stopping event loop",
                self.config.disconnect_timeout
            );
            stop.cancel();
            pump.abort();
        }

        info!("Disconnected from MQTT broker");
    }

    async fn closed(&mut self) {
        let Some(ended) = self.session.as_ref().map(|s| s.ended.clone()) else {
            return;
        };
        ended.cancelled().await;

        if let Some(session) = self.session.take() {
            if let Err(e) = session.pump.await {
                debug!("MQTT event pump ended abnormally: {}", e);
            }
        }
        warn!("MQTT session ended, no longer receiving messages");
    }
}

/// Polls until the broker answers CONNECT.
///
/// Returns the broker's `session_present` flag on success.
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<bool> {
    loop {
        match event_loop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(ack.session_present)
                } else {
                    Err(TransferError::Refused(ack.code))
                };
            }
            event => trace!("Event before CONNACK: {:?}", event),
        }
    }
}

/// Owns the event loop of an open session.
struct EventPump {
    event_loop: EventLoop,
    client: AsyncClient,
    handler: Arc<dyn MessageHandler>,
    filters: Vec<SubscribeFilter>,
    stop: CancellationToken,
    closing: Arc<AtomicBool>,
    reconnect_delay: Duration,
}

impl EventPump {
    async fn run(mut self) {
        debug!("MQTT event pump started");

        loop {
            let polled = tokio::select! {
                _ = self.stop.cancelled() => break,
                polled = self.event_loop.poll() => polled,
            };

            match polled {
                Ok(event) => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(e) => {
                    if self.closing.load(Ordering::Acquire) {
                        debug!("Connection closed during shutdown: {}", get_error_message(&e));
                        break;
                    }
                    if is_fatal_error(&e) {
                        error!(
                            "Fatal MQTT connection error, no longer receiving messages: {}",
                            get_error_message(&e)
                        );
                        break;
                    }

                    warn!(
                        "MQTT connection lost, reconnecting in {} seconds: {}",
                        self.reconnect_delay.as_secs(),
                        get_error_message(&e)
                    );
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        debug!("MQTT event pump stopped");
    }

    /// Returns `false` once the session is over.
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                let payload = String::from_utf8_lossy(&publish.payload);
                self.handler.handle(&publish.topic, &payload);
            }
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!("Reconnected to MQTT broker");
                if !ack.session_present {
                    self.resubscribe();
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                    .count();
                if rejected > 0 {
                    warn!("Broker rejected {} topic filter(s)", rejected);
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                debug!("DISCONNECT sent");
                return false;
            }
            other => trace!("MQTT event: {:?}", other),
        }
        true
    }

    /// The broker kept no session, so the filters have to be sent again.
    fn resubscribe(&self) {
        match self.client.try_subscribe_many(self.filters.clone()) {
            Ok(()) => debug!("Resubscribed to {} topic filter(s)", self.filters.len()),
            Err(e) => warn!("Failed to resubscribe after reconnect: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    // Retrying cannot help
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        ConnectionError::Tls(_) => Fatal,

        // Socket closed or reset by the broker, or a lost ping response
        ConnectionError::MqttState(StateError::Io(_))
        | ConnectionError::MqttState(StateError::AwaitPingResp) => Reconnect,
        ConnectionError::MqttState(_) => Fatal,
        ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    matches!(classify_connection_error(err), Disposition::Fatal)
}

/// Innermost message of an error chain, without surrounding quotes.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Mutex};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    const CONNECT: u8 = 1;
    const SUBSCRIBE: u8 = 8;
    const DISCONNECT: u8 = 14;

    type Received = Arc<Mutex<Vec<(String, String)>>>;

    fn test_config() -> Config {
        Config {
            host: "localhost".to_string(),
            topics: vec!["sensors/#".to_string(), "home/+/temp".to_string()],
            qos: 1,
            ..Default::default()
        }
    }

    fn noop_handler() -> Arc<dyn MessageHandler> {
        Arc::new(|_: &str, _: &str| {})
    }

    fn recording_handler() -> (Arc<dyn MessageHandler>, Received) {
        let received = Received::default();
        let sink = received.clone();
        let handler: Arc<dyn MessageHandler> = Arc::new(move |topic: &str, payload: &str| {
            sink.lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
        });
        (handler, received)
    }

    /// Default client id, one topic, short timeouts.
    fn loopback_config(port: u16) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port,
            topics: vec!["sensors/#".to_string()],
            connection_timeout: 5,
            ..Default::default()
        }
    }

    /// Reads one MQTT packet and returns its fixed header byte and body.
    async fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Skips packets until one of `packet_type` arrives and returns its body.
    async fn expect_packet(stream: &mut TcpStream, packet_type: u8) -> io::Result<Vec<u8>> {
        loop {
            let (header, body) = read_packet(stream).await?;
            if header >> 4 == packet_type {
                return Ok(body);
            }
        }
    }

    /// Accepts one client and answers its CONNECT and single-filter SUBSCRIBE.
    async fn accept_session(listener: &TcpListener) -> io::Result<TcpStream> {
        let (mut stream, _) = listener.accept().await?;
        expect_packet(&mut stream, CONNECT).await?;
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await?;

        let subscribe = expect_packet(&mut stream, SUBSCRIBE).await?;
        stream
            .write_all(&[0x90, 0x03, subscribe[0], subscribe[1], 0x00])
            .await?;
        Ok(stream)
    }

    /// QoS 0 PUBLISH packet.
    fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
        let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload.as_bytes());
        packet
    }

    async fn wait_for_messages(received: &Received, count: usize) {
        let arrived = || received.lock().unwrap().len() >= count;
        tokio::time::timeout(Duration::from_secs(10), async {
            while !arrived() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("messages should reach the handler");
    }

    #[test]
    fn test_new_generates_stable_client_id() {
        let handler = MqttHandler::new(test_config(), noop_handler()).unwrap();
        assert!(handler.client_id().starts_with("mqtt-logger-"));
        assert_eq!(handler.topics().len(), 2);
        assert!(!handler.is_connected());
    }

    #[test]
    fn test_generated_client_id_passes_validation() {
        let handler = MqttHandler::new(test_config(), noop_handler()).unwrap();
        assert_eq!(handler.client_id().len(), MAX_CLIENT_ID_LEN);
        assert!(ClientBuilder::from_config(&handler.config).is_ok());
    }

    #[test]
    fn test_configured_client_id_is_kept() {
        let config = Config {
            client_id: "kitchen-logger".to_string(),
            ..test_config()
        };
        let handler = MqttHandler::new(config, noop_handler()).unwrap();
        assert_eq!(handler.client_id(), "kitchen-logger");
    }

    #[tokio::test]
    async fn test_loopback_receive_and_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let mut stream = accept_session(&listener).await?;
            stream
                .write_all(&publish_packet("sensors/temp", "21.5"))
                .await?;
            expect_packet(&mut stream, DISCONNECT).await?;
            io::Result::Ok(())
        });

        let (handler, received) = recording_handler();
        let mut client = MqttHandler::new(loopback_config(port), handler).unwrap();
        client
            .connect()
            .await
            .expect("connect with a generated client id should succeed");
        assert!(client.is_connected());

        wait_for_messages(&received, 1).await;
        client.disconnect().await;
        assert!(!client.is_connected());

        tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .expect("broker should receive DISCONNECT")
            .unwrap()
            .unwrap();
        assert_eq!(
            received.lock().unwrap()[0],
            ("sensors/temp".to_string(), "21.5".to_string())
        );
    }

    #[tokio::test]
    async fn test_loopback_reconnects_after_broker_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let first = accept_session(&listener).await?;
            drop(first);

            let mut second = accept_session(&listener).await?;
            second
                .write_all(&publish_packet("sensors/temp", "after restart"))
                .await?;
            expect_packet(&mut second, DISCONNECT).await?;
            io::Result::Ok(())
        });

        let (handler, received) = recording_handler();
        let mut client = MqttHandler::new(loopback_config(port), handler).unwrap();
        client.connect().await.unwrap();

        wait_for_messages(&received, 1).await;
        assert!(client.is_connected());
        assert_eq!(received.lock().unwrap()[0].1, "after restart");

        client.disconnect().await;
        tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .expect("broker should receive DISCONNECT on the new connection")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_reports_fatal_session_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let mut stream = accept_session(&listener).await?;
            // Packet type 0 is reserved
            stream.write_all(&[0x00, 0x00]).await?;
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
            io::Result::Ok(())
        });

        let mut client = MqttHandler::new(loopback_config(port), noop_handler()).unwrap();
        client.connect().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), client.closed())
            .await
            .expect("a protocol violation should end the session");
        assert!(!client.is_connected());

        client.disconnect().await;
        broker.abort();
    }

    #[tokio::test]
    async fn test_closed_without_session_returns() {
        let mut client = MqttHandler::new(test_config(), noop_handler()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), client.closed())
            .await
            .expect("closed() should not wait without a session");
    }

    #[test]
    fn test_new_rejects_empty_topics() {
        let config = Config {
            topics: Vec::new(),
            ..test_config()
        };
        assert!(matches!(
            MqttHandler::new(config, noop_handler()),
            Err(TransferError::ConfigError(_))
        ));
    }

    #[test]
    fn test_subscribe_filters_use_configured_qos() {
        let handler = MqttHandler::new(test_config(), noop_handler()).unwrap();
        let filters = handler.subscribe_filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].path, "sensors/#");
        assert!(filters
            .iter()
            .all(|f| f.qos == rumqttc::QoS::AtLeastOnce));
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let mut handler = MqttHandler::new(test_config(), noop_handler()).unwrap();
        handler.disconnect().await;
        handler.disconnect().await;
        assert!(!handler.is_connected());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 1,
            connection_timeout: 2,
            ..test_config()
        };
        let mut handler = MqttHandler::new(config, noop_handler()).unwrap();
        assert!(handler.connect().await.is_err());
        assert!(!handler.is_connected());
    }

    #[tokio::test]
    async fn test_publish_is_forwarded_to_handler() {
        let (handler, received) = recording_handler();

        let (client, event_loop) = ClientBuilder::new("pump_test", "localhost", 1883, 10)
            .build()
            .unwrap();
        let mut pump = EventPump {
            event_loop,
            client,
            handler,
            filters: Vec::new(),
            stop: CancellationToken::new(),
            closing: Arc::new(AtomicBool::new(false)),
            reconnect_delay: Duration::from_secs(1),
        };

        let publish = rumqttc::Publish::new("sensors/temp", rumqttc::QoS::AtMostOnce, "21.5");
        assert!(pump.handle_event(Event::Incoming(Packet::Publish(publish))));

        let invalid = rumqttc::Publish::new(
            "raw/bytes",
            rumqttc::QoS::AtMostOnce,
            vec![0x66, 0x6f, 0xff],
        );
        assert!(pump.handle_event(Event::Incoming(Packet::Publish(invalid))));

        assert!(!pump.handle_event(Event::Outgoing(Outgoing::Disconnect)));

        let received = received.lock().unwrap();
        assert_eq!(
            received[0],
            ("sensors/temp".to_string(), "21.5".to_string())
        );
        assert_eq!(received[1], ("raw/bytes".to_string(), "fo\u{fffd}".to_string()));
    }

    #[test]
    fn test_is_fatal_error_detection() {
        let refused = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(!is_fatal_error(&refused));
        assert!(!is_fatal_error(&ConnectionError::NetworkTimeout));

        let permission = ConnectionError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert!(is_fatal_error(&permission));

        assert!(is_fatal_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword
        )));
        assert!(!is_fatal_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable
        )));
    }

    #[test]
    fn test_broker_side_drops_are_transient() {
        let closed_by_peer = ConnectionError::MqttState(StateError::Io(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "connection closed by peer",
        )));
        assert!(!is_fatal_error(&closed_by_peer));
        assert!(!is_fatal_error(&ConnectionError::MqttState(
            StateError::AwaitPingResp
        )));

        let reset = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert!(!is_fatal_error(&reset));

        assert!(is_fatal_error(&ConnectionError::MqttState(
            StateError::Unsolicited(7)
        )));
    }

    #[test]
    fn test_get_error_message_walks_chain() {
        let err = ConnectionError::Io(io::Error::new(io::ErrorKind::Other, "root cause"));
        assert!(get_error_message(&err).contains("root cause"));
    }
}
