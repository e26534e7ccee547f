use crate::core::config::StreamConfig;
use crate::core::errors::ExchangeError;
use crate::core::types::{ConnectionSignal, ConnectionState, StreamEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, instrument, warn};

/// WebSocket session trait - pure transport layer
///
/// A session knows nothing about subscriptions or exchanges; it moves raw
/// frames. Reconnection policy lives in [`ResilientWs`].
#[async_trait]
pub trait WsSession: Send {
    /// Open the underlying socket
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    /// Send a raw message
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError>;

    /// Receive the next frame
    ///
    /// Pings and pongs are returned as well so callers can count them as
    /// activity. `None` means the peer closed the stream.
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), ExchangeError>;

    fn is_connected(&self) -> bool;
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Tungstenite-based WebSocket session
pub struct TungsteniteWs {
    url: String,
    exchange_name: String,
    connect_timeout: Duration,
    write: Option<futures_util::stream::SplitSink<WsStream, Message>>,
    read: Option<futures_util::stream::SplitStream<WsStream>>,
    connected: bool,
    connection_stats: ConnectionStats,
}

/// Per-socket traffic counters, logged when the socket closes
#[derive(Debug, Default, Clone)]
struct ConnectionStats {
    messages_sent: u64,
    messages_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    connection_count: u32,
}

impl ConnectionStats {
    fn record_received(&mut self, msg: &Message) {
        self.messages_received += 1;
        self.bytes_received += msg.len() as u64;
    }

    fn record_sent(&mut self, msg: &Message) {
        self.messages_sent += 1;
        self.bytes_sent += msg.len() as u64;
    }
}

impl TungsteniteWs {
    /// Create a new WebSocket session
    ///
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to
    /// * `exchange_name` - Name of the exchange for logging/tracing
    pub fn new(url: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange_name: exchange_name.into(),
            connect_timeout: Duration::from_secs(10),
            write: None,
            read: None,
            connected: false,
            connection_stats: ConnectionStats::default(),
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn drop_streams(&mut self) {
        self.connected = false;
        self.write = None;
        self.read = None;
    }
}

#[async_trait]
impl WsSession for TungsteniteWs {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let connection_future = tokio::time::timeout(self.connect_timeout, connect_async(&self.url));

        let (ws_stream, _) = connection_future
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;
        self.connection_stats.connection_count += 1;

        Ok(())
    }

    #[instrument(skip(self, msg), fields(exchange = %self.exchange_name))]
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.connected {
            return Err(ExchangeError::NetworkError(
                "WebSocket not connected".to_string(),
            ));
        }

        let write = self.write.as_mut().ok_or_else(|| {
            ExchangeError::NetworkError("WebSocket write stream not available".to_string())
        })?;

        self.connection_stats.record_sent(&msg);
        if let Err(e) = write.send(msg).await {
            self.drop_streams();
            return Err(ExchangeError::NetworkError(format!(
                "Failed to send WebSocket message: {}",
                e
            )));
        }

        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            let read = self.read.as_mut()?;

            match read.next().await {
                Some(Ok(message)) => {
                    self.connection_stats.record_received(&message);
                    match message {
                        Message::Close(frame) => {
                            debug!(exchange = %self.exchange_name, ?frame, "Close frame received");
                            self.drop_streams();
                            return None;
                        }
                        Message::Ping(data) => {
                            if let Err(e) = self.send_raw(Message::Pong(data.clone())).await {
                                warn!("Failed to send pong response: {}", e);
                                return Some(Err(e));
                            }
                            return Some(Ok(Message::Ping(data)));
                        }
                        Message::Frame(_) => {}
                        _ => return Some(Ok(message)),
                    }
                }
                Some(Err(e)) => {
                    self.drop_streams();
                    return Some(Err(ExchangeError::NetworkError(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.drop_streams();
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn close(&mut self) -> Result<(), ExchangeError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.drop_streams();
        let stats = &self.connection_stats;
        debug!(
            connections = stats.connection_count,
            messages_sent = stats.messages_sent,
            messages_received = stats.messages_received,
            bytes_sent = stats.bytes_sent,
            bytes_received = stats.bytes_received,
            "WebSocket closed"
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Resilient transport around a [`WsSession`].
///
/// Owns the [`ConnectionState`] and publishes every lifecycle transition as
/// a [`StreamEvent::Connection`]. It never sleeps itself: a lost connection
/// only records a reconnect deadline, and the owning driver calls
/// [`ResilientWs::reconnect`] once that deadline passes. This keeps all
/// waiting inside the driver's select loop, where `close` can cancel it.
pub struct ResilientWs<S: WsSession> {
    inner: S,
    source: String,
    state: ConnectionState,
    events: mpsc::Sender<StreamEvent>,
    base_delay: Duration,
    max_delay: Duration,
    failures: u32,
    reconnect_at: Option<Instant>,
    user_closed: bool,
}

impl<S: WsSession> ResilientWs<S> {
    pub fn new(
        inner: S,
        source: impl Into<String>,
        config: &StreamConfig,
        events: mpsc::Sender<StreamEvent>,
    ) -> Self {
        Self {
            inner,
            source: source.into(),
            state: ConnectionState::Disconnected,
            events,
            base_delay: config.reconnect_delay(),
            max_delay: config.max_reconnect_delay(),
            failures: 0,
            reconnect_at: None,
            user_closed: false,
        }
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.inner.is_connected()
    }

    /// When the pending automatic reconnect fires, if one is scheduled
    pub const fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Open the connection. No-op while connecting or connected.
    ///
    /// Clears a previous `close`, so auto-reconnect is enabled again.
    /// Returns whether the connection is now up.
    pub async fn connect(&mut self) -> bool {
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return self.is_connected();
        }
        self.user_closed = false;
        self.reconnect_at = None;
        self.open().await
    }

    /// Recycle the connection: `reconnecting`, `closing`, `closed`,
    /// `connecting`, `connected`.
    pub async fn reconnect(&mut self) -> bool {
        self.reconnect_at = None;
        self.user_closed = false;
        self.state = ConnectionState::Reconnecting;
        self.emit(ConnectionSignal::Reconnecting).await;
        self.teardown().await;
        self.open().await
    }

    /// Tear down and disable auto-reconnect until the next `connect`.
    pub async fn close(&mut self) {
        self.user_closed = true;
        self.reconnect_at = None;
        self.failures = 0;
        self.teardown().await;
        self.state = ConnectionState::Disconnected;
    }

    /// Send a frame; dropped when not connected.
    ///
    /// A failed write counts as a lost connection.
    pub async fn send(&mut self, msg: Message) {
        if !self.is_connected() {
            debug!(source = %self.source, "Dropping outbound message while not connected");
            return;
        }
        if let Err(e) = self.inner.send_raw(msg).await {
            warn!(source = %self.source, "Send failed: {}", e);
            self.on_disconnected().await;
        }
    }

    /// Next inbound frame, keepalives included; `None` once the connection
    /// is gone.
    ///
    /// Socket errors and peer closes are turned into a `disconnected`
    /// signal plus a scheduled reconnect.
    pub async fn next_raw(&mut self) -> Option<Message> {
        if !self.is_connected() {
            return None;
        }
        match self.inner.next_raw().await {
            Some(Ok(msg)) => Some(msg),
            Some(Err(e)) => {
                warn!(source = %self.source, "Connection error: {}", e);
                self.on_disconnected().await;
                None
            }
            None => {
                info!(source = %self.source, "Connection closed by peer");
                self.on_disconnected().await;
                None
            }
        }
    }

    async fn open(&mut self) -> bool {
        self.state = ConnectionState::Connecting;
        self.emit(ConnectionSignal::Connecting).await;

        match self.inner.connect().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                self.failures = 0;
                info!(source = %self.source, "Connected");
                self.emit(ConnectionSignal::Connected).await;
                true
            }
            Err(e) => {
                warn!(source = %self.source, "Connect failed: {}", e);
                self.on_disconnected().await;
                false
            }
        }
    }

    async fn teardown(&mut self) {
        self.state = ConnectionState::Closing;
        self.emit(ConnectionSignal::Closing).await;
        if let Err(e) = self.inner.close().await {
            debug!(source = %self.source, "Error while closing socket: {}", e);
        }
        self.emit(ConnectionSignal::Closed).await;
    }

    async fn on_disconnected(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnected;
        // Reconnect deadline is set before the signal goes out
        if !self.user_closed {
            let delay = self.backoff();
            self.failures = self.failures.saturating_add(1);
            self.reconnect_at = Some(Instant::now() + delay);
            info!(source = %self.source, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        }
        self.emit(ConnectionSignal::Disconnected).await;
    }

    /// Delay for the next attempt, doubling per consecutive failure.
    pub fn backoff(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.failures.min(16));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    async fn emit(&mut self, signal: ConnectionSignal) {
        let event = StreamEvent::Connection {
            source: self.source.clone(),
            signal,
        };
        if self.events.send(event).await.is_err() {
            debug!(source = %self.source, "Event receiver dropped");
        }
    }
}
