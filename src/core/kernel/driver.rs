use crate::core::config::StreamConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{DomainEvent, ExchangeAdapter, Heartbeat};
use crate::core::kernel::orderbook::{BookStatus, OrderBookSync, SyncStats, UpdateOutcome};
use crate::core::kernel::registry::SubscriptionRegistry;
use crate::core::kernel::throttle::SubscribeThrottle;
use crate::core::kernel::watchdog::Watchdog;
use crate::core::kernel::ws::{ResilientWs, TungsteniteWs, WsSession};
use crate::core::traits::MarketFeed;
use crate::core::types::{
    Capabilities, ConnectionState, FeedKind, Level2Update, Level3Update, Market, StreamEvent,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

enum Command {
    Subscribe {
        feed: FeedKind,
        market: Market,
    },
    Unsubscribe {
        feed: FeedKind,
        market: Market,
    },
    Reconnect,
    Resync {
        feed: FeedKind,
        market: Market,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Subscriptions {
        feed: FeedKind,
        reply: oneshot::Sender<Vec<Market>>,
    },
    BookStatus {
        feed: FeedKind,
        market_id: String,
        reply: oneshot::Sender<BookStatus>,
    },
    BookStats {
        family: BookFamily,
        reply: oneshot::Sender<SyncStats>,
    },
}

/// Sequenced book engine behind a feed kind
///
/// Only update streams keep sequence state. The level2 snapshot feed is a
/// series of self-contained books and never touches the level2 engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookFamily {
    Level2,
    Level3,
}

impl BookFamily {
    const fn of(feed: FeedKind) -> Option<Self> {
        match feed {
            FeedKind::Level2Updates => Some(Self::Level2),
            FeedKind::Level3Updates => Some(Self::Level3),
            FeedKind::Ticker | FeedKind::Trades | FeedKind::Level2Snapshots => None,
        }
    }
}

/// Cheap, cloneable handle to one connection driver.
///
/// Every call is forwarded to the driver task over an unbounded channel, so
/// calls made from one handle are applied in the order they were made. The
/// driver stops once the last handle is dropped.
#[derive(Clone)]
pub struct ClientHandle {
    name: Arc<str>,
    capabilities: Capabilities,
    commands: mpsc::UnboundedSender<Command>,
}

impl ClientHandle {
    /// Spawn a driver for `adapter` over `session`
    ///
    /// Returns the handle and the receiving end of the event stream. Nothing
    /// connects until the first subscribe.
    pub fn spawn<A, S>(
        adapter: A,
        session: S,
        config: StreamConfig,
    ) -> (Self, mpsc::Receiver<StreamEvent>)
    where
        A: ExchangeAdapter,
        S: WsSession + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer_size.max(1));
        let source = adapter.name().to_string();
        let handle = Self::spawn_with_sink(adapter, session, config, source, events_tx);
        (handle, events_rx)
    }

    /// Spawn a driver publishing into an existing event channel
    ///
    /// `source` tags the connection's lifecycle signals.
    pub fn spawn_with_sink<A, S>(
        adapter: A,
        session: S,
        config: StreamConfig,
        source: String,
        events: mpsc::Sender<StreamEvent>,
    ) -> Self
    where
        A: ExchangeAdapter,
        S: WsSession + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = Self {
            name: Arc::from(adapter.name()),
            capabilities: adapter.capabilities(),
            commands: commands_tx,
        };
        let driver = ConnectionDriver::new(adapter, session, config, source, events, commands_rx);
        tokio::spawn(driver.run());
        handle
    }

    fn send(&self, command: Command) -> Result<(), ExchangeError> {
        self.commands
            .send(command)
            .map_err(|_| ExchangeError::ChannelClosed)
    }

    fn check_supported(&self, feed: FeedKind) -> Result<(), ExchangeError> {
        if self.capabilities.supports(feed) {
            Ok(())
        } else {
            Err(ExchangeError::not_supported(&self.name, feed))
        }
    }

    /// Markets currently registered for `feed`, in insertion order
    pub async fn subscriptions(&self, feed: FeedKind) -> Result<Vec<Market>, ExchangeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscriptions { feed, reply })?;
        rx.await.map_err(|_| ExchangeError::ChannelClosed)
    }

    pub async fn book_status(
        &self,
        feed: FeedKind,
        market_id: &str,
    ) -> Result<BookStatus, ExchangeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::BookStatus {
            feed,
            market_id: market_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| ExchangeError::ChannelClosed)
    }

    /// Counters of the book engine behind `feed`, summed over its markets
    pub async fn book_stats(&self, feed: FeedKind) -> Result<SyncStats, ExchangeError> {
        let family = BookFamily::of(feed).ok_or_else(|| {
            ExchangeError::InvalidParameters(format!("{} keeps no book statistics", feed))
        })?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::BookStats { family, reply })?;
        rx.await.map_err(|_| ExchangeError::ChannelClosed)
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

#[async_trait]
impl MarketFeed for ClientHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn subscribe(&self, feed: FeedKind, market: &Market) -> Result<(), ExchangeError> {
        self.check_supported(feed)?;
        self.send(Command::Subscribe {
            feed,
            market: market.clone(),
        })
    }

    fn unsubscribe(&self, feed: FeedKind, market: &Market) -> Result<(), ExchangeError> {
        self.check_supported(feed)?;
        self.send(Command::Unsubscribe {
            feed,
            market: market.clone(),
        })
    }

    fn reconnect(&self) -> Result<(), ExchangeError> {
        self.send(Command::Reconnect)
    }

    fn request_resync(&self, feed: FeedKind, market: &Market) -> Result<(), ExchangeError> {
        self.check_supported(feed)?;
        if BookFamily::of(feed).is_none() {
            return Err(ExchangeError::InvalidParameters(format!(
                "{} has no sequenced book to resync",
                feed
            )));
        }
        self.send(Command::Resync {
            feed,
            market: market.clone(),
        })
    }

    async fn close(&self) -> Result<(), ExchangeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Close { reply })?;
        rx.await.map_err(|_| ExchangeError::ChannelClosed)
    }
}

/// Spawn a driver for `adapter` over a real WebSocket at `url`
pub fn connect_exchange<A: ExchangeAdapter>(
    adapter: A,
    url: &str,
    config: StreamConfig,
) -> (ClientHandle, mpsc::Receiver<StreamEvent>) {
    let session =
        TungsteniteWs::new(url, adapter.name()).with_connect_timeout(config.connect_timeout());
    ClientHandle::spawn(adapter, session, config)
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Generic client core for one connection.
///
/// Owns the transport, the registry, both book engines and all timers, and
/// runs on a single task so inbound frames and commands are handled strictly
/// one at a time.
struct ConnectionDriver<A: ExchangeAdapter, S: WsSession> {
    adapter: A,
    transport: ResilientWs<S>,
    registry: SubscriptionRegistry,
    level2: OrderBookSync<Level2Update>,
    level3: OrderBookSync<Level3Update>,
    watchdog: Watchdog,
    throttle: SubscribeThrottle,
    heartbeat: Option<Heartbeat>,
    heartbeat_at: Option<Instant>,
    config: StreamConfig,
    source: String,
    events: mpsc::Sender<StreamEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<A: ExchangeAdapter, S: WsSession> ConnectionDriver<A, S> {
    fn new(
        adapter: A,
        session: S,
        config: StreamConfig,
        source: String,
        events: mpsc::Sender<StreamEvent>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let idle = adapter.idle_timeout().unwrap_or_else(|| config.watchdog_idle());
        let heartbeat = adapter.heartbeat();
        Self {
            transport: ResilientWs::new(session, source.clone(), &config, events.clone()),
            registry: SubscriptionRegistry::new(),
            level2: OrderBookSync::new(config.pending_buffer_size),
            level3: OrderBookSync::new(config.pending_buffer_size),
            watchdog: Watchdog::new(idle),
            throttle: SubscribeThrottle::new(config.subscribe_permits, config.subscribe_throttle()),
            heartbeat,
            heartbeat_at: None,
            adapter,
            config,
            source,
            events,
            commands,
        }
    }

    async fn run(mut self) {
        debug!(source = %self.source, "Driver started");
        loop {
            let connected = self.transport.is_connected();
            let watchdog_at = self.watchdog.deadline();
            let reconnect_at = self.transport.reconnect_deadline();
            let heartbeat_at = self.heartbeat_at;

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.shutdown().await;
                        break;
                    };
                    self.handle_command(command).await;
                }
                frame = self.transport.next_raw(), if connected => {
                    if let Some(frame) = frame {
                        self.handle_frame(frame).await;
                    }
                }
                () = sleep_until_opt(watchdog_at), if watchdog_at.is_some() => {
                    if self.watchdog.take_expired() {
                        warn!(
                            source = %self.source,
                            idle_ms = self.watchdog.idle().as_millis() as u64,
                            "No data within idle window, recycling connection"
                        );
                        self.reconnect().await;
                    }
                }
                () = sleep_until_opt(reconnect_at), if reconnect_at.is_some() => {
                    self.reconnect().await;
                }
                () = sleep_until_opt(heartbeat_at), if heartbeat_at.is_some() => {
                    self.send_heartbeat().await;
                }
            }

            if !self.transport.is_connected() {
                self.watchdog.stop();
                self.heartbeat_at = None;
            }
        }
        debug!(source = %self.source, "Driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe { feed, market } => self.subscribe(feed, market).await,
            Command::Unsubscribe { feed, market } => self.unsubscribe(feed, &market).await,
            Command::Reconnect => self.reconnect().await,
            Command::Resync { feed, market } => {
                info!(source = %self.source, %feed, market_id = %market.id, "Resync requested");
                self.mark_out_of_sync(feed, &market.id);
                self.send_resync(feed, &market.id).await;
            }
            Command::Close { reply } => {
                self.close().await;
                let _ = reply.send(());
            }
            Command::Subscriptions { feed, reply } => {
                let _ = reply.send(self.registry.markets(feed));
            }
            Command::BookStatus {
                feed,
                market_id,
                reply,
            } => {
                let status = match BookFamily::of(feed) {
                    Some(BookFamily::Level2) => self.level2.status(&market_id),
                    Some(BookFamily::Level3) => self.level3.status(&market_id),
                    None => BookStatus::Uninitialized,
                };
                let _ = reply.send(status);
            }
            Command::BookStats { family, reply } => {
                let stats = match family {
                    BookFamily::Level2 => self.level2.stats(),
                    BookFamily::Level3 => self.level3.stats(),
                };
                let _ = reply.send(stats);
            }
        }
    }

    async fn subscribe(&mut self, feed: FeedKind, market: Market) {
        if !self.registry.insert(feed, market.clone()) {
            debug!(source = %self.source, %feed, market_id = %market.id, "Already subscribed");
            return;
        }

        if self.transport.is_connected() {
            self.send_subscribe(feed, std::slice::from_ref(&market)).await;
        } else if self.transport.state() == ConnectionState::Disconnected
            && self.transport.reconnect_deadline().is_none()
        {
            // Idle or closed: the post-connect replay sends it
            self.connect().await;
        }
    }

    async fn unsubscribe(&mut self, feed: FeedKind, market: &Market) {
        if self.registry.remove(feed, &market.id).is_none() {
            return;
        }

        match BookFamily::of(feed) {
            Some(BookFamily::Level2) => self.level2.remove(&market.id),
            Some(BookFamily::Level3) => self.level3.remove(&market.id),
            None => {}
        }

        if !self.transport.is_connected() {
            return;
        }
        match self
            .adapter
            .encode_unsubscribe(feed, std::slice::from_ref(market))
        {
            Ok(Some(message)) => self.transport.send(message).await,
            Ok(None) => {}
            Err(e) => warn!(source = %self.source, "Failed to encode unsubscribe: {}", e),
        }
    }

    async fn connect(&mut self) {
        if self.transport.connect().await {
            self.on_connected().await;
        }
    }

    async fn reconnect(&mut self) {
        self.watchdog.stop();
        self.heartbeat_at = None;
        if self.transport.reconnect().await {
            self.on_connected().await;
        }
    }

    async fn close(&mut self) {
        self.watchdog.stop();
        self.heartbeat_at = None;
        self.transport.close().await;
        self.registry.clear();
        self.level2.clear();
        self.level3.clear();
        info!(source = %self.source, "Client closed");
    }

    async fn shutdown(&mut self) {
        if self.transport.state() != ConnectionState::Disconnected
            || self.transport.reconnect_deadline().is_some()
        {
            self.close().await;
        }
    }

    async fn on_connected(&mut self) {
        self.adapter.on_connected();
        self.throttle =
            SubscribeThrottle::new(self.config.subscribe_permits, self.config.subscribe_throttle());
        self.level2.clear();
        self.level3.clear();
        self.watchdog.start();
        self.heartbeat_at = self
            .heartbeat
            .as_ref()
            .map(|heartbeat| Instant::now() + heartbeat.interval);
        self.replay().await;
    }

    /// Resend every registered subscription in the fixed feed order
    async fn replay(&mut self) {
        let batch = self.adapter.capabilities().supports_batch_subscribe;
        for feed in FeedKind::ALL {
            let markets = self.registry.markets(feed);
            if markets.is_empty() {
                continue;
            }
            debug!(source = %self.source, %feed, count = markets.len(), "Replaying subscriptions");
            if batch {
                self.send_subscribe(feed, &markets).await;
            } else {
                for market in &markets {
                    self.send_subscribe(feed, std::slice::from_ref(market)).await;
                }
            }
            if !self.transport.is_connected() {
                // Lost mid-replay; the next connect starts over
                return;
            }
        }
    }

    async fn send_subscribe(&mut self, feed: FeedKind, markets: &[Market]) {
        self.throttle.acquire().await;
        match self.adapter.encode_subscribe(feed, markets) {
            Ok(message) => self.transport.send(message).await,
            Err(e) => warn!(source = %self.source, %feed, "Failed to encode subscribe: {}", e),
        }
    }

    async fn send_resync(&mut self, feed: FeedKind, market_id: &str) {
        let Some(market) = self.registry.get(feed, market_id).cloned() else {
            debug!(source = %self.source, market_id, "Resync for unregistered market ignored");
            return;
        };
        if !self.transport.is_connected() {
            // The next connect resets every book anyway
            return;
        }

        self.throttle.acquire().await;
        match self.adapter.encode_resync(feed, &market) {
            Ok(messages) => {
                for message in messages {
                    self.transport.send(message).await;
                }
            }
            Err(e) => warn!(source = %self.source, %feed, "Failed to encode resync: {}", e),
        }
    }

    async fn send_heartbeat(&mut self) {
        let Some(heartbeat) = self.heartbeat.as_ref() else {
            self.heartbeat_at = None;
            return;
        };
        let message = heartbeat.message.clone();
        self.heartbeat_at = Some(Instant::now() + heartbeat.interval);
        self.transport.send(message).await;
    }

    async fn handle_frame(&mut self, frame: Message) {
        self.watchdog.touch();
        if matches!(frame, Message::Ping(_) | Message::Pong(_)) {
            return;
        }
        let events = match self.adapter.decode(frame, &self.registry) {
            Ok(events) => events,
            Err(e) => {
                warn!(source = %self.source, "Dropping undecodable message: {}", e);
                return;
            }
        };
        for event in events {
            self.dispatch(event).await;
        }
    }

    async fn dispatch(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::Ticker(ticker) => self.emit(StreamEvent::Ticker(ticker)).await,
            DomainEvent::Trade(trade) => self.emit(StreamEvent::Trade(trade)).await,
            DomainEvent::Level2Snapshot(snapshot) => {
                let market_id = snapshot.market_id.clone();
                let drained = self
                    .level2
                    .apply_snapshot(&market_id, snapshot.sequence_id);
                self.emit(StreamEvent::L2Snapshot(snapshot)).await;
                for outcome in drained {
                    self.on_outcome(FeedKind::Level2Updates, &market_id, outcome, StreamEvent::L2Update)
                        .await;
                }
            }
            DomainEvent::Level2Depth(snapshot) => {
                self.emit(StreamEvent::L2Snapshot(snapshot)).await;
            }
            DomainEvent::Level2Update(update) => {
                let market_id = update.market_id.clone();
                let outcome = self.level2.apply_update(&market_id, update);
                self.on_outcome(FeedKind::Level2Updates, &market_id, outcome, StreamEvent::L2Update)
                    .await;
            }
            DomainEvent::Level3Snapshot(snapshot) => {
                let market_id = snapshot.market_id.clone();
                let drained = self
                    .level3
                    .apply_snapshot(&market_id, snapshot.sequence_id);
                self.emit(StreamEvent::L3Snapshot(snapshot)).await;
                for outcome in drained {
                    self.on_outcome(FeedKind::Level3Updates, &market_id, outcome, StreamEvent::L3Update)
                        .await;
                }
            }
            DomainEvent::Level3Update(update) => {
                let market_id = update.market_id.clone();
                let outcome = self.level3.apply_update(&market_id, update);
                self.on_outcome(FeedKind::Level3Updates, &market_id, outcome, StreamEvent::L3Update)
                    .await;
            }
            DomainEvent::SubscriptionRejected {
                feed,
                market_id,
                reason,
            } => {
                warn!(source = %self.source, ?feed, ?market_id, "Subscription rejected: {}", reason);
                self.emit(StreamEvent::SubscriptionRejected {
                    source: self.source.clone(),
                    feed,
                    market_id,
                    reason,
                })
                .await;
            }
            DomainEvent::ResyncRequired {
                feed,
                market_id,
                reason,
            } => {
                warn!(source = %self.source, %feed, %market_id, "Book needs resync: {}", reason);
                self.mark_out_of_sync(feed, &market_id);
                self.emit(StreamEvent::BookOutOfSync {
                    source: self.source.clone(),
                    feed,
                    market_id: market_id.clone(),
                    expected: None,
                    received: None,
                })
                .await;
                self.send_resync(feed, &market_id).await;
            }
            DomainEvent::Ignored => {}
        }
    }

    async fn on_outcome<U>(
        &mut self,
        feed: FeedKind,
        market_id: &str,
        outcome: UpdateOutcome<U>,
        wrap: fn(U) -> StreamEvent,
    ) {
        match outcome {
            UpdateOutcome::Applied(update) => self.emit(wrap(update)).await,
            UpdateOutcome::Pending | UpdateOutcome::Suppressed => {}
            UpdateOutcome::Gap { expected, received } => {
                self.emit(StreamEvent::BookOutOfSync {
                    source: self.source.clone(),
                    feed,
                    market_id: market_id.to_string(),
                    expected: Some(expected),
                    received: Some(received),
                })
                .await;
                self.send_resync(feed, market_id).await;
            }
        }
    }

    fn mark_out_of_sync(&mut self, feed: FeedKind, market_id: &str) {
        match BookFamily::of(feed) {
            Some(BookFamily::Level2) => self.level2.mark_out_of_sync(market_id),
            Some(BookFamily::Level3) => self.level3.mark_out_of_sync(market_id),
            None => {}
        }
    }

    async fn emit(&mut self, event: StreamEvent) {
        if self.events.send(event).await.is_err() {
            debug!(source = %self.source, "Event receiver dropped");
        }
    }
}
