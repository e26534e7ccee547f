use crate::core::errors::ExchangeError;
use crate::core::kernel::registry::SubscriptionRegistry;
use crate::core::types::{
    Capabilities, FeedKind, Level2Snapshot, Level2Update, Level3Snapshot, Level3Update, Market,
    Ticker, Trade,
};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// Normalized result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    Ticker(Ticker),
    Trade(Trade),
    /// Snapshot that (re)starts a market's level2 update stream
    Level2Snapshot(Level2Snapshot),
    Level2Update(Level2Update),
    /// Self-contained book from a snapshot-only feed; carries no update
    /// stream state
    Level2Depth(Level2Snapshot),
    Level3Snapshot(Level3Snapshot),
    Level3Update(Level3Update),
    /// The exchange refused a subscribe request
    SubscriptionRejected {
        feed: Option<FeedKind>,
        market_id: Option<String>,
        reason: String,
    },
    /// The adapter found the book unusable and wants a fresh snapshot
    ResyncRequired {
        feed: FeedKind,
        market_id: String,
        reason: String,
    },
    /// Acks, heartbeats and anything else with no consumer value
    Ignored,
}

/// Application-level keepalive some exchanges require on top of WebSocket pings.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub interval: Duration,
    pub message: Message,
}

/// Exchange adapter: the only exchange-specific piece a driver needs.
///
/// An adapter turns subscribe/unsubscribe intents into wire messages and
/// raw frames into [`DomainEvent`]s. It is owned by exactly one driver and
/// only ever called from that driver's task, so it may keep per-connection
/// state (channel-id maps, request counters) behind `&mut self`.
pub trait ExchangeAdapter: Send + 'static {
    /// Exchange name used in events and logs
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Encode a subscribe request
    ///
    /// `markets` holds exactly one market unless the adapter reports
    /// `supports_batch_subscribe`, in which case the driver may pass every
    /// registered market of `feed` at once.
    fn encode_subscribe(&mut self, feed: FeedKind, markets: &[Market])
        -> Result<Message, ExchangeError>;

    /// Encode an unsubscribe request
    ///
    /// Returns `Ok(None)` when the exchange has no way to unsubscribe the
    /// feed (or does not know the channel yet); the registry is still updated.
    fn encode_unsubscribe(
        &mut self,
        feed: FeedKind,
        markets: &[Market],
    ) -> Result<Option<Message>, ExchangeError>;

    /// Decode a raw frame
    ///
    /// `subscriptions` is the driver's registry so market ids on the wire can
    /// be resolved to registered markets. An `Err` drops this frame only.
    fn decode(
        &mut self,
        message: Message,
        subscriptions: &SubscriptionRegistry,
    ) -> Result<Vec<DomainEvent>, ExchangeError>;

    /// Messages that make the exchange send a fresh book snapshot
    ///
    /// Defaults to an unsubscribe followed by a subscribe on the same feed.
    fn encode_resync(
        &mut self,
        feed: FeedKind,
        market: &Market,
    ) -> Result<Vec<Message>, ExchangeError> {
        let markets = std::slice::from_ref(market);
        let mut messages = Vec::with_capacity(2);
        if let Some(unsubscribe) = self.encode_unsubscribe(feed, markets)? {
            messages.push(unsubscribe);
        }
        messages.push(self.encode_subscribe(feed, markets)?);
        Ok(messages)
    }

    /// Called after every successful connect, before the replay
    fn on_connected(&mut self) {}

    fn heartbeat(&self) -> Option<Heartbeat> {
        None
    }

    /// Idle window that suits this exchange, overriding the configured one
    fn idle_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Extract the text payload of a data frame.
///
/// Returns `Ok(None)` for frames with no payload worth decoding.
pub fn frame_text(message: Message) -> Result<Option<String>, ExchangeError> {
    match message {
        Message::Text(text) => Ok(Some(text)),
        Message::Binary(data) => String::from_utf8(data).map(Some).map_err(|e| {
            ExchangeError::DeserializationError(format!("Invalid UTF-8 in binary message: {}", e))
        }),
        _ => Ok(None),
    }
}
