use serde::{Deserialize, Serialize};
use std::fmt;

/// A market as one exchange names it, plus the normalized symbols.
///
/// `id` is the exchange's own identifier (e.g. `BTCUSD`, `XBT/USD`,
/// `BTC-USDT`) and is the identity key inside a subscription map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub base: String,
    pub quote: String,
}

impl Market {
    pub fn new(id: impl Into<String>, base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.base, self.quote, self.id)
    }
}

/// The kinds of feed a connection can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Ticker,
    Trades,
    Level2Snapshots,
    Level2Updates,
    Level3Updates,
}

impl FeedKind {
    /// Replay order used after every (re)connect.
    pub const ALL: [Self; 5] = [
        Self::Ticker,
        Self::Trades,
        Self::Level2Snapshots,
        Self::Level2Updates,
        Self::Level3Updates,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trades => "trades",
            Self::Level2Snapshots => "level2-snapshot",
            Self::Level2Updates => "level2-update",
            Self::Level3Updates => "level3-update",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an adapter can do. Checked before any subscribe call is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub has_tickers: bool,
    pub has_trades: bool,
    pub has_level2_snapshots: bool,
    pub has_level2_updates: bool,
    pub has_level3_updates: bool,
    /// One wire message can carry many markets for the same feed
    pub supports_batch_subscribe: bool,
}

impl Capabilities {
    pub const fn supports(&self, feed: FeedKind) -> bool {
        match feed {
            FeedKind::Ticker => self.has_tickers,
            FeedKind::Trades => self.has_trades,
            FeedKind::Level2Snapshots => self.has_level2_snapshots,
            FeedKind::Level2Updates => self.has_level2_updates,
            FeedKind::Level3Updates => self.has_level3_updates,
        }
    }
}

/// Price level of an aggregated book. Numeric fields keep the exchange's
/// decimal string so no precision is lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level2Point {
    pub price: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<String>,
}

impl Level2Point {
    pub fn new(price: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            size: size.into(),
            count: None,
        }
    }

    #[must_use]
    pub fn with_count(mut self, count: impl Into<String>) -> Self {
        self.count = Some(count.into());
        self
    }
}

/// Single order of a full-depth book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level3Point {
    pub order_id: String,
    pub price: String,
    pub size: String,
}

impl Level3Point {
    pub fn new(
        order_id: impl Into<String>,
        price: impl Into<String>,
        size: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            price: price.into(),
            size: size.into(),
        }
    }
}

/// Snapshot or update envelope for one market's book.
///
/// Best bid and best ask are always at index 0 of their side; adapters
/// reverse descending feeds before building the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookEvent<P> {
    pub exchange: String,
    pub base: String,
    pub quote: String,
    /// Exchange market id the event belongs to
    pub market_id: String,
    pub timestamp_ms: Option<i64>,
    pub sequence_id: Option<u64>,
    pub asks: Vec<P>,
    pub bids: Vec<P>,
}

impl<P> OrderBookEvent<P> {
    pub fn new(exchange: &str, market: &Market) -> Self {
        Self {
            exchange: exchange.to_string(),
            base: market.base.clone(),
            quote: market.quote.clone(),
            market_id: market.id.clone(),
            timestamp_ms: None,
            sequence_id: None,
            asks: Vec::new(),
            bids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sequence(mut self, sequence_id: Option<u64>) -> Self {
        self.sequence_id = sequence_id;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp_ms: Option<i64>) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    #[must_use]
    pub fn with_sides(mut self, asks: Vec<P>, bids: Vec<P>) -> Self {
        self.asks = asks;
        self.bids = bids;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }
}

pub type Level2Snapshot = OrderBookEvent<Level2Point>;
pub type Level2Update = OrderBookEvent<Level2Point>;
pub type Level3Snapshot = OrderBookEvent<Level3Point>;
pub type Level3Update = OrderBookEvent<Level3Point>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub exchange: String,
    pub base: String,
    pub quote: String,
    pub trade_id: String,
    pub unix_ms: i64,
    pub side: TradeSide,
    pub price: String,
    pub amount: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub exchange: String,
    pub base: String,
    pub quote: String,
    pub timestamp_ms: i64,
    pub last: Option<String>,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub volume: Option<String>,
    pub quote_volume: Option<String>,
    pub change: Option<String>,
    pub change_percent: Option<String>,
    pub bid: Option<String>,
    pub bid_volume: Option<String>,
    pub ask: Option<String>,
    pub ask_volume: Option<String>,
}

/// Lifecycle of one transport. Owned by the transport, read-only elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
}

/// Lifecycle signals, in the order the transport emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionSignal {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Closing,
    Closed,
}

impl ConnectionSignal {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Everything a driver publishes to its consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEvent {
    Connection {
        /// Exchange name, or `exchange:market` for per-market connections
        source: String,
        signal: ConnectionSignal,
    },
    Ticker(Ticker),
    Trade(Trade),
    L2Snapshot(Level2Snapshot),
    L2Update(Level2Update),
    L3Snapshot(Level3Snapshot),
    L3Update(Level3Update),
    /// The exchange refused a subscribe; the registry entry is kept
    SubscriptionRejected {
        source: String,
        feed: Option<FeedKind>,
        market_id: Option<String>,
        reason: String,
    },
    /// A book lost continuity and a fresh snapshot was requested
    BookOutOfSync {
        source: String,
        feed: FeedKind,
        market_id: String,
        expected: Option<u64>,
        received: Option<u64>,
    },
}

impl StreamEvent {
    /// Signal name as consumers know it.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connection { signal, .. } => signal.as_str(),
            Self::Ticker(_) => "ticker",
            Self::Trade(_) => "trade",
            Self::L2Snapshot(_) => "l2snapshot",
            Self::L2Update(_) => "l2update",
            Self::L3Snapshot(_) => "l3snapshot",
            Self::L3Update(_) => "l3update",
            Self::SubscriptionRejected { .. } => "subscription-rejected",
            Self::BookOutOfSync { .. } => "out-of-sync",
        }
    }

    pub const fn connection_signal(&self) -> Option<ConnectionSignal> {
        match self {
            Self::Connection { signal, .. } => Some(*signal),
            _ => None,
        }
    }
}
