use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{frame_text, DomainEvent, ExchangeAdapter, Heartbeat};
use crate::core::kernel::registry::SubscriptionRegistry;
use crate::core::types::{
    Capabilities, FeedKind, Level2Point, Market, OrderBookEvent, Ticker, Trade, TradeSide,
};
use crate::exchanges::okx::types::{
    OkxOrderBook, OkxTicker, OkxTrade, OkxWsChannel, OkxWsMessage, OkxWsRequest,
};
use crate::utils::conversion::{change_from_open, now_millis};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

pub const EXCHANGE_NAME: &str = "OKX";

/// OKX closes connections that stay quiet for 30 seconds
pub const PING_INTERVAL: Duration = Duration::from_secs(25);

/// OKX v5 public WebSocket adapter
///
/// `books` sequence ids are not contiguous: each update names the id it
/// follows. The adapter checks that chain itself and passes updates on
/// unsequenced, raising `ResyncRequired` when a link is missing.
#[derive(Debug, Default)]
pub struct OkxAdapter {
    last_seq: HashMap<String, i64>,
}

impl OkxAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    const fn channel(feed: FeedKind) -> Option<&'static str> {
        match feed {
            FeedKind::Ticker => Some("tickers"),
            FeedKind::Trades => Some("trades"),
            FeedKind::Level2Snapshots => Some("books5"),
            FeedKind::Level2Updates => Some("books"),
            FeedKind::Level3Updates => None,
        }
    }

    fn feed_for_channel(channel: &str) -> Option<FeedKind> {
        match channel {
            "tickers" => Some(FeedKind::Ticker),
            "trades" => Some(FeedKind::Trades),
            "books5" => Some(FeedKind::Level2Snapshots),
            "books" => Some(FeedKind::Level2Updates),
            _ => None,
        }
    }

    /// Create subscription request for OKX WebSocket
    fn create_request(op: &str, feed: FeedKind, markets: &[Market]) -> Result<Message, ExchangeError> {
        let channel = Self::channel(feed)
            .ok_or_else(|| ExchangeError::not_supported(EXCHANGE_NAME, feed))?;
        if markets.is_empty() {
            return Err(ExchangeError::InvalidParameters(
                "OKX request without markets".to_string(),
            ));
        }
        let request = OkxWsRequest {
            op: op.to_string(),
            args: markets
                .iter()
                .map(|market| OkxWsChannel {
                    channel: channel.to_string(),
                    inst_id: Some(market.id.clone()),
                })
                .collect(),
        };
        serde_json::to_string(&request)
            .map(Message::Text)
            .map_err(|e| ExchangeError::SerializationError(e.to_string()))
    }

    fn parse_data<T: DeserializeOwned>(data: Vec<Value>) -> Result<Vec<T>, ExchangeError> {
        data.into_iter()
            .map(|item| serde_json::from_value(item).map_err(ExchangeError::from))
            .collect()
    }

    fn decode_event(event: &str, message: OkxWsMessage) -> Vec<DomainEvent> {
        match event {
            "error" => {
                let feed = message
                    .arg
                    .as_ref()
                    .and_then(|arg| Self::feed_for_channel(&arg.channel));
                let market_id = message.arg.and_then(|arg| arg.inst_id);
                let reason = format!(
                    "{} ({})",
                    message.msg.unwrap_or_default(),
                    message.code.unwrap_or_default()
                );
                vec![DomainEvent::SubscriptionRejected {
                    feed,
                    market_id,
                    reason,
                }]
            }
            "subscribe" | "unsubscribe" => {
                debug!(event, arg = ?message.arg, "OKX subscription ack");
                vec![DomainEvent::Ignored]
            }
            other => {
                debug!(event = other, "Unhandled OKX event");
                vec![DomainEvent::Ignored]
            }
        }
    }

    fn decode_books(
        &mut self,
        action: Option<&str>,
        data: Vec<Value>,
        market: &Market,
    ) -> Result<Vec<DomainEvent>, ExchangeError> {
        let mut events = Vec::new();
        for book in Self::parse_data::<OkxOrderBook>(data)? {
            let event = convert_book(&book, market);
            if action == Some("snapshot") {
                if let Some(seq) = book.seq_id {
                    self.last_seq.insert(market.id.clone(), seq);
                }
                events.push(DomainEvent::Level2Snapshot(event));
                continue;
            }

            match (self.last_seq.get(&market.id).copied(), book.prev_seq_id) {
                (Some(last), Some(prev)) if last != prev => {
                    self.last_seq.remove(&market.id);
                    events.push(DomainEvent::ResyncRequired {
                        feed: FeedKind::Level2Updates,
                        market_id: market.id.clone(),
                        reason: format!("update follows seq {}, last seen {}", prev, last),
                    });
                    // The rest of this frame is stale as well
                    break;
                }
                _ => {
                    if let Some(seq) = book.seq_id {
                        if self.last_seq.contains_key(&market.id) {
                            self.last_seq.insert(market.id.clone(), seq);
                        }
                    }
                    events.push(DomainEvent::Level2Update(event));
                }
            }
        }
        Ok(events)
    }
}

fn to_points(levels: &[Vec<String>]) -> Vec<Level2Point> {
    levels
        .iter()
        .filter_map(|level| match level.as_slice() {
            [price, size, _, count, ..] => {
                Some(Level2Point::new(price.clone(), size.clone()).with_count(count.clone()))
            }
            [price, size, ..] => Some(Level2Point::new(price.clone(), size.clone())),
            _ => None,
        })
        .collect()
}

fn convert_book(book: &OkxOrderBook, market: &Market) -> OrderBookEvent<Level2Point> {
    OrderBookEvent::new(EXCHANGE_NAME, market)
        .with_timestamp(book.ts.parse().ok())
        .with_sides(to_points(&book.asks), to_points(&book.bids))
}

fn convert_ticker(raw: OkxTicker, market: &Market) -> Ticker {
    let (change, change_percent) = raw
        .open_24h
        .as_deref()
        .and_then(|open| change_from_open(&raw.last, open))
        .unzip();
    Ticker {
        exchange: EXCHANGE_NAME.to_string(),
        base: market.base.clone(),
        quote: market.quote.clone(),
        timestamp_ms: raw.ts.parse().unwrap_or_else(|_| now_millis()),
        last: Some(raw.last),
        open: raw.open_24h,
        high: raw.high_24h,
        low: raw.low_24h,
        volume: raw.vol_24h,
        quote_volume: raw.vol_ccy_24h,
        change,
        change_percent,
        bid: raw.bid_px,
        bid_volume: raw.bid_sz,
        ask: raw.ask_px,
        ask_volume: raw.ask_sz,
    }
}

fn convert_trade(raw: OkxTrade, market: &Market) -> Trade {
    Trade {
        exchange: EXCHANGE_NAME.to_string(),
        base: market.base.clone(),
        quote: market.quote.clone(),
        trade_id: raw.trade_id,
        unix_ms: raw.ts.parse().unwrap_or_else(|_| now_millis()),
        side: if raw.side == "buy" {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        },
        price: raw.px,
        amount: raw.sz,
    }
}

impl ExchangeAdapter for OkxAdapter {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            has_tickers: true,
            has_trades: true,
            has_level2_snapshots: true,
            has_level2_updates: true,
            has_level3_updates: false,
            supports_batch_subscribe: true,
        }
    }

    fn encode_subscribe(
        &mut self,
        feed: FeedKind,
        markets: &[Market],
    ) -> Result<Message, ExchangeError> {
        if feed == FeedKind::Level2Updates {
            for market in markets {
                self.last_seq.remove(&market.id);
            }
        }
        Self::create_request("subscribe", feed, markets)
    }

    fn encode_unsubscribe(
        &mut self,
        feed: FeedKind,
        markets: &[Market],
    ) -> Result<Option<Message>, ExchangeError> {
        Self::create_request("unsubscribe", feed, markets).map(Some)
    }

    fn decode(
        &mut self,
        message: Message,
        subscriptions: &SubscriptionRegistry,
    ) -> Result<Vec<DomainEvent>, ExchangeError> {
        let Some(text) = frame_text(message)? else {
            return Ok(vec![DomainEvent::Ignored]);
        };
        if text == "pong" {
            return Ok(vec![DomainEvent::Ignored]);
        }

        let message: OkxWsMessage = serde_json::from_str(&text)?;
        if let Some(event) = message.event.clone() {
            return Ok(Self::decode_event(&event, message));
        }

        let (Some(arg), Some(data)) = (message.arg, message.data) else {
            warn!("OKX push without arg or data");
            return Ok(vec![DomainEvent::Ignored]);
        };
        let (Some(feed), Some(inst_id)) = (Self::feed_for_channel(&arg.channel), arg.inst_id) else {
            return Ok(vec![DomainEvent::Ignored]);
        };
        let Some(market) = subscriptions.get(feed, &inst_id).cloned() else {
            debug!(%inst_id, %feed, "OKX push for unregistered market");
            return Ok(vec![DomainEvent::Ignored]);
        };

        match feed {
            FeedKind::Ticker => Ok(Self::parse_data::<OkxTicker>(data)?
                .into_iter()
                .map(|raw| DomainEvent::Ticker(convert_ticker(raw, &market)))
                .collect()),
            FeedKind::Trades => Ok(Self::parse_data::<OkxTrade>(data)?
                .into_iter()
                .map(|raw| DomainEvent::Trade(convert_trade(raw, &market)))
                .collect()),
            FeedKind::Level2Snapshots => Ok(Self::parse_data::<OkxOrderBook>(data)?
                .iter()
                .map(|book| DomainEvent::Level2Depth(convert_book(book, &market)))
                .collect()),
            FeedKind::Level2Updates => {
                self.decode_books(message.action.as_deref(), data, &market)
            }
            FeedKind::Level3Updates => Ok(vec![DomainEvent::Ignored]),
        }
    }

    fn on_connected(&mut self) {
        self.last_seq.clear();
    }

    fn heartbeat(&self) -> Option<Heartbeat> {
        Some(Heartbeat {
            interval: PING_INTERVAL,
            message: Message::Text("ping".to_string()),
        })
    }
}
