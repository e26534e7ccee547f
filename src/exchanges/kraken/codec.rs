use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{frame_text, DomainEvent, ExchangeAdapter};
use crate::core::kernel::registry::SubscriptionRegistry;
use crate::core::types::{
    Capabilities, FeedKind, Level2Point, Market, OrderBookEvent, Ticker, Trade, TradeSide,
};
use crate::exchanges::kraken::types::{
    KrakenBookEntry, KrakenBookSnapshot, KrakenBookUpdate, KrakenEvent, KrakenSubscription,
    KrakenSubscriptionRequest, KrakenTicker, KrakenTradeEntry,
};
use crate::utils::conversion::{
    change_from_open, is_crossed, now_millis, seconds_to_millis, value_to_string,
};
use indexmap::IndexMap;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

pub const EXCHANGE_NAME: &str = "Kraken";

pub const BOOK_DEPTH: u32 = 100;

/// Kraken v1 public WebSocket adapter
///
/// Data frames are arrays `[channelID, payload.., channelName, pair]`; the
/// channel id to pair mapping comes from `subscriptionStatus` events.
#[derive(Debug)]
pub struct KrakenAdapter {
    channels: HashMap<u64, (FeedKind, String)>,
    crossed_book_check: bool,
}

impl Default for KrakenAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl KrakenAdapter {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            crossed_book_check: true,
        }
    }

    /// Treat a snapshot whose best bid is at or above its best ask as corrupt
    ///
    /// When enabled (the default) such a snapshot is emitted empty and the
    /// book is resubscribed.
    #[must_use]
    pub const fn with_crossed_book_check(mut self, enabled: bool) -> Self {
        self.crossed_book_check = enabled;
        self
    }

    const fn channel_name(feed: FeedKind) -> Option<&'static str> {
        match feed {
            FeedKind::Ticker => Some("ticker"),
            FeedKind::Trades => Some("trade"),
            FeedKind::Level2Updates => Some("book"),
            FeedKind::Level2Snapshots | FeedKind::Level3Updates => None,
        }
    }

    fn feed_for_channel(name: &str) -> Option<FeedKind> {
        match name {
            "ticker" => Some(FeedKind::Ticker),
            "trade" => Some(FeedKind::Trades),
            n if n.starts_with("book") => Some(FeedKind::Level2Updates),
            _ => None,
        }
    }

    fn encode(event: &str, feed: FeedKind, markets: &[Market]) -> Result<Message, ExchangeError> {
        let name = Self::channel_name(feed)
            .ok_or_else(|| ExchangeError::not_supported(EXCHANGE_NAME, feed))?;
        if markets.is_empty() {
            return Err(ExchangeError::InvalidParameters(
                "Kraken request without markets".to_string(),
            ));
        }
        let depth = (feed == FeedKind::Level2Updates && event == "subscribe").then_some(BOOK_DEPTH);
        let request = KrakenSubscriptionRequest {
            event,
            pair: markets.iter().map(|m| m.id.as_str()).collect(),
            subscription: KrakenSubscription { name, depth },
        };
        serde_json::to_string(&request)
            .map(Message::Text)
            .map_err(|e| ExchangeError::SerializationError(e.to_string()))
    }

    /// Find the registered market for a wire pair, tolerating Kraken's
    /// legacy asset codes (`XBT`, `XDG`)
    fn resolve(registry: &SubscriptionRegistry, feed: FeedKind, pair: &str) -> Option<Market> {
        if let Some(market) = registry.get(feed, pair) {
            return Some(market.clone());
        }
        let wanted = normalize_pair(pair);
        registry
            .markets(feed)
            .into_iter()
            .find(|market| normalize_pair(&market.id) == wanted)
    }

    fn decode_event(&mut self, event: KrakenEvent) -> Vec<DomainEvent> {
        match event.event.as_deref() {
            Some("subscriptionStatus") => {
                let feed = event
                    .subscription
                    .as_ref()
                    .and_then(|s| Self::feed_for_channel(&s.name));
                match event.status.as_deref() {
                    Some("subscribed") => {
                        if let (Some(id), Some(feed), Some(pair)) =
                            (event.channel_id, feed, event.pair)
                        {
                            debug!(channel_id = id, %feed, %pair, "Kraken channel subscribed");
                            self.channels.insert(id, (feed, pair));
                        }
                    }
                    Some("unsubscribed") => {
                        if let Some(id) = event.channel_id {
                            self.channels.remove(&id);
                        }
                    }
                    Some("error") => {
                        return vec![DomainEvent::SubscriptionRejected {
                            feed,
                            market_id: event.pair,
                            reason: event
                                .error_message
                                .unwrap_or_else(|| "subscription error".to_string()),
                        }];
                    }
                    _ => {}
                }
            }
            Some("heartbeat" | "systemStatus" | "pong") => {}
            other => {
                if let Some(message) = event.error_message.or(event.error) {
                    warn!(event = ?other, "Kraken error: {}", message);
                }
            }
        }
        vec![DomainEvent::Ignored]
    }

    fn decode_channel(
        &self,
        items: Vec<Value>,
        registry: &SubscriptionRegistry,
    ) -> Result<Vec<DomainEvent>, ExchangeError> {
        let len = items.len();
        if len < 4 {
            return Err(ExchangeError::DeserializationError(format!(
                "Kraken channel message with {} elements",
                len
            )));
        }

        let channel = items[0].as_u64().and_then(|id| self.channels.get(&id));
        let feed = items[len - 2]
            .as_str()
            .and_then(Self::feed_for_channel)
            .or_else(|| channel.map(|(feed, _)| *feed));
        let pair = items[len - 1]
            .as_str()
            .or_else(|| channel.map(|(_, pair)| pair.as_str()));
        let (Some(feed), Some(pair)) = (feed, pair) else {
            return Ok(vec![DomainEvent::Ignored]);
        };
        let Some(market) = Self::resolve(registry, feed, pair) else {
            debug!(%pair, %feed, "Kraken message for unregistered market");
            return Ok(vec![DomainEvent::Ignored]);
        };

        let payload = &items[1..len - 2];
        match feed {
            FeedKind::Ticker => {
                let raw: KrakenTicker = serde_json::from_value(payload[0].clone())?;
                Ok(vec![DomainEvent::Ticker(convert_ticker(&raw, &market))])
            }
            FeedKind::Trades => {
                let raw: Vec<KrakenTradeEntry> = serde_json::from_value(payload[0].clone())?;
                Ok(raw
                    .iter()
                    .filter_map(|entry| convert_trade(entry, &market))
                    .map(DomainEvent::Trade)
                    .collect())
            }
            FeedKind::Level2Updates => {
                let is_snapshot = payload[0].get("as").is_some() || payload[0].get("bs").is_some();
                if is_snapshot {
                    let raw: KrakenBookSnapshot = serde_json::from_value(payload[0].clone())?;
                    Ok(self.convert_snapshot(raw, &market))
                } else {
                    let mut asks = Vec::new();
                    let mut bids = Vec::new();
                    for part in payload {
                        let raw: KrakenBookUpdate = serde_json::from_value(part.clone())?;
                        asks.extend(raw.a);
                        bids.extend(raw.b);
                    }
                    Ok(vec![DomainEvent::Level2Update(convert_update(
                        &asks, &bids, &market,
                    ))])
                }
            }
            FeedKind::Level2Snapshots | FeedKind::Level3Updates => Ok(vec![DomainEvent::Ignored]),
        }
    }

    fn convert_snapshot(&self, raw: KrakenBookSnapshot, market: &Market) -> Vec<DomainEvent> {
        let timestamp = latest_timestamp(raw.asks.iter().chain(raw.bids.iter()));
        let asks = to_points(&raw.asks);
        let bids = to_points(&raw.bids);

        if self.crossed_book_check {
            if let (Some(bid), Some(ask)) = (bids.first(), asks.first()) {
                if is_crossed(&bid.price, &ask.price) {
                    let reason = format!("crossed book: bid {} >= ask {}", bid.price, ask.price);
                    let empty = OrderBookEvent::new(EXCHANGE_NAME, market).with_timestamp(timestamp);
                    return vec![
                        DomainEvent::Level2Snapshot(empty),
                        DomainEvent::ResyncRequired {
                            feed: FeedKind::Level2Updates,
                            market_id: market.id.clone(),
                            reason,
                        },
                    ];
                }
            }
        }

        vec![DomainEvent::Level2Snapshot(
            OrderBookEvent::new(EXCHANGE_NAME, market)
                .with_timestamp(timestamp)
                .with_sides(asks, bids),
        )]
    }
}

/// `XBT/USD` -> `BTC/USD`, `XDG/USD` -> `DOGE/USD`
pub fn normalize_pair(pair: &str) -> String {
    pair.replace("XBT", "BTC").replace("XDG", "DOGE")
}

/// Kraken sends no trade ids. Derive one from the trade time: whole
/// seconds, then the fraction rounded half-up to 4 digits, then `00000`.
/// Collisions are possible for trades within the same 100µs.
pub fn trade_id_from_time(time: &str) -> Option<String> {
    let time = Decimal::from_str(time)
        .ok()?
        .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
    Some(format!("{:.4}", time).replace('.', "") + "00000")
}

fn convert_ticker(raw: &KrakenTicker, market: &Market) -> Ticker {
    let at = |values: &[Value], index: usize| values.get(index).and_then(value_to_string);
    let last = at(&raw.c, 0);
    let open = at(&raw.o, 1);
    let (change, change_percent) = match (last.as_deref(), open.as_deref()) {
        (Some(last), Some(open)) => change_from_open(last, open).unzip(),
        _ => (None, None),
    };
    Ticker {
        exchange: EXCHANGE_NAME.to_string(),
        base: market.base.clone(),
        quote: market.quote.clone(),
        timestamp_ms: now_millis(),
        last,
        open,
        high: at(&raw.h, 1),
        low: at(&raw.l, 1),
        volume: at(&raw.v, 1),
        quote_volume: None,
        change,
        change_percent,
        bid: at(&raw.b, 0),
        bid_volume: at(&raw.b, 2),
        ask: at(&raw.a, 0),
        ask_volume: at(&raw.a, 2),
    }
}

fn convert_trade(entry: &KrakenTradeEntry, market: &Market) -> Option<Trade> {
    let [price, amount, time, side, ..] = entry.as_slice() else {
        warn!(?entry, "Malformed Kraken trade entry");
        return None;
    };
    Some(Trade {
        exchange: EXCHANGE_NAME.to_string(),
        base: market.base.clone(),
        quote: market.quote.clone(),
        trade_id: trade_id_from_time(time)?,
        unix_ms: seconds_to_millis(time)?,
        side: if side == "b" {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        },
        price: price.clone(),
        amount: amount.clone(),
    })
}

fn entry_time(entry: &KrakenBookEntry) -> Option<Decimal> {
    entry.get(2).and_then(|ts| Decimal::from_str(ts).ok())
}

fn latest_timestamp<'a>(entries: impl Iterator<Item = &'a KrakenBookEntry>) -> Option<i64> {
    entries
        .filter_map(|entry| entry.get(2))
        .filter_map(|ts| Decimal::from_str(ts).ok().map(|d| (d, ts)))
        .max_by_key(|(d, _)| *d)
        .and_then(|(_, ts)| seconds_to_millis(ts))
}

fn to_points(entries: &[KrakenBookEntry]) -> Vec<Level2Point> {
    entries
        .iter()
        .filter(|entry| entry.len() >= 2)
        .map(|entry| Level2Point::new(entry[0].clone(), entry[1].clone()))
        .collect()
}

/// Collapse repeated prices within one update, keeping the newest entry
fn dedup_latest(entries: &[KrakenBookEntry]) -> Vec<KrakenBookEntry> {
    let mut latest: IndexMap<&str, &KrakenBookEntry> = IndexMap::new();
    for entry in entries.iter().filter(|entry| entry.len() >= 2) {
        let newer = latest
            .get(entry[0].as_str())
            .map_or(true, |seen| entry_time(entry) >= entry_time(seen));
        if newer {
            latest.insert(entry[0].as_str(), entry);
        }
    }
    latest.into_values().cloned().collect()
}

fn convert_update(
    asks: &[KrakenBookEntry],
    bids: &[KrakenBookEntry],
    market: &Market,
) -> OrderBookEvent<Level2Point> {
    let timestamp = latest_timestamp(asks.iter().chain(bids.iter()));
    OrderBookEvent::new(EXCHANGE_NAME, market)
        .with_timestamp(timestamp)
        .with_sides(to_points(&dedup_latest(asks)), to_points(&dedup_latest(bids)))
}

impl ExchangeAdapter for KrakenAdapter {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            has_tickers: true,
            has_trades: true,
            has_level2_updates: true,
            supports_batch_subscribe: true,
            ..Capabilities::default()
        }
    }

    fn encode_subscribe(
        &mut self,
        feed: FeedKind,
        markets: &[Market],
    ) -> Result<Message, ExchangeError> {
        Self::encode("subscribe", feed, markets)
    }

    fn encode_unsubscribe(
        &mut self,
        feed: FeedKind,
        markets: &[Market],
    ) -> Result<Option<Message>, ExchangeError> {
        Self::encode("unsubscribe", feed, markets).map(Some)
    }

    fn decode(
        &mut self,
        message: Message,
        subscriptions: &SubscriptionRegistry,
    ) -> Result<Vec<DomainEvent>, ExchangeError> {
        let Some(text) = frame_text(message)? else {
            return Ok(vec![DomainEvent::Ignored]);
        };
        match serde_json::from_str::<Value>(&text)? {
            Value::Array(items) => self.decode_channel(items, subscriptions),
            value @ Value::Object(_) => {
                let event: KrakenEvent = serde_json::from_value(value)?;
                Ok(self.decode_event(event))
            }
            other => Err(ExchangeError::DeserializationError(format!(
                "Unexpected Kraken frame: {}",
                other
            ))),
        }
    }

    fn on_connected(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xbtusd() -> Market {
        Market::new("XBT/USD", "BTC", "USD")
    }

    fn registry(feed: FeedKind) -> SubscriptionRegistry {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(feed, xbtusd());
        registry
    }

    fn decode(adapter: &mut KrakenAdapter, raw: &str, subs: &SubscriptionRegistry) -> Vec<DomainEvent> {
        adapter.decode(Message::Text(raw.to_string()), subs).unwrap()
    }

    #[test]
    fn test_batched_book_subscribe() {
        let mut adapter = KrakenAdapter::new();
        let eth = Market::new("ETH/USD", "ETH", "USD");
        let Message::Text(text) = adapter
            .encode_subscribe(FeedKind::Level2Updates, &[xbtusd(), eth])
            .unwrap()
        else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "event": "subscribe",
                "pair": ["XBT/USD", "ETH/USD"],
                "subscription": {"name": "book", "depth": 100}
            })
        );
    }

    #[test]
    fn test_unsubscribe_has_no_depth() {
        let mut adapter = KrakenAdapter::new();
        let Some(Message::Text(text)) = adapter
            .encode_unsubscribe(FeedKind::Level2Updates, &[xbtusd()])
            .unwrap()
        else {
            panic!("expected text frame");
        };
        assert_eq!(
            text,
            r#"{"event":"unsubscribe","pair":["XBT/USD"],"subscription":{"name":"book"}}"#
        );
    }

    #[test]
    fn test_trade_id_from_time() {
        assert_eq!(
            trade_id_from_time("1534614057.321597").as_deref(),
            Some("1534614057321600000")
        );
        // Half rounds up
        assert_eq!(
            trade_id_from_time("1534614057.22295").as_deref(),
            Some("1534614057223000000")
        );
        assert_eq!(
            trade_id_from_time("1534614057.1").as_deref(),
            Some("1534614057100000000")
        );
    }

    #[test]
    fn test_normalize_pair() {
        assert_eq!(normalize_pair("XBT/USD"), "BTC/USD");
        assert_eq!(normalize_pair("XDG/EUR"), "DOGE/EUR");
        assert_eq!(normalize_pair("ETH/USD"), "ETH/USD");
    }

    #[test]
    fn test_subscription_status_maps_channel() {
        let mut adapter = KrakenAdapter::new();
        let subs = registry(FeedKind::Level2Updates);
        let status = r#"{"channelID":10001,"channelName":"book-100","event":"subscriptionStatus","pair":"XBT/USD","status":"subscribed","subscription":{"depth":100,"name":"book"}}"#;
        assert_eq!(decode(&mut adapter, status, &subs), vec![DomainEvent::Ignored]);
        assert_eq!(
            adapter.channels.get(&10001),
            Some(&(FeedKind::Level2Updates, "XBT/USD".to_string()))
        );

        adapter.on_connected();
        assert!(adapter.channels.is_empty());
    }

    #[test]
    fn test_subscription_error_is_rejection() {
        let mut adapter = KrakenAdapter::new();
        let raw = r#"{"errorMessage":"Currency pair not supported","event":"subscriptionStatus","pair":"XBT/USDX","status":"error","subscription":{"name":"ticker"}}"#;
        assert_eq!(
            decode(&mut adapter, raw, &SubscriptionRegistry::new()),
            vec![DomainEvent::SubscriptionRejected {
                feed: Some(FeedKind::Ticker),
                market_id: Some("XBT/USDX".to_string()),
                reason: "Currency pair not supported".to_string(),
            }]
        );
    }

    #[test]
    fn test_book_snapshot() {
        let mut adapter = KrakenAdapter::new();
        let subs = registry(FeedKind::Level2Updates);
        let raw = r#"[0,{"as":[["5541.30000","2.50700000","1534614248.123678"],["5541.80000","0.33000000","1534614098.345543"]],"bs":[["5541.20000","1.52900000","1534614248.765567"],["5539.90000","0.30000000","1534614241.769870"]]},"book-100","XBT/USD"]"#;

        let events = decode(&mut adapter, raw, &subs);
        let DomainEvent::Level2Snapshot(book) = &events[0] else {
            panic!("expected snapshot, got {:?}", events);
        };
        assert_eq!(book.asks.len(), 2);
        assert_eq!(book.asks[0].price, "5541.30000");
        assert_eq!(book.bids[0].price, "5541.20000");
        assert_eq!(book.timestamp_ms, Some(1_534_614_248_765));
        assert_eq!(book.sequence_id, None);
    }

    #[test]
    fn test_crossed_snapshot_is_emptied_and_resynced() {
        let mut adapter = KrakenAdapter::new();
        let subs = registry(FeedKind::Level2Updates);
        let raw = r#"[0,{"as":[["5541.30000","2.5","1534614248.1"]],"bs":[["5542.00000","1.5","1534614248.2"]]},"book-100","XBT/USD"]"#;

        let events = decode(&mut adapter, raw, &subs);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], DomainEvent::Level2Snapshot(book) if book.is_empty()));
        assert!(matches!(
            &events[1],
            DomainEvent::ResyncRequired { feed: FeedKind::Level2Updates, market_id, .. } if market_id == "XBT/USD"
        ));

        let mut lenient = KrakenAdapter::new().with_crossed_book_check(false);
        let events = decode(&mut lenient, raw, &subs);
        assert!(matches!(&events[..], [DomainEvent::Level2Snapshot(book)] if !book.is_empty()));
    }

    #[test]
    fn test_book_update_across_two_objects() {
        let mut adapter = KrakenAdapter::new();
        let subs = registry(FeedKind::Level2Updates);
        let raw = r#"[1234,{"a":[["5541.30000","2.50700000","1534614248.456738"],["5541.30000","0.00000000","1534614248.556738"]]},{"b":[["5541.20000","1.52900000","1534614248.456738"]]},"book-100","XBT/USD"]"#;

        let events = decode(&mut adapter, raw, &subs);
        let DomainEvent::Level2Update(update) = &events[0] else {
            panic!("expected update, got {:?}", events);
        };
        assert_eq!(update.asks, vec![Level2Point::new("5541.30000", "0.00000000")]);
        assert_eq!(update.bids, vec![Level2Point::new("5541.20000", "1.52900000")]);
        assert_eq!(update.timestamp_ms, Some(1_534_614_248_556));
    }

    #[test]
    fn test_market_resolved_through_normalized_pair() {
        let mut adapter = KrakenAdapter::new();
        let mut subs = SubscriptionRegistry::new();
        subs.insert(FeedKind::Trades, Market::new("BTC/USD", "BTC", "USD"));
        let raw = r#"[0,[["5541.20000","0.15850568","1534614057.321597","s","l",""],["6060.00000","0.02455000","1534614057.324998","b","l",""]],"trade","XBT/USD"]"#;

        let events = decode(&mut adapter, raw, &subs);
        assert_eq!(events.len(), 2);
        let DomainEvent::Trade(trade) = &events[0] else {
            panic!("expected trade, got {:?}", events);
        };
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.unix_ms, 1_534_614_057_321);
        assert_eq!(trade.trade_id, "1534614057321600000");
        assert!(matches!(&events[1], DomainEvent::Trade(t) if t.side == TradeSide::Buy));
    }

    #[test]
    fn test_ticker() {
        let mut adapter = KrakenAdapter::new();
        let subs = registry(FeedKind::Ticker);
        let raw = r#"[0,{"a":["5525.40000",1,"1.000"],"b":["5525.10000",1,"1.000"],"c":["5525.10000","0.00398963"],"v":["2634.11501494","3591.17907851"],"p":["5631.44067","5653.78939"],"t":[11493,16267],"l":["5505.00000","5505.00000"],"h":["5783.00000","5783.00000"],"o":["5760.70000","5763.40000"]},"ticker","XBT/USD"]"#;

        let events = decode(&mut adapter, raw, &subs);
        let DomainEvent::Ticker(ticker) = &events[0] else {
            panic!("expected ticker, got {:?}", events);
        };
        assert_eq!(ticker.last.as_deref(), Some("5525.10000"));
        assert_eq!(ticker.open.as_deref(), Some("5763.40000"));
        assert_eq!(ticker.change.as_deref(), Some("-238.3"));
        assert_eq!(ticker.ask_volume.as_deref(), Some("1.000"));
    }

    #[test]
    fn test_heartbeat_is_ignored() {
        let mut adapter = KrakenAdapter::new();
        assert_eq!(
            decode(&mut adapter, r#"{"event":"heartbeat"}"#, &SubscriptionRegistry::new()),
            vec![DomainEvent::Ignored]
        );
    }
}
