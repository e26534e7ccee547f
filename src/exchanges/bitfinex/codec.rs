use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{frame_text, DomainEvent, ExchangeAdapter};
use crate::core::kernel::registry::SubscriptionRegistry;
use crate::core::types::{
    Capabilities, FeedKind, Level2Point, Level3Point, Market, OrderBookEvent, Ticker, Trade,
    TradeSide,
};
use crate::exchanges::bitfinex::types::{
    BitfinexChannel, BitfinexEvent, BitfinexSubscribe, BitfinexUnsubscribe,
};
use crate::utils::conversion::{abs_decimal_str, now_millis, value_to_string};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub const EXCHANGE_NAME: &str = "Bitfinex";

pub const BOOK_LENGTH: &str = "100";

/// Bitfinex v2 public WebSocket adapter
///
/// Every subscription gets its own numeric channel id; data frames carry
/// only that id, so the adapter keeps the id to market mapping per
/// connection and unsubscribes by id.
#[derive(Debug, Default)]
pub struct BitfinexAdapter {
    channels: HashMap<u64, (FeedKind, BitfinexChannel)>,
}

impl BitfinexAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn feed_of(channel: &str, prec: Option<&str>) -> Option<FeedKind> {
        match (channel, prec) {
            ("ticker", _) => Some(FeedKind::Ticker),
            ("trades", _) => Some(FeedKind::Trades),
            ("book", Some("R0")) => Some(FeedKind::Level3Updates),
            ("book", _) => Some(FeedKind::Level2Updates),
            _ => None,
        }
    }

    fn find_channel(&self, feed: FeedKind, market_id: &str) -> Option<u64> {
        self.channels
            .iter()
            .find(|(_, (kind, channel))| {
                *kind == feed
                    && (channel.symbol == market_id || channel.pair.as_deref() == Some(market_id))
            })
            .map(|(id, _)| *id)
    }

    fn resolve(
        registry: &SubscriptionRegistry,
        feed: FeedKind,
        channel: &BitfinexChannel,
    ) -> Option<Market> {
        registry
            .get(feed, &channel.symbol)
            .or_else(|| channel.pair.as_deref().and_then(|pair| registry.get(feed, pair)))
            .cloned()
    }

    fn to_message<T: Serialize>(request: &T) -> Result<Message, ExchangeError> {
        serde_json::to_string(request)
            .map(Message::Text)
            .map_err(|e| ExchangeError::SerializationError(e.to_string()))
    }

    fn decode_event(&mut self, event: BitfinexEvent) -> Vec<DomainEvent> {
        match event.event.as_str() {
            "subscribed" => {
                let feed = event
                    .channel
                    .as_deref()
                    .and_then(|channel| Self::feed_of(channel, event.prec.as_deref()));
                if let (Some(id), Some(feed), Some(symbol)) = (event.chan_id, feed, event.symbol) {
                    let channel = BitfinexChannel {
                        symbol,
                        pair: event.pair,
                    };
                    // A resubscribe replaces the old channel of the same feed
                    self.channels
                        .retain(|_, (kind, existing)| !(*kind == feed && *existing == channel));
                    debug!(chan_id = id, %feed, symbol = %channel.symbol, "Bitfinex channel subscribed");
                    self.channels.insert(id, (feed, channel));
                }
            }
            "unsubscribed" => {
                if let Some(id) = event.chan_id {
                    self.channels.remove(&id);
                }
            }
            "error" => {
                let feed = event
                    .channel
                    .as_deref()
                    .and_then(|channel| Self::feed_of(channel, event.prec.as_deref()));
                return vec![DomainEvent::SubscriptionRejected {
                    feed,
                    market_id: event.symbol.or(event.pair),
                    reason: format!(
                        "{} ({})",
                        event.msg.unwrap_or_default(),
                        event.code.unwrap_or_default()
                    ),
                }];
            }
            "info" => {
                if let Some(code) = event.code {
                    info!(code, msg = ?event.msg, "Bitfinex info");
                }
            }
            _ => {}
        }
        vec![DomainEvent::Ignored]
    }

    fn decode_channel(
        &self,
        items: &[Value],
        registry: &SubscriptionRegistry,
    ) -> Result<Vec<DomainEvent>, ExchangeError> {
        let Some((feed, channel)) = items
            .first()
            .and_then(Value::as_u64)
            .and_then(|id| self.channels.get(&id))
        else {
            return Ok(vec![DomainEvent::Ignored]);
        };
        let Some(market) = Self::resolve(registry, *feed, channel) else {
            return Ok(vec![DomainEvent::Ignored]);
        };

        let body = items.get(1).unwrap_or(&Value::Null);
        match (feed, body) {
            // Heartbeat and checksum
            (_, Value::String(tag)) if tag == "hb" || tag == "cs" => Ok(vec![DomainEvent::Ignored]),
            (FeedKind::Trades, Value::String(tag)) if tag == "te" => {
                let trade = items.get(2).ok_or_else(|| malformed("trade", items))?;
                Ok(vec![DomainEvent::Trade(convert_trade(trade, &market)?)])
            }
            // "tu" repeats an executed trade; the array form is a backfill
            (FeedKind::Trades, _) => Ok(vec![DomainEvent::Ignored]),
            (FeedKind::Ticker, Value::Array(values)) => {
                Ok(vec![DomainEvent::Ticker(convert_ticker(values, &market))])
            }
            (FeedKind::Level2Updates, Value::Array(values)) => {
                if values.first().is_some_and(Value::is_array) {
                    let (asks, bids) = split_sides(values, level2_point)?;
                    Ok(vec![DomainEvent::Level2Snapshot(
                        OrderBookEvent::new(EXCHANGE_NAME, &market)
                            .with_timestamp(Some(now_millis()))
                            .with_sides(asks, bids),
                    )])
                } else {
                    let (asks, bids) = split_sides(std::slice::from_ref(body), level2_point)?;
                    Ok(vec![DomainEvent::Level2Update(
                        OrderBookEvent::new(EXCHANGE_NAME, &market).with_sides(asks, bids),
                    )])
                }
            }
            (FeedKind::Level3Updates, Value::Array(values)) => {
                if values.first().is_some_and(Value::is_array) {
                    let (asks, bids) = split_sides(values, level3_point)?;
                    Ok(vec![DomainEvent::Level3Snapshot(
                        OrderBookEvent::new(EXCHANGE_NAME, &market)
                            .with_timestamp(Some(now_millis()))
                            .with_sides(asks, bids),
                    )])
                } else {
                    let (asks, bids) = split_sides(std::slice::from_ref(body), level3_point)?;
                    Ok(vec![DomainEvent::Level3Update(
                        OrderBookEvent::new(EXCHANGE_NAME, &market).with_sides(asks, bids),
                    )])
                }
            }
            _ => {
                warn!(feed = %feed, "Unexpected Bitfinex channel payload");
                Ok(vec![DomainEvent::Ignored])
            }
        }
    }
}

fn malformed(what: &str, value: &(impl std::fmt::Debug + ?Sized)) -> ExchangeError {
    ExchangeError::DeserializationError(format!("Malformed Bitfinex {}: {:?}", what, value))
}

fn field(values: &[Value], index: usize) -> Option<String> {
    values.get(index).and_then(value_to_string)
}

/// `[BID, BID_SIZE, ASK, ASK_SIZE, DAILY_CHANGE, DAILY_CHANGE_RELATIVE, LAST_PRICE, VOLUME, HIGH, LOW]`
fn convert_ticker(values: &[Value], market: &Market) -> Ticker {
    let last = field(values, 6);
    let change = field(values, 4);
    let decimal = |raw: &Option<String>| raw.as_deref().and_then(|s| Decimal::from_str(s).ok());
    let open = decimal(&last)
        .zip(decimal(&change))
        .map(|(last, change)| (last - change).normalize().to_string());
    let change_percent = decimal(&field(values, 5))
        .map(|relative| (relative * Decimal::ONE_HUNDRED).round_dp(8).normalize().to_string());
    Ticker {
        exchange: EXCHANGE_NAME.to_string(),
        base: market.base.clone(),
        quote: market.quote.clone(),
        timestamp_ms: now_millis(),
        last,
        open,
        high: field(values, 8),
        low: field(values, 9),
        volume: field(values, 7),
        quote_volume: None,
        change,
        change_percent,
        bid: field(values, 0),
        bid_volume: field(values, 1),
        ask: field(values, 2),
        ask_volume: field(values, 3),
    }
}

/// `[ID, MTS, AMOUNT, PRICE]`, negative amount for a taker sell
fn convert_trade(raw: &Value, market: &Market) -> Result<Trade, ExchangeError> {
    let values = raw.as_array().ok_or_else(|| malformed("trade", raw))?;
    let (Some(id), Some(unix_ms), Some(amount), Some(price)) = (
        field(values, 0),
        values.get(1).and_then(Value::as_i64),
        field(values, 2),
        field(values, 3),
    ) else {
        return Err(malformed("trade", raw));
    };
    Ok(Trade {
        exchange: EXCHANGE_NAME.to_string(),
        base: market.base.clone(),
        quote: market.quote.clone(),
        trade_id: id,
        unix_ms,
        side: if amount.starts_with('-') {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        },
        price,
        amount: abs_decimal_str(&amount),
    })
}

/// Point plus its signed amount; a positive amount is a bid
type Sided<P> = (P, bool);

/// `[PRICE, COUNT, AMOUNT]`; a zero count removes the level
fn level2_point(raw: &Value) -> Option<Sided<Level2Point>> {
    let values = raw.as_array()?;
    let (price, count, amount) = (field(values, 0)?, field(values, 1)?, field(values, 2)?);
    let size = if count == "0" {
        "0".to_string()
    } else {
        abs_decimal_str(&amount)
    };
    Some((
        Level2Point::new(price, size).with_count(count),
        !amount.starts_with('-'),
    ))
}

/// `[ORDER_ID, PRICE, AMOUNT]`; a zero price removes the order
fn level3_point(raw: &Value) -> Option<Sided<Level3Point>> {
    let values = raw.as_array()?;
    let (order_id, price, amount) = (field(values, 0)?, field(values, 1)?, field(values, 2)?);
    Some((
        Level3Point::new(order_id, price, abs_decimal_str(&amount)),
        !amount.starts_with('-'),
    ))
}

fn split_sides<P>(
    raw: &[Value],
    parse: fn(&Value) -> Option<Sided<P>>,
) -> Result<(Vec<P>, Vec<P>), ExchangeError> {
    let mut asks = Vec::new();
    let mut bids = Vec::new();
    for entry in raw {
        let (point, is_bid) = parse(entry).ok_or_else(|| malformed("book entry", entry))?;
        if is_bid {
            bids.push(point);
        } else {
            asks.push(point);
        }
    }
    Ok((asks, bids))
}

impl ExchangeAdapter for BitfinexAdapter {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            has_tickers: true,
            has_trades: true,
            has_level2_updates: true,
            has_level3_updates: true,
            ..Capabilities::default()
        }
    }

    fn encode_subscribe(
        &mut self,
        feed: FeedKind,
        markets: &[Market],
    ) -> Result<Message, ExchangeError> {
        let [market] = markets else {
            return Err(ExchangeError::InvalidParameters(format!(
                "Bitfinex subscribes one market per request, got {}",
                markets.len()
            )));
        };
        let (channel, prec, len) = match feed {
            FeedKind::Ticker => ("ticker", None, None),
            FeedKind::Trades => ("trades", None, None),
            FeedKind::Level2Updates => ("book", None, Some(BOOK_LENGTH)),
            FeedKind::Level3Updates => ("book", Some("R0"), Some(BOOK_LENGTH)),
            FeedKind::Level2Snapshots => {
                return Err(ExchangeError::not_supported(EXCHANGE_NAME, feed))
            }
        };
        Self::to_message(&BitfinexSubscribe {
            event: "subscribe",
            channel,
            symbol: &market.id,
            prec,
            len,
        })
    }

    fn encode_unsubscribe(
        &mut self,
        feed: FeedKind,
        markets: &[Market],
    ) -> Result<Option<Message>, ExchangeError> {
        let [market] = markets else {
            return Err(ExchangeError::InvalidParameters(format!(
                "Bitfinex unsubscribes one market per request, got {}",
                markets.len()
            )));
        };
        match self.find_channel(feed, &market.id) {
            Some(chan_id) => Self::to_message(&BitfinexUnsubscribe {
                event: "unsubscribe",
                chan_id,
            })
            .map(Some),
            None => {
                debug!(%feed, market_id = %market.id, "No Bitfinex channel to unsubscribe");
                Ok(None)
            }
        }
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
            Value::Array(items) => self.decode_channel(&items, subscriptions),
            value @ Value::Object(_) => {
                let event: BitfinexEvent = serde_json::from_value(value)?;
                Ok(self.decode_event(event))
            }
            other => Err(malformed("frame", &other)),
        }
    }

    fn on_connected(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btcusd() -> Market {
        Market::new("tBTCUSD", "BTC", "USD")
    }

    fn decode(adapter: &mut BitfinexAdapter, raw: &str, subs: &SubscriptionRegistry) -> Vec<DomainEvent> {
        adapter.decode(Message::Text(raw.to_string()), subs).unwrap()
    }

    /// Adapter with `feed` on `tBTCUSD` mapped to channel 17
    fn subscribed(feed: FeedKind) -> (BitfinexAdapter, SubscriptionRegistry) {
        let mut adapter = BitfinexAdapter::new();
        let mut subs = SubscriptionRegistry::new();
        subs.insert(feed, btcusd());
        let event = match feed {
            FeedKind::Ticker => r#"{"event":"subscribed","channel":"ticker","chanId":17,"symbol":"tBTCUSD","pair":"BTCUSD"}"#,
            FeedKind::Trades => r#"{"event":"subscribed","channel":"trades","chanId":17,"symbol":"tBTCUSD","pair":"BTCUSD"}"#,
            FeedKind::Level3Updates => r#"{"event":"subscribed","channel":"book","chanId":17,"symbol":"tBTCUSD","prec":"R0","freq":"F0","len":"100","pair":"BTCUSD"}"#,
            _ => r#"{"event":"subscribed","channel":"book","chanId":17,"symbol":"tBTCUSD","prec":"P0","freq":"F0","len":"100","pair":"BTCUSD"}"#,
        };
        assert_eq!(decode(&mut adapter, event, &subs), vec![DomainEvent::Ignored]);
        (adapter, subs)
    }

    #[test]
    fn test_encode_book_subscriptions() {
        let mut adapter = BitfinexAdapter::new();
        let Message::Text(l2) = adapter
            .encode_subscribe(FeedKind::Level2Updates, &[btcusd()])
            .unwrap()
        else {
            panic!("expected text frame");
        };
        assert_eq!(
            l2,
            r#"{"event":"subscribe","channel":"book","symbol":"tBTCUSD","len":"100"}"#
        );

        let Message::Text(l3) = adapter
            .encode_subscribe(FeedKind::Level3Updates, &[btcusd()])
            .unwrap()
        else {
            panic!("expected text frame");
        };
        assert_eq!(
            l3,
            r#"{"event":"subscribe","channel":"book","symbol":"tBTCUSD","prec":"R0","len":"100"}"#
        );
    }

    #[test]
    fn test_unsubscribe_uses_channel_id() {
        let mut adapter = BitfinexAdapter::new();
        assert!(adapter
            .encode_unsubscribe(FeedKind::Trades, &[btcusd()])
            .unwrap()
            .is_none());

        let (mut adapter, _) = subscribed(FeedKind::Trades);
        assert_eq!(
            adapter
                .encode_unsubscribe(FeedKind::Trades, &[btcusd()])
                .unwrap(),
            Some(Message::Text(r#"{"event":"unsubscribe","chanId":17}"#.to_string()))
        );
        // Same market, other feed
        assert!(adapter
            .encode_unsubscribe(FeedKind::Ticker, &[btcusd()])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_heartbeat_ignored() {
        let (mut adapter, subs) = subscribed(FeedKind::Level2Updates);
        assert_eq!(decode(&mut adapter, r#"[17,"hb"]"#, &subs), vec![DomainEvent::Ignored]);
    }

    #[test]
    fn test_ticker() {
        let (mut adapter, subs) = subscribed(FeedKind::Ticker);
        let raw = r#"[17,[7616.5,31.89055171,7617.5,43.35811863,-550.8,-0.0674,7617.1,8314.71200815,8257.8,7500]]"#;

        let events = decode(&mut adapter, raw, &subs);
        let DomainEvent::Ticker(ticker) = &events[0] else {
            panic!("expected ticker, got {:?}", events);
        };
        assert_eq!(ticker.last.as_deref(), Some("7617.1"));
        assert_eq!(ticker.open.as_deref(), Some("8167.9"));
        assert_eq!(ticker.change_percent.as_deref(), Some("-6.74"));
        assert_eq!(ticker.bid_volume.as_deref(), Some("31.89055171"));
    }

    #[test]
    fn test_executed_trade() {
        let (mut adapter, subs) = subscribed(FeedKind::Trades);

        let backfill = r#"[17,[[401597393,1574694475039,0.005,7244.9]]]"#;
        assert_eq!(decode(&mut adapter, backfill, &subs), vec![DomainEvent::Ignored]);

        let raw = r#"[17,"te",[401597395,1574694478808,-0.005,7245.3]]"#;
        let events = decode(&mut adapter, raw, &subs);
        let DomainEvent::Trade(trade) = &events[0] else {
            panic!("expected trade, got {:?}", events);
        };
        assert_eq!(trade.trade_id, "401597395");
        assert_eq!(trade.unix_ms, 1_574_694_478_808);
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.amount, "0.005");

        let update = r#"[17,"tu",[401597395,1574694478808,-0.005,7245.3]]"#;
        assert_eq!(decode(&mut adapter, update, &subs), vec![DomainEvent::Ignored]);
    }

    #[test]
    fn test_truncated_trade_is_an_error() {
        let (mut adapter, subs) = subscribed(FeedKind::Trades);

        let missing = adapter.decode(Message::Text(r#"[17,"te"]"#.to_string()), &subs);
        assert!(matches!(
            missing,
            Err(ExchangeError::DeserializationError(msg)) if msg.starts_with("Malformed Bitfinex trade")
        ));

        let short = adapter.decode(Message::Text(r#"[17,"te",[401597395]]"#.to_string()), &subs);
        assert!(matches!(short, Err(ExchangeError::DeserializationError(_))));
    }

    #[test]
    fn test_level2_snapshot_and_update() {
        let (mut adapter, subs) = subscribed(FeedKind::Level2Updates);
        let snapshot = r#"[17,[[7254.7,3,3.3],[7254.6,2,1.1],[7255.1,1,-0.5],[7255.2,4,-2]]]"#;

        let events = decode(&mut adapter, snapshot, &subs);
        let DomainEvent::Level2Snapshot(book) = &events[0] else {
            panic!("expected snapshot, got {:?}", events);
        };
        assert_eq!(book.bids[0], Level2Point::new("7254.7", "3.3").with_count("3"));
        assert_eq!(book.asks[0], Level2Point::new("7255.1", "0.5").with_count("1"));
        assert_eq!(book.asks.len(), 2);

        let removal = r#"[17,[7255.1,0,-1]]"#;
        let events = decode(&mut adapter, removal, &subs);
        let DomainEvent::Level2Update(update) = &events[0] else {
            panic!("expected update, got {:?}", events);
        };
        assert!(update.bids.is_empty());
        assert_eq!(update.asks, vec![Level2Point::new("7255.1", "0").with_count("0")]);
    }

    #[test]
    fn test_level3_snapshot_and_update() {
        let (mut adapter, subs) = subscribed(FeedKind::Level3Updates);
        let snapshot = r#"[17,[[34668738066,7254.7,0.5],[34668738070,7255.1,-0.25]]]"#;

        let events = decode(&mut adapter, snapshot, &subs);
        let DomainEvent::Level3Snapshot(book) = &events[0] else {
            panic!("expected snapshot, got {:?}", events);
        };
        assert_eq!(book.bids, vec![Level3Point::new("34668738066", "7254.7", "0.5")]);
        assert_eq!(book.asks, vec![Level3Point::new("34668738070", "7255.1", "0.25")]);

        let events = decode(&mut adapter, r#"[17,[34668738070,0,-1]]"#, &subs);
        assert!(matches!(
            &events[..],
            [DomainEvent::Level3Update(update)] if update.asks[0].price == "0"
        ));
    }

    #[test]
    fn test_resubscribe_replaces_channel() {
        let (mut adapter, subs) = subscribed(FeedKind::Level2Updates);
        let again = r#"{"event":"subscribed","channel":"book","chanId":42,"symbol":"tBTCUSD","prec":"P0","freq":"F0","len":"100","pair":"BTCUSD"}"#;
        decode(&mut adapter, again, &subs);

        assert_eq!(adapter.channels.len(), 1);
        assert_eq!(
            decode(&mut adapter, r#"[17,[7255.1,1,-1]]"#, &subs),
            vec![DomainEvent::Ignored]
        );
    }

    #[test]
    fn test_error_event_is_rejection() {
        let mut adapter = BitfinexAdapter::new();
        let raw = r#"{"event":"error","msg":"symbol: invalid","code":10300,"channel":"trades","symbol":"tFOOBAR"}"#;
        assert_eq!(
            decode(&mut adapter, raw, &SubscriptionRegistry::new()),
            vec![DomainEvent::SubscriptionRejected {
                feed: Some(FeedKind::Trades),
                market_id: Some("tFOOBAR".to_string()),
                reason: "symbol: invalid (10300)".to_string(),
            }]
        );
    }

    #[test]
    fn test_unknown_channel_ignored() {
        let mut adapter = BitfinexAdapter::new();
        let subs = SubscriptionRegistry::new();
        assert_eq!(decode(&mut adapter, r#"[99,[1,2,3]]"#, &subs), vec![DomainEvent::Ignored]);
    }
}
