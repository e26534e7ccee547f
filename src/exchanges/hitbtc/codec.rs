use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{frame_text, DomainEvent, ExchangeAdapter};
use crate::core::kernel::registry::SubscriptionRegistry;
use crate::core::types::{
    Capabilities, FeedKind, Level2Point, Market, OrderBookEvent, Ticker, Trade, TradeSide,
};
use crate::exchanges::hitbtc::types::{
    HitbtcBookLevel, HitbtcEnvelope, HitbtcOrderbook, HitbtcRequest, HitbtcSymbolParams,
    HitbtcTicker, HitbtcTrades,
};
use crate::utils::conversion::{change_from_open, iso_to_millis, now_millis};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

pub const EXCHANGE_NAME: &str = "HitBTC";

/// HitBTC JSON-RPC adapter
///
/// One subscribe call per market. Subscribe requests carry an id so a
/// rejection can be traced back to its feed and market.
#[derive(Debug, Default)]
pub struct HitbtcAdapter {
    next_id: u64,
    in_flight: HashMap<u64, (FeedKind, String)>,
}

impl HitbtcAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    const fn subscribe_method(feed: FeedKind) -> Option<&'static str> {
        match feed {
            FeedKind::Ticker => Some("subscribeTicker"),
            FeedKind::Trades => Some("subscribeTrades"),
            FeedKind::Level2Updates => Some("subscribeOrderbook"),
            FeedKind::Level2Snapshots | FeedKind::Level3Updates => None,
        }
    }

    const fn unsubscribe_method(feed: FeedKind) -> Option<&'static str> {
        match feed {
            FeedKind::Ticker => Some("unsubscribeTicker"),
            FeedKind::Trades => Some("unsubscribeTrades"),
            FeedKind::Level2Updates => Some("unsubscribeOrderbook"),
            FeedKind::Level2Snapshots | FeedKind::Level3Updates => None,
        }
    }

    fn single_market(markets: &[Market]) -> Result<&Market, ExchangeError> {
        match markets {
            [market] => Ok(market),
            _ => Err(ExchangeError::InvalidParameters(format!(
                "HitBTC subscribes one market per request, got {}",
                markets.len()
            ))),
        }
    }

    fn encode(method: &str, market: &Market, id: Option<u64>) -> Result<Message, ExchangeError> {
        let request = HitbtcRequest {
            method,
            params: HitbtcSymbolParams { symbol: &market.id },
            id,
        };
        serde_json::to_string(&request)
            .map(Message::Text)
            .map_err(|e| ExchangeError::SerializationError(e.to_string()))
    }

    fn params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ExchangeError> {
        let params = params.ok_or_else(|| {
            ExchangeError::DeserializationError("HitBTC notification without params".to_string())
        })?;
        serde_json::from_value(params).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse HitBTC params: {}", e))
        })
    }

    fn decode_reply(&mut self, envelope: HitbtcEnvelope) -> Vec<DomainEvent> {
        let origin = envelope.id.and_then(|id| self.in_flight.remove(&id));

        if let Some(error) = envelope.error {
            let (feed, market_id) = origin.map_or((None, None), |(f, m)| (Some(f), Some(m)));
            let reason = match error.description {
                Some(description) => format!("{} ({}): {}", error.message, error.code, description),
                None => format!("{} ({})", error.message, error.code),
            };
            return vec![DomainEvent::SubscriptionRejected {
                feed,
                market_id,
                reason,
            }];
        }

        if matches!(envelope.result, Some(Value::Bool(false))) {
            if let Some((feed, market_id)) = origin {
                return vec![DomainEvent::SubscriptionRejected {
                    feed: Some(feed),
                    market_id: Some(market_id),
                    reason: "subscription refused".to_string(),
                }];
            }
        }
        vec![DomainEvent::Ignored]
    }

    fn convert_ticker(raw: HitbtcTicker, market: &Market) -> Ticker {
        let (change, change_percent) = match (raw.last.as_deref(), raw.open.as_deref()) {
            (Some(last), Some(open)) => change_from_open(last, open).unzip(),
            _ => (None, None),
        };
        Ticker {
            exchange: EXCHANGE_NAME.to_string(),
            base: market.base.clone(),
            quote: market.quote.clone(),
            timestamp_ms: iso_to_millis(&raw.timestamp).unwrap_or_else(now_millis),
            last: raw.last,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            volume: raw.volume,
            quote_volume: raw.volume_quote,
            change,
            change_percent,
            bid: raw.bid,
            ask: raw.ask,
            ..Ticker::default()
        }
    }

    fn convert_trades(raw: HitbtcTrades, market: &Market) -> Vec<DomainEvent> {
        raw.data
            .into_iter()
            .map(|trade| {
                DomainEvent::Trade(Trade {
                    exchange: EXCHANGE_NAME.to_string(),
                    base: market.base.clone(),
                    quote: market.quote.clone(),
                    trade_id: trade.id.to_string(),
                    unix_ms: iso_to_millis(&trade.timestamp).unwrap_or_else(now_millis),
                    side: if trade.side == "buy" {
                        TradeSide::Buy
                    } else {
                        TradeSide::Sell
                    },
                    price: trade.price,
                    amount: trade.quantity,
                })
            })
            .collect()
    }

    fn convert_book(raw: HitbtcOrderbook, market: &Market) -> OrderBookEvent<Level2Point> {
        let points = |levels: Vec<HitbtcBookLevel>| {
            levels
                .into_iter()
                .map(|level| Level2Point::new(level.price, level.size))
                .collect::<Vec<_>>()
        };
        OrderBookEvent::new(EXCHANGE_NAME, market)
            .with_sequence(Some(raw.sequence))
            .with_timestamp(raw.timestamp.as_deref().and_then(iso_to_millis))
            .with_sides(points(raw.ask), points(raw.bid))
    }
}

impl ExchangeAdapter for HitbtcAdapter {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            has_tickers: true,
            has_trades: true,
            has_level2_updates: true,
            ..Capabilities::default()
        }
    }

    fn encode_subscribe(
        &mut self,
        feed: FeedKind,
        markets: &[Market],
    ) -> Result<Message, ExchangeError> {
        let method = Self::subscribe_method(feed)
            .ok_or_else(|| ExchangeError::not_supported(EXCHANGE_NAME, feed))?;
        let market = Self::single_market(markets)?;
        self.next_id += 1;
        self.in_flight
            .insert(self.next_id, (feed, market.id.clone()));
        Self::encode(method, market, Some(self.next_id))
    }

    fn encode_unsubscribe(
        &mut self,
        feed: FeedKind,
        markets: &[Market],
    ) -> Result<Option<Message>, ExchangeError> {
        let method = Self::unsubscribe_method(feed)
            .ok_or_else(|| ExchangeError::not_supported(EXCHANGE_NAME, feed))?;
        let market = Self::single_market(markets)?;
        Self::encode(method, market, None).map(Some)
    }

    fn decode(
        &mut self,
        message: Message,
        subscriptions: &SubscriptionRegistry,
    ) -> Result<Vec<DomainEvent>, ExchangeError> {
        let Some(text) = frame_text(message)? else {
            return Ok(vec![DomainEvent::Ignored]);
        };
        let envelope: HitbtcEnvelope = serde_json::from_str(&text)?;

        let Some(method) = envelope.method.as_deref() else {
            return Ok(self.decode_reply(envelope));
        };

        let events = match method {
            "ticker" => {
                let raw: HitbtcTicker = Self::params(envelope.params)?;
                subscriptions
                    .get(FeedKind::Ticker, &raw.symbol)
                    .map(|market| vec![DomainEvent::Ticker(Self::convert_ticker(raw, market))])
            }
            "updateTrades" => {
                let raw: HitbtcTrades = Self::params(envelope.params)?;
                subscriptions
                    .get(FeedKind::Trades, &raw.symbol)
                    .cloned()
                    .map(|market| Self::convert_trades(raw, &market))
            }
            "snapshotOrderbook" => {
                let raw: HitbtcOrderbook = Self::params(envelope.params)?;
                subscriptions
                    .get(FeedKind::Level2Updates, &raw.symbol)
                    .cloned()
                    .map(|market| vec![DomainEvent::Level2Snapshot(Self::convert_book(raw, &market))])
            }
            "updateOrderbook" => {
                let raw: HitbtcOrderbook = Self::params(envelope.params)?;
                subscriptions
                    .get(FeedKind::Level2Updates, &raw.symbol)
                    .cloned()
                    .map(|market| vec![DomainEvent::Level2Update(Self::convert_book(raw, &market))])
            }
            // Recent-trades backfill sent on subscribe
            "snapshotTrades" => None,
            other => {
                warn!(method = other, "Unhandled HitBTC notification");
                None
            }
        };

        Ok(events.unwrap_or_else(|| vec![DomainEvent::Ignored]))
    }

    fn on_connected(&mut self) {
        self.in_flight.clear();
    }
}
