use crate::core::config::StreamConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{ExchangeAdapter, MultiClient, TungsteniteFactory};
use crate::core::traits::MarketFeed;
use crate::core::types::{Market, StreamEvent};
use crate::exchanges::{bitfinex, hitbtc, kraken, okx};
use std::str::FromStr;
use tokio::sync::mpsc;

/// Supported exchange types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeType {
    HitBtc,
    Kraken,
    Okx,
    Bitfinex,
}

impl ExchangeType {
    pub const ALL: [Self; 4] = [Self::HitBtc, Self::Kraken, Self::Okx, Self::Bitfinex];

    pub const fn ws_url(self) -> &'static str {
        match self {
            Self::HitBtc => hitbtc::HITBTC_WS_URL,
            Self::Kraken => kraken::KRAKEN_WS_URL,
            Self::Okx => okx::OKX_WS_URL,
            Self::Bitfinex => bitfinex::BITFINEX_WS_URL,
        }
    }

    /// A liquid market to try the exchange with
    pub fn sample_market(self) -> Market {
        match self {
            Self::HitBtc => Market::new("BTCUSD", "BTC", "USD"),
            Self::Kraken => Market::new("XBT/USD", "BTC", "USD"),
            Self::Okx => Market::new("BTC-USDT", "BTC", "USDT"),
            Self::Bitfinex => Market::new("tBTCUSD", "BTC", "USD"),
        }
    }
}

impl std::fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HitBtc => write!(f, "HitBTC"),
            Self::Kraken => write!(f, "Kraken"),
            Self::Okx => write!(f, "OKX"),
            Self::Bitfinex => write!(f, "Bitfinex"),
        }
    }
}

impl FromStr for ExchangeType {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hitbtc" => Ok(Self::HitBtc),
            "kraken" => Ok(Self::Kraken),
            "okx" | "okex" => Ok(Self::Okx),
            "bitfinex" => Ok(Self::Bitfinex),
            other => Err(ExchangeError::InvalidParameters(format!(
                "Unknown exchange: {}",
                other
            ))),
        }
    }
}

pub type FeedClient = (Box<dyn MarketFeed>, mpsc::Receiver<StreamEvent>);

/// Factory for creating streaming clients by exchange
pub struct ExchangeFactory;

impl ExchangeFactory {
    /// One shared connection carrying every subscription
    ///
    /// Must be called inside a tokio runtime.
    pub fn create_client(exchange_type: ExchangeType, config: StreamConfig) -> FeedClient {
        let (client, events) = match exchange_type {
            ExchangeType::HitBtc => hitbtc::create_hitbtc_client(config),
            ExchangeType::Kraken => kraken::create_kraken_client(config),
            ExchangeType::Okx => okx::create_okx_client(config),
            ExchangeType::Bitfinex => bitfinex::create_bitfinex_client(config),
        };
        (Box::new(client), events)
    }

    /// A separate connection per market, merged into one event stream
    pub fn create_per_market_client(
        exchange_type: ExchangeType,
        config: StreamConfig,
    ) -> FeedClient {
        let url = exchange_type.ws_url();
        match exchange_type {
            ExchangeType::HitBtc => Self::per_market(hitbtc::HitbtcAdapter::new, url, config),
            ExchangeType::Kraken => Self::per_market(kraken::KrakenAdapter::new, url, config),
            ExchangeType::Okx => Self::per_market(okx::OkxAdapter::new, url, config),
            ExchangeType::Bitfinex => Self::per_market(bitfinex::BitfinexAdapter::new, url, config),
        }
    }

    fn per_market<A: ExchangeAdapter>(
        make_adapter: fn() -> A,
        url: &str,
        config: StreamConfig,
    ) -> FeedClient {
        let template = make_adapter();
        let factory = TungsteniteFactory::new(
            template.name(),
            url,
            template.capabilities(),
            move |_: &Market| make_adapter(),
        )
        .with_connect_timeout(config.connect_timeout());
        let (client, events) = MultiClient::new(factory, config);
        (Box::new(client), events)
    }
}
