use crate::core::{
    errors::ExchangeError,
    types::{Capabilities, FeedKind, Market},
};
use async_trait::async_trait;

/// Consumer-facing surface of a market-data client.
///
/// Subscribe and unsubscribe calls never wait on the network: they update
/// the client's registry and return. A feed the exchange does not support is
/// rejected with [`ExchangeError::NotSupported`] and changes nothing.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn subscribe(&self, feed: FeedKind, market: &Market) -> Result<(), ExchangeError>;

    fn unsubscribe(&self, feed: FeedKind, market: &Market) -> Result<(), ExchangeError>;

    /// Recycle the connection and replay every subscription
    fn reconnect(&self) -> Result<(), ExchangeError>;

    /// Drop a book and ask the exchange for a fresh snapshot
    fn request_resync(&self, feed: FeedKind, market: &Market) -> Result<(), ExchangeError>;

    /// Tear everything down and wait until it is done
    async fn close(&self) -> Result<(), ExchangeError>;

    fn subscribe_ticker(&self, market: &Market) -> Result<(), ExchangeError> {
        self.subscribe(FeedKind::Ticker, market)
    }

    fn unsubscribe_ticker(&self, market: &Market) -> Result<(), ExchangeError> {
        self.unsubscribe(FeedKind::Ticker, market)
    }

    fn subscribe_trades(&self, market: &Market) -> Result<(), ExchangeError> {
        self.subscribe(FeedKind::Trades, market)
    }

    fn unsubscribe_trades(&self, market: &Market) -> Result<(), ExchangeError> {
        self.unsubscribe(FeedKind::Trades, market)
    }

    fn subscribe_level2_snapshots(&self, market: &Market) -> Result<(), ExchangeError> {
        self.subscribe(FeedKind::Level2Snapshots, market)
    }

    fn unsubscribe_level2_snapshots(&self, market: &Market) -> Result<(), ExchangeError> {
        self.unsubscribe(FeedKind::Level2Snapshots, market)
    }

    fn subscribe_level2_updates(&self, market: &Market) -> Result<(), ExchangeError> {
        self.subscribe(FeedKind::Level2Updates, market)
    }

    fn unsubscribe_level2_updates(&self, market: &Market) -> Result<(), ExchangeError> {
        self.unsubscribe(FeedKind::Level2Updates, market)
    }

    fn subscribe_level3_updates(&self, market: &Market) -> Result<(), ExchangeError> {
        self.subscribe(FeedKind::Level3Updates, market)
    }

    fn unsubscribe_level3_updates(&self, market: &Market) -> Result<(), ExchangeError> {
        self.unsubscribe(FeedKind::Level3Updates, market)
    }
}
