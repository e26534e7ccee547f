use crate::core::types::{FeedKind, Market};
use indexmap::IndexMap;

/// Per-connection subscription state.
///
/// One insertion-ordered map per feed kind, keyed by exchange market id.
/// At most one entry exists per `(feed, market.id)`.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    ticker: IndexMap<String, Market>,
    trades: IndexMap<String, Market>,
    level2_snapshots: IndexMap<String, Market>,
    level2_updates: IndexMap<String, Market>,
    level3_updates: IndexMap<String, Market>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    const fn map(&self, feed: FeedKind) -> &IndexMap<String, Market> {
        match feed {
            FeedKind::Ticker => &self.ticker,
            FeedKind::Trades => &self.trades,
            FeedKind::Level2Snapshots => &self.level2_snapshots,
            FeedKind::Level2Updates => &self.level2_updates,
            FeedKind::Level3Updates => &self.level3_updates,
        }
    }

    fn map_mut(&mut self, feed: FeedKind) -> &mut IndexMap<String, Market> {
        match feed {
            FeedKind::Ticker => &mut self.ticker,
            FeedKind::Trades => &mut self.trades,
            FeedKind::Level2Snapshots => &mut self.level2_snapshots,
            FeedKind::Level2Updates => &mut self.level2_updates,
            FeedKind::Level3Updates => &mut self.level3_updates,
        }
    }

    /// Register a market; returns false if it was already registered.
    pub fn insert(&mut self, feed: FeedKind, market: Market) -> bool {
        let map = self.map_mut(feed);
        if map.contains_key(&market.id) {
            return false;
        }
        map.insert(market.id.clone(), market);
        true
    }

    /// Remove a market, keeping the order of the remaining entries.
    pub fn remove(&mut self, feed: FeedKind, market_id: &str) -> Option<Market> {
        self.map_mut(feed).shift_remove(market_id)
    }

    pub fn get(&self, feed: FeedKind, market_id: &str) -> Option<&Market> {
        self.map(feed).get(market_id)
    }

    /// Markets of one feed in insertion order
    pub fn markets(&self, feed: FeedKind) -> Vec<Market> {
        self.map(feed).values().cloned().collect()
    }

    pub fn clear(&mut self) {
        for feed in FeedKind::ALL {
            self.map_mut(feed).clear();
        }
    }
}
