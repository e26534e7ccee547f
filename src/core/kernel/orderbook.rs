use crate::core::types::OrderBookEvent;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Sync state of one market's book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStatus {
    /// No snapshot seen yet; updates are buffered
    Uninitialized,
    Synced,
    /// A gap or resync request happened; updates are dropped until a snapshot
    OutOfSync,
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Synced => "synced",
            Self::OutOfSync => "out-of-sync",
        };
        f.write_str(name)
    }
}

/// What happened to one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome<U> {
    /// Continuous with the book; forward it
    Applied(U),
    /// Buffered until the first snapshot
    Pending,
    /// Dropped because the book is out of sync
    Suppressed,
    /// Sequence broke; the book is now out of sync
    Gap { expected: u64, received: u64 },
}

impl<U> UpdateOutcome<U> {
    pub const fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }
}

/// Anything that carries an optional exchange sequence id
pub trait Sequenced {
    fn sequence_id(&self) -> Option<u64>;
}

impl<P> Sequenced for OrderBookEvent<P> {
    fn sequence_id(&self) -> Option<u64> {
        self.sequence_id
    }
}

#[derive(Debug)]
struct SequenceState<U> {
    last_sequence_id: Option<u64>,
    status: BookStatus,
    pending: VecDeque<U>,
}

impl<U> Default for SequenceState<U> {
    fn default() -> Self {
        Self {
            last_sequence_id: None,
            status: BookStatus::Uninitialized,
            pending: VecDeque::new(),
        }
    }
}

impl<U: Sequenced> SequenceState<U> {
    fn accept(&mut self, update: U) -> UpdateOutcome<U> {
        match (update.sequence_id(), self.last_sequence_id) {
            (None, _) => UpdateOutcome::Applied(update),
            (Some(received), None) => {
                self.last_sequence_id = Some(received);
                UpdateOutcome::Applied(update)
            }
            (Some(received), Some(last)) if Some(received) == last.checked_add(1) => {
                self.last_sequence_id = Some(received);
                UpdateOutcome::Applied(update)
            }
            (Some(received), Some(last)) => {
                self.status = BookStatus::OutOfSync;
                self.pending.clear();
                UpdateOutcome::Gap {
                    expected: last.saturating_add(1),
                    received,
                }
            }
        }
    }
}

/// Counters across every market of one engine
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub applied: u64,
    pub buffered: u64,
    pub dropped: u64,
    pub gaps: u64,
}

/// Order-book consistency engine for one book feed family.
///
/// Tracks, per market id, the last applied sequence id and whether the book
/// can be trusted. Updates are forwarded only while they continue the
/// sequence one by one; anything arriving before the first snapshot is held
/// in a bounded buffer and replayed once the snapshot lands.
///
/// Prices and sizes are never inspected here. Only sequence ids are compared.
#[derive(Debug)]
pub struct OrderBookSync<U> {
    books: HashMap<String, SequenceState<U>>,
    buffer_limit: usize,
    stats: SyncStats,
}

impl<U: Sequenced> OrderBookSync<U> {
    pub fn new(buffer_limit: usize) -> Self {
        Self {
            books: HashMap::new(),
            buffer_limit,
            stats: SyncStats::default(),
        }
    }

    /// Install a snapshot and drain whatever was buffered before it.
    ///
    /// Buffered updates at or below `sequence_id` are discarded; the rest are
    /// applied in ascending order and their outcomes returned. A gap inside
    /// the buffer leaves the book out of sync and drops the remainder.
    pub fn apply_snapshot(
        &mut self,
        market_id: &str,
        sequence_id: Option<u64>,
    ) -> Vec<UpdateOutcome<U>> {
        let state = self.books.entry(market_id.to_string()).or_default();
        state.last_sequence_id = sequence_id;
        state.status = BookStatus::Synced;

        let mut pending: Vec<U> = state.pending.drain(..).collect();
        pending.sort_by_key(|update| update.sequence_id().unwrap_or(0));

        let mut outcomes = Vec::with_capacity(pending.len());
        for update in pending {
            if state.status != BookStatus::Synced {
                self.stats.dropped += 1;
                continue;
            }
            if let (Some(seq), Some(snapshot)) = (update.sequence_id(), sequence_id) {
                if seq <= snapshot {
                    self.stats.dropped += 1;
                    continue;
                }
            }
            let outcome = state.accept(update);
            match &outcome {
                UpdateOutcome::Applied(_) => self.stats.applied += 1,
                UpdateOutcome::Gap { expected, received } => {
                    self.stats.gaps += 1;
                    warn!(market_id, expected, received, "Gap in buffered updates");
                }
                _ => {}
            }
            outcomes.push(outcome);
        }

        debug!(market_id, ?sequence_id, drained = outcomes.len(), "Snapshot applied");
        outcomes
    }

    /// Run one update through the book's state machine
    pub fn apply_update(&mut self, market_id: &str, update: U) -> UpdateOutcome<U> {
        let state = self.books.entry(market_id.to_string()).or_default();
        match state.status {
            BookStatus::Uninitialized => {
                if self.buffer_limit == 0 {
                    self.stats.dropped += 1;
                    return UpdateOutcome::Pending;
                }
                if state.pending.len() >= self.buffer_limit {
                    state.pending.pop_front();
                    self.stats.dropped += 1;
                }
                state.pending.push_back(update);
                self.stats.buffered += 1;
                UpdateOutcome::Pending
            }
            BookStatus::OutOfSync => {
                self.stats.dropped += 1;
                UpdateOutcome::Suppressed
            }
            BookStatus::Synced => {
                let outcome = state.accept(update);
                match &outcome {
                    UpdateOutcome::Applied(_) => self.stats.applied += 1,
                    UpdateOutcome::Gap { expected, received } => {
                        self.stats.gaps += 1;
                        warn!(market_id, expected, received, "Sequence gap detected");
                    }
                    _ => {}
                }
                outcome
            }
        }
    }

    /// Force a market out of sync until its next snapshot
    pub fn mark_out_of_sync(&mut self, market_id: &str) {
        let state = self.books.entry(market_id.to_string()).or_default();
        state.status = BookStatus::OutOfSync;
        state.pending.clear();
    }

    pub fn status(&self, market_id: &str) -> BookStatus {
        self.books
            .get(market_id)
            .map_or(BookStatus::Uninitialized, |state| state.status)
    }

    pub fn last_sequence_id(&self, market_id: &str) -> Option<u64> {
        self.books
            .get(market_id)
            .and_then(|state| state.last_sequence_id)
    }

    pub fn pending_len(&self, market_id: &str) -> usize {
        self.books
            .get(market_id)
            .map_or(0, |state| state.pending.len())
    }

    /// Forget a market entirely
    pub fn remove(&mut self, market_id: &str) {
        self.books.remove(market_id);
    }

    pub fn clear(&mut self) {
        self.books.clear();
    }

    pub const fn stats(&self) -> SyncStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Upd(Option<u64>);

    impl Sequenced for Upd {
        fn sequence_id(&self) -> Option<u64> {
            self.0
        }
    }

    fn applied_seqs(outcomes: &[UpdateOutcome<Upd>]) -> Vec<u64> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                UpdateOutcome::Applied(Upd(Some(seq))) => Some(*seq),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_snapshot_then_continuous_updates() {
        let mut sync = OrderBookSync::new(16);
        assert!(sync.apply_snapshot("BTCUSD", Some(100)).is_empty());

        assert_eq!(
            sync.apply_update("BTCUSD", Upd(Some(101))),
            UpdateOutcome::Applied(Upd(Some(101)))
        );
        assert_eq!(sync.last_sequence_id("BTCUSD"), Some(101));
        assert_eq!(sync.status("BTCUSD"), BookStatus::Synced);
    }

    #[test]
    fn test_gap_then_suppression_until_snapshot() {
        let mut sync = OrderBookSync::new(16);
        sync.apply_snapshot("BTCUSD", Some(100));
        sync.apply_update("BTCUSD", Upd(Some(101)));

        assert_eq!(
            sync.apply_update("BTCUSD", Upd(Some(103))),
            UpdateOutcome::Gap {
                expected: 102,
                received: 103
            }
        );
        assert_eq!(sync.status("BTCUSD"), BookStatus::OutOfSync);
        assert_eq!(
            sync.apply_update("BTCUSD", Upd(Some(104))),
            UpdateOutcome::Suppressed
        );
        assert_eq!(sync.pending_len("BTCUSD"), 0);

        sync.apply_snapshot("BTCUSD", Some(200));
        assert_eq!(
            sync.apply_update("BTCUSD", Upd(Some(201))),
            UpdateOutcome::Applied(Upd(Some(201)))
        );
        assert_eq!(sync.stats().gaps, 1);
    }

    #[test]
    fn test_duplicate_sequence_is_a_gap() {
        let mut sync = OrderBookSync::new(16);
        sync.apply_snapshot("BTCUSD", Some(100));
        assert!(sync.apply_update("BTCUSD", Upd(Some(100))).is_gap());
    }

    #[test]
    fn test_updates_before_snapshot_are_drained_in_order() {
        let mut sync = OrderBookSync::new(16);
        for seq in [12, 10, 11, 9, 13] {
            assert_eq!(
                sync.apply_update("ETHBTC", Upd(Some(seq))),
                UpdateOutcome::Pending
            );
        }

        let outcomes = sync.apply_snapshot("ETHBTC", Some(10));
        assert_eq!(applied_seqs(&outcomes), vec![11, 12, 13]);
        assert_eq!(sync.last_sequence_id("ETHBTC"), Some(13));
        assert_eq!(sync.stats().dropped, 2);
    }

    #[test]
    fn test_gap_inside_buffer_drops_the_rest() {
        let mut sync = OrderBookSync::new(16);
        for seq in [11, 13, 14] {
            sync.apply_update("ETHBTC", Upd(Some(seq)));
        }
        let outcomes = sync.apply_snapshot("ETHBTC", Some(10));
        assert_eq!(applied_seqs(&outcomes), vec![11]);
        assert!(outcomes[1].is_gap());
        assert_eq!(outcomes.len(), 2);
        assert_eq!(sync.status("ETHBTC"), BookStatus::OutOfSync);
    }

    #[test]
    fn test_buffer_drops_oldest_on_overflow() {
        let mut sync = OrderBookSync::new(3);
        for seq in 1..=5 {
            sync.apply_update("BTCUSD", Upd(Some(seq)));
        }
        assert_eq!(sync.pending_len("BTCUSD"), 3);

        let outcomes = sync.apply_snapshot("BTCUSD", Some(2));
        assert_eq!(applied_seqs(&outcomes), vec![3, 4, 5]);
    }

    #[test]
    fn test_unsequenced_feed_passes_through() {
        let mut sync = OrderBookSync::new(16);
        assert_eq!(sync.apply_update("XBT/USD", Upd(None)), UpdateOutcome::Pending);

        let outcomes = sync.apply_snapshot("XBT/USD", None);
        assert_eq!(outcomes, vec![UpdateOutcome::Applied(Upd(None))]);
        assert_eq!(
            sync.apply_update("XBT/USD", Upd(None)),
            UpdateOutcome::Applied(Upd(None))
        );
    }

    #[test]
    fn test_markets_are_independent() {
        let mut sync = OrderBookSync::new(16);
        sync.apply_snapshot("A", Some(1));
        sync.apply_snapshot("B", Some(1));

        assert!(sync.apply_update("A", Upd(Some(5))).is_gap());
        assert_eq!(
            sync.apply_update("B", Upd(Some(2))),
            UpdateOutcome::Applied(Upd(Some(2)))
        );
    }

    #[test]
    fn test_mark_out_of_sync_and_remove() {
        let mut sync = OrderBookSync::new(16);
        sync.apply_snapshot("A", Some(1));
        sync.mark_out_of_sync("A");
        assert_eq!(sync.apply_update("A", Upd(Some(2))), UpdateOutcome::Suppressed);

        sync.remove("A");
        assert_eq!(sync.status("A"), BookStatus::Uninitialized);
        assert_eq!(sync.last_sequence_id("A"), None);
        // A removed market buffers again like a fresh one
        assert_eq!(sync.apply_update("A", Upd(Some(3))), UpdateOutcome::Pending);
    }
}
