use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Sliding-window limit on outbound subscribe messages.
///
/// At most `permits` subscribes go out per `hold` window. A taken slot is
/// just its release time; `acquire` waits for the oldest one when all are
/// taken, and no task is ever spawned.
#[derive(Debug, Clone)]
pub struct SubscribeThrottle {
    permits: usize,
    hold: Duration,
    held: VecDeque<Instant>,
}

impl SubscribeThrottle {
    pub fn new(permits: usize, hold: Duration) -> Self {
        let permits = permits.max(1);
        Self {
            permits,
            hold,
            held: VecDeque::with_capacity(permits),
        }
    }

    /// Wait for a free slot and take it for `hold`.
    pub async fn acquire(&mut self) {
        if self.hold.is_zero() {
            return;
        }
        self.release_expired(Instant::now());
        if self.held.len() >= self.permits {
            if let Some(release_at) = self.held.pop_front() {
                sleep_until(release_at).await;
            }
        }
        self.held.push_back(Instant::now() + self.hold);
    }

    pub fn available(&self) -> usize {
        let now = Instant::now();
        let taken = self
            .held
            .iter()
            .filter(|release_at| **release_at > now)
            .count();
        self.permits.saturating_sub(taken)
    }

    fn release_expired(&mut self, now: Instant) {
        while self.held.front().is_some_and(|release_at| *release_at <= now) {
            self.held.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_permits_are_released_after_hold() {
        let mut throttle = SubscribeThrottle::new(2, Duration::from_millis(100));
        throttle.acquire().await;
        throttle.acquire().await;
        assert_eq!(throttle.available(), 0);

        tokio::time::sleep(Duration::from_millis(101)).await;
        assert_eq!(throttle.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_when_exhausted() {
        let mut throttle = SubscribeThrottle::new(4, Duration::from_millis(100));
        let start = Instant::now();
        for _ in 0..5 {
            throttle.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_are_spaced_per_window() {
        let mut throttle = SubscribeThrottle::new(2, Duration::from_millis(100));
        let start = Instant::now();
        let mut sent_at = Vec::new();
        for _ in 0..5 {
            throttle.acquire().await;
            sent_at.push(start.elapsed().as_millis());
        }
        assert_eq!(sent_at, vec![0, 0, 100, 100, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spawns_nothing() {
        let mut throttle = SubscribeThrottle::new(2, Duration::from_secs(60));
        throttle.acquire().await;
        throttle.acquire().await;
        assert_eq!(throttle.available(), 0);
        assert_eq!(tokio::runtime::Handle::current().metrics().num_alive_tasks(), 0);
    }

    #[tokio::test]
    async fn test_zero_hold_never_blocks() {
        let mut throttle = SubscribeThrottle::new(1, Duration::ZERO);
        for _ in 0..10 {
            throttle.acquire().await;
        }
        assert_eq!(throttle.available(), 1);
    }
}
