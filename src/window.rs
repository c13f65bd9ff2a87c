//! Betting window gate and clock sources

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

/// Source of "now" in unix milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Wagers are accepted while `now - start < duration`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BettingWindow {
    duration_ms: i64,
}

impl BettingWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration_ms: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// A start in the future (clock skew) counts as open.
    pub fn is_open(&self, match_start_ms: i64, now_ms: i64) -> bool {
        now_ms.saturating_sub(match_start_ms) < self.duration_ms
    }

    /// Unix milliseconds at which the window closes
    pub fn closes_at(&self, match_start_ms: i64) -> i64 {
        match_start_ms.saturating_add(self.duration_ms)
    }
}

impl Default for BettingWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(180))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: i64 = 1_700_000_000_000;

    #[test]
    fn test_window_boundaries() {
        let window = BettingWindow::default();
        let duration = 180_000;

        assert!(window.is_open(START, START));
        assert!(window.is_open(START, START + duration - 1));
        assert!(!window.is_open(START, START + duration));
        assert!(!window.is_open(START, START + 10 * duration));
    }

    #[test]
    fn test_future_start_is_open() {
        let window = BettingWindow::default();
        assert!(window.is_open(START + 5_000, START));
    }

    #[test]
    fn test_custom_duration() {
        let window = BettingWindow::new(Duration::from_secs(30));
        assert!(window.is_open(START, START + 29_999));
        assert!(!window.is_open(START, START + 30_000));
        assert_eq!(window.closes_at(START), START + 30_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(START);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_ms(), START + 2_000);
    }
}
