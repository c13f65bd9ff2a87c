//! Ledger counters and Prometheus text rendering

use dashmap::DashMap;
use std::{
    fmt::Write as _,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

#[derive(Debug)]
pub struct LedgerMetrics {
    start_time: Instant,

    pub http_requests_total: AtomicU64,

    pub wagers_placed_total: AtomicU64,
    pub wagers_amended_total: AtomicU64,
    pub wagered_amount_total: AtomicU64,

    pub matches_settled_total: AtomicU64,
    pub wagers_settled_total: AtomicU64,
    pub payouts_total: AtomicU64,
    pub settlement_failures_total: AtomicU64,

    pub milestones_unlocked_total: AtomicU64,

    /// Rejected wager requests by error code
    rejections: DashMap<&'static str, u64>,
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            http_requests_total: AtomicU64::new(0),
            wagers_placed_total: AtomicU64::new(0),
            wagers_amended_total: AtomicU64::new(0),
            wagered_amount_total: AtomicU64::new(0),
            matches_settled_total: AtomicU64::new(0),
            wagers_settled_total: AtomicU64::new(0),
            payouts_total: AtomicU64::new(0),
            settlement_failures_total: AtomicU64::new(0),
            milestones_unlocked_total: AtomicU64::new(0),
            rejections: DashMap::new(),
        }
    }

    pub fn record_http_request(&self) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wager(&self, amended: bool, amount: u64) {
        if amended {
            self.wagers_amended_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.wagers_placed_total.fetch_add(1, Ordering::Relaxed);
        }
        self.wagered_amount_total.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, code: &'static str) {
        *self.rejections.entry(code).or_insert(0) += 1;
    }

    pub fn record_match_settled(&self) {
        self.matches_settled_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wager_settled(&self, payout: u64) {
        self.wagers_settled_total.fetch_add(1, Ordering::Relaxed);
        self.payouts_total.fetch_add(payout, Ordering::Relaxed);
    }

    pub fn record_settlement_failure(&self) {
        self.settlement_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_milestones_unlocked(&self, count: u64) {
        self.milestones_unlocked_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render all counters in Prometheus exposition format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        let counters: [(&str, &str, &AtomicU64); 9] = [
            ("matchwager_http_requests_total", "Total number of HTTP requests", &self.http_requests_total),
            ("matchwager_wagers_placed_total", "New wagers accepted", &self.wagers_placed_total),
            ("matchwager_wagers_amended_total", "Existing wagers amended", &self.wagers_amended_total),
            ("matchwager_wagered_amount_total", "Currency staked across accepted wagers", &self.wagered_amount_total),
            ("matchwager_matches_settled_total", "Matches resolved and settled", &self.matches_settled_total),
            ("matchwager_wagers_settled_total", "Wagers settled", &self.wagers_settled_total),
            ("matchwager_payouts_total", "Currency credited to winning wagers", &self.payouts_total),
            ("matchwager_settlement_failures_total", "Wagers left unsettled by storage failures", &self.settlement_failures_total),
            ("matchwager_milestones_unlocked_total", "Milestones unlocked", &self.milestones_unlocked_total),
        ];

        for (name, help, value) in counters {
            let _ = write!(
                output,
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                value.load(Ordering::Relaxed)
            );
        }

        output.push_str(
            "# HELP matchwager_wager_rejections_total Rejected wager requests by code\n\
             # TYPE matchwager_wager_rejections_total counter\n",
        );
        let mut rejections: Vec<_> = self
            .rejections
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        rejections.sort();
        for (code, count) in rejections {
            let _ = writeln!(output, "matchwager_wager_rejections_total{{code=\"{}\"}} {}", code, count);
        }
        output.push('\n');

        let _ = write!(
            output,
            "# HELP matchwager_uptime_seconds Process uptime\n\
             # TYPE matchwager_uptime_seconds gauge\n\
             matchwager_uptime_seconds {}\n",
            self.uptime_seconds()
        );

        output
    }
}
