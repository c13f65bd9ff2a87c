//! Service container wiring the ledger components together
//!
//! Everything the ingestion and presentation layers need is reachable from
//! [`LedgerServices`]. Use [`ServiceBuilder`] to swap in an in-memory store
//! or a controllable clock for tests.

use crate::{
    config::LedgerConfig,
    errors::{LedgerResult, WagerError},
    ledger_store::LedgerStore,
    metrics::LedgerMetrics,
    milestones::{self, BettorStats, MilestoneProgress},
    settlement::{SettlementEngine, SettlementReport},
    storage::{open_storage, KeyValueStore},
    types::{MatchOutcome, MatchRecord, TrackedSubject, UserAccount},
    wager_service::{PlaceWagerRequest, WagerReceipt, WagerService},
    window::{BettingWindow, Clock, SystemClock},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Read-only milestone view for one bettor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressReport {
    pub community: String,
    pub bettor: String,
    pub stats: BettorStats,
    pub milestones: Vec<MilestoneProgress>,
    pub unlocked_count: usize,
    pub total: usize,
}

/// Service container for the ledger
pub struct LedgerServices {
    config: LedgerConfig,
    store: Arc<LedgerStore>,
    wagers: WagerService,
    settlement: SettlementEngine,
    metrics: Arc<LedgerMetrics>,
}

impl LedgerServices {
    /// Open the configured storage backend and wire all services
    pub fn new(config: LedgerConfig) -> LedgerResult<Self> {
        ServiceBuilder::new(config).build()
    }

    /// Wire services over an existing key/value store
    pub fn with_storage(config: LedgerConfig, kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        ServiceBuilder::new(config).with_storage(kv).with_clock(clock).build()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<LedgerStore> {
        Arc::clone(&self.store)
    }

    pub fn metrics(&self) -> Arc<LedgerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn window(&self) -> BettingWindow {
        self.wagers.window()
    }

    // Ingestion

    pub fn track_subject(&self, community: &str, subject_id: &str, display_name: &str) -> LedgerResult<TrackedSubject> {
        self.store.track_subject(community, subject_id, display_name)
    }

    pub fn untrack_subject(&self, community: &str, subject_id: &str) -> LedgerResult<bool> {
        self.store.untrack_subject(community, subject_id)
    }

    /// Register a newly detected match for a tracked subject
    pub fn record_active_match(&self, community: &str, record: MatchRecord) -> LedgerResult<MatchRecord> {
        let tracked = self.store.list_tracked_subjects(community)?;
        if !tracked.iter().any(|s| s.subject_id == record.subject_id) {
            return Err(WagerError::UnknownSubject(record.subject_id).into());
        }
        self.store.record_active_match(community, record)
    }

    pub fn get_active_match(&self, community: &str, subject_id: &str) -> LedgerResult<Option<MatchRecord>> {
        self.store.get_active_match(community, subject_id)
    }

    pub fn on_match_finished(&self, match_id: &str, outcome: MatchOutcome) -> LedgerResult<Option<SettlementReport>> {
        self.settlement.on_match_finished(match_id, outcome)
    }

    pub fn settle_match(&self, match_id: &str, outcome: MatchOutcome) -> LedgerResult<SettlementReport> {
        self.settlement.settle_match(match_id, outcome)
    }

    // Presentation

    pub fn list_tracked_subjects(&self, community: &str) -> LedgerResult<Vec<TrackedSubject>> {
        self.store.list_tracked_subjects(community)
    }

    pub fn place_or_amend(&self, request: &PlaceWagerRequest) -> LedgerResult<WagerReceipt> {
        self.wagers.place_or_amend(request)
    }

    /// The member's account, created with the starting balance if new
    pub fn get_account(&self, community: &str, member: &str) -> LedgerResult<UserAccount> {
        self.store.get_or_create_user(community, member)
    }

    pub fn get_progress(&self, community: &str, bettor: &str) -> LedgerResult<ProgressReport> {
        let stats = match self.store.get_user(community, bettor)? {
            Some(account) => BettorStats::from(&account),
            None => BettorStats::default(),
        };
        let unlocked = self.store.list_unlocked(community, bettor)?;
        let catalog = milestones::catalog();
        let rows = milestones::progress(&stats, catalog, &unlocked);

        Ok(ProgressReport {
            community: community.to_string(),
            bettor: bettor.to_string(),
            stats,
            unlocked_count: rows.iter().filter(|p| p.unlocked).count(),
            total: catalog.len(),
            milestones: rows,
        })
    }
}

/// Builder for [`LedgerServices`] with optional overrides
pub struct ServiceBuilder {
    config: LedgerConfig,
    storage_override: Option<Arc<dyn KeyValueStore>>,
    clock_override: Option<Arc<dyn Clock>>,
}

impl ServiceBuilder {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            storage_override: None,
            clock_override: None,
        }
    }

    /// Override the storage backend (useful for testing)
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage_override = Some(storage);
        self
    }

    /// Override the clock (useful for testing)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock_override = Some(clock);
        self
    }

    pub fn build(self) -> LedgerResult<LedgerServices> {
        self.config.validate()?;

        let kv = match self.storage_override {
            Some(kv) => kv,
            None => open_storage(&self.config.storage)?,
        };
        let clock = self.clock_override.unwrap_or_else(|| Arc::new(SystemClock));
        let policy = &self.config.policy;

        let metrics = Arc::new(LedgerMetrics::new());
        let store = Arc::new(LedgerStore::new(kv, clock, policy.starting_balance));
        let wagers = WagerService::new(
            Arc::clone(&store),
            BettingWindow::new(self.config.window_duration()),
            Arc::clone(&metrics),
        );
        let settlement = SettlementEngine::new(Arc::clone(&store), policy.payout_multiplier, Arc::clone(&metrics));

        info!(
            starting_balance = policy.starting_balance,
            window_secs = policy.window_duration_secs,
            payout_multiplier = policy.payout_multiplier,
            "Ledger services ready"
        );

        Ok(LedgerServices {
            config: self.config,
            store,
            wagers,
            settlement,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{storage::MemoryStorage, window::ManualClock};

    const START: i64 = 1_700_000_000_000;

    fn services() -> LedgerServices {
        LedgerServices::with_storage(
            LedgerConfig::testing(),
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(START)),
        )
        .unwrap()
    }

    #[test]
    fn test_builds_from_testing_preset() {
        let services = LedgerServices::new(LedgerConfig::testing()).unwrap();
        assert_eq!(services.window(), BettingWindow::new(services.config().window_duration()));
    }

    #[test]
    fn test_match_requires_tracked_subject() {
        let services = services();
        let err = services
            .record_active_match("g", MatchRecord::new("m1", "p1", START))
            .unwrap_err();
        assert_eq!(err.as_wager().map(|e| e.code()), Some("UNKNOWN_SUBJECT"));
    }

    #[test]
    fn test_progress_for_new_bettor() {
        let services = services();
        let report = services.get_progress("g", "nobody").unwrap();
        assert_eq!(report.total, milestones::catalog().len());
        assert_eq!(report.unlocked_count, 0);
        assert!(report.milestones.iter().all(|p| p.current == 0));
        assert!(services.store().get_user("g", "nobody").unwrap().is_none());
    }

    #[test]
    fn test_progress_report_reads_back_from_json() {
        let services = services();
        let report = services.get_progress("g", "alice").unwrap();
        let json = serde_json::to_string(&report).unwrap();
        let parsed: ProgressReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_direct_settlement_surfaces_conflicts() {
        let services = services();
        services.track_subject("g", "p1", "Faker#KR1").unwrap();
        services
            .record_active_match("g", MatchRecord::new("m1", "p1", START))
            .unwrap();

        assert!(services.settle_match("m1", MatchOutcome::Loss).unwrap().newly_resolved);
        let err = services.settle_match("m1", MatchOutcome::Win).unwrap_err();
        assert_eq!(err.as_wager().map(|e| e.code()), Some("DUPLICATE_SETTLEMENT"));
        assert!(services.get_active_match("g", "p1").unwrap().is_none());
    }

    #[test]
    fn test_account_created_on_read() {
        let services = services();
        let account = services.get_account("g", "alice").unwrap();
        assert_eq!(account.balance, services.config().policy.starting_balance);
    }
}
