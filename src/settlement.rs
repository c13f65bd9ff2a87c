//! Settlement Engine
//!
//! Resolves a finished match and pays out its wagers. Each wager is settled
//! in its own atomic write guarded by the wager's settled flag, so a failed
//! or repeated run can simply be invoked again: wagers already paid are
//! skipped and the rest are picked up.

use crate::{
    errors::{LedgerError, LedgerResult, WagerError},
    ledger_store::{LedgerStore, MatchResolution},
    metrics::LedgerMetrics,
    milestones::{self, BettorStats, MilestoneDefinition},
    types::{MatchOutcome, Prediction},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{error, info, warn};

/// One wager paid out (or marked lost) by a settlement run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettledWager {
    pub wager_id: String,
    pub community: String,
    pub bettor: String,
    pub prediction: Prediction,
    pub amount: u64,
    pub correct: bool,
    pub payout: u64,
    pub balance_after: u64,
}

/// A wager the run could not settle; it stays unsettled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementFailure {
    pub community: String,
    pub bettor: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MilestoneUnlock {
    pub community: String,
    pub bettor: String,
    pub milestone_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementReport {
    pub match_id: String,
    pub outcome: MatchOutcome,
    /// False when the outcome had already been recorded by an earlier run
    pub newly_resolved: bool,
    pub settled: Vec<SettledWager>,
    pub already_settled: usize,
    pub failures: Vec<SettlementFailure>,
    pub unlocked: Vec<MilestoneUnlock>,
}

impl SettlementReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total_payout(&self) -> u64 {
        self.settled.iter().map(|s| s.payout).sum()
    }
}

pub struct SettlementEngine {
    store: Arc<LedgerStore>,
    payout_multiplier: u64,
    catalog: &'static [MilestoneDefinition],
    metrics: Arc<LedgerMetrics>,
}

impl SettlementEngine {
    pub fn new(store: Arc<LedgerStore>, payout_multiplier: u64, metrics: Arc<LedgerMetrics>) -> Self {
        Self {
            store,
            payout_multiplier,
            catalog: milestones::catalog(),
            metrics,
        }
    }

    /// Record the outcome of `match_id` and settle every unsettled wager on it.
    ///
    /// A second call with the same outcome settles whatever the first left
    /// behind. A different outcome fails with `DuplicateSettlement`.
    pub fn settle_match(&self, match_id: &str, outcome: MatchOutcome) -> LedgerResult<SettlementReport> {
        let resolution = self.store.resolve_match(match_id, outcome)?;
        let newly_resolved = matches!(resolution, MatchResolution::Resolved(_));
        if newly_resolved {
            self.metrics.record_match_settled();
        }

        let wagers = self.store.list_wagers(match_id)?;
        let mut report = SettlementReport {
            match_id: match_id.to_string(),
            outcome,
            newly_resolved,
            settled: Vec::new(),
            already_settled: 0,
            failures: Vec::new(),
            unlocked: Vec::new(),
        };
        let mut bettors = BTreeSet::new();

        for wager in wagers {
            if wager.settled {
                report.already_settled += 1;
                bettors.insert((wager.community, wager.bettor));
                continue;
            }

            match self.store.settle_wager(
                &wager.community,
                &wager.bettor,
                match_id,
                outcome,
                self.payout_multiplier,
            ) {
                Ok(Some((settled, account))) => {
                    self.metrics.record_wager_settled(settled.payout);
                    report.settled.push(SettledWager {
                        wager_id: settled.id,
                        community: settled.community,
                        bettor: settled.bettor,
                        prediction: settled.prediction,
                        amount: settled.amount,
                        correct: settled.prediction.matches(outcome),
                        payout: settled.payout,
                        balance_after: account.balance,
                    });
                    bettors.insert((wager.community, wager.bettor));
                }
                // Settled concurrently since the listing
                Ok(None) => {
                    report.already_settled += 1;
                    bettors.insert((wager.community, wager.bettor));
                }
                Err(e) => {
                    self.metrics.record_settlement_failure();
                    error!(
                        match_id,
                        community = %wager.community,
                        bettor = %wager.bettor,
                        error = %e,
                        "Failed to settle wager"
                    );
                    report.failures.push(SettlementFailure {
                        community: wager.community,
                        bettor: wager.bettor,
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Bettors settled by an earlier run are evaluated again so a
        // milestone write that failed then is picked up by a retry.
        for (community, bettor) in &bettors {
            self.award_milestones(community, bettor, &mut report);
        }

        info!(
            match_id,
            %outcome,
            settled = report.settled.len(),
            already_settled = report.already_settled,
            failures = report.failures.len(),
            payout = report.total_payout(),
            unlocked = report.unlocked.len(),
            "Match settled"
        );
        Ok(report)
    }

    /// Ingestion-facing trigger. A conflicting outcome for an already
    /// resolved match is logged and ignored.
    pub fn on_match_finished(&self, match_id: &str, outcome: MatchOutcome) -> LedgerResult<Option<SettlementReport>> {
        match self.settle_match(match_id, outcome) {
            Ok(report) => Ok(Some(report)),
            Err(LedgerError::Wager(WagerError::DuplicateSettlement { .. })) => {
                warn!(match_id, %outcome, "Ignoring conflicting outcome for resolved match");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn award_milestones(&self, community: &str, bettor: &str, report: &mut SettlementReport) {
        let earned = match self.earned_milestones(community, bettor) {
            Ok(earned) => earned,
            Err(e) => {
                self.record_milestone_failure(community, bettor, &e, report);
                return;
            }
        };

        let mut recorded = 0u64;
        for id in earned {
            match self.store.record_milestone(community, bettor, &id) {
                Ok(true) => {
                    info!(community, bettor, milestone = %id, "Milestone unlocked");
                    recorded += 1;
                    report.unlocked.push(MilestoneUnlock {
                        community: community.to_string(),
                        bettor: bettor.to_string(),
                        milestone_id: id,
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    self.record_milestone_failure(community, bettor, &e, report);
                    break;
                }
            }
        }
        self.metrics.record_milestones_unlocked(recorded);
    }

    fn earned_milestones(&self, community: &str, bettor: &str) -> LedgerResult<Vec<String>> {
        let Some(account) = self.store.get_user(community, bettor)? else {
            return Ok(Vec::new());
        };
        let held = self.store.list_unlocked(community, bettor)?;
        Ok(milestones::evaluate(&BettorStats::from(&account), self.catalog, &held))
    }

    fn record_milestone_failure(&self, community: &str, bettor: &str, e: &LedgerError, report: &mut SettlementReport) {
        self.metrics.record_settlement_failure();
        warn!(
            community,
            bettor,
            error = %e,
            "Milestone evaluation failed"
        );
        report.failures.push(SettlementFailure {
            community: community.to_string(),
            bettor: bettor.to_string(),
            reason: format!("milestones: {}", e),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::StorageError,
        storage::{KeyValueStore, MemoryStorage, StorageBatch, WriteOp},
        types::{MatchRecord, Wager},
        window::ManualClock,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    const START: i64 = 1_700_000_000_000;

    /// Rejects writes to keys containing `poisoned_key_fragment` while `fail` is set
    struct FlakyStorage {
        inner: MemoryStorage,
        poisoned_key_fragment: String,
        fail: AtomicBool,
    }

    impl KeyValueStore for FlakyStorage {
        fn get(&self, key: &[u8]) -> LedgerResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn write(&self, batch: StorageBatch) -> LedgerResult<()> {
            let poisoned = batch.ops().iter().any(|op| {
                let key = match op {
                    WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
                };
                String::from_utf8_lossy(key).contains(&self.poisoned_key_fragment)
            });
            if poisoned && self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("injected".to_string()).into());
            }
            self.inner.write(batch)
        }

        fn scan_prefix(&self, prefix: &[u8]) -> LedgerResult<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.scan_prefix(prefix)
        }
    }

    fn wager(bettor: &str, prediction: Prediction, amount: u64) -> Wager {
        Wager {
            id: format!("w-{}", bettor),
            community: "g".to_string(),
            bettor: bettor.to_string(),
            match_id: "m1".to_string(),
            subject_id: "p1".to_string(),
            prediction,
            amount,
            created_at: START,
            updated_at: START,
            settled: false,
            settled_at: None,
            payout: 0,
        }
    }

    fn engine_with(kv: Arc<dyn KeyValueStore>) -> (Arc<LedgerStore>, SettlementEngine) {
        let store = Arc::new(LedgerStore::new(kv, Arc::new(ManualClock::new(START)), 100));
        let engine = SettlementEngine::new(store.clone(), 2, Arc::new(LedgerMetrics::new()));
        store
            .record_active_match("g", MatchRecord::new("m1", "p1", START))
            .unwrap();
        (store, engine)
    }

    fn place(store: &LedgerStore, wager: Wager) {
        let (community, bettor) = (wager.community.clone(), wager.bettor.clone());
        store
            .transact(&community, &bettor, |txn| txn.place_wager(wager))
            .unwrap();
    }

    #[test]
    fn test_settle_pays_winners_only() {
        let (store, engine) = engine_with(Arc::new(MemoryStorage::new()));
        place(&store, wager("alice", Prediction::Win, 100));
        place(&store, wager("bob", Prediction::Lose, 40));

        let report = engine.settle_match("m1", MatchOutcome::Win).unwrap();
        assert!(report.newly_resolved);
        assert!(report.is_complete());
        assert_eq!(report.settled.len(), 2);
        assert_eq!(report.total_payout(), 200);

        let alice = store.get_user("g", "alice").unwrap().unwrap();
        assert_eq!((alice.balance, alice.correct, alice.current_streak), (200, 1, 1));
        let bob = store.get_user("g", "bob").unwrap().unwrap();
        assert_eq!((bob.balance, bob.incorrect, bob.current_streak), (60, 1, 0));

        let unlocked: Vec<_> = report
            .unlocked
            .iter()
            .filter(|u| u.bettor == "alice")
            .map(|u| u.milestone_id.as_str())
            .collect();
        assert_eq!(unlocked, vec!["bets_1", "wins_1"]);
    }

    #[test]
    fn test_repeat_settlement_is_idempotent() {
        let (store, engine) = engine_with(Arc::new(MemoryStorage::new()));
        place(&store, wager("alice", Prediction::Win, 100));

        engine.settle_match("m1", MatchOutcome::Win).unwrap();
        let again = engine.settle_match("m1", MatchOutcome::Win).unwrap();

        assert!(!again.newly_resolved);
        assert!(again.settled.is_empty());
        assert_eq!(again.already_settled, 1);
        assert!(again.unlocked.is_empty());
        assert_eq!(store.get_user("g", "alice").unwrap().unwrap().balance, 200);
    }

    #[test]
    fn test_conflicting_outcome() {
        let (store, engine) = engine_with(Arc::new(MemoryStorage::new()));
        place(&store, wager("alice", Prediction::Win, 100));
        engine.settle_match("m1", MatchOutcome::Win).unwrap();

        let err = engine.settle_match("m1", MatchOutcome::Loss).unwrap_err();
        assert_eq!(
            err.as_wager(),
            Some(&WagerError::DuplicateSettlement {
                match_id: "m1".to_string()
            })
        );
        assert!(engine.on_match_finished("m1", MatchOutcome::Loss).unwrap().is_none());
        assert_eq!(store.get_user("g", "alice").unwrap().unwrap().balance, 200);
    }

    #[test]
    fn test_unknown_match_surfaces() {
        let (_, engine) = engine_with(Arc::new(MemoryStorage::new()));
        let err = engine.on_match_finished("nope", MatchOutcome::Win).unwrap_err();
        assert_eq!(err.as_wager().map(|e| e.code()), Some("UNKNOWN_MATCH"));
    }

    #[test]
    fn test_storage_failure_is_isolated_and_retried() {
        let flaky = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            poisoned_key_fragment: hex::encode("bob"),
            fail: AtomicBool::new(false),
        });
        let (store, engine) = engine_with(flaky.clone());
        place(&store, wager("alice", Prediction::Win, 100));
        place(&store, wager("bob", Prediction::Win, 50));

        flaky.fail.store(true, Ordering::SeqCst);
        let first = engine.settle_match("m1", MatchOutcome::Win).unwrap();
        assert_eq!(first.settled.len(), 1);
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].bettor, "bob");
        assert!(!store.get_wager("g", "bob", "m1").unwrap().unwrap().settled);
        assert_eq!(store.get_user("g", "bob").unwrap().unwrap().balance, 50);

        flaky.fail.store(false, Ordering::SeqCst);
        let retry = engine.settle_match("m1", MatchOutcome::Win).unwrap();
        assert_eq!(retry.already_settled, 1);
        assert_eq!(retry.settled.len(), 1);
        assert!(retry.is_complete());
        assert_eq!(store.get_user("g", "bob").unwrap().unwrap().balance, 150);
        assert_eq!(store.get_user("g", "alice").unwrap().unwrap().balance, 200);
    }

    #[test]
    fn test_milestone_write_failure_is_reported_and_retried() {
        let flaky = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            poisoned_key_fragment: "milestone:".to_string(),
            fail: AtomicBool::new(false),
        });
        let (store, engine) = engine_with(flaky.clone());
        place(&store, wager("alice", Prediction::Win, 100));

        flaky.fail.store(true, Ordering::SeqCst);
        let first = engine.settle_match("m1", MatchOutcome::Win).unwrap();
        assert_eq!(first.settled.len(), 1);
        assert!(first.unlocked.is_empty());
        assert!(!first.is_complete());
        assert_eq!(first.failures[0].bettor, "alice");
        assert!(store.list_unlocked("g", "alice").unwrap().is_empty());

        flaky.fail.store(false, Ordering::SeqCst);
        let retry = engine.settle_match("m1", MatchOutcome::Win).unwrap();
        assert!(retry.is_complete());
        assert_eq!(retry.already_settled, 1);
        assert!(retry.settled.is_empty());

        let held = store.list_unlocked("g", "alice").unwrap();
        assert!(held.contains("bets_1"));
        assert!(held.contains("wins_1"));
        assert_eq!(retry.unlocked.len(), held.len());
        assert_eq!(store.get_user("g", "alice").unwrap().unwrap().balance, 200);
    }

    #[test]
    fn test_concurrent_settlement_pays_each_wager_once() {
        let (store, engine) = engine_with(Arc::new(MemoryStorage::new()));
        let bettors: Vec<String> = (0..8).map(|i| format!("bettor-{}", i)).collect();
        for bettor in &bettors {
            place(&store, wager(bettor, Prediction::Win, 10));
        }

        let reports: Vec<SettlementReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..6)
                .map(|_| scope.spawn(|| engine.settle_match("m1", MatchOutcome::Win).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let settled: usize = reports.iter().map(|r| r.settled.len()).sum();
        assert_eq!(settled, bettors.len());
        assert_eq!(reports.iter().filter(|r| r.newly_resolved).count(), 1);

        // Each bettor earns bets_1 and wins_1 exactly once across all runs
        let unlocked: usize = reports.iter().map(|r| r.unlocked.len()).sum();
        assert_eq!(unlocked, bettors.len() * 2);

        for bettor in &bettors {
            let account = store.get_user("g", bettor).unwrap().unwrap();
            assert_eq!((account.balance, account.correct), (110, 1));
        }
    }
}
