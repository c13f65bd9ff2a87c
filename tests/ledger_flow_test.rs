//! End-to-end wager flows through `LedgerServices`
//! Covers the place/amend/settle scenarios and persistence across restarts.

use matchwager::{
    config::{LedgerConfig, StorageBackend},
    storage::MemoryStorage,
    window::{Clock, ManualClock},
    LedgerServices, MatchOutcome, MatchRecord, PlaceWagerRequest, Prediction, WagerAction,
};
use std::{collections::BTreeSet, sync::Arc, time::Duration};

const START: i64 = 1_700_000_000_000;

fn services_with_balance(starting_balance: u64) -> (LedgerServices, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let mut config = LedgerConfig::testing();
    config.policy.starting_balance = starting_balance;
    let services = LedgerServices::with_storage(config, Arc::new(MemoryStorage::new()), clock.clone())
        .expect("Failed to build services");
    (services, clock)
}

fn open_match(services: &LedgerServices, match_id: &str, start: i64) {
    services.track_subject("guild", "p1", "Faker#KR1").unwrap();
    services
        .record_active_match("guild", MatchRecord::new(match_id, "p1", start))
        .unwrap();
}

fn wager(bettor: &str, prediction: Prediction, amount: u64) -> PlaceWagerRequest {
    PlaceWagerRequest {
        community: "guild".to_string(),
        bettor: bettor.to_string(),
        subject: None,
        prediction,
        amount,
    }
}

#[test]
fn test_winning_wager_pays_double_stake() {
    let (services, _) = services_with_balance(100);
    open_match(&services, "m1", START);

    let receipt = services.place_or_amend(&wager("alice", Prediction::Win, 50)).unwrap();
    assert_eq!(receipt.balance, 50);

    services.on_match_finished("m1", MatchOutcome::Win).unwrap();

    // 100 - 50 staked + 50 x 2 paid out
    let account = services.get_account("guild", "alice").unwrap();
    assert_eq!(account.balance, 150);
    assert_eq!(account.correct, 1);
    assert_eq!(account.current_streak, 1);
}

#[test]
fn test_amended_losing_wager() {
    let (services, clock) = services_with_balance(100);
    open_match(&services, "m1", START);

    services.place_or_amend(&wager("alice", Prediction::Win, 50)).unwrap();
    clock.advance(Duration::from_secs(60));
    let amended = services.place_or_amend(&wager("alice", Prediction::Lose, 80)).unwrap();
    assert_eq!(amended.balance, 20);
    assert_eq!(
        amended.action,
        WagerAction::Amended {
            previous_prediction: Prediction::Win,
            previous_amount: 50
        }
    );

    services.on_match_finished("m1", MatchOutcome::Win).unwrap();

    let account = services.get_account("guild", "alice").unwrap();
    assert_eq!(account.balance, 20);
    assert_eq!(account.incorrect, 1);
    assert_eq!(account.current_streak, 0);
}

#[test]
fn test_amend_beyond_means_changes_nothing() {
    let (services, _) = services_with_balance(80);
    open_match(&services, "m1", START);

    services.place_or_amend(&wager("alice", Prediction::Win, 50)).unwrap();
    assert_eq!(services.get_account("guild", "alice").unwrap().balance, 30);

    let err = services.place_or_amend(&wager("alice", Prediction::Lose, 90)).unwrap_err();
    assert_eq!(err.as_wager().map(|e| e.code()), Some("INSUFFICIENT_FUNDS"));

    let stored = services.store().get_wager("guild", "alice", "m1").unwrap().unwrap();
    assert_eq!((stored.prediction, stored.amount), (Prediction::Win, 50));
    assert_eq!(services.get_account("guild", "alice").unwrap().balance, 30);
}

#[test]
fn test_late_placement_rejected_without_mutation() {
    let (services, clock) = services_with_balance(100);
    open_match(&services, "m1", START);

    clock.advance(Duration::from_secs(180));
    let err = services.place_or_amend(&wager("alice", Prediction::Win, 10)).unwrap_err();
    assert_eq!(err.as_wager().map(|e| e.code()), Some("WINDOW_CLOSED"));

    assert!(services.store().get_wager("guild", "alice", "m1").unwrap().is_none());
    assert!(services.store().get_user("guild", "alice").unwrap().is_none());
}

#[test]
fn test_conservation_across_amendments() {
    let (services, _) = services_with_balance(1_000);
    open_match(&services, "m1", START);

    let amounts = [10, 400, 1, 999, 250, 1_000, 3];
    for (i, amount) in amounts.into_iter().enumerate() {
        let prediction = if i % 2 == 0 { Prediction::Win } else { Prediction::Lose };
        let receipt = services.place_or_amend(&wager("alice", prediction, amount)).unwrap();
        assert_eq!(receipt.balance + receipt.wager.amount, 1_000);
    }

    assert_eq!(services.store().list_wagers("m1").unwrap().len(), 1);
}

#[test]
fn test_settlement_twice_matches_once() {
    let (services, _) = services_with_balance(100);
    open_match(&services, "m1", START);
    services.place_or_amend(&wager("alice", Prediction::Win, 30)).unwrap();
    services.place_or_amend(&wager("bob", Prediction::Lose, 70)).unwrap();

    services.on_match_finished("m1", MatchOutcome::Win).unwrap();
    let alice_once = services.get_account("guild", "alice").unwrap();
    let bob_once = services.get_account("guild", "bob").unwrap();

    let second = services.on_match_finished("m1", MatchOutcome::Win).unwrap().unwrap();
    assert!(second.settled.is_empty());
    assert_eq!(second.already_settled, 2);

    assert_eq!(services.get_account("guild", "alice").unwrap(), alice_once);
    assert_eq!(services.get_account("guild", "bob").unwrap(), bob_once);

    // A contradicting outcome is ignored by the ingestion trigger
    assert!(services.on_match_finished("m1", MatchOutcome::Loss).unwrap().is_none());
    assert_eq!(services.get_account("guild", "alice").unwrap(), alice_once);
}

#[test]
fn test_milestones_accumulate_monotonically() {
    let (services, clock) = services_with_balance(1_000);
    services.track_subject("guild", "p1", "Faker#KR1").unwrap();

    let mut previous: BTreeSet<String> = BTreeSet::new();
    for round in 0..6 {
        let match_id = format!("m{}", round);
        services
            .record_active_match("guild", MatchRecord::new(&match_id, "p1", clock.now_ms()))
            .unwrap();
        services.place_or_amend(&wager("alice", Prediction::Win, 10)).unwrap();

        // Lose once in the middle to break the streak
        let outcome = if round == 3 { MatchOutcome::Loss } else { MatchOutcome::Win };
        services.on_match_finished(&match_id, outcome).unwrap();
        clock.advance(Duration::from_secs(600));

        let unlocked = services.store().list_unlocked("guild", "alice").unwrap();
        assert!(previous.is_subset(&unlocked));
        previous = unlocked;
    }

    assert!(previous.contains("bets_1"));
    assert!(previous.contains("wins_1"));
    assert!(previous.contains("streak_3"));
    assert!(!previous.contains("streak_5"));

    let progress = services.get_progress("guild", "alice").unwrap();
    assert_eq!(progress.unlocked_count, previous.len());
    let bets_10 = progress.milestones.iter().find(|p| p.id == "bets_10").unwrap();
    assert_eq!((bets_10.current, bets_10.target), (6, 10));
}

#[test]
fn test_ledger_survives_restart() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = LedgerConfig::production();
    config.storage.backend = StorageBackend::RocksDb;
    config.storage.data_directory = dir.path().join("ledger").to_string_lossy().to_string();
    config.policy.starting_balance = 100;

    let clock = Arc::new(ManualClock::new(START));

    {
        let services = LedgerServices::with_storage(
            config.clone(),
            matchwager::storage::open_storage(&config.storage).unwrap(),
            clock.clone(),
        )
        .unwrap();
        open_match(&services, "m1", START);
        services.place_or_amend(&wager("alice", Prediction::Win, 40)).unwrap();
    }

    let services = LedgerServices::with_storage(
        config.clone(),
        matchwager::storage::open_storage(&config.storage).unwrap(),
        clock,
    )
    .unwrap();

    assert_eq!(services.get_account("guild", "alice").unwrap().balance, 60);
    assert_eq!(services.list_tracked_subjects("guild").unwrap().len(), 1);
    assert!(services.get_active_match("guild", "p1").unwrap().is_some());

    let report = services.on_match_finished("m1", MatchOutcome::Win).unwrap().unwrap();
    assert_eq!(report.total_payout(), 80);
    assert_eq!(services.get_account("guild", "alice").unwrap().balance, 140);
}
