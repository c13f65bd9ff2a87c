//! Ledger record types
//!
//! Everything here is serialized as JSON into the key/value store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the bettor expects the tracked subject to do
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Prediction {
    Win,
    Lose,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prediction::Win => write!(f, "win"),
            Prediction::Lose => write!(f, "lose"),
        }
    }
}

/// Final result of a match for the tracked subject
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Win,
    Loss,
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchOutcome::Win => write!(f, "win"),
            MatchOutcome::Loss => write!(f, "loss"),
        }
    }
}

impl Prediction {
    /// Whether this prediction called the outcome
    pub fn matches(self, outcome: MatchOutcome) -> bool {
        matches!(
            (self, outcome),
            (Prediction::Win, MatchOutcome::Win) | (Prediction::Lose, MatchOutcome::Loss)
        )
    }
}

/// Per-community member account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAccount {
    pub community: String,
    pub member: String,
    pub balance: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub current_streak: u64,
    pub best_streak: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserAccount {
    pub fn new(community: &str, member: &str, starting_balance: u64, now: i64) -> Self {
        Self {
            community: community.to_string(),
            member: member.to_string(),
            balance: starting_balance,
            correct: 0,
            incorrect: 0,
            current_streak: 0,
            best_streak: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_bets(&self) -> u64 {
        self.correct + self.incorrect
    }

    /// Fold one settled wager into the accuracy and streak counters
    pub fn record_result(&mut self, correct: bool) {
        if correct {
            self.correct += 1;
            self.current_streak += 1;
            self.best_streak = self.best_streak.max(self.current_streak);
        } else {
            self.incorrect += 1;
            self.current_streak = 0;
        }
    }
}

/// A player whose matches can be wagered on within a community
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedSubject {
    pub community: String,
    pub subject_id: String,
    pub display_name: String,
    pub tracked_at: i64,
}

/// A match played by a tracked subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchRecord {
    pub match_id: String,
    pub subject_id: String,
    /// Match start, unix milliseconds
    pub start_timestamp: i64,
    /// `None` while the match is unresolved
    #[serde(default)]
    pub outcome: Option<MatchOutcome>,
    #[serde(default)]
    pub resolved_at: Option<i64>,
}

impl MatchRecord {
    pub fn new(match_id: &str, subject_id: &str, start_timestamp: i64) -> Self {
        Self {
            match_id: match_id.to_string(),
            subject_id: subject_id.to_string(),
            start_timestamp,
            outcome: None,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}

/// A bettor's stake on one match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wager {
    pub id: String,
    pub community: String,
    pub bettor: String,
    pub match_id: String,
    pub subject_id: String,
    pub prediction: Prediction,
    pub amount: u64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub settled: bool,
    #[serde(default)]
    pub settled_at: Option<i64>,
    /// Amount credited at settlement (0 for a lost wager)
    #[serde(default)]
    pub payout: u64,
}

/// A milestone recorded for a member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnlockedMilestone {
    pub community: String,
    pub member: String,
    pub milestone_id: String,
    pub unlocked_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_matches_outcome() {
        assert!(Prediction::Win.matches(MatchOutcome::Win));
        assert!(Prediction::Lose.matches(MatchOutcome::Loss));
        assert!(!Prediction::Win.matches(MatchOutcome::Loss));
        assert!(!Prediction::Lose.matches(MatchOutcome::Win));
    }

    #[test]
    fn test_streak_tracking() {
        let mut user = UserAccount::new("guild", "alice", 100, 0);
        user.record_result(true);
        user.record_result(true);
        assert_eq!(user.current_streak, 2);
        assert_eq!(user.best_streak, 2);

        user.record_result(false);
        assert_eq!(user.current_streak, 0);
        assert_eq!(user.best_streak, 2);
        assert_eq!(user.total_bets(), 3);
    }

    #[test]
    fn test_serde_wire_format() {
        let json = serde_json::to_string(&Prediction::Lose).unwrap();
        assert_eq!(json, "\"lose\"");

        let record: MatchRecord =
            serde_json::from_str(r#"{"match_id":"m1","subject_id":"p1","start_timestamp":5}"#).unwrap();
        assert!(!record.is_resolved());
    }
}
