//! Milestone catalog and evaluator
//!
//! The catalog is a process-wide read-only table. Evaluation is a pure
//! function of a bettor's statistics and the ids they already hold, so it is
//! used both at settlement time and for the progress view.

use crate::types::UserAccount;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Statistic a milestone threshold is measured against
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneCategory {
    /// Settled wagers, won or lost
    Bets,
    /// Correct predictions
    Wins,
    /// Best run of consecutive correct predictions
    Streak,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MilestoneDefinition {
    pub id: &'static str,
    pub category: MilestoneCategory,
    pub threshold: u64,
    pub name: &'static str,
}

const fn milestone(
    id: &'static str,
    category: MilestoneCategory,
    threshold: u64,
    name: &'static str,
) -> MilestoneDefinition {
    MilestoneDefinition {
        id,
        category,
        threshold,
        name,
    }
}

/// Built-in catalog, initialized once
pub static MILESTONE_CATALOG: Lazy<Vec<MilestoneDefinition>> = Lazy::new(|| {
    use MilestoneCategory::*;
    vec![
        milestone("bets_1", Bets, 1, "First Bet"),
        milestone("bets_10", Bets, 10, "Gambler"),
        milestone("bets_50", Bets, 50, "High Roller"),
        milestone("bets_100", Bets, 100, "Degenerate"),
        milestone("wins_1", Wins, 1, "Beginner's Luck"),
        milestone("wins_10", Wins, 10, "Sharpshooter"),
        milestone("wins_50", Wins, 50, "Oracle"),
        milestone("streak_3", Streak, 3, "Hot Hand"),
        milestone("streak_5", Streak, 5, "On Fire"),
        milestone("streak_10", Streak, 10, "Unstoppable"),
    ]
});

pub fn catalog() -> &'static [MilestoneDefinition] {
    MILESTONE_CATALOG.as_slice()
}

/// Evaluator inputs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BettorStats {
    pub total_bets: u64,
    pub wins: u64,
    pub best_streak: u64,
}

impl BettorStats {
    pub fn value_for(&self, category: MilestoneCategory) -> u64 {
        match category {
            MilestoneCategory::Bets => self.total_bets,
            MilestoneCategory::Wins => self.wins,
            MilestoneCategory::Streak => self.best_streak,
        }
    }
}

impl From<&UserAccount> for BettorStats {
    fn from(user: &UserAccount) -> Self {
        Self {
            total_bets: user.total_bets(),
            wins: user.correct,
            best_streak: user.best_streak,
        }
    }
}

/// Ids whose threshold is met and that are not in `unlocked`, in catalog order
pub fn evaluate(
    stats: &BettorStats,
    catalog: &[MilestoneDefinition],
    unlocked: &BTreeSet<String>,
) -> Vec<String> {
    catalog
        .iter()
        .filter(|def| stats.value_for(def.category) >= def.threshold)
        .filter(|def| !unlocked.contains(def.id))
        .map(|def| def.id.to_string())
        .collect()
}

/// Progress toward one milestone
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MilestoneProgress {
    pub id: String,
    pub name: String,
    pub category: MilestoneCategory,
    /// Capped at `target`
    pub current: u64,
    pub target: u64,
    pub unlocked: bool,
}

pub fn progress(
    stats: &BettorStats,
    catalog: &[MilestoneDefinition],
    unlocked: &BTreeSet<String>,
) -> Vec<MilestoneProgress> {
    catalog
        .iter()
        .map(|def| MilestoneProgress {
            id: def.id.to_string(),
            name: def.name.to_string(),
            category: def.category,
            current: stats.value_for(def.category).min(def.threshold),
            target: def.threshold,
            unlocked: unlocked.contains(def.id),
        })
        .collect()
}
