//! Wager placement and amendment
//!
//! A bettor holds at most one wager per match. Placing again while the
//! betting window is open amends that wager in place, moving only the net
//! difference between the old and new stake.

use crate::{
    errors::{LedgerResult, WagerError},
    ledger_store::LedgerStore,
    metrics::LedgerMetrics,
    types::{Prediction, TrackedSubject, Wager},
    window::BettingWindow,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaceWagerRequest {
    pub community: String,
    pub bettor: String,
    /// Display name or subject id; `None` picks the only tracked subject
    #[serde(default)]
    pub subject: Option<String>,
    pub prediction: Prediction,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WagerAction {
    Placed,
    Amended {
        previous_prediction: Prediction,
        previous_amount: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WagerReceipt {
    pub wager: Wager,
    pub action: WagerAction,
    /// Bettor balance after the wager
    pub balance: u64,
    pub subject: TrackedSubject,
    /// Unix milliseconds at which the window for this match closes
    pub window_closes_at: i64,
}

pub struct WagerService {
    store: Arc<LedgerStore>,
    window: BettingWindow,
    metrics: Arc<LedgerMetrics>,
}

impl WagerService {
    pub fn new(store: Arc<LedgerStore>, window: BettingWindow, metrics: Arc<LedgerMetrics>) -> Self {
        Self {
            store,
            window,
            metrics,
        }
    }

    pub fn window(&self) -> BettingWindow {
        self.window
    }

    /// Pick the tracked subject a wager targets.
    ///
    /// A named selector matches a display name case-insensitively or a
    /// subject id exactly. Without a selector the community must track
    /// exactly one subject.
    pub fn resolve_subject(&self, community: &str, selector: Option<&str>) -> LedgerResult<TrackedSubject> {
        let mut tracked = self.store.list_tracked_subjects(community)?;

        match selector.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => {
                let lowered = name.to_lowercase();
                tracked
                    .into_iter()
                    .find(|s| s.subject_id == name || s.display_name.to_lowercase() == lowered)
                    .ok_or_else(|| WagerError::UnknownSubject(name.to_string()).into())
            }
            None => match tracked.len() {
                0 => Err(WagerError::NoTrackedSubjects.into()),
                1 => Ok(tracked.remove(0)),
                _ => Err(WagerError::AmbiguousSubject {
                    candidates: tracked.into_iter().map(|s| s.display_name).collect(),
                }
                .into()),
            },
        }
    }

    /// Place a new wager or amend the bettor's existing one on the
    /// subject's active match
    pub fn place_or_amend(&self, request: &PlaceWagerRequest) -> LedgerResult<WagerReceipt> {
        let result = self.try_place_or_amend(request);
        match &result {
            Ok(receipt) => {
                let amended = matches!(receipt.action, WagerAction::Amended { .. });
                self.metrics.record_wager(amended, receipt.wager.amount);
            }
            Err(e) => match e.as_wager() {
                Some(rejection) => {
                    self.metrics.record_rejection(rejection.code());
                    debug!(
                        community = %request.community,
                        bettor = %request.bettor,
                        code = rejection.code(),
                        "Wager rejected"
                    );
                }
                None => warn!(
                    community = %request.community,
                    bettor = %request.bettor,
                    error = %e,
                    "Wager failed"
                ),
            },
        }
        result
    }

    fn try_place_or_amend(&self, request: &PlaceWagerRequest) -> LedgerResult<WagerReceipt> {
        if request.amount == 0 {
            return Err(WagerError::InvalidAmount.into());
        }

        let community = request.community.as_str();
        let bettor = request.bettor.as_str();
        let subject = self.resolve_subject(community, request.subject.as_deref())?;

        let active = self
            .store
            .get_active_match(community, &subject.subject_id)?
            .ok_or_else(|| WagerError::NoActiveMatch {
                subject_id: subject.subject_id.clone(),
            })?;
        let match_id = active.match_id.clone();
        let window_closes_at = self.window.closes_at(active.start_timestamp);

        // Holding the match lock keeps resolution from landing between the
        // checks below and the write.
        self.store.with_match_lock(&match_id, || {
            let current = self
                .store
                .get_match(&match_id)?
                .ok_or_else(|| WagerError::UnknownMatch(match_id.clone()))?;
            if current.is_resolved() || !self.window.is_open(current.start_timestamp, self.store.now_ms()) {
                return Err(WagerError::WindowClosed {
                    match_id: match_id.clone(),
                }
                .into());
            }

            let (wager, action, balance) = self.store.transact(community, bettor, |txn| {
                match txn.wager(&match_id)? {
                    Some(existing) if existing.settled => Err(WagerError::WindowClosed {
                        match_id: match_id.clone(),
                    }
                    .into()),
                    Some(existing) => {
                        let action = WagerAction::Amended {
                            previous_prediction: existing.prediction,
                            previous_amount: existing.amount,
                        };
                        let wager = txn.amend_wager(existing, request.prediction, request.amount)?;
                        Ok((wager, action, txn.account().balance))
                    }
                    None => {
                        let wager = Wager {
                            id: uuid::Uuid::new_v4().to_string(),
                            community: community.to_string(),
                            bettor: bettor.to_string(),
                            match_id: match_id.clone(),
                            subject_id: subject.subject_id.clone(),
                            prediction: request.prediction,
                            amount: request.amount,
                            created_at: txn.now(),
                            updated_at: txn.now(),
                            settled: false,
                            settled_at: None,
                            payout: 0,
                        };
                        txn.place_wager(wager.clone())?;
                        Ok((wager, WagerAction::Placed, txn.account().balance))
                    }
                }
            })?;

            info!(
                community,
                bettor,
                match_id = %match_id,
                prediction = %wager.prediction,
                amount = wager.amount,
                balance,
                amended = matches!(action, WagerAction::Amended { .. }),
                "Wager recorded"
            );

            Ok(WagerReceipt {
                wager,
                action,
                balance,
                subject: subject.clone(),
                window_closes_at,
            })
        })
    }
}
