//! API request and response models

use crate::{
    settlement::SettlementReport,
    types::{MatchOutcome, MatchRecord, Prediction, TrackedSubject},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSubjectRequest {
    pub subject_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedSubjectsResponse {
    pub subjects: Vec<TrackedSubject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UntrackResponse {
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMatchRequest {
    pub match_id: String,
    pub subject_id: String,
    /// Unix milliseconds; defaults to the time of the request
    #[serde(default)]
    pub start_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveMatchResponse {
    #[serde(rename = "match")]
    pub record: MatchRecord,
    pub window_open: bool,
    pub window_closes_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishMatchRequest {
    pub outcome: MatchOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishMatchResponse {
    /// Set when the match was already resolved with a different outcome
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SettlementReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceWagerBody {
    pub bettor: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub prediction: Prediction,
    pub amount: u64,
}
