//! matchwager - wager ledger and settlement engine
//!
//! Members of a chat community stake virtual currency on whether a tracked
//! player wins their live match. The crate keeps per-community balances,
//! accepts and amends wagers while a short betting window is open, settles
//! them once the match outcome is known, and awards milestones as bettors
//! accumulate bets, wins and streaks.
//!
//! [`services::LedgerServices`] is the entry point; [`api`] exposes it over
//! HTTP.

pub mod api;
pub mod config;
pub mod errors;
pub mod ledger_store;
pub mod metrics;
pub mod milestones;
pub mod services;
pub mod settlement;
pub mod storage;
pub mod types;
pub mod wager_service;
pub mod window;

pub use config::LedgerConfig;
pub use errors::{LedgerError, LedgerResult, WagerError};
pub use services::{LedgerServices, ProgressReport, ServiceBuilder};
pub use settlement::SettlementReport;
pub use types::{MatchOutcome, MatchRecord, Prediction, UserAccount, Wager};
pub use wager_service::{PlaceWagerRequest, WagerAction, WagerReceipt};
