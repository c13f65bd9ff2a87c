//! Durable ledger state: users, tracked subjects, matches, wagers and
//! unlocked milestones.
//!
//! Rows are JSON values under prefix-namespaced keys. Identifier components
//! are hex-encoded so a prefix scan for one match or one member can never
//! pick up rows belonging to another.
//!
//! Every mutation of a member's account or wagers runs inside
//! [`LedgerStore::transact`], which holds that member's lock and writes all
//! touched rows in one atomic batch. Match rows are guarded by a separate
//! per-match lock.

use crate::{
    errors::{LedgerError, LedgerResult, StorageError, WagerError},
    storage::{KeyValueStore, StorageBatch},
    types::{
        MatchOutcome, MatchRecord, Prediction, TrackedSubject, UnlockedMilestone, UserAccount,
        Wager,
    },
    window::Clock,
};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};
use tracing::{debug, info};

const USER_PREFIX: &str = "user:";
const SUBJECT_PREFIX: &str = "subject:";
const MATCH_PREFIX: &str = "match:";
const ACTIVE_MATCH_PREFIX: &str = "active:";
const WAGER_PREFIX: &str = "wager:";
const MILESTONE_PREFIX: &str = "milestone:";

fn user_key(community: &str, member: &str) -> String {
    format!("{}{}:{}", USER_PREFIX, hex::encode(community), hex::encode(member))
}

fn subject_prefix(community: &str) -> String {
    format!("{}{}:", SUBJECT_PREFIX, hex::encode(community))
}

fn subject_key(community: &str, subject_id: &str) -> String {
    format!("{}{}", subject_prefix(community), hex::encode(subject_id))
}

fn match_key(match_id: &str) -> String {
    format!("{}{}", MATCH_PREFIX, hex::encode(match_id))
}

fn active_match_key(community: &str, subject_id: &str) -> String {
    format!(
        "{}{}:{}",
        ACTIVE_MATCH_PREFIX,
        hex::encode(community),
        hex::encode(subject_id)
    )
}

// Wagers are keyed match-first so settlement can scan one match.
fn wager_prefix(match_id: &str) -> String {
    format!("{}{}:", WAGER_PREFIX, hex::encode(match_id))
}

fn wager_key(community: &str, bettor: &str, match_id: &str) -> String {
    format!(
        "{}{}:{}",
        wager_prefix(match_id),
        hex::encode(community),
        hex::encode(bettor)
    )
}

fn milestone_prefix(community: &str, member: &str) -> String {
    format!(
        "{}{}:{}:",
        MILESTONE_PREFIX,
        hex::encode(community),
        hex::encode(member)
    )
}

fn milestone_key(community: &str, member: &str, milestone_id: &str) -> String {
    format!("{}{}", milestone_prefix(community, member), hex::encode(milestone_id))
}

fn encode<T: Serialize>(value: &T, what: &str) -> LedgerResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        LedgerError::Storage(StorageError::WriteFailed(format!(
            "Failed to encode {}: {}",
            what, e
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> LedgerResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        LedgerError::Storage(StorageError::CorruptedData(format!(
            "Failed to decode {}: {}",
            what, e
        )))
    })
}

/// Named mutexes, created on first use
#[derive(Default)]
struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    fn with<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // The mutex guards no data, so a poisoned lock is still usable.
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }
}

/// Result of resolving a match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResolution {
    /// Outcome recorded by this call
    Resolved(MatchRecord),
    /// Outcome was already recorded with the same value
    AlreadyResolved(MatchRecord),
}

/// Ledger persistence with per-key serialization
pub struct LedgerStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    starting_balance: u64,
    user_locks: KeyLocks,
    match_locks: KeyLocks,
}

impl LedgerStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, starting_balance: u64) -> Self {
        Self {
            kv,
            clock,
            starting_balance,
            user_locks: KeyLocks::default(),
            match_locks: KeyLocks::default(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn load<T: DeserializeOwned>(&self, key: &str, what: &str) -> LedgerResult<Option<T>> {
        match self.kv.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes, what)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str, what: &str) -> LedgerResult<Vec<T>> {
        self.kv
            .scan_prefix(prefix.as_bytes())?
            .iter()
            .map(|(_, value)| decode(value, what))
            .collect()
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Run `f` with exclusive access to a member's account and wagers.
    ///
    /// Staged changes are written in a single batch when `f` returns `Ok`;
    /// on `Err` nothing is written, not even a newly created account. A
    /// member seen for the first time starts with the starting balance.
    pub fn transact<T>(
        &self,
        community: &str,
        member: &str,
        f: impl FnOnce(&mut UserTxn<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let key = user_key(community, member);
        self.user_locks.with(&key, || {
            let now = self.clock.now_ms();
            let (user, created) = match self.load::<UserAccount>(&key, "user account")? {
                Some(user) => (user, false),
                None => (
                    UserAccount::new(community, member, self.starting_balance, now),
                    true,
                ),
            };

            let mut txn = UserTxn {
                store: self,
                user,
                user_dirty: created,
                staged_wagers: Vec::new(),
                now,
            };
            let value = f(&mut txn)?;
            txn.commit()?;

            if created {
                debug!(community, member, "Created member account");
            }
            Ok(value)
        })
    }

    pub fn get_user(&self, community: &str, member: &str) -> LedgerResult<Option<UserAccount>> {
        self.load(&user_key(community, member), "user account")
    }

    pub fn get_or_create_user(&self, community: &str, member: &str) -> LedgerResult<UserAccount> {
        self.transact(community, member, |txn| Ok(txn.account().clone()))
    }

    /// Credit (positive) or debit (negative) a member's balance
    pub fn adjust_balance(&self, community: &str, member: &str, delta: i64) -> LedgerResult<UserAccount> {
        self.transact(community, member, |txn| {
            if delta >= 0 {
                txn.credit(delta as u64);
            } else {
                txn.debit(delta.unsigned_abs())?;
            }
            Ok(txn.account().clone())
        })
    }

    // ------------------------------------------------------------------
    // Tracked subjects
    // ------------------------------------------------------------------

    pub fn track_subject(
        &self,
        community: &str,
        subject_id: &str,
        display_name: &str,
    ) -> LedgerResult<TrackedSubject> {
        let subject = TrackedSubject {
            community: community.to_string(),
            subject_id: subject_id.to_string(),
            display_name: display_name.to_string(),
            tracked_at: self.clock.now_ms(),
        };
        let mut batch = StorageBatch::new();
        batch.put(subject_key(community, subject_id), encode(&subject, "tracked subject")?);
        self.kv.write(batch)?;

        info!(community, subject_id, display_name, "Tracking subject");
        Ok(subject)
    }

    /// Returns whether the subject was tracked
    pub fn untrack_subject(&self, community: &str, subject_id: &str) -> LedgerResult<bool> {
        let key = subject_key(community, subject_id);
        if self.kv.get(key.as_bytes())?.is_none() {
            return Ok(false);
        }
        let mut batch = StorageBatch::new();
        batch.delete(key);
        batch.delete(active_match_key(community, subject_id));
        self.kv.write(batch)?;

        info!(community, subject_id, "Stopped tracking subject");
        Ok(true)
    }

    pub fn list_tracked_subjects(&self, community: &str) -> LedgerResult<Vec<TrackedSubject>> {
        self.scan(&subject_prefix(community), "tracked subject")
    }

    // ------------------------------------------------------------------
    // Matches
    // ------------------------------------------------------------------

    /// Run `f` while holding the lock for `match_id`
    pub fn with_match_lock<T>(&self, match_id: &str, f: impl FnOnce() -> LedgerResult<T>) -> LedgerResult<T> {
        self.match_locks.with(&match_key(match_id), f)
    }

    /// Store a newly detected match and make it the subject's active match
    /// in `community`. An already-known match keeps its stored fields.
    pub fn record_active_match(&self, community: &str, record: MatchRecord) -> LedgerResult<MatchRecord> {
        let match_id = record.match_id.clone();
        let key = match_key(&match_id);
        self.with_match_lock(&match_id, || {
            let mut batch = StorageBatch::new();
            let stored = match self.load::<MatchRecord>(&key, "match record")? {
                Some(existing) => existing,
                None => {
                    batch.put(key.clone(), encode(&record, "match record")?);
                    record
                }
            };
            batch.put(
                active_match_key(community, &stored.subject_id),
                stored.match_id.as_bytes().to_vec(),
            );
            self.kv.write(batch)?;

            info!(
                community,
                match_id = %stored.match_id,
                subject_id = %stored.subject_id,
                start = stored.start_timestamp,
                "Recorded active match"
            );
            Ok(stored)
        })
    }

    pub fn get_match(&self, match_id: &str) -> LedgerResult<Option<MatchRecord>> {
        self.load(&match_key(match_id), "match record")
    }

    /// The subject's current unresolved match in `community`, if any
    pub fn get_active_match(&self, community: &str, subject_id: &str) -> LedgerResult<Option<MatchRecord>> {
        let Some(match_id) = self.kv.get(active_match_key(community, subject_id).as_bytes())? else {
            return Ok(None);
        };
        let match_id = String::from_utf8(match_id).map_err(|e| {
            LedgerError::Storage(StorageError::CorruptedData(format!(
                "Invalid active match id: {}",
                e
            )))
        })?;

        Ok(self.get_match(&match_id)?.filter(|record| !record.is_resolved()))
    }

    /// Record the outcome of a match exactly once
    pub fn resolve_match(&self, match_id: &str, outcome: MatchOutcome) -> LedgerResult<MatchResolution> {
        let key = match_key(match_id);
        self.with_match_lock(match_id, || {
            let mut record = self
                .load::<MatchRecord>(&key, "match record")?
                .ok_or_else(|| WagerError::UnknownMatch(match_id.to_string()))?;

            match record.outcome {
                Some(existing) if existing == outcome => {
                    return Ok(MatchResolution::AlreadyResolved(record));
                }
                Some(_) => {
                    return Err(WagerError::DuplicateSettlement {
                        match_id: match_id.to_string(),
                    }
                    .into());
                }
                None => {}
            }

            record.outcome = Some(outcome);
            record.resolved_at = Some(self.clock.now_ms());

            let mut batch = StorageBatch::new();
            batch.put(key.clone(), encode(&record, "match record")?);
            self.kv.write(batch)?;

            info!(match_id, %outcome, "Match resolved");
            Ok(MatchResolution::Resolved(record))
        })
    }

    // ------------------------------------------------------------------
    // Wagers
    // ------------------------------------------------------------------

    pub fn get_wager(&self, community: &str, member: &str, match_id: &str) -> LedgerResult<Option<Wager>> {
        self.load(&wager_key(community, member, match_id), "wager")
    }

    /// Insert or overwrite a wager row without touching the balance
    pub fn upsert_wager(&self, wager: Wager) -> LedgerResult<()> {
        let community = wager.community.clone();
        let bettor = wager.bettor.clone();
        self.transact(&community, &bettor, |txn| {
            txn.stage_wager(wager);
            Ok(())
        })
    }

    /// Every wager on a match, across all communities
    pub fn list_wagers(&self, match_id: &str) -> LedgerResult<Vec<Wager>> {
        self.scan(&wager_prefix(match_id), "wager")
    }

    /// Settle one bettor's wager atomically with its balance and statistics
    /// update. `None` means it was already settled.
    pub fn settle_wager(
        &self,
        community: &str,
        bettor: &str,
        match_id: &str,
        outcome: MatchOutcome,
        payout_multiplier: u64,
    ) -> LedgerResult<Option<(Wager, UserAccount)>> {
        self.transact(community, bettor, |txn| {
            Ok(txn
                .settle_wager(match_id, outcome, payout_multiplier)?
                .map(|wager| (wager, txn.account().clone())))
        })
    }

    // ------------------------------------------------------------------
    // Milestones
    // ------------------------------------------------------------------

    /// Returns `true` if the milestone was newly recorded, `false` if the
    /// member already held it.
    pub fn record_milestone(&self, community: &str, member: &str, milestone_id: &str) -> LedgerResult<bool> {
        let key = milestone_key(community, member, milestone_id);
        self.user_locks.with(&user_key(community, member), || {
            if self.kv.get(key.as_bytes())?.is_some() {
                return Ok(false);
            }
            let record = UnlockedMilestone {
                community: community.to_string(),
                member: member.to_string(),
                milestone_id: milestone_id.to_string(),
                unlocked_at: self.clock.now_ms(),
            };
            let mut batch = StorageBatch::new();
            batch.put(key.clone(), encode(&record, "unlocked milestone")?);
            self.kv.write(batch)?;
            Ok(true)
        })
    }

    pub fn list_unlocked(&self, community: &str, member: &str) -> LedgerResult<BTreeSet<String>> {
        Ok(self
            .list_unlocked_records(community, member)?
            .into_iter()
            .map(|record| record.milestone_id)
            .collect())
    }

    pub fn list_unlocked_records(&self, community: &str, member: &str) -> LedgerResult<Vec<UnlockedMilestone>> {
        self.scan(&milestone_prefix(community, member), "unlocked milestone")
    }
}

/// Staged changes to one member's rows, see [`LedgerStore::transact`]
pub struct UserTxn<'a> {
    store: &'a LedgerStore,
    user: UserAccount,
    user_dirty: bool,
    staged_wagers: Vec<Wager>,
    now: i64,
}

impl UserTxn<'_> {
    pub fn account(&self) -> &UserAccount {
        &self.user
    }

    /// Timestamp shared by every row written in this transaction
    pub fn now(&self) -> i64 {
        self.now
    }

    /// The member's wager on `match_id`, including staged changes
    pub fn wager(&self, match_id: &str) -> LedgerResult<Option<Wager>> {
        if let Some(staged) = self.staged_wagers.iter().rev().find(|w| w.match_id == match_id) {
            return Ok(Some(staged.clone()));
        }
        self.store
            .get_wager(&self.user.community, &self.user.member, match_id)
    }

    fn touch(&mut self) {
        self.user.updated_at = self.now;
        self.user_dirty = true;
    }

    pub fn stage_wager(&mut self, wager: Wager) {
        self.staged_wagers.retain(|w| w.match_id != wager.match_id);
        self.staged_wagers.push(wager);
    }

    /// Fails with `InsufficientFunds` and leaves the balance alone if
    /// `amount` exceeds it.
    pub fn debit(&mut self, amount: u64) -> LedgerResult<()> {
        if amount > self.user.balance {
            return Err(WagerError::InsufficientFunds {
                available: self.user.balance,
                requested: amount,
            }
            .into());
        }
        self.user.balance -= amount;
        self.touch();
        Ok(())
    }

    pub fn credit(&mut self, amount: u64) {
        self.user.balance = self.user.balance.saturating_add(amount);
        self.touch();
    }

    pub fn record_result(&mut self, correct: bool) {
        self.user.record_result(correct);
        self.touch();
    }

    /// Debit `wager.amount` and stage the new row
    pub fn place_wager(&mut self, wager: Wager) -> LedgerResult<()> {
        self.debit(wager.amount)?;
        self.stage_wager(wager);
        Ok(())
    }

    /// Replace prediction and amount on an existing wager, applying only the
    /// net balance change. Fails with `InsufficientFunds` if
    /// `balance + old < new`, touching nothing.
    pub fn amend_wager(&mut self, mut wager: Wager, prediction: Prediction, amount: u64) -> LedgerResult<Wager> {
        let available = self.user.balance.saturating_add(wager.amount);
        if amount > available {
            return Err(WagerError::InsufficientFunds {
                available,
                requested: amount,
            }
            .into());
        }
        if amount > wager.amount {
            self.debit(amount - wager.amount)?;
        } else {
            self.credit(wager.amount - amount);
        }

        wager.prediction = prediction;
        wager.amount = amount;
        wager.updated_at = self.now;
        self.stage_wager(wager.clone());
        Ok(wager)
    }

    /// Pay out and mark the member's wager on `match_id` settled. Returns
    /// `None` when there is no unsettled wager to process.
    pub fn settle_wager(
        &mut self,
        match_id: &str,
        outcome: MatchOutcome,
        payout_multiplier: u64,
    ) -> LedgerResult<Option<Wager>> {
        let Some(mut wager) = self.wager(match_id)? else {
            return Ok(None);
        };
        if wager.settled {
            return Ok(None);
        }

        let correct = wager.prediction.matches(outcome);
        wager.payout = if correct {
            wager.amount.saturating_mul(payout_multiplier)
        } else {
            0
        };
        self.credit(wager.payout);
        self.record_result(correct);

        wager.settled = true;
        wager.settled_at = Some(self.now);
        wager.updated_at = self.now;
        self.stage_wager(wager.clone());
        Ok(Some(wager))
    }

    fn commit(self) -> LedgerResult<()> {
        let mut batch = StorageBatch::new();

        if self.user_dirty {
            batch.put(
                user_key(&self.user.community, &self.user.member),
                encode(&self.user, "user account")?,
            );
        }
        for wager in &self.staged_wagers {
            batch.put(
                wager_key(&wager.community, &wager.bettor, &wager.match_id),
                encode(wager, "wager")?,
            );
        }

        if batch.is_empty() {
            return Ok(());
        }
        self.store.kv.write(batch)
    }
}
