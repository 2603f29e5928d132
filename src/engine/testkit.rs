//! In-memory store and gateway fakes for engine tests.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use crate::config::ConfirmRetrySettings;
use crate::database::{
    Attribution, BroadcastRun, InviteLink, Member, MemberStatus, RecipientOutcome, RunStatus,
    StatusCounts,
};
use crate::engine::{now_ts, JoinEvent, LinkStore, MemberStore, RunStore};
use crate::error::{Error, Result};
use crate::gateway::Gateway;

/// Zero-backoff confirmation retry, so tests never sleep.
pub fn immediate_retry(max_attempts: u32) -> ConfirmRetrySettings {
    ConfirmRetrySettings {
        max_attempts,
        initial_backoff: Duration::ZERO,
    }
}

/// One store implementing all three store traits over mutexed maps.
///
/// Conditional transitions run under the map lock, which models the
/// compare-and-swap semantics the Mongo repositories get from filtered
/// updates.
#[derive(Default)]
pub struct MemoryStore {
    members: Mutex<HashMap<i64, Member>>,
    links: Mutex<HashMap<String, InviteLink>>,
    runs: Mutex<HashMap<ObjectId, BroadcastRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn member(&self, user_id: i64) -> Option<Member> {
        self.members.lock().unwrap().get(&user_id).cloned()
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    pub fn link(&self, token: &str) -> Option<InviteLink> {
        self.links.lock().unwrap().get(token).cloned()
    }

    pub fn links_is_empty(&self) -> bool {
        self.links.lock().unwrap().is_empty()
    }

    /// Members currently attributed to the given token.
    pub fn attributed_to(&self, token: &str) -> usize {
        self.members
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.attributed_link.as_deref() == Some(token))
            .count()
    }

    pub fn seed_approved(&self, ids: impl IntoIterator<Item = i64>) {
        self.seed(ids, MemberStatus::Approved);
    }

    pub fn seed_pending(&self, ids: impl IntoIterator<Item = i64>) {
        self.seed(ids, MemberStatus::Pending);
    }

    pub fn seed_left(&self, ids: impl IntoIterator<Item = i64>) {
        self.seed(ids, MemberStatus::Left);
    }

    fn seed(&self, ids: impl IntoIterator<Item = i64>, status: MemberStatus) {
        let now = now_ts();
        let mut members = self.members.lock().unwrap();
        for user_id in ids {
            members.insert(
                user_id,
                Member {
                    user_id,
                    username: None,
                    first_name: format!("User {}", user_id),
                    last_name: None,
                    status,
                    attributed_link: None,
                    joined_at: now,
                    approved_at: (status == MemberStatus::Approved).then_some(now),
                    left_at: (status == MemberStatus::Left).then_some(now),
                    last_seen_at: now,
                },
            );
        }
    }
}

#[async_trait]
impl MemberStore for MemoryStore {
    async fn get(&self, user_id: i64) -> Result<Option<Member>> {
        Ok(self.member(user_id))
    }

    async fn upsert_pending(&self, event: &JoinEvent, now: i64) -> Result<()> {
        let mut members = self.members.lock().unwrap();
        match members.entry(event.user_id) {
            Entry::Occupied(mut occupied) => {
                let member = occupied.get_mut();
                member.username = event.username.clone();
                member.first_name = event.first_name.clone();
                member.last_name = event.last_name.clone();
                member.last_seen_at = now;
                if matches!(member.status, MemberStatus::Left | MemberStatus::Rejected) {
                    member.status = MemberStatus::Pending;
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Member {
                    user_id: event.user_id,
                    username: event.username.clone(),
                    first_name: event.first_name.clone(),
                    last_name: event.last_name.clone(),
                    status: MemberStatus::Pending,
                    attributed_link: None,
                    joined_at: now,
                    approved_at: None,
                    left_at: None,
                    last_seen_at: now,
                });
            }
        }
        Ok(())
    }

    async fn approve(&self, user_id: i64, attribution: &Attribution, now: i64) -> Result<bool> {
        let mut members = self.members.lock().unwrap();
        match members.get_mut(&user_id) {
            Some(member) if member.status == MemberStatus::Pending => {
                member.status = MemberStatus::Approved;
                member.attributed_link = attribution.token().map(String::from);
                member.approved_at = Some(now);
                member.last_seen_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reject(&self, user_id: i64, now: i64) -> Result<bool> {
        let mut members = self.members.lock().unwrap();
        match members.get_mut(&user_id) {
            Some(member) if member.status == MemberStatus::Pending => {
                member.status = MemberStatus::Rejected;
                member.last_seen_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_left(&self, user_id: i64, now: i64) -> Result<bool> {
        let mut members = self.members.lock().unwrap();
        match members.get_mut(&user_id) {
            Some(member) if member.status == MemberStatus::Approved => {
                member.status = MemberStatus::Left;
                member.left_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_last_seen(&self, user_id: i64, now: i64) -> Result<()> {
        if let Some(member) = self.members.lock().unwrap().get_mut(&user_id) {
            member.last_seen_at = now;
        }
        Ok(())
    }

    async fn approved(&self) -> Result<Vec<Member>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.status == MemberStatus::Approved)
            .cloned()
            .collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for member in self.members.lock().unwrap().values() {
            match member.status {
                MemberStatus::Pending => counts.pending += 1,
                MemberStatus::Approved => counts.approved += 1,
                MemberStatus::Rejected => counts.rejected += 1,
                MemberStatus::Left => counts.left += 1,
            }
        }
        Ok(counts)
    }

    async fn attribution_counts(&self) -> Result<Vec<(String, u64)>> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for member in self.members.lock().unwrap().values() {
            if let Some(token) = &member.attributed_link {
                *counts.entry(token.clone()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

#[async_trait]
impl LinkStore for MemoryStore {
    async fn insert(&self, link: &InviteLink) -> Result<()> {
        self.links
            .lock()
            .unwrap()
            .insert(link.token.clone(), link.clone());
        Ok(())
    }

    async fn by_token(&self, token: &str) -> Result<Option<InviteLink>> {
        Ok(self.link(token))
    }

    async fn record_usage(&self, token: &str) -> Result<u64> {
        let mut links = self.links.lock().unwrap();
        let link = links.get_mut(token).ok_or(Error::NotFound("invite link"))?;
        link.uses += 1;
        Ok(link.uses)
    }

    async fn set_revoked(&self, token: &str) -> Result<bool> {
        let mut links = self.links.lock().unwrap();
        match links.get_mut(token) {
            Some(link) => {
                link.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn all(&self) -> Result<Vec<InviteLink>> {
        Ok(self.links.lock().unwrap().values().cloned().collect())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert(&self, run: &BroadcastRun) -> Result<()> {
        self.runs.lock().unwrap().insert(run.id, run.clone());
        Ok(())
    }

    async fn get(&self, id: ObjectId) -> Result<Option<BroadcastRun>> {
        Ok(self.runs.lock().unwrap().get(&id).cloned())
    }

    async fn record_outcome(
        &self,
        id: ObjectId,
        member_id: i64,
        outcome: &RecipientOutcome,
    ) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(&id).ok_or(Error::NotFound("broadcast run"))?;
        run.outcomes.insert(member_id.to_string(), outcome.clone());
        Ok(())
    }

    async fn set_status(&self, id: ObjectId, from: &[RunStatus], to: RunStatus) -> Result<bool> {
        let mut runs = self.runs.lock().unwrap();
        match runs.get_mut(&id) {
            Some(run) if from.contains(&run.status) => {
                run.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn due_runs(&self, now: i64) -> Result<Vec<BroadcastRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|run| match run.status {
                RunStatus::InProgress => true,
                RunStatus::Pending => run.scheduled_at.map_or(true, |ts| ts <= now),
                _ => false,
            })
            .cloned()
            .collect())
    }
}

/// How the fake gateway treats sends to one recipient.
#[derive(Clone, Copy, Debug)]
pub enum SendMode {
    Ok,
    /// Always fails with a transient error.
    Transient,
    /// Always fails permanently (blocked / deactivated).
    Permanent,
    /// Fails transiently N times, then succeeds.
    FailTimes(u32),
}

/// Scripted gateway double recording every outbound call.
#[derive(Default)]
pub struct FakeGateway {
    link_counter: AtomicUsize,
    fail_links: AtomicBool,
    fail_confirmations: AtomicBool,
    approve_attempts: AtomicUsize,
    approved: Mutex<Vec<i64>>,
    declined: Mutex<Vec<i64>>,
    revoked: Mutex<Vec<String>>,
    send_modes: Mutex<HashMap<i64, SendMode>>,
    send_attempts: Mutex<HashMap<i64, u32>>,
    sent: Mutex<Vec<i64>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make invite-link creation fail with a transient error.
    pub fn fail_link_creation(&self) {
        self.fail_links.store(true, Ordering::Relaxed);
    }

    /// Make approve/decline confirmations fail with a transient error.
    pub fn fail_confirmations(&self) {
        self.fail_confirmations.store(true, Ordering::Relaxed);
    }

    pub fn set_send_mode(&self, user_id: i64, mode: SendMode) {
        self.send_modes.lock().unwrap().insert(user_id, mode);
    }

    pub fn approved(&self) -> Vec<i64> {
        self.approved.lock().unwrap().clone()
    }

    pub fn declined(&self) -> Vec<i64> {
        self.declined.lock().unwrap().clone()
    }

    pub fn approve_attempts(&self) -> usize {
        self.approve_attempts.load(Ordering::Relaxed)
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn sent_to(&self) -> Vec<i64> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn send_attempts(&self, user_id: i64) -> u32 {
        self.send_attempts
            .lock()
            .unwrap()
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    fn transient() -> Error {
        Error::GatewayUnavailable(anyhow::anyhow!("fake gateway outage"))
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn approve_join(&self, user_id: i64) -> Result<()> {
        self.approve_attempts.fetch_add(1, Ordering::Relaxed);
        if self.fail_confirmations.load(Ordering::Relaxed) {
            return Err(Self::transient());
        }
        self.approved.lock().unwrap().push(user_id);
        Ok(())
    }

    async fn decline_join(&self, user_id: i64) -> Result<()> {
        if self.fail_confirmations.load(Ordering::Relaxed) {
            return Err(Self::transient());
        }
        self.declined.lock().unwrap().push(user_id);
        Ok(())
    }

    async fn create_invite_link(&self, _label: &str, _expires_at: Option<i64>) -> Result<String> {
        if self.fail_links.load(Ordering::Relaxed) {
            return Err(Self::transient());
        }
        let n = self.link_counter.fetch_add(1, Ordering::Relaxed);
        Ok(format!("https://t.me/+fake{}", n))
    }

    async fn revoke_invite_link(&self, token: &str) -> Result<()> {
        self.revoked.lock().unwrap().push(token.to_string());
        Ok(())
    }

    async fn send_direct(
        &self,
        user_id: i64,
        _payload: &crate::database::MessagePayload,
    ) -> Result<()> {
        *self
            .send_attempts
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default() += 1;

        let mode = self
            .send_modes
            .lock()
            .unwrap()
            .get(&user_id)
            .copied()
            .unwrap_or(SendMode::Ok);

        match mode {
            SendMode::Ok => {
                self.sent.lock().unwrap().push(user_id);
                Ok(())
            }
            SendMode::Transient => Err(Self::transient()),
            SendMode::Permanent => Err(Error::RecipientUnreachable(
                "bot was blocked by the user".to_string(),
            )),
            SendMode::FailTimes(left) => {
                if left > 0 {
                    self.send_modes
                        .lock()
                        .unwrap()
                        .insert(user_id, SendMode::FailTimes(left - 1));
                    Err(Self::transient())
                } else {
                    self.sent.lock().unwrap().push(user_id);
                    Ok(())
                }
            }
        }
    }
}
