//! Broadcast Engine.
//!
//! A broadcast is a durable run record, not an in-memory loop: the engine
//! snapshots the approved members at creation, then a background processor
//! works through the outcome entries pass by pass, persisting every outcome
//! before the next send. However the processor is interrupted, the next one
//! picks up exactly the entries that are still owed an attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mongodb::bson::oid::ObjectId;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::BroadcastSettings;
use crate::database::{BroadcastRun, DeliveryState, MessagePayload, RunStatus};
use crate::engine::{now_ts, MemberStore, RunStore};
use crate::error::{Error, Result};
use crate::gateway::Gateway;

/// Owns broadcast-run records and drives their delivery.
#[derive(Clone)]
pub struct BroadcastEngine {
    members: Arc<dyn MemberStore>,
    runs: Arc<dyn RunStore>,
    gateway: Arc<dyn Gateway>,
    settings: BroadcastSettings,
    /// Cancel flags for runs with a live processor in this process. The flag
    /// stops pacing within one interval; the persisted `cancelled` status is
    /// what survives a restart.
    active: Arc<DashMap<ObjectId, Arc<AtomicBool>>>,
}

impl BroadcastEngine {
    pub fn new(
        members: Arc<dyn MemberStore>,
        runs: Arc<dyn RunStore>,
        gateway: Arc<dyn Gateway>,
        settings: BroadcastSettings,
    ) -> Self {
        Self {
            members,
            runs,
            gateway,
            settings,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Create a run: snapshot the approved members into pending outcome
    /// entries. Immediate runs still need [`spawn`](Self::spawn) to begin
    /// delivery; scheduled runs wait for the scheduler sweep.
    pub async fn start(
        &self,
        payload: MessagePayload,
        scheduled_at: Option<i64>,
    ) -> Result<BroadcastRun> {
        let members = self.members.approved().await?;
        let run = BroadcastRun::new(
            payload,
            members.iter().map(|m| m.user_id),
            now_ts(),
            scheduled_at,
        );
        self.runs.insert(&run).await?;

        match scheduled_at {
            Some(ts) => info!(
                "Created broadcast run {} for {} recipients, scheduled at {}",
                run.id, run.total, ts
            ),
            None => info!(
                "Created broadcast run {} for {} recipients",
                run.id, run.total
            ),
        }
        Ok(run)
    }

    /// Hand a run to a background processor. A run that already has a live
    /// processor in this process is left alone.
    pub fn spawn(&self, run_id: ObjectId) {
        use dashmap::mapref::entry::Entry;

        let flag = match self.active.entry(run_id) {
            Entry::Occupied(_) => {
                debug!("Run {} already has a processor", run_id);
                return;
            }
            Entry::Vacant(vacant) => {
                let flag = Arc::new(AtomicBool::new(false));
                vacant.insert(flag.clone());
                flag
            }
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.process(run_id, flag).await;
            engine.active.remove(&run_id);
            match result {
                Ok(status) => info!("Broadcast run {} finished: {:?}", run_id, status),
                Err(err) => error!("Broadcast run {} aborted: {}", run_id, err),
            }
        });
    }

    /// Pick up every run owed processing: in-progress ones (crash recovery)
    /// and pending ones whose schedule is due. Returns how many were handed
    /// to processors.
    pub async fn resume(&self) -> Result<usize> {
        let due = self.runs.due_runs(now_ts()).await?;
        let count = due.len();
        for run in due {
            self.spawn(run.id);
        }
        if count > 0 {
            info!("Dispatched {} broadcast run(s)", count);
        }
        Ok(count)
    }

    /// Fetch a run for progress display.
    pub async fn status(&self, run_id: ObjectId) -> Result<BroadcastRun> {
        self.runs
            .get(run_id)
            .await?
            .ok_or(Error::NotFound("broadcast run"))
    }

    /// Cancel a run: entries still pending become skipped, retryable entries
    /// are not retried further, and the run turns terminal. An in-flight
    /// processor notices within one pacing interval.
    pub async fn cancel(&self, run_id: ObjectId) -> Result<BroadcastRun> {
        let run = self
            .runs
            .get(run_id)
            .await?
            .ok_or(Error::NotFound("broadcast run"))?;
        if run.status.is_terminal() {
            return Ok(run);
        }

        if let Some(flag) = self.active.get(&run_id) {
            flag.store(true, Ordering::Relaxed);
        }

        for (id, outcome) in &run.outcomes {
            if outcome.state == DeliveryState::Pending {
                let Ok(member_id) = id.parse::<i64>() else {
                    continue;
                };
                let mut skipped = outcome.clone();
                skipped.state = DeliveryState::Skipped;
                self.runs.record_outcome(run_id, member_id, &skipped).await?;
            }
        }

        self.runs
            .set_status(
                run_id,
                &[RunStatus::Pending, RunStatus::InProgress],
                RunStatus::Cancelled,
            )
            .await?;

        info!("Broadcast run {} cancelled", run_id);
        self.status(run_id).await
    }

    /// Work through a run until every entry is terminal or the run is
    /// cancelled. Per-recipient gateway failures never abort the run; only a
    /// failure to persist progress does.
    async fn process(&self, run_id: ObjectId, cancel: Arc<AtomicBool>) -> Result<RunStatus> {
        let run = self
            .runs
            .get(run_id)
            .await?
            .ok_or(Error::NotFound("broadcast run"))?;
        if run.status.is_terminal() {
            return Ok(run.status);
        }

        self.runs
            .set_status(
                run_id,
                &[RunStatus::Pending, RunStatus::InProgress],
                RunStatus::InProgress,
            )
            .await?;
        info!(
            "Processing broadcast run {} ({} recipients)",
            run_id, run.total
        );

        let mut pass = 0u32;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(RunStatus::Cancelled);
            }

            let run = self
                .runs
                .get(run_id)
                .await?
                .ok_or(Error::NotFound("broadcast run"))?;
            if run.status != RunStatus::InProgress {
                // Cancelled (or otherwise finished) behind our back.
                return Ok(run.status);
            }

            let due = run.due_entries();
            if due.is_empty() {
                let terminal = run.terminal_status().unwrap_or(RunStatus::Completed);
                self.runs
                    .set_status(run_id, &[RunStatus::InProgress], terminal)
                    .await?;
                return Ok(terminal);
            }

            pass += 1;
            let mut rate_hint: Option<Duration> = None;
            let mut retryable_left = false;

            for (member_id, mut outcome) in due {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(RunStatus::Cancelled);
                }

                outcome.attempts += 1;
                outcome.last_attempt_at = Some(now_ts());

                let hint = match self.gateway.send_direct(member_id, &run.payload).await {
                    Ok(()) => {
                        outcome.state = DeliveryState::Sent;
                        outcome.last_error = None;
                        None
                    }
                    Err(err) if err.is_transient() => {
                        let hint = err.retry_hint();
                        outcome.last_error = Some(err.to_string());
                        if outcome.attempts >= self.settings.max_attempts {
                            debug!(
                                "Recipient {} exhausted {} attempts; giving up",
                                member_id, outcome.attempts
                            );
                            outcome.state = DeliveryState::FailedPermanent;
                        } else {
                            outcome.state = DeliveryState::FailedRetryable;
                            retryable_left = true;
                        }
                        hint
                    }
                    Err(Error::RecipientUnreachable(reason)) => {
                        debug!("Recipient {} unreachable: {}", member_id, reason);
                        outcome.state = DeliveryState::FailedPermanent;
                        outcome.last_error = Some(reason);
                        None
                    }
                    Err(err) => return Err(err),
                };

                // Progress must be durable before the next send; resume
                // correctness depends on it.
                self.runs.record_outcome(run_id, member_id, &outcome).await?;

                if let Some(hint) = hint {
                    rate_hint = Some(rate_hint.map_or(hint, |h| h.max(hint)));
                    sleep(hint).await;
                }
                sleep(self.settings.pace).await;
            }

            if retryable_left {
                let backoff = rate_hint
                    .unwrap_or_else(|| self.settings.retry_backoff.saturating_mul(pass));
                debug!(
                    "Run {}: {:?} backoff before pass {}",
                    run_id,
                    backoff,
                    pass + 1
                );
                sleep(backoff).await;
            }
        }
    }
}

/// Periodically dispatch due runs (scheduled broadcasts and crash recovery).
/// The first sweep happens immediately, so startup resume falls out of this.
pub fn spawn_scheduler(engine: BroadcastEngine) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(engine.settings.scheduler_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = engine.resume().await {
                error!("Broadcast scheduler sweep failed: {}", err);
            }
        }
    })
}
