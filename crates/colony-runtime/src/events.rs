//! Event lifecycle: activation, expiry with reward payout, scheduled,
//! random and milestone spawning, and retention cleanup.

use chrono::{DateTime, Duration, Utc};
use colony_core::{
    validate_transition, ActiveEvent, EventCategory, EventId, EventParticipant, EventScope,
    EventStatus, ProducerId,
};
use colony_events::{
    distribute, due_for_activation, due_for_completion, instantiate, milestone_reached,
    roll_random, schedule_due, spawn_allowed, trigger_key, Audience, EventDefinition, LastSpawn,
    Milestone, PlayerAction, RewardAllocation,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

use crate::{Engine, EngineError};

/// Tier label on rewards paid outside any ranked tier.
const PARTICIPANT_LABEL: &str = "PARTICIPANT";

#[derive(Clone, Debug, Serialize)]
pub struct Leaderboard {
    pub event_id: EventId,
    pub event_type: String,
    pub distributed: Decimal,
    /// Rewards credited by this run.
    pub paid: u32,
    /// Rewards whose credit failed this run.
    pub unpaid: u32,
    pub top: Vec<RewardAllocation>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct LifecycleReport {
    pub started: u32,
    pub completed: u32,
    /// Events spawned this run, scheduled and milestone alike.
    pub spawned: Vec<String>,
    pub rewards_distributed: Decimal,
    pub rewards_paid: u32,
    pub leaderboards: Vec<Leaderboard>,
    pub purged: u64,
    /// Per-item failures that were logged and skipped.
    pub errors: u32,
}

impl Engine {
    /// One pass of the lifecycle. Each step runs even if an earlier item
    /// failed; failures are logged and counted.
    pub async fn process_event_lifecycle(&self) -> Result<LifecycleReport, EngineError> {
        let now = self.now();
        let mut report = LifecycleReport::default();

        for event in self.store.events_with_status(EventStatus::Pending).await? {
            if !due_for_activation(&event, now) {
                continue;
            }
            match self
                .store
                .transition_event(event.id, EventStatus::Pending, EventStatus::Active, now)
                .await
            {
                Ok(true) => {
                    report.started += 1;
                    info!(
                        category = "event",
                        event = %event.id,
                        event_type = %event.event_type,
                        "event started"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    error!(category = "event", event = %event.id, error = %e, "activation failed");
                }
            }
        }

        for event in self.store.events_with_status(EventStatus::Active).await? {
            if !due_for_completion(&event, now) {
                continue;
            }
            // Pay while still ACTIVE; a failed credit keeps the event here so
            // the next pass retries it. Claimed rewards are never paid twice.
            let board = if event.reward_pool > Decimal::ZERO {
                match self.pay_rewards(&event, now).await {
                    Ok(board) => {
                        report.rewards_distributed += board.distributed;
                        report.rewards_paid += board.paid;
                        report.errors += board.unpaid;
                        if board.unpaid > 0 {
                            warn!(
                                category = "reward",
                                event = %event.id,
                                unpaid = board.unpaid,
                                "rewards outstanding, completion deferred"
                            );
                            continue;
                        }
                        Some(board)
                    }
                    Err(e) => {
                        report.errors += 1;
                        error!(
                            category = "reward",
                            event = %event.id,
                            error = %e,
                            "reward distribution failed"
                        );
                        continue;
                    }
                }
            } else {
                None
            };
            match self
                .store
                .transition_event(event.id, EventStatus::Active, EventStatus::Completed, now)
                .await
            {
                Ok(true) => {
                    report.completed += 1;
                    info!(
                        category = "event",
                        event = %event.id,
                        event_type = %event.event_type,
                        "event completed"
                    );
                    report.leaderboards.extend(board);
                }
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    error!(category = "event", event = %event.id, error = %e, "completion failed");
                }
            }
        }

        let window = self.config.events.schedule_window_minutes;
        for def in self.catalogue.by_category(EventCategory::Scheduled) {
            let key = trigger_key(def, None);
            let last = self.store.last_spawn(&key).await?;
            if !schedule_due(def, last.as_ref(), now, window) {
                continue;
            }
            match self.spawn(def, EventScope::Global, key, now).await {
                Ok(e) => report.spawned.push(e.event_type),
                Err(e) => {
                    report.errors += 1;
                    error!(
                        category = "event",
                        event_type = %def.event_type,
                        error = %e,
                        "scheduled spawn failed"
                    );
                }
            }
        }

        for e in self.check_triggered_events().await? {
            report.spawned.push(e.event_type);
        }

        let cutoff = now - Duration::days(i64::from(self.config.events.retention_days));
        report.purged = self.store.purge_events(cutoff).await?;

        info!(
            category = "event",
            started = report.started,
            completed = report.completed,
            spawned = report.spawned.len(),
            rewards = %report.rewards_distributed,
            purged = report.purged,
            errors = report.errors,
            "event lifecycle processed"
        );
        Ok(report)
    }

    /// Split the pool of an expired event. Claims already paid are skipped,
    /// so a rerun pays nothing twice.
    async fn pay_rewards(
        &self,
        event: &ActiveEvent,
        now: DateTime<Utc>,
    ) -> Result<Leaderboard, EngineError> {
        let participants = self.store.participants(event.id).await?;
        let plan = distribute(
            event.reward_pool,
            &event.reward_tiers,
            &participants,
            self.config.events.reward_scale,
        );
        let mut distributed = Decimal::ZERO;
        let mut paid = 0;
        let mut unpaid = 0;
        for a in plan.payable() {
            let label = a.tier_label.as_deref().unwrap_or(PARTICIPANT_LABEL);
            match self
                .store
                .credit_reward(event.id, a.producer_id, a.amount, label, now)
                .await
            {
                Ok(true) => {
                    distributed += a.amount;
                    paid += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    unpaid += 1;
                    error!(
                        category = "reward",
                        event = %event.id,
                        producer = %a.producer_id,
                        error = %e,
                        "reward credit failed"
                    );
                }
            }
        }
        info!(
            category = "reward",
            event = %event.id,
            pool = %event.reward_pool,
            distributed = %distributed,
            participants = participants.len(),
            "rewards distributed"
        );
        Ok(Leaderboard {
            event_id: event.id,
            event_type: event.event_type.clone(),
            distributed,
            paid,
            unpaid,
            top: plan.top(self.config.events.top_n).to_vec(),
        })
    }

    async fn spawn(
        &self,
        def: &EventDefinition,
        scope: EventScope,
        key: String,
        now: DateTime<Utc>,
    ) -> Result<ActiveEvent, EngineError> {
        let event = self
            .store
            .insert_event(&instantiate(def, now, scope, key), now)
            .await?;
        info!(
            category = "event",
            event = %event.id,
            event_type = %event.event_type,
            status = %event.status,
            starts_at = %event.starts_at,
            ends_at = %event.ends_at,
            "event spawned"
        );
        Ok(event)
    }

    /// Maybe start a random event in response to `action` by `producer`.
    ///
    /// Nothing rolls while another random event is pending or active. The
    /// actor joins the spawned event.
    pub async fn roll_random_event(
        &self,
        producer: ProducerId,
        action: PlayerAction,
    ) -> Result<Option<ActiveEvent>, EngineError> {
        if self
            .store
            .open_events_in_category(EventCategory::Random)
            .await?
            > 0
        {
            return Ok(None);
        }
        let now = self.now();
        let mut last: BTreeMap<&str, Option<LastSpawn>> = BTreeMap::new();
        for def in self.catalogue.random_for(action) {
            let spawn = self.store.last_spawn(&trigger_key(def, None)).await?;
            last.insert(def.event_type.as_str(), spawn);
        }

        let hit = {
            let mut rng = self.rng.lock().await;
            roll_random(&self.catalogue, action, &mut *rng, |def| {
                let prev = last.get(def.event_type.as_str()).and_then(Option::as_ref);
                spawn_allowed(def, prev, now)
            })
        };
        let Some(def) = hit else {
            return Ok(None);
        };

        let scope = match def.audience {
            Audience::Global => EventScope::Global,
            Audience::Actor => EventScope::Targeted(BTreeSet::from([producer])),
        };
        let event = self.spawn(def, scope, trigger_key(def, None), now).await?;
        self.store
            .record_participation(event.id, producer, 0, 1, now)
            .await?;
        Ok(Some(event))
    }

    /// Spawn milestone events whose threshold is met and whose cooldown has
    /// passed. Alliance milestones target the alliance's members.
    pub async fn check_triggered_events(&self) -> Result<Vec<ActiveEvent>, EngineError> {
        let now = self.now();
        let mut spawned = Vec::new();
        for def in self.catalogue.by_category(EventCategory::Triggered) {
            let Some(milestone) = &def.milestone else {
                continue;
            };
            let mut candidates: Vec<(String, EventScope)> = Vec::new();
            match milestone {
                Milestone::AllianceMembers { threshold } => {
                    let alliances = self.store.alliances_with_members(*threshold).await?;
                    for (alliance, members) in alliances {
                        if !milestone_reached(members, *threshold) {
                            continue;
                        }
                        let ids = self.store.alliance_members(alliance).await?;
                        candidates.push((
                            trigger_key(def, Some(alliance)),
                            EventScope::Targeted(ids.into_iter().collect()),
                        ));
                    }
                }
                Milestone::ModuleCount {
                    module_type,
                    threshold,
                } => {
                    let n = self.store.active_module_count(*module_type).await?;
                    if milestone_reached(n, *threshold) {
                        candidates.push((trigger_key(def, None), EventScope::Global));
                    }
                }
            }
            for (key, scope) in candidates {
                let last = self.store.last_spawn(&key).await?;
                if !spawn_allowed(def, last.as_ref(), now) {
                    continue;
                }
                match self.spawn(def, scope, key, now).await {
                    Ok(e) => spawned.push(e),
                    Err(e) => error!(
                        category = "event",
                        event_type = %def.event_type,
                        error = %e,
                        "triggered spawn failed"
                    ),
                }
            }
        }
        Ok(spawned)
    }

    /// Add score and actions for `producer` in a live event they can see.
    pub async fn record_participation(
        &self,
        event: EventId,
        producer: ProducerId,
        score: i64,
        actions: i64,
    ) -> Result<EventParticipant, EngineError> {
        let now = self.now();
        let e = self.store.require_event(event).await?;
        if !e.is_live_at(now) || !e.scope.includes(producer) {
            return Err(EngineError::EventClosed(event));
        }
        self.store.require_producer(producer).await?;
        Ok(self
            .store
            .record_participation(event, producer, score, actions, now)
            .await?)
    }

    /// Cancel a pending or active event. Returns false if another caller
    /// moved it first. No rewards are paid.
    pub async fn cancel_event(&self, event: EventId) -> Result<bool, EngineError> {
        let e = self.store.require_event(event).await?;
        validate_transition(e.status, EventStatus::Cancelled)?;
        let done = self
            .store
            .transition_event(event, e.status, EventStatus::Cancelled, self.now())
            .await?;
        if done {
            warn!(category = "event", %event, event_type = %e.event_type, "event cancelled");
        }
        Ok(done)
    }
}
