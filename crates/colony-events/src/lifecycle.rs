//! Pure lifecycle rules: when to spawn, activate and expire events.
//!
//! The store owns the status column and performs every transition as a
//! compare-and-set; the functions here only decide.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use colony_core::{
    ActiveEvent, EventCategory, EventScope, EventStatus, ModifierMap, RewardTier,
};
use rand::Rng;
use rust_decimal::Decimal;

use crate::catalogue::{EventCatalogue, EventDefinition, PlayerAction, Schedule};

/// Event row to insert; the store assigns the id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent {
    pub event_type: String,
    /// Deduplication key: the event type, suffixed with the alliance for
    /// alliance-targeted events.
    pub trigger_key: String,
    pub category: EventCategory,
    pub status: EventStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub modifiers: ModifierMap,
    pub scope: EventScope,
    pub reward_pool: Decimal,
    pub reward_tiers: Vec<RewardTier>,
}

/// Most recent row spawned under a trigger key.
#[derive(Clone, Debug, PartialEq)]
pub struct LastSpawn {
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub fn trigger_key(def: &EventDefinition, alliance: Option<i64>) -> String {
    match alliance {
        Some(id) => format!("{}:alliance:{id}", def.event_type),
        None => def.event_type.clone(),
    }
}

/// Build the row for `def` spawned at `now`. A warning delay yields a
/// PENDING row starting later; otherwise the event is ACTIVE immediately.
pub fn instantiate(
    def: &EventDefinition,
    now: DateTime<Utc>,
    scope: EventScope,
    trigger_key: String,
) -> NewEvent {
    let (status, starts_at) = if def.warning_minutes > 0 {
        (
            EventStatus::Pending,
            now + Duration::minutes(i64::from(def.warning_minutes)),
        )
    } else {
        (EventStatus::Active, now)
    };
    NewEvent {
        event_type: def.event_type.clone(),
        trigger_key,
        category: def.category,
        status,
        starts_at,
        ends_at: starts_at + Duration::hours(i64::from(def.duration_hours)),
        modifiers: def.modifiers.clone(),
        scope,
        reward_pool: def.reward_pool,
        reward_tiers: def.reward_tiers.clone(),
    }
}

pub fn due_for_activation(event: &ActiveEvent, now: DateTime<Utc>) -> bool {
    event.status == EventStatus::Pending && event.starts_at <= now
}

pub fn due_for_completion(event: &ActiveEvent, now: DateTime<Utc>) -> bool {
    event.status == EventStatus::Active && event.ends_at <= now
}

/// False while the last spawn is still pending/active or its cooldown has
/// not elapsed.
pub fn spawn_allowed(def: &EventDefinition, last: Option<&LastSpawn>, now: DateTime<Utc>) -> bool {
    let Some(last) = last else {
        return true;
    };
    if !last.status.is_terminal() {
        return false;
    }
    let finished = last.completed_at.unwrap_or(last.created_at);
    finished + Duration::hours(i64::from(def.cooldown_hours)) <= now
}

/// Start of the schedule slot whose firing window contains `now`.
pub fn schedule_slot(
    schedule: &Schedule,
    now: DateTime<Utc>,
    window_minutes: u32,
) -> Option<DateTime<Utc>> {
    let window = Duration::minutes(i64::from(window_minutes.max(1)));
    let today = now.date_naive();
    // The window may straddle midnight, so yesterday's slot is a candidate too.
    [today.pred_opt(), Some(today)]
        .into_iter()
        .flatten()
        .filter(|date| match schedule {
            Schedule::Weekly { weekday, .. } => date.weekday() == *weekday,
            Schedule::Monthly { day, .. } => date.day() == *day,
        })
        .filter_map(|date| {
            let hour = match schedule {
                Schedule::Weekly { hour, .. } | Schedule::Monthly { hour, .. } => *hour,
            };
            let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
            Some(Utc.from_utc_datetime(&date.and_time(time)))
        })
        .find(|slot| *slot <= now && now < *slot + window)
}

/// Whether the scheduled definition should spawn now: inside its slot
/// window, not already spawned for that slot, and out of cooldown.
pub fn schedule_due(
    def: &EventDefinition,
    last: Option<&LastSpawn>,
    now: DateTime<Utc>,
    window_minutes: u32,
) -> bool {
    let Some(schedule) = &def.schedule else {
        return false;
    };
    let Some(slot) = schedule_slot(schedule, now, window_minutes) else {
        return false;
    };
    if last.is_some_and(|l| l.created_at >= slot) {
        return false;
    }
    spawn_allowed(def, last, now)
}

/// Walk the random definitions `action` can roll, in catalogue order, and
/// return the first whose probability hits. Definitions rejected by
/// `eligible` consume no draw.
pub fn roll_random<'a, R, F>(
    catalogue: &'a EventCatalogue,
    action: PlayerAction,
    rng: &mut R,
    mut eligible: F,
) -> Option<&'a EventDefinition>
where
    R: Rng + ?Sized,
    F: FnMut(&EventDefinition) -> bool,
{
    for def in catalogue.random_for(action) {
        if !eligible(def) {
            continue;
        }
        if rng.gen::<f64>() < def.probability {
            return Some(def);
        }
    }
    None
}

pub fn milestone_reached(observed: u64, threshold: u32) -> bool {
    observed >= u64::from(threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::Audience;
    use chrono::Weekday;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        // 2024-06-01 is a Saturday.
        Utc.with_ymd_and_hms(2024, 6, d, h, m, 0).unwrap()
    }

    fn def(category: EventCategory) -> EventDefinition {
        EventDefinition {
            event_type: "TEST".into(),
            name: "Test".into(),
            category,
            duration_hours: 6,
            warning_minutes: 0,
            modifiers: [("GLOBAL_PRODUCTION", 1.2)].into_iter().collect(),
            reward_pool: Decimal::new(1000, 0),
            reward_tiers: vec![],
            cooldown_hours: 24,
            schedule: Some(Schedule::Weekly {
                weekday: Weekday::Sat,
                hour: 12,
            }),
            probability: 0.0,
            trigger_actions: vec![],
            milestone: None,
            audience: Audience::Global,
        }
    }

    #[test]
    fn warning_delay_spawns_pending() {
        let mut d = def(EventCategory::Scheduled);
        let now = at(1, 12, 0);
        let e = instantiate(&d, now, EventScope::Global, trigger_key(&d, None));
        assert_eq!(e.status, EventStatus::Active);
        assert_eq!(e.starts_at, now);
        assert_eq!(e.ends_at, at(1, 18, 0));

        d.warning_minutes = 30;
        let e = instantiate(&d, now, EventScope::Global, "TEST".into());
        assert_eq!(e.status, EventStatus::Pending);
        assert_eq!(e.starts_at, at(1, 12, 30));
        assert_eq!(e.ends_at, at(1, 18, 30));
    }

    #[test]
    fn trigger_key_scopes_alliances() {
        let d = def(EventCategory::Triggered);
        assert_eq!(trigger_key(&d, None), "TEST");
        assert_eq!(trigger_key(&d, Some(9)), "TEST:alliance:9");
    }

    #[test]
    fn cooldown_and_live_block_spawn() {
        let d = def(EventCategory::Random);
        let now = at(3, 0, 0);
        assert!(spawn_allowed(&d, None, now));
        let live = LastSpawn {
            status: EventStatus::Active,
            created_at: at(2, 0, 0),
            completed_at: None,
        };
        assert!(!spawn_allowed(&d, Some(&live), now));
        let recent = LastSpawn {
            status: EventStatus::Completed,
            created_at: at(2, 0, 0),
            completed_at: Some(at(2, 6, 0)),
        };
        assert!(!spawn_allowed(&d, Some(&recent), now));
        assert!(spawn_allowed(&d, Some(&recent), at(3, 6, 0)));
    }

    #[test]
    fn weekly_slot_window() {
        let sched = Schedule::Weekly {
            weekday: Weekday::Sat,
            hour: 12,
        };
        assert_eq!(schedule_slot(&sched, at(1, 12, 0), 15), Some(at(1, 12, 0)));
        assert_eq!(schedule_slot(&sched, at(1, 12, 14), 15), Some(at(1, 12, 0)));
        assert_eq!(schedule_slot(&sched, at(1, 12, 15), 15), None);
        assert_eq!(schedule_slot(&sched, at(1, 11, 59), 15), None);
        assert_eq!(schedule_slot(&sched, at(2, 12, 5), 15), None);
    }

    #[test]
    fn slot_window_crosses_midnight() {
        let sched = Schedule::Monthly { day: 1, hour: 23 };
        assert_eq!(schedule_slot(&sched, at(2, 0, 30), 120), Some(at(1, 23, 0)));
    }

    #[test]
    fn schedule_fires_once_per_slot() {
        let d = def(EventCategory::Scheduled);
        let now = at(1, 12, 5);
        assert!(schedule_due(&d, None, now, 15));
        let spawned = LastSpawn {
            status: EventStatus::Completed,
            created_at: at(1, 12, 0),
            completed_at: Some(at(1, 12, 1)),
        };
        assert!(!schedule_due(&d, Some(&spawned), now, 15));
        let last_week = LastSpawn {
            status: EventStatus::Completed,
            created_at: at(1, 12, 0) - Duration::days(7),
            completed_at: Some(at(1, 12, 0) - Duration::days(6)),
        };
        assert!(schedule_due(&d, Some(&last_week), now, 15));
    }

    #[test]
    fn random_roll_respects_eligibility_and_order() {
        let cat = EventCatalogue::from_yaml_str(
            r#"
events:
  - { event_type: ALWAYS_A, name: a, category: RANDOM, duration_hours: 1, probability: 1.0, trigger_actions: [build] }
  - { event_type: ALWAYS_B, name: b, category: RANDOM, duration_hours: 1, probability: 1.0, trigger_actions: [build] }
"#,
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let hit = roll_random(&cat, PlayerAction::Build, &mut rng, |_| true).unwrap();
        assert_eq!(hit.event_type, "ALWAYS_A");
        let hit = roll_random(&cat, PlayerAction::Build, &mut rng, |d| d.event_type != "ALWAYS_A")
            .unwrap();
        assert_eq!(hit.event_type, "ALWAYS_B");
        assert!(roll_random(&cat, PlayerAction::Trade, &mut rng, |_| true).is_none());
    }

    #[test]
    fn activation_and_completion_are_due_at_bounds() {
        let d = def(EventCategory::Scheduled);
        let row = instantiate(&d, at(1, 0, 0), EventScope::Global, "TEST".into());
        let mut e = ActiveEvent {
            id: colony_core::EventId(1),
            event_type: row.event_type,
            category: row.category,
            status: EventStatus::Pending,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            modifiers: row.modifiers,
            scope: row.scope,
            reward_pool: row.reward_pool,
            reward_tiers: row.reward_tiers,
            created_at: at(1, 0, 0),
            completed_at: None,
        };
        assert!(due_for_activation(&e, at(1, 0, 0)));
        assert!(!due_for_completion(&e, at(1, 6, 0)));
        e.status = EventStatus::Active;
        assert!(!due_for_completion(&e, at(1, 5, 59)));
        assert!(due_for_completion(&e, at(1, 6, 0)));
    }

    #[test]
    fn milestones() {
        assert!(milestone_reached(5, 5));
        assert!(!milestone_reached(4, 5));
        assert!(milestone_reached(0, 0));
    }
}
