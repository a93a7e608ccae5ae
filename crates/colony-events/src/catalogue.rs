//! Static event definitions loaded once from YAML.

use chrono::Weekday;
use colony_core::{validate_reward_pool, EventCategory, ModifierMap, ModuleType, RewardTier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const BUILTIN_YAML: &str = include_str!("../../../assets/events.yaml");

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid catalogue yaml: {0}")]
    Parse(String),
    #[error("duplicate event type {0}")]
    Duplicate(String),
    #[error("event {event_type}: {reason}")]
    Invalid { event_type: String, reason: String },
}

impl From<std::io::Error> for CatalogueError {
    fn from(e: std::io::Error) -> Self {
        CatalogueError::Io(e.to_string())
    }
}

/// Player actions that can roll a random event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerAction {
    Collect,
    Build,
    Recruit,
    Trade,
}

/// Recurring slot of a scheduled event, in UTC.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "every", rename_all = "snake_case")]
pub enum Schedule {
    Weekly { weekday: Weekday, hour: u32 },
    /// `day` is capped at 28 so the slot exists every month.
    Monthly { day: u32, hour: u32 },
}

/// Condition that spawns a triggered event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Milestone {
    /// An alliance reached `threshold` members; the event targets that alliance.
    AllianceMembers { threshold: u32 },
    /// Active modules of `module_type` across all producers reached `threshold`.
    ModuleCount {
        module_type: ModuleType,
        threshold: u32,
    },
}

/// Who a spawned random or scheduled event applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    #[default]
    Global,
    /// Only the producer whose action rolled it.
    Actor,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub event_type: String,
    pub name: String,
    pub category: EventCategory,
    pub duration_hours: u32,
    /// Non-zero spawns the event PENDING this many minutes ahead of its start.
    #[serde(default)]
    pub warning_minutes: u32,
    #[serde(default)]
    pub modifiers: ModifierMap,
    #[serde(default)]
    pub reward_pool: Decimal,
    #[serde(default)]
    pub reward_tiers: Vec<RewardTier>,
    #[serde(default)]
    pub cooldown_hours: u32,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub probability: f64,
    #[serde(default)]
    pub trigger_actions: Vec<PlayerAction>,
    #[serde(default)]
    pub milestone: Option<Milestone>,
    #[serde(default)]
    pub audience: Audience,
}

impl EventDefinition {
    fn invalid(&self, reason: impl Into<String>) -> CatalogueError {
        CatalogueError::Invalid {
            event_type: self.event_type.clone(),
            reason: reason.into(),
        }
    }

    fn validate(&self) -> Result<(), CatalogueError> {
        if self.event_type.trim().is_empty() {
            return Err(self.invalid("empty event type"));
        }
        if self.duration_hours == 0 {
            return Err(self.invalid("duration must be > 0"));
        }
        validate_reward_pool(self.reward_pool).map_err(|e| self.invalid(e.to_string()))?;
        for (key, value) in self.modifiers.iter() {
            if !value.is_finite() || value < 0.0 {
                return Err(self.invalid(format!("modifier {key} must be finite and >= 0")));
            }
        }
        for tier in &self.reward_tiers {
            if tier.max_rank == 0 || tier.multiplier < Decimal::ZERO {
                return Err(self.invalid(format!("bad reward tier {}", tier.label)));
            }
        }
        match self.category {
            EventCategory::Scheduled => match &self.schedule {
                None => return Err(self.invalid("scheduled event without schedule")),
                Some(Schedule::Weekly { hour, .. }) if *hour > 23 => {
                    return Err(self.invalid("schedule hour must be < 24"))
                }
                Some(Schedule::Monthly { day, hour }) if *hour > 23 || !(1..=28).contains(day) => {
                    return Err(self.invalid("monthly slot needs day 1..=28 and hour < 24"))
                }
                Some(_) => {}
            },
            EventCategory::Random => {
                if !(self.probability > 0.0 && self.probability <= 1.0) {
                    return Err(self.invalid("probability must be in (0, 1]"));
                }
                if self.trigger_actions.is_empty() {
                    return Err(self.invalid("random event without trigger actions"));
                }
            }
            EventCategory::Triggered => {
                if self.milestone.is_none() {
                    return Err(self.invalid("triggered event without milestone"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct CatalogueFile {
    events: Vec<EventDefinition>,
}

/// Immutable set of event definitions, kept in file order.
#[derive(Clone, Debug)]
pub struct EventCatalogue {
    definitions: Vec<EventDefinition>,
    index: BTreeMap<String, usize>,
}

impl EventCatalogue {
    pub fn new(definitions: Vec<EventDefinition>) -> Result<Self, CatalogueError> {
        let mut index = BTreeMap::new();
        for (i, def) in definitions.iter().enumerate() {
            def.validate()?;
            if index.insert(def.event_type.clone(), i).is_some() {
                return Err(CatalogueError::Duplicate(def.event_type.clone()));
            }
        }
        Ok(Self { definitions, index })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, CatalogueError> {
        let file: CatalogueFile =
            serde_yaml::from_str(text).map_err(|e| CatalogueError::Parse(e.to_string()))?;
        Self::new(file.events)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogueError> {
        let text = fs::read_to_string(path.as_ref())?;
        let catalogue = Self::from_yaml_str(&text)?;
        info!(
            target: "colony_events",
            path = %path.as_ref().display(),
            definitions = catalogue.len(),
            "loaded event catalogue"
        );
        Ok(catalogue)
    }

    /// Catalogue compiled into the binary.
    pub fn builtin() -> Result<Self, CatalogueError> {
        Self::from_yaml_str(BUILTIN_YAML)
    }

    pub fn get(&self, event_type: &str) -> Option<&EventDefinition> {
        self.index.get(event_type).map(|&i| &self.definitions[i])
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventDefinition> {
        self.definitions.iter()
    }

    pub fn by_category(&self, category: EventCategory) -> impl Iterator<Item = &EventDefinition> {
        self.definitions
            .iter()
            .filter(move |d| d.category == category)
    }

    /// Random definitions that `action` can roll, in file order.
    pub fn random_for(&self, action: PlayerAction) -> impl Iterator<Item = &EventDefinition> {
        self.by_category(EventCategory::Random)
            .filter(move |d| d.trigger_actions.contains(&action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogue_loads() {
        let cat = EventCatalogue::builtin().unwrap();
        assert!(!cat.is_empty());
        for category in EventCategory::ALL {
            assert!(
                cat.by_category(*category).next().is_some(),
                "no {category} definitions"
            );
        }
        let tournament = cat.get("MINING_TOURNAMENT").unwrap();
        assert!(tournament.reward_pool > Decimal::ZERO);
        assert_eq!(tournament.reward_tiers[0].max_rank, 1);
    }

    #[test]
    fn random_for_keeps_file_order() {
        let cat = EventCatalogue::from_yaml_str(
            r#"
events:
  - event_type: B_EVENT
    name: B
    category: RANDOM
    duration_hours: 1
    probability: 0.5
    trigger_actions: [collect]
  - event_type: A_EVENT
    name: A
    category: RANDOM
    duration_hours: 1
    probability: 0.5
    trigger_actions: [collect, trade]
"#,
        )
        .unwrap();
        let collect: Vec<_> = cat
            .random_for(PlayerAction::Collect)
            .map(|d| d.event_type.as_str())
            .collect();
        assert_eq!(collect, vec!["B_EVENT", "A_EVENT"]);
        assert_eq!(cat.random_for(PlayerAction::Trade).count(), 1);
        assert_eq!(cat.random_for(PlayerAction::Build).count(), 0);
    }

    #[test]
    fn rejects_duplicates_and_bad_definitions() {
        let dup = "
events:
  - event_type: X
    name: x
    category: TRIGGERED
    duration_hours: 1
    milestone: { kind: alliance_members, threshold: 3 }
  - event_type: X
    name: y
    category: TRIGGERED
    duration_hours: 1
    milestone: { kind: alliance_members, threshold: 3 }
";
        assert!(matches!(
            EventCatalogue::from_yaml_str(dup),
            Err(CatalogueError::Duplicate(t)) if t == "X"
        ));

        let no_schedule = "
events:
  - { event_type: S, name: s, category: SCHEDULED, duration_hours: 2 }
";
        assert!(matches!(
            EventCatalogue::from_yaml_str(no_schedule),
            Err(CatalogueError::Invalid { .. })
        ));

        let bad_day = "
events:
  - event_type: S
    name: s
    category: SCHEDULED
    duration_hours: 2
    schedule: { every: monthly, day: 31, hour: 0 }
";
        assert!(EventCatalogue::from_yaml_str(bad_day).is_err());

        let negative_mod = "
events:
  - event_type: R
    name: r
    category: RANDOM
    duration_hours: 2
    probability: 0.1
    trigger_actions: [build]
    modifiers: { GLOBAL_PRODUCTION: -1.0 }
";
        assert!(EventCatalogue::from_yaml_str(negative_mod).is_err());

        assert!(matches!(
            EventCatalogue::from_yaml_str("events: 3"),
            Err(CatalogueError::Parse(_))
        ));
    }

    #[test]
    fn weekly_schedule_parses_weekday_names() {
        let yaml = "
events:
  - event_type: W
    name: w
    category: SCHEDULED
    duration_hours: 24
    schedule: { every: weekly, weekday: Sat, hour: 12 }
";
        let cat = EventCatalogue::from_yaml_str(yaml).unwrap();
        assert_eq!(
            cat.get("W").unwrap().schedule,
            Some(Schedule::Weekly {
                weekday: Weekday::Sat,
                hour: 12,
            })
        );
    }
}
