//! Domain entities: producers, modules, crew, market rows and events.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::modifiers::ModifierMap;
use crate::ValidationError;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Enums persisted and configured by their upper-case code.
macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($(#[$vmeta:meta])* $variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $code)] $variant),+
        }

        impl $name {
            /// Every variant in declaration order.
            pub const ALL: &[$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($code => Ok($name::$variant),)+
                    other => Err(ValidationError::UnknownCode {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

id_type!(
    /// Primary key of a producer (a player's colony).
    ProducerId
);
id_type!(ModuleId);
id_type!(CrewId);
id_type!(
    /// Primary key of an event row.
    EventId
);

coded_enum!(
    /// Fixed catalog of buildable modules.
    ModuleType, "module type" {
        MiningRig => "MINING_RIG",
        SolarArray => "SOLAR_ARRAY",
        HydroponicsBay => "HYDROPONICS_BAY",
        Refinery => "REFINERY",
        ResearchLab => "RESEARCH_LAB",
        TradeHub => "TRADE_HUB",
    }
);

impl ModuleType {
    /// Modifier key scaling this type's output, e.g. `MINING_RIG_OUTPUT`.
    pub fn output_modifier_key(self) -> String {
        format!("{}_OUTPUT", self.as_str())
    }
}

coded_enum!(
    /// Module rarity. Declaration order is the quality order.
    Tier, "tier" {
        Common => "COMMON",
        Uncommon => "UNCOMMON",
        Rare => "RARE",
        Epic => "EPIC",
        Legendary => "LEGENDARY",
    }
);

coded_enum!(
    /// Resources held by producers. `Credits` is the base currency.
    ResourceType, "resource" {
        Credits => "CREDITS",
        Minerals => "MINERALS",
        Energy => "ENERGY",
        Food => "FOOD",
        Crystals => "CRYSTALS",
    }
);

impl ResourceType {
    pub fn is_base_currency(self) -> bool {
        self == ResourceType::Credits
    }

    /// Resources with a market price row.
    pub fn tradable() -> impl Iterator<Item = ResourceType> {
        Self::ALL.iter().copied().filter(|r| !r.is_base_currency())
    }

    /// Modifier key scaling this resource's simulated price, e.g. `FOOD_PRICE`.
    pub fn price_modifier_key(self) -> String {
        format!("{}_PRICE", self.as_str())
    }
}

coded_enum!(
    CrewRole, "crew role" {
        Engineer => "ENGINEER",
        Scientist => "SCIENTIST",
        Pilot => "PILOT",
        Medic => "MEDIC",
        Trader => "TRADER",
    }
);

coded_enum!(
    TradeSide, "trade side" {
        Buy => "BUY",
        Sell => "SELL",
    }
);

coded_enum!(
    /// Kind of an immutable transaction-ledger row.
    TransactionKind, "transaction kind" {
        Production => "PRODUCTION",
        TradeBuy => "TRADE_BUY",
        TradeSell => "TRADE_SELL",
        EventReward => "EVENT_REWARD",
    }
);

coded_enum!(
    EventCategory, "event category" {
        Scheduled => "SCHEDULED",
        Random => "RANDOM",
        Triggered => "TRIGGERED",
    }
);

coded_enum!(
    /// Event status. Transitions only move forward.
    EventStatus, "event status" {
        Pending => "PENDING",
        Active => "ACTIVE",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
);

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Pending, EventStatus::Active)
                | (EventStatus::Pending, EventStatus::Cancelled)
                | (EventStatus::Active, EventStatus::Completed)
                | (EventStatus::Active, EventStatus::Cancelled)
        )
    }
}

/// A player's colony.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Producer {
    pub id: ProducerId,
    pub name: String,
    /// Base-currency balance (>= 0).
    pub balance: Decimal,
    pub level: u32,
    pub alliance_id: Option<i64>,
    pub last_active_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped on every balance mutation.
    pub version: i64,
    /// Non-currency resource holdings.
    pub holdings: BTreeMap<ResourceType, Decimal>,
}

impl Producer {
    /// Amount held of `resource`; the base currency reads the balance.
    pub fn holding(&self, resource: ResourceType) -> Decimal {
        if resource.is_base_currency() {
            return self.balance;
        }
        self.holdings
            .get(&resource)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// A production module owned by a producer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub producer_id: ProducerId,
    pub module_type: ModuleType,
    pub tier: Tier,
    /// 1..=10.
    pub level: u8,
    /// Nominally 0..=100; the calculator clamps whatever is stored.
    pub efficiency: i32,
    pub active: bool,
    pub age_cycles: u32,
    pub last_collected_at: Option<DateTime<Utc>>,
    pub version: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrewMember {
    pub id: CrewId,
    pub producer_id: ProducerId,
    pub name: String,
    pub role: CrewRole,
    pub specialty: Option<ModuleType>,
    /// Whole percent.
    pub output_bonus_pct: u32,
    /// Whole percent.
    pub efficiency_bonus_pct: u32,
    /// Weak reference; the crew member does not own the module.
    pub assigned_module: Option<ModuleId>,
}

/// Live market state for one tradable resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourcePrice {
    pub resource: ResourceType,
    pub current_price: Decimal,
    pub base_price: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    /// Percent change against the snapshot 24h ago.
    pub change_24h: f64,
    pub supply: f64,
    pub demand: f64,
    pub volatility: f64,
    /// Radians in [0, 2pi).
    pub seasonal_phase: f64,
    pub updated_at: DateTime<Utc>,
}

impl ResourcePrice {
    pub fn clamp(&self, price: Decimal) -> Decimal {
        price.clamp(self.min_price, self.max_price)
    }
}

/// Append-only price snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PricePoint {
    pub resource: ResourceType,
    pub price: Decimal,
    pub supply: f64,
    pub demand: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Who an event applies to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventScope {
    Global,
    Targeted(BTreeSet<ProducerId>),
}

impl EventScope {
    pub fn includes(&self, producer: ProducerId) -> bool {
        match self {
            EventScope::Global => true,
            EventScope::Targeted(ids) => ids.contains(&producer),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, EventScope::Global)
    }
}

/// Rank band of a reward pool: ranks `1..=max_rank` not claimed by a
/// tighter tier get `multiplier`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RewardTier {
    pub max_rank: u32,
    pub multiplier: Decimal,
    pub label: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActiveEvent {
    pub id: EventId,
    pub event_type: String,
    pub category: EventCategory,
    pub status: EventStatus,
    pub starts_at: DateTime<Utc>,
    /// Exclusive.
    pub ends_at: DateTime<Utc>,
    pub modifiers: ModifierMap,
    pub scope: EventScope,
    pub reward_pool: Decimal,
    pub reward_tiers: Vec<RewardTier>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActiveEvent {
    /// ACTIVE and `now` inside `[starts_at, ends_at)`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Active && self.starts_at <= now && now < self.ends_at
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventParticipant {
    pub event_id: EventId,
    pub producer_id: ProducerId,
    pub score: i64,
    pub actions: i64,
    pub reward_claimed: bool,
    /// Insertion order; breaks score ties.
    pub joined_seq: i64,
}

/// Idempotency key of one production credit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub producer_id: ProducerId,
    pub date: NaiveDate,
    pub resource: ResourceType,
}
