//! Raw table rows and their conversion into domain types.

use colony_core::{
    ActiveEvent, CrewId, CrewMember, EventId, EventParticipant, EventScope, Module, ModuleId,
    ModuleType, ProducerId, ResourcePrice, RewardTier, ValidationError,
};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::{cents_to_decimal, e4_to_price, from_millis, StoreError};

pub(crate) fn parse_code<T>(value: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = ValidationError>,
{
    value
        .parse()
        .map_err(|e: ValidationError| StoreError::Corrupt(e.to_string()))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProducerRow {
    pub id: i64,
    pub name: String,
    pub balance_cents: i64,
    pub level: i64,
    pub alliance_id: Option<i64>,
    pub last_active_at: i64,
    pub version: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ModuleRow {
    pub id: i64,
    pub producer_id: i64,
    pub module_type: String,
    pub tier: String,
    pub level: i64,
    pub efficiency: i64,
    pub active: bool,
    pub age_cycles: i64,
    pub last_collected_at: Option<i64>,
    pub version: i64,
}

impl TryFrom<ModuleRow> for Module {
    type Error = StoreError;

    fn try_from(row: ModuleRow) -> Result<Self, Self::Error> {
        let level = u8::try_from(row.level)
            .map_err(|_| StoreError::Corrupt(format!("module {} level {}", row.id, row.level)))?;
        Ok(Module {
            id: ModuleId(row.id),
            producer_id: ProducerId(row.producer_id),
            module_type: parse_code(&row.module_type)?,
            tier: parse_code(&row.tier)?,
            level,
            efficiency: i32::try_from(row.efficiency).unwrap_or(0),
            active: row.active,
            age_cycles: u32::try_from(row.age_cycles).unwrap_or(u32::MAX),
            last_collected_at: row.last_collected_at.map(from_millis).transpose()?,
            version: row.version,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CrewRow {
    pub id: i64,
    pub producer_id: i64,
    pub name: String,
    pub role: String,
    pub specialty: Option<String>,
    pub output_bonus_pct: i64,
    pub efficiency_bonus_pct: i64,
    pub assigned_module_id: Option<i64>,
}

impl TryFrom<CrewRow> for CrewMember {
    type Error = StoreError;

    fn try_from(row: CrewRow) -> Result<Self, Self::Error> {
        Ok(CrewMember {
            id: CrewId(row.id),
            producer_id: ProducerId(row.producer_id),
            name: row.name,
            role: parse_code(&row.role)?,
            specialty: row
                .specialty
                .as_deref()
                .map(parse_code::<ModuleType>)
                .transpose()?,
            output_bonus_pct: u32::try_from(row.output_bonus_pct).unwrap_or(0),
            efficiency_bonus_pct: u32::try_from(row.efficiency_bonus_pct).unwrap_or(0),
            assigned_module: row.assigned_module_id.map(ModuleId),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PriceRow {
    pub resource: String,
    pub current_price_e4: i64,
    pub base_price_e4: i64,
    pub min_price_e4: i64,
    pub max_price_e4: i64,
    pub change_24h: f64,
    pub supply: f64,
    pub demand: f64,
    pub volatility: f64,
    pub seasonal_phase: f64,
    pub updated_at: i64,
}

impl TryFrom<PriceRow> for ResourcePrice {
    type Error = StoreError;

    fn try_from(row: PriceRow) -> Result<Self, Self::Error> {
        Ok(ResourcePrice {
            resource: parse_code(&row.resource)?,
            current_price: e4_to_price(row.current_price_e4),
            base_price: e4_to_price(row.base_price_e4),
            min_price: e4_to_price(row.min_price_e4),
            max_price: e4_to_price(row.max_price_e4),
            change_24h: row.change_24h,
            supply: row.supply,
            demand: row.demand,
            volatility: row.volatility,
            seasonal_phase: row.seasonal_phase,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    pub id: i64,
    pub event_type: String,
    pub category: String,
    pub status: String,
    pub starts_at: i64,
    pub ends_at: i64,
    pub modifiers: String,
    pub is_global: bool,
    pub reward_pool_cents: i64,
    pub reward_tiers: String,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl EventRow {
    /// Targeted events need their target set, loaded separately.
    pub fn into_event(self, targets: BTreeSet<ProducerId>) -> Result<ActiveEvent, StoreError> {
        let reward_tiers: Vec<RewardTier> = serde_json::from_str(&self.reward_tiers)?;
        Ok(ActiveEvent {
            id: EventId(self.id),
            event_type: self.event_type,
            category: parse_code(&self.category)?,
            status: parse_code(&self.status)?,
            starts_at: from_millis(self.starts_at)?,
            ends_at: from_millis(self.ends_at)?,
            modifiers: serde_json::from_str(&self.modifiers)?,
            scope: if self.is_global {
                EventScope::Global
            } else {
                EventScope::Targeted(targets)
            },
            reward_pool: cents_to_decimal(self.reward_pool_cents),
            reward_tiers,
            created_at: from_millis(self.created_at)?,
            completed_at: self.completed_at.map(from_millis).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ParticipantRow {
    pub id: i64,
    pub event_id: i64,
    pub producer_id: i64,
    pub score: i64,
    pub actions: i64,
    pub reward_claimed: bool,
}

impl From<ParticipantRow> for EventParticipant {
    fn from(row: ParticipantRow) -> Self {
        EventParticipant {
            event_id: EventId(row.event_id),
            producer_id: ProducerId(row.producer_id),
            score: row.score,
            actions: row.actions,
            reward_claimed: row.reward_claimed,
            joined_seq: row.id,
        }
    }
}
