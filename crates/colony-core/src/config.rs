//! Tunable economy parameters.
//!
//! Every constant the simulation depends on lives here so product policy
//! (aging curves, crew bonuses, price bands) can change without touching
//! the algorithms. Defaults are usable as-is; a YAML file may override any
//! subset of fields.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::model::{ModuleType, ResourceType, Tier};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid yaml: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

/// Root configuration object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub production: ProductionConfig,
    pub batch: BatchConfig,
    pub market: MarketConfig,
    pub depth: DepthConfig,
    pub events: EventConfig,
}

impl EconomyConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: EconomyConfig =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        let cfg = Self::from_yaml_str(&text)?;
        info!(path = %path.as_ref().display(), "loaded economy config");
        Ok(cfg)
    }

    /// Check cross-field invariants the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.production;
        if p.decay_floor < Decimal::ZERO || p.decay_floor > Decimal::ONE {
            return Err(ConfigError::Invalid("decay_floor must be within [0,1]".into()));
        }
        if p.decay_per_cycle < Decimal::ZERO {
            return Err(ConfigError::Invalid("decay_per_cycle must be >= 0".into()));
        }
        if p.specialty_mismatch_divisor <= Decimal::ZERO {
            return Err(ConfigError::Invalid("specialty_mismatch_divisor must be > 0".into()));
        }
        if self.batch.page_size == 0 {
            return Err(ConfigError::Invalid("batch.page_size must be > 0".into()));
        }
        if self.batch.unit_timeout_ms == 0 {
            return Err(ConfigError::Invalid("batch.unit_timeout_ms must be > 0".into()));
        }
        for (resource, params) in &self.market.resources {
            if resource.is_base_currency() {
                return Err(ConfigError::Invalid(format!("{resource} cannot have a market")));
            }
            if params.min_price <= Decimal::ZERO
                || params.min_price > params.base_price
                || params.base_price > params.max_price
            {
                return Err(ConfigError::Invalid(format!(
                    "{resource}: need 0 < min <= base <= max"
                )));
            }
            if !(params.volatility.is_finite() && params.volatility >= 0.0) {
                return Err(ConfigError::Invalid(format!("{resource}: bad volatility")));
            }
        }
        if self.depth.levels == 0 {
            return Err(ConfigError::Invalid("depth.levels must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.depth.jitter) {
            return Err(ConfigError::Invalid("depth.jitter must be within [0,1)".into()));
        }
        Ok(())
    }
}

/// Production formula constants.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionConfig {
    /// Per-level output of a COMMON module of each type.
    pub blueprint_base: BTreeMap<ModuleType, Decimal>,
    /// Scales the blueprint by rarity.
    pub tier_multiplier: BTreeMap<Tier, Decimal>,
    /// Resource each module type yields.
    pub output_resource: BTreeMap<ModuleType, ResourceType>,
    /// Age after which the aging penalty starts.
    pub aging_threshold_cycles: u32,
    /// Fraction of output lost per cycle past the threshold.
    pub decay_per_cycle: Decimal,
    /// Lowest decay factor; output never falls below this share.
    pub decay_floor: Decimal,
    /// Crew output bonus is divided by this when the specialty mismatches.
    pub specialty_mismatch_divisor: Decimal,
    pub max_modules_per_producer: usize,
    pub max_crew_per_producer: usize,
}

impl ProductionConfig {
    /// `blueprint_base(type) x tier_multiplier(tier)`, before level scaling.
    pub fn blueprint_base(&self, module_type: ModuleType, tier: Tier) -> Decimal {
        let base = self
            .blueprint_base
            .get(&module_type)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let mult = self
            .tier_multiplier
            .get(&tier)
            .copied()
            .unwrap_or(Decimal::ONE);
        base * mult
    }

    pub fn output_resource(&self, module_type: ModuleType) -> ResourceType {
        self.output_resource
            .get(&module_type)
            .copied()
            .unwrap_or(ResourceType::Credits)
    }
}

impl Default for ProductionConfig {
    fn default() -> Self {
        use ModuleType::*;
        Self {
            blueprint_base: BTreeMap::from([
                (MiningRig, Decimal::new(10, 0)),
                (SolarArray, Decimal::new(12, 0)),
                (HydroponicsBay, Decimal::new(8, 0)),
                (Refinery, Decimal::new(6, 0)),
                (ResearchLab, Decimal::new(5, 0)),
                (TradeHub, Decimal::new(7, 0)),
            ]),
            tier_multiplier: BTreeMap::from([
                (Tier::Common, Decimal::ONE),
                (Tier::Uncommon, Decimal::new(125, 2)),
                (Tier::Rare, Decimal::new(16, 1)),
                (Tier::Epic, Decimal::new(22, 1)),
                (Tier::Legendary, Decimal::new(3, 0)),
            ]),
            output_resource: BTreeMap::from([
                (MiningRig, ResourceType::Minerals),
                (SolarArray, ResourceType::Energy),
                (HydroponicsBay, ResourceType::Food),
                (Refinery, ResourceType::Crystals),
                (ResearchLab, ResourceType::Credits),
                (TradeHub, ResourceType::Credits),
            ]),
            aging_threshold_cycles: 30,
            decay_per_cycle: Decimal::new(1, 2),
            decay_floor: Decimal::new(5, 1),
            specialty_mismatch_divisor: Decimal::new(2, 0),
            max_modules_per_producer: 12,
            max_crew_per_producer: 12,
        }
    }
}

/// Batch scheduler limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub page_size: u32,
    pub unit_timeout_ms: u64,
    /// Producers idle for longer than this are not processed.
    pub active_window_days: u32,
    pub max_conflict_retries: u32,
    /// Failure share above which a run logs an aggregate alert.
    pub failure_alert_rate: f64,
}

impl BatchConfig {
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_millis(self.unit_timeout_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            unit_timeout_ms: 5_000,
            active_window_days: 7,
            max_conflict_retries: 3,
            failure_alert_rate: 0.1,
        }
    }
}

/// Per-resource price band and noise.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceMarketParams {
    pub base_price: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub volatility: f64,
    pub seasonal_amplitude: f64,
}

/// Market price simulator constants.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub tick_interval_secs: u64,
    pub walk_weight: f64,
    pub demand_weight: f64,
    pub seasonal_weight: f64,
    /// Radians added to the seasonal phase each tick.
    pub phase_step: f64,
    /// Relative deviation from base price that activates reversion.
    pub reversion_threshold: f64,
    pub reversion_strength: f64,
    pub pressure_scale: f64,
    pub pressure_cap: f64,
    /// Absolute percent move in one tick that triggers an alert.
    pub alert_threshold_pct: f64,
    /// History rows kept per resource.
    pub history_retention: u32,
    /// Most notifications a single tick may fan out.
    pub alert_recipient_cap: u32,
    pub demand_cache_ttl_secs: u64,
    pub supply_window_days: u32,
    /// Decimal places kept on prices.
    pub price_scale: u32,
    /// Demand weight of one module per tier.
    pub tier_weight: BTreeMap<Tier, f64>,
    pub resources: BTreeMap<ResourceType, ResourceMarketParams>,
    /// Module types whose operation consumes each resource.
    pub consumers: BTreeMap<ResourceType, Vec<ModuleType>>,
}

impl MarketConfig {
    pub fn params(&self, resource: ResourceType) -> Option<&ResourceMarketParams> {
        self.resources.get(&resource)
    }

    pub fn consumes(&self, resource: ResourceType, module_type: ModuleType) -> bool {
        self.consumers
            .get(&resource)
            .is_some_and(|types| types.contains(&module_type))
    }

    pub fn tier_weight(&self, tier: Tier) -> f64 {
        self.tier_weight.get(&tier).copied().unwrap_or(1.0)
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        use ModuleType::*;
        let params = |base: i64, min: i64, max: i64, volatility: f64, amp: f64| {
            ResourceMarketParams {
                base_price: Decimal::new(base, 0),
                min_price: Decimal::new(min, 0),
                max_price: Decimal::new(max, 0),
                volatility,
                seasonal_amplitude: amp,
            }
        };
        Self {
            tick_interval_secs: 15 * 60,
            walk_weight: 0.70,
            demand_weight: 0.20,
            seasonal_weight: 0.10,
            phase_step: TAU / 96.0,
            reversion_threshold: 0.30,
            reversion_strength: 0.10,
            pressure_scale: 0.5,
            pressure_cap: 0.1,
            alert_threshold_pct: 10.0,
            history_retention: 96,
            alert_recipient_cap: 500,
            demand_cache_ttl_secs: 300,
            supply_window_days: 1,
            price_scale: 4,
            tier_weight: BTreeMap::from([
                (Tier::Common, 1.0),
                (Tier::Uncommon, 1.5),
                (Tier::Rare, 2.0),
                (Tier::Epic, 3.0),
                (Tier::Legendary, 5.0),
            ]),
            resources: BTreeMap::from([
                (ResourceType::Minerals, params(10, 2, 50, 0.03, 0.02)),
                (ResourceType::Energy, params(5, 1, 25, 0.04, 0.05)),
                (ResourceType::Food, params(4, 1, 20, 0.02, 0.04)),
                (ResourceType::Crystals, params(25, 5, 125, 0.05, 0.01)),
            ]),
            consumers: BTreeMap::from([
                (ResourceType::Minerals, vec![Refinery, TradeHub]),
                (ResourceType::Energy, vec![MiningRig, Refinery, ResearchLab]),
                (ResourceType::Food, vec![ResearchLab, TradeHub]),
                (ResourceType::Crystals, vec![ResearchLab, SolarArray]),
            ]),
        }
    }
}

/// Synthetic order book shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    /// Price levels per side.
    pub levels: u32,
    /// Full bid/ask spread as a fraction of price.
    pub spread_pct: Decimal,
    /// Distance between levels as a fraction of price.
    pub step_pct: Decimal,
    pub base_quantity: Decimal,
    /// Extra quantity per level of depth, as a fraction of `base_quantity`.
    pub growth: Decimal,
    /// Quantity jitter half-width, in [0, 1).
    pub jitter: f64,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            levels: 10,
            spread_pct: Decimal::new(1, 2),
            step_pct: Decimal::new(5, 3),
            base_quantity: Decimal::new(100, 0),
            growth: Decimal::new(25, 2),
            jitter: 0.2,
        }
    }
}

/// Event lifecycle knobs that are not per-definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Terminal events older than this are purged.
    pub retention_days: u32,
    /// Length of the leaderboard returned after reward distribution.
    pub top_n: usize,
    /// Decimal places kept on reward amounts.
    pub reward_scale: u32,
    /// How far back a schedule entry may still fire after its slot.
    pub schedule_window_minutes: u32,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            top_n: 10,
            reward_scale: 2,
            schedule_window_minutes: 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EconomyConfig::default().validate().unwrap();
    }

    #[test]
    fn blueprint_scales_with_tier() {
        let p = ProductionConfig::default();
        assert_eq!(
            p.blueprint_base(ModuleType::MiningRig, Tier::Common),
            Decimal::new(10, 0)
        );
        assert_eq!(
            p.blueprint_base(ModuleType::MiningRig, Tier::Legendary),
            Decimal::new(30, 0)
        );
        assert_eq!(
            p.output_resource(ModuleType::ResearchLab),
            ResourceType::Credits
        );
    }

    #[test]
    fn partial_yaml_overrides_defaults() {
        let cfg = EconomyConfig::from_yaml_str(
            "batch:\n  page_size: 25\nproduction:\n  aging_threshold_cycles: 10\n",
        )
        .unwrap();
        assert_eq!(cfg.batch.page_size, 25);
        assert_eq!(cfg.batch.unit_timeout_ms, 5_000);
        assert_eq!(cfg.production.aging_threshold_cycles, 10);
        assert_eq!(cfg.production.decay_floor, Decimal::new(5, 1));
    }

    #[test]
    fn rejects_inverted_price_band() {
        let yaml = "
market:
  resources:
    FOOD:
      base_price: 4
      min_price: 5
      max_price: 20
      volatility: 0.02
      seasonal_amplitude: 0.0
";
        let err = EconomyConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_market_for_base_currency() {
        let yaml = "
market:
  resources:
    CREDITS:
      base_price: 1
      min_price: 1
      max_price: 1
      volatility: 0.0
      seasonal_amplitude: 0.0
";
        assert!(EconomyConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn bundled_yaml_parses() {
        let path =
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets/economy.yaml");
        let cfg = EconomyConfig::load(path).unwrap();
        assert_eq!(cfg.market.resources.len(), 4);
    }
}
