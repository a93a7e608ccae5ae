//! Stochastic price tick for one resource.
//!
//! new = current x (1 + delta), where
//! delta = w_walk x walk + w_demand x pressure + w_season x seasonality + reversion.
//! The result is scaled by the resource's price modifier, rounded and
//! clamped into the configured band.

use colony_core::{
    MarketConfig, ModifierMap, ModuleType, ResourcePrice, ResourceType, Tier, MARKET_VOLATILITY,
};
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::debug;

use crate::EconError;

/// Demand/supply observed for a resource this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketInputs {
    pub demand: f64,
    pub supply: f64,
}

/// The terms that made up a tick's delta.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceComponents {
    pub walk: f64,
    pub demand_pressure: f64,
    pub seasonality: f64,
    pub reversion: f64,
    pub delta: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub resource: ResourceType,
    pub old_price: Decimal,
    pub new_price: Decimal,
    /// Percent move of this tick.
    pub change_pct: f64,
    /// Seasonal phase after this tick, in [0, 2pi).
    pub phase: f64,
    pub inputs: MarketInputs,
    pub components: PriceComponents,
}

/// Standard normal sample via Box-Muller from two uniform draws.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // u1 in (0, 1] keeps ln finite
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

/// `clamp((demand - s) / s x scale, -cap, cap)` with `s = max(supply, 1)`.
pub fn demand_pressure(demand: f64, supply: f64, scale: f64, cap: f64) -> f64 {
    let s = supply.max(1.0);
    let p = (demand - s) / s * scale;
    if !p.is_finite() {
        return 0.0;
    }
    p.clamp(-cap, cap)
}

pub fn seasonality(phase: f64, amplitude: f64) -> f64 {
    phase.sin() * amplitude
}

/// Advance a phase and wrap it into [0, 2pi).
pub fn advance_phase(phase: f64, step: f64) -> f64 {
    let next = (phase + step).rem_euclid(TAU);
    if next.is_finite() {
        next
    } else {
        0.0
    }
}

/// Pull toward base once the relative deviation exceeds `threshold`.
///
/// Proportional to the deviation; zero inside the band.
pub fn reversion(current: f64, base: f64, threshold: f64, strength: f64) -> f64 {
    if base <= 0.0 {
        return 0.0;
    }
    let deviation = (current - base) / base;
    if deviation.abs() > threshold {
        -deviation * strength
    } else {
        0.0
    }
}

/// Tier-weighted count of modules that consume `resource`.
///
/// `counts` holds `(type, tier, count)` rows of active modules.
pub fn tier_weighted_demand(
    cfg: &MarketConfig,
    resource: ResourceType,
    counts: &[(ModuleType, Tier, i64)],
) -> f64 {
    counts
        .iter()
        .filter(|(t, _, _)| cfg.consumes(resource, *t))
        .map(|(_, tier, n)| cfg.tier_weight(*tier) * (*n).max(0) as f64)
        .sum()
}

/// Simulate one tick for one resource.
pub fn simulate_tick<R: Rng + ?Sized>(
    cfg: &MarketConfig,
    state: &ResourcePrice,
    inputs: MarketInputs,
    modifiers: &ModifierMap,
    rng: &mut R,
) -> Result<PriceUpdate, EconError> {
    let params = cfg
        .params(state.resource)
        .ok_or(EconError::MissingMarket(state.resource))?;
    let current = state.current_price.to_f64().ok_or(EconError::NonFinite)?;
    let base = state.base_price.to_f64().ok_or(EconError::NonFinite)?;
    if current <= 0.0 || base <= 0.0 {
        return Err(EconError::InvalidPrice);
    }

    let walk = gaussian(rng) * params.volatility * modifiers.get(MARKET_VOLATILITY);
    let pressure = demand_pressure(
        inputs.demand,
        inputs.supply,
        cfg.pressure_scale,
        cfg.pressure_cap,
    );
    let phase = advance_phase(state.seasonal_phase, cfg.phase_step);
    let season = seasonality(phase, params.seasonal_amplitude);
    let pull = reversion(
        current,
        base,
        cfg.reversion_threshold,
        cfg.reversion_strength,
    );
    let delta =
        cfg.walk_weight * walk + cfg.demand_weight * pressure + cfg.seasonal_weight * season + pull;

    let mut next = current * (1.0 + delta) * modifiers.price_multiplier(state.resource);
    if !next.is_finite() {
        next = current;
    }
    let rounded = Decimal::from_f64(next)
        .unwrap_or(state.current_price)
        .round_dp(cfg.price_scale);
    let new_price = state.clamp(rounded);
    if new_price != rounded {
        debug!(
            target: "colony_econ",
            resource = %state.resource,
            simulated = %rounded,
            clamped = %new_price,
            "price held at band edge"
        );
    }

    let change = (new_price - state.current_price) / state.current_price;
    let change_pct = (change * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0);

    Ok(PriceUpdate {
        resource: state.resource,
        old_price: state.current_price,
        new_price,
        change_pct,
        phase,
        inputs,
        components: PriceComponents {
            walk,
            demand_pressure: pressure,
            seasonality: season,
            reversion: pull,
            delta,
        },
    })
}
