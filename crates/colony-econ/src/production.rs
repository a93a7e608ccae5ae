//! Production output of a producer's modules.
//!
//! The formula, in order: blueprint base x level; crew bonus (full when the
//! crew specialty matches, divided otherwise, and a matching specialist also
//! uplifts the base by their efficiency bonus); aging penalty past the age
//! threshold; efficiency; event modifiers. Inputs are clamped rather than
//! rejected so a corrupt row can never fail a batch.

use colony_core::{
    CrewMember, ModifierMap, Module, ModuleId, ModuleType, ProductionConfig, ResourceType,
    MAX_MODULE_LEVEL,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::round_money;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Intermediate terms of one module's output, kept for auditing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionBreakdown {
    /// Blueprint x level, including any specialist uplift.
    pub base: Decimal,
    pub crew_bonus: Decimal,
    pub aging_penalty: Decimal,
    /// Clamped efficiency as a fraction.
    pub efficiency_mult: Decimal,
    /// Product of the applicable event modifiers.
    pub modifier_mult: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutput {
    pub module_id: ModuleId,
    pub module_type: ModuleType,
    pub resource: ResourceType,
    /// Final output, rounded to cents.
    pub output: Decimal,
    pub breakdown: ProductionBreakdown,
}

/// Output of all active modules of one producer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductionResult {
    pub total: Decimal,
    pub by_resource: BTreeMap<ResourceType, Decimal>,
    pub modules: Vec<ModuleOutput>,
}

impl ProductionResult {
    pub fn is_empty(&self) -> bool {
        self.total.is_zero()
    }
}

/// Share of gross output kept at a given age.
///
/// 1.0 up to the threshold, then falls linearly by `decay_per_cycle` per
/// cycle and never below `decay_floor`.
pub fn decay_factor(cfg: &ProductionConfig, age_cycles: u32) -> Decimal {
    if age_cycles <= cfg.aging_threshold_cycles {
        return Decimal::ONE;
    }
    let over = Decimal::from(age_cycles - cfg.aging_threshold_cycles);
    (Decimal::ONE - over * cfg.decay_per_cycle)
        .max(cfg.decay_floor)
        .min(Decimal::ONE)
}

/// Output of a single module. `crew` must be the member assigned to it.
pub fn module_output(
    cfg: &ProductionConfig,
    module: &Module,
    crew: Option<&CrewMember>,
    modifiers: &ModifierMap,
) -> ModuleOutput {
    let level = Decimal::from(module.level.clamp(1, MAX_MODULE_LEVEL));
    let mut base = cfg.blueprint_base(module.module_type, module.tier) * level;

    let mut crew_bonus = Decimal::ZERO;
    if let Some(c) = crew {
        let output_pct = Decimal::from(c.output_bonus_pct) / HUNDRED;
        if c.specialty == Some(module.module_type) {
            crew_bonus = base * output_pct;
            base *= Decimal::ONE + Decimal::from(c.efficiency_bonus_pct) / HUNDRED;
        } else {
            crew_bonus = base * output_pct / cfg.specialty_mismatch_divisor;
        }
    }

    let gross = base + crew_bonus;
    let aging_penalty = gross * (Decimal::ONE - decay_factor(cfg, module.age_cycles));
    let efficiency_mult = Decimal::from(module.efficiency.clamp(0, 100)) / HUNDRED;
    let raw = (gross - aging_penalty).max(Decimal::ZERO) * efficiency_mult;

    let modifier_mult = Decimal::from_f64(modifiers.production_multiplier(module.module_type))
        .unwrap_or(Decimal::ONE)
        .max(Decimal::ZERO);
    let output = round_money(raw * modifier_mult);

    ModuleOutput {
        module_id: module.id,
        module_type: module.module_type,
        resource: cfg.output_resource(module.module_type),
        output,
        breakdown: ProductionBreakdown {
            base,
            crew_bonus,
            aging_penalty,
            efficiency_mult,
            modifier_mult,
        },
    }
}

/// Output of every active module, with crew matched by assignment.
pub fn calculate_production(
    cfg: &ProductionConfig,
    modules: &[Module],
    crew: &[CrewMember],
    modifiers: &ModifierMap,
) -> ProductionResult {
    let mut by_module: BTreeMap<ModuleId, &CrewMember> = BTreeMap::new();
    for c in crew {
        if let Some(module_id) = c.assigned_module {
            by_module.entry(module_id).or_insert(c);
        }
    }

    let mut result = ProductionResult::default();
    for m in modules.iter().filter(|m| m.active) {
        let out = module_output(cfg, m, by_module.get(&m.id).copied(), modifiers);
        result.total += out.output;
        *result.by_resource.entry(out.resource).or_default() += out.output;
        result.modules.push(out);
    }
    result
}
