//! Multiplicative modifier table shared by production and market code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{ModuleType, ResourceType};

/// Scales every module's output.
pub const GLOBAL_PRODUCTION: &str = "GLOBAL_PRODUCTION";
/// Scales the random-walk term of every price tick.
pub const MARKET_VOLATILITY: &str = "MARKET_VOLATILITY";

/// Map from modifier key to multiplier. Missing keys read as 1.0.
///
/// Inserting a key that is already present multiplies into the existing
/// value, so folding events in any order yields the same table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModifierMap(BTreeMap<String, f64>);

impl ModifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Multiplier for `key`, 1.0 when absent.
    pub fn get(&self, key: &str) -> f64 {
        self.0.get(key).copied().unwrap_or(1.0)
    }

    /// Multiply `factor` into `key`. Non-finite or negative factors are ignored.
    pub fn stack(&mut self, key: impl Into<String>, factor: f64) {
        if !factor.is_finite() || factor < 0.0 {
            return;
        }
        *self.0.entry(key.into()).or_insert(1.0) *= factor;
    }

    /// Fold every entry of `other` into `self`.
    pub fn merge(&mut self, other: &ModifierMap) {
        for (k, v) in &other.0 {
            self.stack(k.clone(), *v);
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Combined `GLOBAL_PRODUCTION` x `<TYPE>_OUTPUT` factor for a module type.
    pub fn production_multiplier(&self, module_type: ModuleType) -> f64 {
        self.get(GLOBAL_PRODUCTION) * self.get(&module_type.output_modifier_key())
    }

    /// `<RESOURCE>_PRICE` factor applied to a freshly simulated price.
    pub fn price_multiplier(&self, resource: ResourceType) -> f64 {
        self.get(&resource.price_modifier_key())
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for ModifierMap {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut map = ModifierMap::new();
        for (k, v) in iter {
            map.stack(k, v);
        }
        map
    }
}
