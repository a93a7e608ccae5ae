//! Folding live events into one modifier table.

use chrono::{DateTime, Utc};
use colony_core::{ActiveEvent, ModifierMap, ProducerId};

/// Multiply the modifiers of every event live at `now` whose scope
/// includes `producer`. Keys absent from every event read as 1.0.
pub fn aggregate_modifiers<'a, I>(
    events: I,
    producer: ProducerId,
    now: DateTime<Utc>,
) -> ModifierMap
where
    I: IntoIterator<Item = &'a ActiveEvent>,
{
    let mut out = ModifierMap::new();
    for event in events {
        if event.is_live_at(now) && event.scope.includes(producer) {
            out.merge(&event.modifiers);
        }
    }
    out
}

/// Modifiers applied to the market: global events only, since prices are
/// shared by every producer.
pub fn market_modifiers<'a, I>(events: I, now: DateTime<Utc>) -> ModifierMap
where
    I: IntoIterator<Item = &'a ActiveEvent>,
{
    let mut out = ModifierMap::new();
    for event in events {
        if event.is_live_at(now) && event.scope.is_global() {
            out.merge(&event.modifiers);
        }
    }
    out
}
