//! Splitting an event's reward pool across its participants.

use colony_core::{EventParticipant, ProducerId, RewardTier};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::cmp::Reverse;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RewardAllocation {
    pub producer_id: ProducerId,
    /// 1-based.
    pub rank: u32,
    pub score: i64,
    pub multiplier: Decimal,
    pub tier_label: Option<String>,
    pub amount: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RewardPlan {
    /// Ordered by rank.
    pub allocations: Vec<RewardAllocation>,
    pub total: Decimal,
}

impl RewardPlan {
    pub fn top(&self, n: usize) -> &[RewardAllocation] {
        &self.allocations[..n.min(self.allocations.len())]
    }

    /// Allocations worth crediting.
    pub fn payable(&self) -> impl Iterator<Item = &RewardAllocation> {
        self.allocations.iter().filter(|a| a.amount > Decimal::ZERO)
    }
}

/// Tier covering `rank`: the one with the smallest `max_rank >= rank`.
pub fn tier_for(tiers: &[RewardTier], rank: u32) -> Option<&RewardTier> {
    tiers
        .iter()
        .filter(|t| t.max_rank >= rank)
        .min_by_key(|t| t.max_rank)
}

/// Rank participants by score (ties by join order) and split `pool`.
///
/// Each participant's weight is their score share times their tier
/// multiplier; weights are renormalised so the amounts add up to the pool
/// before truncation to `scale` decimal places. The sum never exceeds the
/// pool.
pub fn distribute(
    pool: Decimal,
    tiers: &[RewardTier],
    participants: &[EventParticipant],
    scale: u32,
) -> RewardPlan {
    if participants.is_empty() {
        return RewardPlan::default();
    }
    let mut ranked: Vec<&EventParticipant> = participants.iter().collect();
    ranked.sort_by_key(|p| (Reverse(p.score), p.joined_seq));

    let total_score: i64 = ranked.iter().map(|p| p.score.max(0)).sum();
    let weighted: Vec<(u32, &EventParticipant, Option<&RewardTier>, Decimal)> = ranked
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let rank = i as u32 + 1;
            let tier = tier_for(tiers, rank);
            let multiplier = tier.map(|t| t.multiplier).unwrap_or(Decimal::ONE);
            let share = if total_score > 0 {
                Decimal::from(p.score.max(0))
            } else {
                Decimal::ONE
            };
            (rank, p, tier, share * multiplier)
        })
        .collect();
    let weight_sum: Decimal = weighted.iter().map(|w| w.3).sum();

    let mut allocations: Vec<RewardAllocation> = weighted
        .into_iter()
        .map(|(rank, p, tier, weight)| {
            let amount = if pool > Decimal::ZERO && weight_sum > Decimal::ZERO {
                (pool * weight / weight_sum).round_dp_with_strategy(scale, RoundingStrategy::ToZero)
            } else {
                Decimal::ZERO
            };
            RewardAllocation {
                producer_id: p.producer_id,
                rank,
                score: p.score,
                multiplier: tier.map(|t| t.multiplier).unwrap_or(Decimal::ONE),
                tier_label: tier.map(|t| t.label.clone()),
                amount,
            }
        })
        .collect();

    let mut total: Decimal = allocations.iter().map(|a| a.amount).sum();
    if total > pool {
        // Division rounding in the last digit can push the sum a unit over.
        let excess = total - pool;
        if let Some(last) = allocations.iter_mut().rev().find(|a| a.amount >= excess) {
            last.amount -= excess;
            total = pool;
        }
    }
    RewardPlan { allocations, total }
}
