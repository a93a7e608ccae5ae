//! Market tick, synthetic depth, and trade execution.

use chrono::{DateTime, Duration, Utc};
use colony_core::{
    validate_trade_request, PricePoint, ProducerId, ResourcePrice, ResourceType, TradeSide,
};
use colony_econ::{
    generate_depth, simulate_tick, tier_weighted_demand, walk_book, EconError, MarketInputs,
    OrderBook, PriceUpdate,
};
use colony_events::market_modifiers;
use persistence::TradeSettlement;
use rand::RngCore;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::{Engine, EngineError};

const PRICE_ALERT: &str = "price_alert";

#[derive(Clone, Debug, Serialize)]
pub struct MarketTickReport {
    pub at: DateTime<Utc>,
    pub updates: Vec<PriceUpdate>,
    pub alerts_created: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TradeResult {
    pub transaction_id: i64,
    pub resource: ResourceType,
    pub side: TradeSide,
    pub requested: Decimal,
    pub filled: Decimal,
    pub avg_price: Decimal,
    /// Currency paid (buy) or received (sell).
    pub total_cost: Decimal,
    pub slippage: Decimal,
    pub partial: bool,
    pub balance: Decimal,
    pub holding: Decimal,
}

impl Engine {
    /// Insert a price row at base price for every configured market that
    /// has none. Returns how many were created.
    pub async fn seed_market(&self) -> Result<u64, EngineError> {
        let now = self.now();
        let rows: Vec<ResourcePrice> = self
            .config
            .market
            .resources
            .iter()
            .map(|(resource, p)| ResourcePrice {
                resource: *resource,
                current_price: p.base_price,
                base_price: p.base_price,
                min_price: p.min_price,
                max_price: p.max_price,
                change_24h: 0.0,
                supply: 0.0,
                demand: 0.0,
                volatility: p.volatility,
                seasonal_phase: 0.0,
                updated_at: now,
            })
            .collect();
        let created = self.store.seed_prices(&rows).await?;
        info!(category = "market", created, "market seeded");
        Ok(created)
    }

    /// Demand per resource, recomputed from module counts once the cached
    /// value expires.
    async fn demand(
        &self,
        resources: &[ResourceType],
    ) -> Result<BTreeMap<ResourceType, f64>, EngineError> {
        let mut out = BTreeMap::new();
        let mut counts = None;
        for &resource in resources {
            if let Some(d) = self.demand.get(&resource).await {
                out.insert(resource, d);
                continue;
            }
            if counts.is_none() {
                counts = Some(self.store.demand_counts().await?);
            }
            let d = tier_weighted_demand(
                &self.config.market,
                resource,
                counts.as_deref().unwrap_or_default(),
            );
            self.demand.insert(resource, d).await;
            out.insert(resource, d);
        }
        Ok(out)
    }

    /// Move every price one step and fan out alerts for large moves.
    pub async fn run_market_tick(&self) -> Result<MarketTickReport, EngineError> {
        let now = self.now();
        let cfg = &self.config.market;
        let prices = self.store.list_prices().await?;
        let events = self.store.live_events(now).await?;
        let modifiers = market_modifiers(events.iter(), now);
        let resources: Vec<ResourceType> = prices.iter().map(|p| p.resource).collect();
        let demand = self.demand(&resources).await?;
        let supply = self
            .store
            .realized_supply(now - Duration::days(i64::from(cfg.supply_window_days)))
            .await?;

        let mut ticked: Vec<(&ResourcePrice, PriceUpdate)> = Vec::with_capacity(prices.len());
        {
            let mut rng = self.rng.lock().await;
            for p in &prices {
                let inputs = MarketInputs {
                    demand: demand.get(&p.resource).copied().unwrap_or(0.0),
                    supply: supply
                        .get(&p.resource)
                        .and_then(|s| s.to_f64())
                        .unwrap_or(0.0),
                };
                match simulate_tick(cfg, p, inputs, &modifiers, &mut *rng) {
                    Ok(u) => ticked.push((p, u)),
                    Err(e) => warn!(
                        category = "market",
                        resource = %p.resource,
                        error = %e,
                        "price skipped"
                    ),
                }
            }
        }

        let day_ago = now - Duration::hours(24);
        let mut rows = Vec::with_capacity(ticked.len());
        for (p, u) in &ticked {
            let change_24h = match self.store.price_at_or_before(u.resource, day_ago).await? {
                Some(old) if old > Decimal::ZERO => {
                    let pct = (u.new_price - old) / old * Decimal::ONE_HUNDRED;
                    pct.to_f64().unwrap_or(0.0)
                }
                _ => 0.0,
            };
            rows.push(ResourcePrice {
                current_price: u.new_price,
                change_24h,
                supply: u.inputs.supply,
                demand: u.inputs.demand,
                seasonal_phase: u.phase,
                updated_at: now,
                ..(*p).clone()
            });
        }
        self.store
            .apply_price_tick(&rows, cfg.history_retention)
            .await?;
        let updates: Vec<PriceUpdate> = ticked.into_iter().map(|(_, u)| u).collect();

        let active_since = now - Duration::days(i64::from(self.config.batch.active_window_days));
        let mut alerts_created = 0u64;
        for u in updates
            .iter()
            .filter(|u| u.change_pct.abs() > cfg.alert_threshold_pct)
        {
            let remaining = u64::from(cfg.alert_recipient_cap).saturating_sub(alerts_created);
            if remaining == 0 {
                warn!(category = "market", resource = %u.resource, "alert cap reached");
                break;
            }
            let message = format!(
                "{} moved {:+.1}% to {}",
                u.resource, u.change_pct, u.new_price
            );
            alerts_created += self
                .store
                .fan_out_notification(
                    PRICE_ALERT,
                    &message,
                    active_since,
                    u32::try_from(remaining).unwrap_or(u32::MAX),
                    now,
                )
                .await?;
        }

        for u in &updates {
            info!(
                category = "market",
                resource = %u.resource,
                old = %u.old_price,
                new = %u.new_price,
                change_pct = u.change_pct,
                "price updated"
            );
        }
        info!(category = "market", updated = updates.len(), alerts_created, "market tick finished");
        Ok(MarketTickReport {
            at: now,
            updates,
            alerts_created,
        })
    }

    async fn price_row(&self, resource: ResourceType) -> Result<ResourcePrice, EngineError> {
        self.store
            .get_price(resource)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("market for {resource}")))
    }

    async fn fresh_book(&self, price: &ResourcePrice) -> OrderBook {
        let seed = self.rng.lock().await.next_u64();
        generate_depth(&self.config.depth, price, seed)
    }

    /// A freshly generated book around the current price.
    pub async fn order_book(&self, resource: ResourceType) -> Result<OrderBook, EngineError> {
        let price = self.price_row(resource).await?;
        Ok(self.fresh_book(&price).await)
    }

    /// Oldest first, at most `limit` points.
    pub async fn price_history(
        &self,
        resource: ResourceType,
        limit: u32,
    ) -> Result<Vec<PricePoint>, EngineError> {
        Ok(self.store.price_history(resource, limit).await?)
    }

    /// Fill a market order against synthetic depth and settle it.
    ///
    /// The producer row is read once; if it changes before settlement the
    /// trade fails with a retryable conflict and nothing is applied.
    pub async fn execute_trade(
        &self,
        producer: ProducerId,
        resource: ResourceType,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<TradeResult, EngineError> {
        validate_trade_request(resource, quantity)?;
        let price = self.price_row(resource).await?;
        let snapshot = self.store.require_producer(producer).await?;
        let book = self.fresh_book(&price).await;
        let plan = walk_book(&book, side, quantity, price.current_price).map_err(|e| match e {
            EconError::InsufficientLiquidity { requested } => EngineError::InsufficientLiquidity {
                resource,
                requested,
            },
            other => EngineError::Econ(other),
        })?;

        let now = self.now();
        let amount = plan.settlement_amount();
        let settled = self
            .store
            .settle_trade(&TradeSettlement {
                producer_id: producer,
                expected_version: snapshot.version,
                resource,
                side,
                quantity: plan.filled,
                amount,
                avg_price: plan.avg_price,
                now,
            })
            .await?;
        self.mark_active("trade", producer, now).await;

        info!(
            category = "trade",
            %producer,
            %resource,
            %side,
            requested = %quantity,
            filled = %plan.filled,
            avg_price = %plan.avg_price,
            slippage = %plan.slippage,
            "trade settled"
        );
        Ok(TradeResult {
            transaction_id: settled.transaction_id,
            resource,
            side,
            requested: quantity,
            filled: plan.filled,
            avg_price: plan.avg_price,
            total_cost: amount,
            slippage: plan.slippage,
            partial: plan.is_partial(),
            balance: settled.balance,
            holding: settled.holding,
        })
    }
}
