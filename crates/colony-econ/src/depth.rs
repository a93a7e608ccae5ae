//! Synthetic order book around the current price.
//!
//! Nothing here is persisted: the book is regenerated per request from the
//! live price. Quantities grow with depth and carry seeded jitter so the
//! same seed always yields the same ladder.

use colony_core::{DepthConfig, ResourcePrice, ResourceType};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::round_money;

const PRICE_DP: u32 = 4;

/// One price level with the running total up to and including it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub total: Decimal,
}

/// Two-sided ladder. Bids descend from the best bid, asks ascend from the
/// best ask.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub resource: ResourceType,
    pub mid: Decimal,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub spread: Decimal,
    /// Spread as a percent of the mid price.
    pub spread_pct: Decimal,
}

impl OrderBook {
    /// Build a book from explicit `(price, quantity)` levels, best first.
    pub fn from_levels(
        resource: ResourceType,
        mid: Decimal,
        bids: &[(Decimal, Decimal)],
        asks: &[(Decimal, Decimal)],
    ) -> Self {
        let bids = cumulate(bids);
        let asks = cumulate(asks);
        let (spread, spread_pct) = spread_of(&bids, &asks, mid);
        Self {
            resource,
            mid,
            bids,
            asks,
            spread,
            spread_pct,
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn bid_liquidity(&self) -> Decimal {
        self.bids.last().map(|l| l.total).unwrap_or(Decimal::ZERO)
    }

    pub fn ask_liquidity(&self) -> Decimal {
        self.asks.last().map(|l| l.total).unwrap_or(Decimal::ZERO)
    }
}

fn cumulate(levels: &[(Decimal, Decimal)]) -> Vec<BookLevel> {
    let mut running = Decimal::ZERO;
    levels
        .iter()
        .map(|(price, quantity)| {
            running += *quantity;
            BookLevel {
                price: *price,
                quantity: *quantity,
                total: running,
            }
        })
        .collect()
}

fn spread_of(bids: &[BookLevel], asks: &[BookLevel], mid: Decimal) -> (Decimal, Decimal) {
    match (bids.first(), asks.first()) {
        (Some(b), Some(a)) => {
            let spread = a.price - b.price;
            let pct = if mid > Decimal::ZERO {
                (spread / mid * Decimal::ONE_HUNDRED).round_dp(PRICE_DP)
            } else {
                Decimal::ZERO
            };
            (spread, pct)
        }
        _ => (Decimal::ZERO, Decimal::ZERO),
    }
}

/// Generate `cfg.levels` levels per side around `price.current_price`.
pub fn generate_depth(cfg: &DepthConfig, price: &ResourcePrice, seed: u64) -> OrderBook {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mid = price.current_price;
    let half_spread = mid * cfg.spread_pct / Decimal::TWO;
    let step = mid * cfg.step_pct;

    let mut bids = Vec::with_capacity(cfg.levels as usize);
    let mut asks = Vec::with_capacity(cfg.levels as usize);
    for i in 0..cfg.levels {
        let offset = half_spread + step * Decimal::from(i);
        let bid = price.clamp((mid - offset).round_dp(PRICE_DP));
        let ask = price.clamp((mid + offset).round_dp(PRICE_DP));
        bids.push((bid, level_quantity(cfg, i, &mut rng)));
        asks.push((ask, level_quantity(cfg, i, &mut rng)));
    }
    OrderBook::from_levels(price.resource, mid, &bids, &asks)
}

fn level_quantity<R: Rng + ?Sized>(cfg: &DepthConfig, level: u32, rng: &mut R) -> Decimal {
    let depth = Decimal::ONE + cfg.growth * Decimal::from(level);
    let jitter = if cfg.jitter > 0.0 {
        rng.gen_range(-cfg.jitter..=cfg.jitter)
    } else {
        0.0
    };
    let factor = Decimal::from_f64(1.0 + jitter).unwrap_or(Decimal::ONE);
    round_money(cfg.base_quantity * depth * factor).max(Decimal::new(1, 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn price(current: i64) -> ResourcePrice {
        ResourcePrice {
            resource: ResourceType::Minerals,
            current_price: Decimal::new(current, 0),
            base_price: Decimal::new(10, 0),
            min_price: Decimal::new(2, 0),
            max_price: Decimal::new(50, 0),
            change_24h: 0.0,
            supply: 0.0,
            demand: 0.0,
            volatility: 0.03,
            seasonal_phase: 0.0,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn ladder_shape() {
        let cfg = DepthConfig::default();
        let book = generate_depth(&cfg, &price(10), 42);
        assert_eq!(book.bids.len(), 10);
        assert_eq!(book.asks.len(), 10);
        // 1% spread around 10
        assert_eq!(book.best_bid(), Some(Decimal::new(995, 2)));
        assert_eq!(book.best_ask(), Some(Decimal::new(1005, 2)));
        assert_eq!(book.spread, Decimal::new(1, 1));
        assert_eq!(book.spread_pct, Decimal::ONE);
        for w in book.asks.windows(2) {
            assert!(w[1].price > w[0].price);
            assert!(w[1].total > w[0].total);
        }
        for w in book.bids.windows(2) {
            assert!(w[1].price < w[0].price);
        }
        let asked: Decimal = book.asks.iter().map(|l| l.quantity).sum();
        assert_eq!(book.ask_liquidity(), asked);
        let bid: Decimal = book.bids.iter().map(|l| l.quantity).sum();
        assert_eq!(book.bid_liquidity(), bid);
    }

    #[test]
    fn same_seed_same_book() {
        let cfg = DepthConfig::default();
        let book = generate_depth(&cfg, &price(10), 9);
        assert_eq!(book, generate_depth(&cfg, &price(10), 9));
        assert_ne!(book, generate_depth(&cfg, &price(10), 10));
    }

    #[test]
    fn jitter_stays_bounded() {
        let cfg = DepthConfig::default();
        let book = generate_depth(&cfg, &price(10), 3);
        for (i, level) in book.asks.iter().enumerate() {
            let nominal = cfg.base_quantity * (Decimal::ONE + cfg.growth * Decimal::from(i as u32));
            assert!(level.quantity >= nominal * Decimal::new(79, 2));
            assert!(level.quantity <= nominal * Decimal::new(121, 2));
        }
    }

    #[test]
    fn levels_are_clamped_to_band() {
        let cfg = DepthConfig {
            step_pct: Decimal::new(10, 2),
            ..DepthConfig::default()
        };
        let book = generate_depth(&cfg, &price(2), 1);
        assert!(book.bids.iter().all(|l| l.price >= Decimal::new(2, 0)));
        let book = generate_depth(&cfg, &price(50), 1);
        assert!(book.asks.iter().all(|l| l.price <= Decimal::new(50, 0)));
    }
}
