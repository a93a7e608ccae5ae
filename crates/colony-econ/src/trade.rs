//! Filling market orders against a synthetic book.

use colony_core::TradeSide;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{BookLevel, EconError, OrderBook, MONEY_SCALE};

/// Quantity taken at one price level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Result of walking the book for one order, before settlement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FillPlan {
    pub side: TradeSide,
    pub requested: Decimal,
    pub filled: Decimal,
    /// Exact sum of price x quantity over the fills.
    pub total_cost: Decimal,
    pub avg_price: Decimal,
    pub market_price: Decimal,
    /// `(avg_price - market_price) / market_price`.
    pub slippage: Decimal,
    pub fills: Vec<Fill>,
}

impl FillPlan {
    pub fn is_partial(&self) -> bool {
        self.filled < self.requested
    }

    /// Currency moved at settlement, in cents: buyers round up, sellers down.
    pub fn settlement_amount(&self) -> Decimal {
        let strategy = match self.side {
            TradeSide::Buy => RoundingStrategy::AwayFromZero,
            TradeSide::Sell => RoundingStrategy::ToZero,
        };
        self.total_cost
            .round_dp_with_strategy(MONEY_SCALE, strategy)
    }

    pub fn best_price(&self) -> Option<Decimal> {
        self.fills.first().map(|f| f.price)
    }

    pub fn worst_price(&self) -> Option<Decimal> {
        self.fills.last().map(|f| f.price)
    }
}

/// Volume-weighted average price: sum(p_i x q_i) / sum(q_i).
/// Returns None when the total quantity is zero or a price is negative.
pub fn vwap(fills: &[Fill]) -> Option<Decimal> {
    let mut num = Decimal::ZERO;
    let mut den = Decimal::ZERO;
    for f in fills {
        if f.price < Decimal::ZERO || f.quantity < Decimal::ZERO {
            return None;
        }
        num += f.price * f.quantity;
        den += f.quantity;
    }
    if den.is_zero() {
        return None;
    }
    Some(num / den)
}

/// Walk asks (buy) or bids (sell) until `quantity` is filled or the book
/// runs out.
pub fn walk_book(
    book: &OrderBook,
    side: TradeSide,
    quantity: Decimal,
    market_price: Decimal,
) -> Result<FillPlan, EconError> {
    if quantity <= Decimal::ZERO {
        return Err(EconError::InvalidQuantity);
    }
    if market_price <= Decimal::ZERO {
        return Err(EconError::InvalidPrice);
    }
    let levels: &[BookLevel] = match side {
        TradeSide::Buy => &book.asks,
        TradeSide::Sell => &book.bids,
    };

    let mut remaining = quantity;
    let mut fills = Vec::new();
    for level in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(level.quantity);
        if take <= Decimal::ZERO {
            continue;
        }
        fills.push(Fill {
            price: level.price,
            quantity: take,
        });
        remaining -= take;
    }

    let filled: Decimal = fills.iter().map(|f| f.quantity).sum();
    if filled.is_zero() {
        return Err(EconError::InsufficientLiquidity {
            requested: quantity,
        });
    }
    let total_cost: Decimal = fills.iter().map(|f| f.price * f.quantity).sum();
    let avg_price = vwap(&fills).ok_or(EconError::NonFinite)?;
    let slippage = (avg_price - market_price) / market_price;

    Ok(FillPlan {
        side,
        requested: quantity,
        filled,
        total_cost,
        avg_price,
        market_price,
        slippage,
        fills,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_core::ResourceType;
    use proptest::prelude::*;

    fn d(units: i64, scale: u32) -> Decimal {
        Decimal::new(units, scale)
    }

    fn two_level_book() -> OrderBook {
        OrderBook::from_levels(
            ResourceType::Minerals,
            d(10, 0),
            &[(d(99, 1), d(30, 0)), (d(97, 1), d(30, 0))],
            &[(d(10, 0), d(30, 0)), (d(102, 1), d(30, 0))],
        )
    }

    #[test]
    fn buy_walks_two_levels() {
        // 30 @ 10 + 20 @ 10.2 = 504 over 50 units
        let plan = walk_book(&two_level_book(), TradeSide::Buy, d(50, 0), d(10, 0)).unwrap();
        assert_eq!(plan.filled, d(50, 0));
        assert_eq!(plan.total_cost, d(504, 0));
        assert_eq!(plan.avg_price, d(1008, 2));
        assert_eq!(plan.slippage, d(8, 3));
        assert_eq!(plan.fills.len(), 2);
        assert!(!plan.is_partial());
    }

    #[test]
    fn sell_walks_bids_with_negative_slippage() {
        let plan = walk_book(&two_level_book(), TradeSide::Sell, d(40, 0), d(10, 0)).unwrap();
        assert_eq!(plan.total_cost, d(394, 0));
        assert!(plan.slippage < Decimal::ZERO);
    }

    #[test]
    fn exhausted_book_fills_partially() {
        let plan = walk_book(&two_level_book(), TradeSide::Buy, d(100, 0), d(10, 0)).unwrap();
        assert_eq!(plan.filled, d(60, 0));
        assert!(plan.is_partial());
    }

    #[test]
    fn empty_side_is_insufficient_liquidity() {
        let book = OrderBook::from_levels(ResourceType::Food, d(4, 0), &[], &[]);
        assert_eq!(
            walk_book(&book, TradeSide::Buy, d(1, 0), d(4, 0)),
            Err(EconError::InsufficientLiquidity { requested: d(1, 0) })
        );
        assert_eq!(
            walk_book(&book, TradeSide::Buy, Decimal::ZERO, d(4, 0)),
            Err(EconError::InvalidQuantity)
        );
    }

    #[test]
    fn settlement_rounds_in_the_house_favour() {
        let book = OrderBook::from_levels(
            ResourceType::Food,
            d(4, 0),
            &[(d(33333, 4), d(1, 0))],
            &[(d(33333, 4), d(1, 0))],
        );
        let buy = walk_book(&book, TradeSide::Buy, d(1, 0), d(4, 0)).unwrap();
        assert_eq!(buy.settlement_amount(), d(334, 2));
        let sell = walk_book(&book, TradeSide::Sell, d(1, 0), d(4, 0)).unwrap();
        assert_eq!(sell.settlement_amount(), d(333, 2));
    }

    #[test]
    fn vwap_simple_average() {
        let fills = [
            Fill {
                price: d(100, 2),
                quantity: d(1, 0),
            },
            Fill {
                price: d(200, 2),
                quantity: d(1, 0),
            },
        ];
        assert_eq!(vwap(&fills), Some(d(150, 2)));
        assert_eq!(vwap(&[]), None);
    }

    proptest! {
        #[test]
        fn avg_between_best_and_worst_consumed(qty in 1i64..5_000, seed in any::<u64>()) {
            use chrono::{TimeZone, Utc};
            let price = colony_core::ResourcePrice {
                resource: ResourceType::Crystals,
                current_price: d(25, 0),
                base_price: d(25, 0),
                min_price: d(5, 0),
                max_price: d(125, 0),
                change_24h: 0.0,
                supply: 0.0,
                demand: 0.0,
                volatility: 0.05,
                seasonal_phase: 0.0,
                updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            };
            let book = crate::generate_depth(&colony_core::DepthConfig::default(), &price, seed);
            for side in [TradeSide::Buy, TradeSide::Sell] {
                let plan = walk_book(&book, side, d(qty, 0), price.current_price).unwrap();
                let best = plan.best_price().unwrap();
                let worst = plan.worst_price().unwrap();
                let (lo, hi) = if best <= worst { (best, worst) } else { (worst, best) };
                prop_assert!(plan.avg_price >= lo && plan.avg_price <= hi);
                match side {
                    TradeSide::Buy => prop_assert!(plan.slippage >= Decimal::ZERO),
                    TradeSide::Sell => prop_assert!(plan.slippage <= Decimal::ZERO),
                }
                prop_assert!(plan.filled <= d(qty, 0));
            }
        }
    }
}
