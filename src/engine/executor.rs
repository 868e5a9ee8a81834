use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use tokio::time::{sleep, Duration};

use crate::models::Side;
use crate::venue::types::TickerMeta;
use crate::venue::{ExchangeClient, InfoClient, VenueError};

/// Settle delay after a cross-margin leverage change.
const LEVERAGE_SETTLE: Duration = Duration::from_secs(1);

/// Fraction of free margin an open order may consume.
const AFFORDABILITY_FACTOR: Decimal = Decimal::from_parts(95, 0, 0, false, 2); // 0.95

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error("order size for {symbol} rounds to zero at {decimals} size decimals")]
    SizeRoundsToZero { symbol: String, decimals: u32 },
}

/// What actually went to the venue (or would have, in dry-run).
#[derive(Debug, Clone)]
pub struct ExecutedOrder {
    pub size: Decimal,
    pub price: Decimal,
    pub simulated: bool,
}

/// Translates planner intents into venue calls.
///
/// Three modes, mirroring the credentials available:
/// - **dry_run=true**: logs intent, returns simulated success.
/// - **dry_run=false + ExchangeClient**: live orders.
/// - **No ExchangeClient**: forced dry-run regardless of the flag.
pub struct OrderExecutor {
    info: InfoClient,
    exchange: Option<ExchangeClient>,
    operator_account: String,
    slippage_pct: Decimal,
    dry_run: bool,
}

impl OrderExecutor {
    pub fn new(
        info: InfoClient,
        exchange: Option<ExchangeClient>,
        operator_account: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            info,
            exchange,
            operator_account: operator_account.into(),
            slippage_pct: Decimal::new(2, 2),
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run || self.exchange.is_none()
    }

    /// Open a brand-new position: set cross leverage, wait for propagation,
    /// then submit the slippage-bounded market order.
    ///
    /// Live path re-reads free margin and silently shrinks the order to the
    /// affordability cap; it also treats an already-open same-side position
    /// as a no-op so a replayed intent cannot double-open.
    pub async fn open_position(
        &self,
        meta: TickerMeta,
        symbol: &str,
        side: Side,
        size: Decimal,
        leverage: u32,
        mid: Decimal,
    ) -> Result<ExecutedOrder, ExecutionError> {
        self.place_entry(meta, symbol, side, size, mid, leverage, Some(leverage), false)
            .await
    }

    /// Grow an existing position in its current direction. No leverage
    /// change; the affordability cap still applies at the position's
    /// leverage.
    pub async fn increase_position(
        &self,
        meta: TickerMeta,
        symbol: &str,
        side: Side,
        size: Decimal,
        leverage: u32,
        mid: Decimal,
    ) -> Result<ExecutedOrder, ExecutionError> {
        self.place_entry(meta, symbol, side, size, mid, leverage, None, true)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn place_entry(
        &self,
        meta: TickerMeta,
        symbol: &str,
        side: Side,
        size: Decimal,
        mid: Decimal,
        cap_leverage: u32,
        set_leverage: Option<u32>,
        add_to_existing: bool,
    ) -> Result<ExecutedOrder, ExecutionError> {
        let limit_px = slippage_price(mid, side.is_buy(), self.slippage_pct);

        if self.is_dry_run() {
            let size = round_size(size, meta.sz_decimals);
            if size.is_zero() {
                return Err(ExecutionError::SizeRoundsToZero {
                    symbol: symbol.to_string(),
                    decimals: meta.sz_decimals,
                });
            }
            tracing::info!(
                symbol,
                side = %side,
                size = %size,
                limit_px = %limit_px,
                leverage = ?set_leverage,
                "[DRY-RUN] Would submit entry order"
            );
            return Ok(ExecutedOrder {
                size,
                price: limit_px,
                simulated: true,
            });
        }

        let exchange = self.exchange.as_ref().expect("checked by is_dry_run");

        let (portfolio, positions) =
            self.info.clearinghouse_state(&self.operator_account).await?;

        // Idempotence: an equivalent open position makes a plain open a no-op.
        if !add_to_existing {
            if let Some(existing) = positions.iter().find(|p| p.symbol == symbol) {
                if existing.side() == Some(side) {
                    tracing::info!(
                        symbol,
                        side = %side,
                        existing_size = %existing.size(),
                        "Equivalent position already open — skipping entry"
                    );
                    return Ok(ExecutedOrder {
                        size: Decimal::ZERO,
                        price: limit_px,
                        simulated: false,
                    });
                }
            }
        }

        // Affordability cap: shrink, never fail.
        let (size, capped) =
            cap_size_to_affordable(size, mid, cap_leverage, portfolio.withdrawable);
        if capped {
            tracing::warn!(
                symbol,
                capped_size = %size,
                withdrawable = %portfolio.withdrawable,
                "Order shrunk to affordability cap"
            );
        }

        let size = round_size(size, meta.sz_decimals);
        if size.is_zero() {
            return Err(ExecutionError::SizeRoundsToZero {
                symbol: symbol.to_string(),
                decimals: meta.sz_decimals,
            });
        }

        if let Some(leverage) = set_leverage {
            exchange.update_leverage(meta.asset_index, leverage).await?;
            sleep(LEVERAGE_SETTLE).await;
        }

        exchange
            .submit_market_order(meta.asset_index, side.is_buy(), limit_px, size, false)
            .await?;

        tracing::info!(
            symbol,
            side = %side,
            size = %size,
            limit_px = %limit_px,
            "Entry order submitted"
        );

        Ok(ExecutedOrder {
            size,
            price: limit_px,
            simulated: false,
        })
    }

    /// Reduce or fully close a position with a reduce-only market order.
    /// Never subject to leverage changes or affordability checks.
    pub async fn close_position(
        &self,
        meta: TickerMeta,
        symbol: &str,
        position_side: Side,
        size: Decimal,
        mid: Decimal,
    ) -> Result<ExecutedOrder, ExecutionError> {
        // Closing a long sells, closing a short buys.
        let is_buy = !position_side.is_buy();
        let limit_px = slippage_price(mid, is_buy, self.slippage_pct);

        let size = round_size(size, meta.sz_decimals);
        if size.is_zero() {
            return Err(ExecutionError::SizeRoundsToZero {
                symbol: symbol.to_string(),
                decimals: meta.sz_decimals,
            });
        }

        if self.is_dry_run() {
            tracing::info!(
                symbol,
                position_side = %position_side,
                size = %size,
                limit_px = %limit_px,
                "[DRY-RUN] Would submit reduce-only close"
            );
            return Ok(ExecutedOrder {
                size,
                price: limit_px,
                simulated: true,
            });
        }

        let exchange = self.exchange.as_ref().expect("checked by is_dry_run");
        exchange
            .submit_market_order(meta.asset_index, is_buy, limit_px, size, true)
            .await?;

        tracing::info!(
            symbol,
            position_side = %position_side,
            size = %size,
            limit_px = %limit_px,
            "Close order submitted"
        );

        Ok(ExecutedOrder {
            size,
            price: limit_px,
            simulated: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Pricing & rounding
// ---------------------------------------------------------------------------

/// Aggressive limit price with slippage protection: buys cross up, sells
/// cross down.
pub fn slippage_price(mid: Decimal, is_buy: bool, slippage_pct: Decimal) -> Decimal {
    let factor = if is_buy {
        Decimal::ONE + slippage_pct
    } else {
        Decimal::ONE - slippage_pct
    };
    round_price(mid * factor)
}

/// Round a price to 5 significant digits, at most 6 decimal places; higher
/// priced instruments get fewer decimals.
pub fn round_price(px: Decimal) -> Decimal {
    if px.is_zero() {
        return px;
    }
    let int_digits = px.abs().trunc().to_string().len() as i32;
    let dp = if px.abs() >= Decimal::ONE {
        (5 - int_digits).max(0) as u32
    } else {
        6
    };
    px.round_dp(dp.min(6)).normalize()
}

/// Round a size down to the instrument's size decimals. Never round up:
/// oversizing risks a rejection.
pub fn round_size(size: Decimal, sz_decimals: u32) -> Decimal {
    size.round_dp_with_strategy(sz_decimals, RoundingStrategy::ToZero)
        .normalize()
}

/// Shrink an order so its notional fits inside free margin:
/// `max_notional = withdrawable · leverage · 0.95`. Returns the (possibly
/// reduced) size and whether the cap applied.
pub fn cap_size_to_affordable(
    size: Decimal,
    mid: Decimal,
    leverage: u32,
    withdrawable: Decimal,
) -> (Decimal, bool) {
    if mid.is_zero() {
        return (size, false);
    }
    let max_notional = withdrawable * Decimal::from(leverage) * AFFORDABILITY_FACTOR;
    let notional = size * mid;
    if notional <= max_notional {
        return (size, false);
    }
    ((max_notional / mid).max(Decimal::ZERO), true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> TickerMeta {
        TickerMeta {
            asset_index: 0,
            sz_decimals: 5,
            max_leverage: 50,
        }
    }

    fn dry_executor() -> OrderExecutor {
        let info = InfoClient::new(reqwest::Client::new(), "http://localhost:9");
        OrderExecutor::new(info, None, "0xoperator", true)
    }

    #[test]
    fn test_round_price_high_priced_gets_fewer_decimals() {
        // 5 significant digits: 61234.56 → 61235
        assert_eq!(round_price(Decimal::new(6123456, 2)), Decimal::from(61235));
        // 4.56789 → 4.5679 (1 integer digit, 4 decimals)
        assert_eq!(round_price(Decimal::new(456789, 5)), Decimal::new(45679, 4));
    }

    #[test]
    fn test_round_price_sub_unit_capped_at_six_decimals() {
        assert_eq!(
            round_price(Decimal::new(123456789, 9)), // 0.123456789
            Decimal::new(123457, 6)                  // 0.123457
        );
    }

    #[test]
    fn test_slippage_price_buy_crosses_up() {
        let px = slippage_price(Decimal::from(60_000), true, Decimal::new(2, 2));
        assert_eq!(px, Decimal::from(61_200));
    }

    #[test]
    fn test_slippage_price_sell_crosses_down() {
        let px = slippage_price(Decimal::from(60_000), false, Decimal::new(2, 2));
        assert_eq!(px, Decimal::from(58_800));
    }

    #[test]
    fn test_round_size_truncates() {
        // Never round a size up
        assert_eq!(round_size(Decimal::new(123456789, 8), 5), Decimal::new(123456, 5));
        assert_eq!(round_size(Decimal::new(9, 6), 5), Decimal::ZERO);
    }

    #[test]
    fn test_cap_size_within_budget_is_untouched() {
        let (size, capped) = cap_size_to_affordable(
            Decimal::ONE,
            Decimal::from(100),
            10,
            Decimal::from(1_000),
        );
        assert!(!capped);
        assert_eq!(size, Decimal::ONE);
    }

    #[test]
    fn test_cap_size_shrinks_over_budget() {
        // withdrawable 10, leverage 10 → max notional 95; requested 200
        let (size, capped) = cap_size_to_affordable(
            Decimal::from(2),
            Decimal::from(100),
            10,
            Decimal::from(10),
        );
        assert!(capped);
        assert_eq!(size, Decimal::new(95, 2)); // 0.95
    }

    #[tokio::test]
    async fn test_dry_run_open_is_simulated() {
        let executor = dry_executor();
        let result = executor
            .open_position(
                meta(),
                "BTC",
                Side::Long,
                Decimal::new(1625, 5),
                10,
                Decimal::from(60_000),
            )
            .await
            .unwrap();
        assert!(result.simulated);
        assert_eq!(result.size, Decimal::new(1625, 5));
        assert_eq!(result.price, Decimal::from(61_200));
    }

    #[tokio::test]
    async fn test_dry_run_close_crosses_down_for_long() {
        let executor = dry_executor();
        let result = executor
            .close_position(meta(), "BTC", Side::Long, Decimal::ONE, Decimal::from(60_000))
            .await
            .unwrap();
        assert!(result.simulated);
        assert_eq!(result.price, Decimal::from(58_800));
    }

    #[tokio::test]
    async fn test_tiny_size_rejected() {
        let executor = dry_executor();
        let result = executor
            .open_position(
                meta(),
                "BTC",
                Side::Long,
                Decimal::new(1, 7),
                10,
                Decimal::from(60_000),
            )
            .await;
        assert!(matches!(
            result,
            Err(ExecutionError::SizeRoundsToZero { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_exchange_forces_dry_run() {
        let info = InfoClient::new(reqwest::Client::new(), "http://localhost:9");
        let executor = OrderExecutor::new(info, None, "0xoperator", false);
        assert!(executor.is_dry_run());
    }
}
