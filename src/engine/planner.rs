use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use metrics::counter;
use rust_decimal::Decimal;
use tokio::time::{sleep, Duration};

use crate::db::{independent_repo, telemetry_repo};
use crate::models::{AccountPosition, CopyAction, Side};
use crate::recorder;

use super::{Engine, ORDER_COOLDOWN};

/// Venue-enforced minimum order notional.
pub const EXCHANGE_MIN_NOTIONAL_USD: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

/// Required free-margin headroom over an open's margin requirement.
const MARGIN_HEADROOM: Decimal = Decimal::from_parts(12, 0, 0, false, 1); // 1.2

/// Settle delay between a flip's close and open legs.
const FLIP_SETTLE: Duration = Duration::from_secs(2);

/// Settle delay after any executed action except adjust, so later symbols in
/// the same scan observe updated free margin.
const POST_TRADE_SETTLE: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What the independent trader currently holds on a symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndependentStatus {
    pub exists: bool,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    None,
    Open,
    Close,
    Flip,
    Adjust,
    /// An unconfirmed independent position covers this symbol; its own
    /// exit conditions stay in charge, the planner must not close it.
    SkipIndependentExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub plan: Plan,
    /// Same-side collision with an unconfirmed independent position: the
    /// record must flip to confirmed before any sizing math.
    pub confirm_independent: bool,
}

/// Pure action classification. Same inputs always yield the same plan.
///
/// `adjust` requires the size mismatch to *strictly* exceed the threshold
/// fraction of the scaled target size.
pub fn classify(
    target_side: Option<Side>,
    our_side: Option<Side>,
    our_size: Decimal,
    scaled_target_size: Decimal,
    adjust_threshold: Decimal,
    independent: IndependentStatus,
) -> Classified {
    let no_confirm = Classified {
        plan: Plan::None,
        confirm_independent: false,
    };

    match (target_side, our_side) {
        (None, None) => no_confirm,
        (None, Some(_)) => {
            if independent.exists && !independent.confirmed {
                Classified {
                    plan: Plan::SkipIndependentExit,
                    confirm_independent: false,
                }
            } else {
                Classified {
                    plan: Plan::Close,
                    confirm_independent: false,
                }
            }
        }
        (Some(_), None) => Classified {
            plan: Plan::Open,
            confirm_independent: false,
        },
        (Some(t), Some(o)) if t != o => Classified {
            plan: Plan::Flip,
            confirm_independent: false,
        },
        (Some(_), Some(_)) => {
            let confirm_independent = independent.exists && !independent.confirmed;
            if scaled_target_size.is_zero() {
                return Classified {
                    plan: Plan::None,
                    confirm_independent,
                };
            }
            let mismatch = (our_size - scaled_target_size).abs();
            let plan = if mismatch > scaled_target_size * adjust_threshold {
                Plan::Adjust
            } else {
                Plan::None
            };
            Classified {
                plan,
                confirm_independent,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-symbol sync
// ---------------------------------------------------------------------------

/// Immutable per-scan inputs shared by every symbol's sync step.
pub struct ScanContext<'a> {
    pub scale_factor: Decimal,
    pub target_positions: &'a HashMap<String, AccountPosition>,
    pub operator_positions: &'a HashMap<String, AccountPosition>,
    pub mids: &'a HashMap<String, Decimal>,
}

/// Reconcile one symbol of the operator book against the target book.
///
/// Errors local to this symbol are absorbed here; only store failures
/// propagate (the caller logs them without cancelling sibling symbols).
pub async fn sync_position(
    engine: &Engine,
    ctx: &ScanContext<'_>,
    symbol: &str,
    traded: &Mutex<HashSet<String>>,
) -> anyhow::Result<()> {
    let target = ctx.target_positions.get(symbol);
    let ours = ctx.operator_positions.get(symbol);

    let target_side = target.and_then(AccountPosition::side);
    let our_side = ours.and_then(AccountPosition::side);
    let target_size = target.map(AccountPosition::size).unwrap_or_default();
    let our_size = ours.map(AccountPosition::size).unwrap_or_default();
    let target_leverage = target.map(|p| p.leverage).unwrap_or(1).max(1);

    let scaled_target_size = target_size * ctx.scale_factor;

    let independent = independent_repo::get_active_by_symbol(&engine.db, symbol).await?;
    let independent_status = IndependentStatus {
        exists: independent.is_some(),
        confirmed: independent.as_ref().is_some_and(|p| p.is_confirmed()),
    };

    let classified = classify(
        target_side,
        our_side,
        our_size,
        scaled_target_size,
        engine.config.adjust_threshold,
        independent_status,
    );

    if classified.plan == Plan::SkipIndependentExit {
        tracing::info!(
            symbol,
            "Operator position is an unconfirmed independent entry — its own exits stay in charge"
        );
        return Ok(());
    }

    if classified.confirm_independent {
        if let Some(pos) = &independent {
            independent_repo::confirm_position(&engine.db, pos.id).await?;
            tracing::info!(
                symbol,
                position_id = %pos.id,
                "Target opened same direction — independent position confirmed, planner owns sizing"
            );
        }
    }

    if classified.plan == Plan::None {
        return Ok(());
    }

    // Missing metadata or mid-price is a hard per-symbol skip.
    let Some(meta) = engine.ticker_meta(symbol) else {
        tracing::debug!(symbol, "No instrument metadata — skipping symbol");
        return Ok(());
    };
    let Some(&mid) = ctx.mids.get(symbol) else {
        tracing::warn!(symbol, "No mid-price in scan snapshot — skipping symbol");
        return Ok(());
    };
    if mid <= Decimal::ZERO {
        tracing::warn!(symbol, mid = %mid, "Non-positive mid-price — skipping symbol");
        return Ok(());
    }

    let actual_leverage = target_leverage.min(meta.max_leverage);
    let notional = scaled_target_size * mid;
    let margin = notional / Decimal::from(actual_leverage);

    // Gates for every action except close.
    if classified.plan != Plan::Close {
        if margin < engine.config.min_position_margin_usd {
            tracing::debug!(
                symbol,
                margin = %margin,
                floor = %engine.config.min_position_margin_usd,
                "Margin below floor — skipping"
            );
            return Ok(());
        }
        if notional < EXCHANGE_MIN_NOTIONAL_USD {
            tracing::debug!(
                symbol,
                notional = %notional,
                "Notional below venue minimum — skipping"
            );
            return Ok(());
        }
    }

    match classified.plan {
        Plan::Close => {
            let side = our_side.expect("close requires an open position");
            match engine
                .executor
                .close_position(meta, symbol, side, our_size, mid)
                .await
            {
                Ok(executed) => {
                    record_success(
                        engine, ctx, symbol, CopyAction::Close, "close", side,
                        executed.size, executed.size * mid, actual_leverage, traded,
                    )
                    .await;
                }
                Err(e) => {
                    // Closes are never cooled down; next scan re-plans.
                    counter!("orders_failed").increment(1);
                    tracing::error!(symbol, error = %e, "Close order failed — will re-plan next scan");
                }
            }
        }

        Plan::Open => {
            let side = target_side.expect("open requires a target position");
            if !open_gates_pass(engine, symbol, margin).await? {
                return Ok(());
            }
            match engine
                .executor
                .open_position(meta, symbol, side, scaled_target_size, actual_leverage, mid)
                .await
            {
                Ok(executed) => {
                    record_success(
                        engine, ctx, symbol, CopyAction::Open, "open", side,
                        executed.size, executed.size * mid, actual_leverage, traded,
                    )
                    .await;
                }
                Err(e) => {
                    fail_entry(engine, symbol, "open", &e);
                }
            }
        }

        Plan::Flip => {
            let close_side = our_side.expect("flip requires an open position");
            let open_side = target_side.expect("flip requires a target position");
            if engine.cooldown_remaining(symbol, ORDER_COOLDOWN).is_some() {
                tracing::warn!(symbol, "Cool-down active — flip suppressed");
                return Ok(());
            }

            if let Err(e) = engine
                .executor
                .close_position(meta, symbol, close_side, our_size, mid)
                .await
            {
                fail_entry(engine, symbol, "flip(close)", &e);
                return Ok(());
            }
            sleep(FLIP_SETTLE).await;

            // The close freed margin; gate the open leg on fresh state.
            if !open_gates_pass(engine, symbol, margin).await? {
                return Ok(());
            }
            match engine
                .executor
                .open_position(meta, symbol, open_side, scaled_target_size, actual_leverage, mid)
                .await
            {
                Ok(executed) => {
                    record_success(
                        engine, ctx, symbol, CopyAction::Flip, "flip", open_side,
                        executed.size, executed.size * mid, actual_leverage, traded,
                    )
                    .await;
                }
                Err(e) => {
                    // No compensating re-open of the old side; next scan
                    // re-plans from observed state.
                    fail_entry(engine, symbol, "flip(open)", &e);
                }
            }
        }

        Plan::Adjust => {
            let side = our_side.expect("adjust requires an open position");
            let size_delta = scaled_target_size - our_size;
            if (size_delta.abs() * mid) < EXCHANGE_MIN_NOTIONAL_USD {
                tracing::debug!(
                    symbol,
                    size_delta = %size_delta,
                    "Adjust delta below venue minimum — holding to avoid oscillation"
                );
                return Ok(());
            }

            let result = if size_delta > Decimal::ZERO {
                engine
                    .executor
                    .increase_position(meta, symbol, side, size_delta, actual_leverage, mid)
                    .await
                    .map(|e| ("increase", e))
            } else {
                engine
                    .executor
                    .close_position(meta, symbol, side, size_delta.abs(), mid)
                    .await
                    .map(|e| ("decrease", e))
            };

            match result {
                Ok((action_name, executed)) => {
                    record_success(
                        engine, ctx, symbol, CopyAction::Adjust, action_name, side,
                        executed.size, executed.size * mid, actual_leverage, traded,
                    )
                    .await;
                }
                Err(e) => {
                    counter!("orders_failed").increment(1);
                    tracing::error!(symbol, error = %e, "Adjust order failed");
                }
            }
        }

        Plan::None | Plan::SkipIndependentExit => unreachable!("handled above"),
    }

    Ok(())
}

/// Cool-down and dispatch-time margin headroom gates for open/flip legs.
/// The portfolio is re-fetched here because earlier orders in the same scan
/// consume free margin.
async fn open_gates_pass(engine: &Engine, symbol: &str, margin: Decimal) -> anyhow::Result<bool> {
    if let Some(remaining) = engine.cooldown_remaining(symbol, ORDER_COOLDOWN) {
        tracing::warn!(
            symbol,
            remaining_secs = remaining.as_secs(),
            "Cool-down active — open suppressed"
        );
        return Ok(false);
    }

    let (portfolio, _) = match engine
        .info
        .clearinghouse_state(&engine.config.operator_account)
        .await
    {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(symbol, error = %e, "Pre-dispatch portfolio re-fetch failed — skipping open");
            return Ok(false);
        }
    };

    if margin * MARGIN_HEADROOM > portfolio.withdrawable {
        tracing::warn!(
            symbol,
            required = %(margin * MARGIN_HEADROOM),
            withdrawable = %portfolio.withdrawable,
            "Insufficient free margin — open skipped"
        );
        return Ok(false);
    }

    Ok(true)
}

fn fail_entry(engine: &Engine, symbol: &str, action: &str, error: &dyn std::fmt::Display) {
    engine.record_failed_order(symbol);
    counter!("orders_failed").increment(1);
    tracing::error!(symbol, action, error = %error, "Order failed — cool-down set");
}

#[allow(clippy::too_many_arguments)]
async fn record_success(
    engine: &Engine,
    ctx: &ScanContext<'_>,
    symbol: &str,
    action: CopyAction,
    recorder_action: &str,
    side: Side,
    size: Decimal,
    notional: Decimal,
    leverage: u32,
    traded: &Mutex<HashSet<String>>,
) {
    traded.lock().unwrap().insert(symbol.to_string());
    engine.clear_failed_order(symbol);
    counter!("orders_submitted").increment(1);

    if let Err(e) = telemetry_repo::insert_copy_action(
        &engine.db,
        symbol,
        recorder_action,
        &side.to_string(),
        size,
        notional,
        leverage as i32,
        ctx.scale_factor,
    )
    .await
    {
        tracing::warn!(symbol, error = %e, "Failed to persist copy-action telemetry");
    }

    recorder::log_copy_action(engine, symbol, recorder_action, &side.to_string(), size).await;

    tracing::info!(
        symbol,
        action = %action,
        side = %side,
        size = %size,
        notional = %notional,
        "Copy action executed"
    );

    // Let margin settle so later symbols in this scan see it.
    if action != CopyAction::Adjust {
        sleep(POST_TRADE_SETTLE).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const NO_IND: IndependentStatus = IndependentStatus {
        exists: false,
        confirmed: false,
    };

    fn threshold() -> Decimal {
        Decimal::new(10, 2) // 0.10
    }

    fn classify_simple(
        target: Option<Side>,
        ours: Option<Side>,
        our_size: i64,
        scaled: i64,
    ) -> Plan {
        classify(
            target,
            ours,
            Decimal::from(our_size),
            Decimal::from(scaled),
            threshold(),
            NO_IND,
        )
        .plan
    }

    #[test]
    fn test_both_flat_is_none() {
        assert_eq!(classify_simple(None, None, 0, 0), Plan::None);
    }

    #[test]
    fn test_target_only_is_open() {
        assert_eq!(classify_simple(Some(Side::Long), None, 0, 10), Plan::Open);
        assert_eq!(classify_simple(Some(Side::Short), None, 0, 10), Plan::Open);
    }

    #[test]
    fn test_ours_only_is_close() {
        assert_eq!(classify_simple(None, Some(Side::Long), 10, 0), Plan::Close);
    }

    #[test]
    fn test_opposite_sides_is_flip() {
        assert_eq!(
            classify_simple(Some(Side::Short), Some(Side::Long), 10, 8),
            Plan::Flip
        );
        assert_eq!(
            classify_simple(Some(Side::Long), Some(Side::Short), 10, 8),
            Plan::Flip
        );
    }

    #[test]
    fn test_same_side_over_threshold_is_adjust() {
        // |10 - 12| / 12 = 16.7% > 10%
        assert_eq!(
            classify_simple(Some(Side::Long), Some(Side::Long), 10, 12),
            Plan::Adjust
        );
    }

    #[test]
    fn test_same_side_within_threshold_is_none() {
        // |10 - 10.5| / 10.5 < 10%
        let c = classify(
            Some(Side::Long),
            Some(Side::Long),
            Decimal::from(10),
            Decimal::new(105, 1),
            threshold(),
            NO_IND,
        );
        assert_eq!(c.plan, Plan::None);
    }

    #[test]
    fn test_threshold_boundary_is_none() {
        // Mismatch exactly equal to scaled · threshold: strict inequality
        // required, so no adjust.
        let c = classify(
            Some(Side::Long),
            Some(Side::Long),
            Decimal::from(11),
            Decimal::from(10),
            threshold(),
            NO_IND,
        );
        assert_eq!(c.plan, Plan::None);
    }

    #[test]
    fn test_zero_scaled_target_same_side_is_none() {
        let c = classify(
            Some(Side::Long),
            Some(Side::Long),
            Decimal::from(5),
            Decimal::ZERO,
            threshold(),
            NO_IND,
        );
        assert_eq!(c.plan, Plan::None);
    }

    #[test]
    fn test_unconfirmed_independent_blocks_close() {
        let c = classify(
            None,
            Some(Side::Long),
            Decimal::from(3),
            Decimal::ZERO,
            threshold(),
            IndependentStatus {
                exists: true,
                confirmed: false,
            },
        );
        assert_eq!(c.plan, Plan::SkipIndependentExit);
    }

    #[test]
    fn test_confirmed_independent_allows_close() {
        let c = classify(
            None,
            Some(Side::Long),
            Decimal::from(3),
            Decimal::ZERO,
            threshold(),
            IndependentStatus {
                exists: true,
                confirmed: true,
            },
        );
        assert_eq!(c.plan, Plan::Close);
    }

    #[test]
    fn test_same_side_collision_confirms_independent() {
        let c = classify(
            Some(Side::Long),
            Some(Side::Long),
            Decimal::from(10),
            Decimal::from(20),
            threshold(),
            IndependentStatus {
                exists: true,
                confirmed: false,
            },
        );
        assert!(c.confirm_independent);
        assert_eq!(c.plan, Plan::Adjust);
    }

    #[test]
    fn test_already_confirmed_does_not_reconfirm() {
        let c = classify(
            Some(Side::Long),
            Some(Side::Long),
            Decimal::from(10),
            Decimal::from(10),
            threshold(),
            IndependentStatus {
                exists: true,
                confirmed: true,
            },
        );
        assert!(!c.confirm_independent);
        assert_eq!(c.plan, Plan::None);
    }

    #[test]
    fn test_classification_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(
                classify_simple(Some(Side::Short), Some(Side::Short), 40, 50),
                Plan::Adjust
            );
        }
    }
}
