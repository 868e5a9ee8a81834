use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use rust_decimal::Decimal;

use crate::config::AppConfig;
use crate::db::independent_repo;
use crate::engine::Engine;
use crate::models::{
    AccountPosition, ExitReason, IndependentPosition, PortfolioSnapshot, ScanPrediction, Side,
};

/// Smallest margin slot worth opening, in USD.
const MIN_MARGIN_BUDGET: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

/// Fraction of withdrawable a single entry's margin may claim.
const WITHDRAWABLE_FACTOR: Decimal = Decimal::from_parts(95, 0, 0, false, 2); // 0.95

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How independent positions exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitMode {
    /// Sole exit is the hold timeout.
    TimeBased,
    /// TP/SL price levels, with the timeout still enforced as a backstop.
    TpSl { tp_pct: Decimal, sl_pct: Decimal },
}

#[derive(Debug, Clone)]
pub struct IndependentConfig {
    pub max_allocation_pct: Decimal,
    pub max_positions: usize,
    pub leverage: u32,
    pub exit_mode: ExitMode,
    pub hold_hours: i64,
    pub min_score: Decimal,
    pub whitelist: HashSet<String>,
}

impl IndependentConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        let exit_mode = if config.independent_use_time_exit {
            ExitMode::TimeBased
        } else {
            ExitMode::TpSl {
                tp_pct: config.independent_tp_pct,
                sl_pct: config.independent_sl_pct,
            }
        };
        Self {
            max_allocation_pct: config.independent_max_allocation_pct,
            max_positions: config.independent_max_positions.max(1),
            leverage: config.independent_leverage.max(1),
            exit_mode,
            hold_hours: config.independent_hold_hours.max(1),
            min_score: config.independent_min_score,
            whitelist: config.independent_whitelist.clone(),
        }
    }

    /// TP/SL levels for an entry at `entry_price`; both zero in time mode.
    pub fn exit_prices(&self, entry_price: Decimal) -> (Decimal, Decimal) {
        match self.exit_mode {
            ExitMode::TimeBased => (Decimal::ZERO, Decimal::ZERO),
            ExitMode::TpSl { tp_pct, sl_pct } => (
                entry_price * (Decimal::ONE + tp_pct),
                entry_price * (Decimal::ONE - sl_pct),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// Open new independent longs from this scan's predictions. Runs after the
/// recorder and before copy execution.
pub async fn process_signals(
    engine: &Engine,
    mids: &HashMap<String, Decimal>,
    target_positions: &HashMap<String, AccountPosition>,
    operator_positions: &HashMap<String, AccountPosition>,
    portfolio: PortfolioSnapshot,
) -> anyhow::Result<()> {
    let config = IndependentConfig::from_app(&engine.config);

    let active = independent_repo::get_active_positions(&engine.db).await?;
    if active.len() >= config.max_positions {
        tracing::debug!(
            active = active.len(),
            max = config.max_positions,
            "Independent book full"
        );
        return Ok(());
    }

    let active_symbols: HashSet<String> = active.iter().map(|p| p.symbol.clone()).collect();
    let mut allocation_used: Decimal = active.iter().map(IndependentPosition::margin).sum();

    let candidates = filter_candidates(
        engine.scan_predictions_snapshot(),
        &config,
        target_positions,
        operator_positions,
        &active_symbols,
    );

    let mut open_count = active.len();
    let mut withdrawable = portfolio.withdrawable;

    for candidate in candidates {
        let slots_remaining = config.max_positions.saturating_sub(open_count);
        if slots_remaining == 0 {
            break;
        }

        let budget = margin_budget(
            portfolio.equity,
            allocation_used,
            config.max_allocation_pct,
            slots_remaining,
            config.max_positions,
        );
        if budget < MIN_MARGIN_BUDGET {
            tracing::debug!(budget = %budget, "Remaining margin budget below floor");
            break;
        }
        if budget > withdrawable * WITHDRAWABLE_FACTOR {
            tracing::warn!(
                budget = %budget,
                withdrawable = %withdrawable,
                "Free margin cannot cover the entry budget"
            );
            break;
        }

        let symbol = candidate.symbol.as_str();
        let Some(meta) = engine.ticker_meta(symbol) else {
            tracing::debug!(symbol, "No instrument metadata — entry skipped");
            continue;
        };
        let Some(&mid) = mids.get(symbol) else {
            continue;
        };
        if mid <= Decimal::ZERO {
            continue;
        }

        let leverage = config.leverage.min(meta.max_leverage);
        let notional = budget * Decimal::from(leverage);
        let size = notional / mid;

        let (tp_price, sl_price) = config.exit_prices(mid);
        let timeout_at = Utc::now() + ChronoDuration::hours(config.hold_hours);

        let executed = match engine
            .executor
            .open_position(meta, symbol, Side::Long, size, leverage, mid)
            .await
        {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(symbol, error = %e, "Independent entry order failed");
                continue;
            }
        };

        let entry_notional = executed.size * mid;
        let record = independent_repo::insert_position(
            &engine.db,
            symbol,
            mid,
            executed.size,
            entry_notional,
            leverage as i32,
            tp_price,
            sl_price,
            timeout_at,
            candidate.score,
            &candidate.reasons,
        )
        .await?;

        counter!("independent_opens").increment(1);
        tracing::info!(
            symbol,
            position_id = %record.id,
            score = %candidate.score,
            size = %executed.size,
            notional = %entry_notional,
            leverage,
            "Independent position opened"
        );

        open_count += 1;
        let margin = entry_notional / Decimal::from(leverage);
        allocation_used += margin;
        withdrawable = (withdrawable - margin).max(Decimal::ZERO);
    }

    Ok(())
}

/// Keep predictions that may open: high score, long direction, whitelisted,
/// and not already owned by anyone (operator, target, or this book). Sorted
/// by score descending.
pub fn filter_candidates(
    predictions: Vec<ScanPrediction>,
    config: &IndependentConfig,
    target_positions: &HashMap<String, AccountPosition>,
    operator_positions: &HashMap<String, AccountPosition>,
    active_symbols: &HashSet<String>,
) -> Vec<ScanPrediction> {
    let mut survivors: Vec<ScanPrediction> = predictions
        .into_iter()
        .filter(|p| p.score >= config.min_score)
        .filter(|p| p.direction == Some(Side::Long))
        .filter(|p| config.whitelist.contains(&p.symbol))
        .filter(|p| !operator_positions.contains_key(&p.symbol))
        .filter(|p| !active_symbols.contains(&p.symbol))
        // A target-held symbol belongs to the copy planner.
        .filter(|p| !target_positions.contains_key(&p.symbol))
        .collect();

    survivors.sort_by(|a, b| b.score.cmp(&a.score));
    survivors
}

/// Margin for the next entry: the remaining allocation spread over the
/// remaining slots, never more than an even share of the full cap.
pub fn margin_budget(
    equity: Decimal,
    allocation_used: Decimal,
    max_allocation_pct: Decimal,
    slots_remaining: usize,
    max_positions: usize,
) -> Decimal {
    let cap = equity * max_allocation_pct;
    let remaining = (cap - allocation_used).max(Decimal::ZERO);
    let per_slot = remaining / Decimal::from(slots_remaining.max(1) as u64);
    let even_share = cap / Decimal::from(max_positions.max(1) as u64);
    per_slot.min(even_share)
}

// ---------------------------------------------------------------------------
// Management
// ---------------------------------------------------------------------------

/// What the manager should do with one position this scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Hold,
    /// Target opened the same direction; hand sizing to the copy planner.
    Confirm,
    Close(ExitReason),
}

/// Pure per-position exit policy.
///
/// Target conflicts dominate; a confirmed position is otherwise left to the
/// copy planner; unconfirmed positions run TP/SL (price mode) and the
/// timeout (both modes).
pub fn plan_exit(
    position: &IndependentPosition,
    mid: Decimal,
    now: DateTime<Utc>,
    target_side: Option<Side>,
    exit_mode: ExitMode,
) -> ExitDecision {
    match target_side {
        Some(Side::Short) => return ExitDecision::Close(ExitReason::TargetOpposite),
        Some(Side::Long) => {
            if !position.is_confirmed() {
                return ExitDecision::Confirm;
            }
            return ExitDecision::Hold;
        }
        None => {}
    }

    if position.is_confirmed() {
        // Copy planner owns sizing and closing now.
        return ExitDecision::Hold;
    }

    if let ExitMode::TpSl { .. } = exit_mode {
        if !position.tp_price.is_zero() && mid >= position.tp_price {
            return ExitDecision::Close(ExitReason::Tp);
        }
        if !position.sl_price.is_zero() && mid <= position.sl_price {
            return ExitDecision::Close(ExitReason::Sl);
        }
    }

    if now >= position.timeout_at {
        return ExitDecision::Close(ExitReason::Timeout);
    }

    ExitDecision::Hold
}

/// Walk the active book once per scan, after entries. Returns the symbols
/// whose positions were closed so the caller can drop them from its
/// operator-position snapshot (the planner must see the post-close book).
pub async fn manage_positions(
    engine: &Engine,
    mids: &HashMap<String, Decimal>,
    target_positions: &HashMap<String, AccountPosition>,
) -> anyhow::Result<Vec<String>> {
    let config = IndependentConfig::from_app(&engine.config);
    let active = independent_repo::get_active_positions(&engine.db).await?;
    let now = Utc::now();
    let mut closed = Vec::new();

    for position in &active {
        let Some(&mid) = mids.get(&position.symbol) else {
            tracing::debug!(symbol = %position.symbol, "No mid-price — management deferred");
            continue;
        };

        let target_side = target_positions
            .get(&position.symbol)
            .and_then(AccountPosition::side);

        match plan_exit(position, mid, now, target_side, config.exit_mode) {
            ExitDecision::Hold => {}
            ExitDecision::Confirm => {
                independent_repo::confirm_position(&engine.db, position.id).await?;
                tracing::info!(
                    symbol = %position.symbol,
                    position_id = %position.id,
                    "Target matched direction — independent position confirmed"
                );
            }
            ExitDecision::Close(reason) => {
                if close_independent(engine, position, mid, reason).await {
                    closed.push(position.symbol.clone());
                }
            }
        }
    }

    Ok(closed)
}

/// Close one independent position and write the terminal record. A venue
/// failure leaves the row active; the next scan retries the close. Returns
/// whether the position was actually closed.
async fn close_independent(
    engine: &Engine,
    position: &IndependentPosition,
    mid: Decimal,
    reason: ExitReason,
) -> bool {
    let Some(meta) = engine.ticker_meta(&position.symbol) else {
        tracing::warn!(symbol = %position.symbol, "No instrument metadata — close deferred");
        return false;
    };

    if let Err(e) = engine
        .executor
        .close_position(meta, &position.symbol, Side::Long, position.size, mid)
        .await
    {
        tracing::error!(
            symbol = %position.symbol,
            error = %e,
            reason = %reason,
            "Independent close failed — will retry next scan"
        );
        return false;
    }

    let realized_pnl = (mid - position.entry_price) * position.size;
    let realized_pnl_pct = if position.entry_price.is_zero() {
        Decimal::ZERO
    } else {
        (mid - position.entry_price) / position.entry_price * Decimal::ONE_HUNDRED
    };

    if let Err(e) = independent_repo::close_position(
        &engine.db,
        position.id,
        mid,
        reason,
        realized_pnl,
        realized_pnl_pct,
    )
    .await
    {
        tracing::error!(symbol = %position.symbol, error = %e, "Failed to persist independent close");
        return true;
    }

    counter!("independent_closes").increment(1);
    tracing::info!(
        symbol = %position.symbol,
        position_id = %position.id,
        reason = %reason,
        exit_price = %mid,
        realized_pnl = %realized_pnl,
        realized_pnl_pct = %realized_pnl_pct,
        "Independent position closed"
    );
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_config() -> IndependentConfig {
        IndependentConfig {
            max_allocation_pct: Decimal::new(10, 2),
            max_positions: 3,
            leverage: 5,
            exit_mode: ExitMode::TimeBased,
            hold_hours: 4,
            min_score: Decimal::from(90),
            whitelist: ["AAVE".to_string(), "VVV".to_string()].into_iter().collect(),
        }
    }

    fn prediction(symbol: &str, score: i64, direction: Option<Side>) -> ScanPrediction {
        ScanPrediction {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            score: Decimal::from(score),
            direction,
            entry_price: Decimal::from(100),
            reasons: vec![],
        }
    }

    fn position(symbol: &str, status: &str) -> IndependentPosition {
        IndependentPosition {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side: "long".into(),
            entry_price: Decimal::from(100),
            size: Decimal::from(2),
            notional_usd: Decimal::from(200),
            leverage: 5,
            tp_price: Decimal::from(120),
            sl_price: Decimal::from(88),
            timeout_at: Utc::now() + ChronoDuration::hours(4),
            status: status.into(),
            confirmed_by_target: status == "confirmed",
            prediction_score: Decimal::from(92),
            prediction_reasons: serde_json::json!([]),
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
            realized_pnl_pct: None,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    fn held(symbol: &str) -> HashMap<String, AccountPosition> {
        [(
            symbol.to_string(),
            AccountPosition {
                symbol: symbol.into(),
                signed_size: Decimal::ONE,
                leverage: 5,
                entry_price: Decimal::from(100),
                liquidation_price: Some(Decimal::from(80)),
            },
        )]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_filter_keeps_qualified_longs_sorted() {
        let preds = vec![
            prediction("AAVE", 91, Some(Side::Long)),
            prediction("VVV", 95, Some(Side::Long)),
        ];
        let out = filter_candidates(
            preds,
            &test_config(),
            &HashMap::new(),
            &HashMap::new(),
            &HashSet::new(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].symbol, "VVV"); // higher score first
    }

    #[test]
    fn test_filter_rejects_low_score_shorts_and_unlisted() {
        let preds = vec![
            prediction("AAVE", 80, Some(Side::Long)),  // below min score
            prediction("VVV", 95, Some(Side::Short)),  // shorts excluded
            prediction("DOGE", 99, Some(Side::Long)),  // not whitelisted
            prediction("AAVE", 95, None),              // no direction
        ];
        let out = filter_candidates(
            preds,
            &test_config(),
            &HashMap::new(),
            &HashMap::new(),
            &HashSet::new(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_filter_rejects_already_owned_symbols() {
        let preds = vec![
            prediction("AAVE", 95, Some(Side::Long)),
            prediction("VVV", 95, Some(Side::Long)),
        ];
        // AAVE held by the target, VVV already in the independent book
        let active: HashSet<String> = ["VVV".to_string()].into_iter().collect();
        let out = filter_candidates(preds, &test_config(), &held("AAVE"), &HashMap::new(), &active);
        assert!(out.is_empty());
    }

    #[test]
    fn test_filter_rejects_operator_held() {
        let preds = vec![prediction("AAVE", 95, Some(Side::Long))];
        let out = filter_candidates(
            preds,
            &test_config(),
            &HashMap::new(),
            &held("AAVE"),
            &HashSet::new(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_margin_budget_even_split() {
        // equity 10k, 10% cap = 1000; nothing used, 3 slots of 3
        let b = margin_budget(
            Decimal::from(10_000),
            Decimal::ZERO,
            Decimal::new(10, 2),
            3,
            3,
        );
        // remaining/slots = 333.33, even share = 333.33
        assert!(b > Decimal::from(333) && b < Decimal::from(334));
    }

    #[test]
    fn test_margin_budget_capped_at_even_share() {
        // 2 of 3 slots free but most allocation unused: the even share caps
        // the budget so one entry cannot hog the book.
        let b = margin_budget(
            Decimal::from(10_000),
            Decimal::from(100),
            Decimal::new(10, 2),
            2,
            3,
        );
        let even_share = Decimal::from(1_000) / Decimal::from(3);
        assert_eq!(b, even_share.min((Decimal::from(900)) / Decimal::from(2)));
    }

    #[test]
    fn test_margin_budget_exhausted_allocation() {
        let b = margin_budget(
            Decimal::from(10_000),
            Decimal::from(1_000),
            Decimal::new(10, 2),
            3,
            3,
        );
        assert_eq!(b, Decimal::ZERO);
    }

    #[test]
    fn test_exit_target_opposite_closes_even_when_confirmed() {
        let pos = position("AAVE", "confirmed");
        let d = plan_exit(
            &pos,
            Decimal::from(100),
            Utc::now(),
            Some(Side::Short),
            ExitMode::TimeBased,
        );
        assert_eq!(d, ExitDecision::Close(ExitReason::TargetOpposite));
    }

    #[test]
    fn test_exit_same_side_target_confirms_once() {
        let pos = position("AAVE", "open");
        let d = plan_exit(
            &pos,
            Decimal::from(100),
            Utc::now(),
            Some(Side::Long),
            ExitMode::TimeBased,
        );
        assert_eq!(d, ExitDecision::Confirm);

        let confirmed = position("AAVE", "confirmed");
        let d = plan_exit(
            &confirmed,
            Decimal::from(100),
            Utc::now(),
            Some(Side::Long),
            ExitMode::TimeBased,
        );
        assert_eq!(d, ExitDecision::Hold);
    }

    #[test]
    fn test_exit_confirmed_without_target_is_planner_owned() {
        let pos = position("AAVE", "confirmed");
        // Even past timeout the manager holds; the copy planner closes it.
        let d = plan_exit(
            &pos,
            Decimal::from(100),
            Utc::now() + ChronoDuration::hours(10),
            None,
            ExitMode::TimeBased,
        );
        assert_eq!(d, ExitDecision::Hold);
    }

    #[test]
    fn test_exit_tp_and_sl_only_in_price_mode() {
        let pos = position("AAVE", "open");
        let mode = ExitMode::TpSl {
            tp_pct: Decimal::new(20, 2),
            sl_pct: Decimal::new(12, 2),
        };

        let d = plan_exit(&pos, Decimal::from(121), Utc::now(), None, mode);
        assert_eq!(d, ExitDecision::Close(ExitReason::Tp));

        let d = plan_exit(&pos, Decimal::from(87), Utc::now(), None, mode);
        assert_eq!(d, ExitDecision::Close(ExitReason::Sl));

        // Same prices in time mode: no price exits.
        let d = plan_exit(&pos, Decimal::from(121), Utc::now(), None, ExitMode::TimeBased);
        assert_eq!(d, ExitDecision::Hold);
    }

    #[test]
    fn test_exit_timeout_fires_in_both_modes() {
        let pos = position("AAVE", "open");
        let late = Utc::now() + ChronoDuration::hours(5);

        let d = plan_exit(&pos, Decimal::from(100), late, None, ExitMode::TimeBased);
        assert_eq!(d, ExitDecision::Close(ExitReason::Timeout));

        let mode = ExitMode::TpSl {
            tp_pct: Decimal::new(20, 2),
            sl_pct: Decimal::new(12, 2),
        };
        let d = plan_exit(&pos, Decimal::from(100), late, None, mode);
        assert_eq!(d, ExitDecision::Close(ExitReason::Timeout));
    }

    #[test]
    fn test_exit_prices_zero_in_time_mode() {
        let cfg = test_config();
        let (tp, sl) = cfg.exit_prices(Decimal::from(100));
        assert_eq!(tp, Decimal::ZERO);
        assert_eq!(sl, Decimal::ZERO);
    }

    #[test]
    fn test_exit_prices_in_price_mode() {
        let mut cfg = test_config();
        cfg.exit_mode = ExitMode::TpSl {
            tp_pct: Decimal::new(20, 2),
            sl_pct: Decimal::new(12, 2),
        };
        let (tp, sl) = cfg.exit_prices(Decimal::from(100));
        assert_eq!(tp, Decimal::from(120));
        assert_eq!(sl, Decimal::from(88));
    }
}
