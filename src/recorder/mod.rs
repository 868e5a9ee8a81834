pub mod momentum;

pub use momentum::MomentumScorer;

use std::collections::{HashMap, HashSet};

use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::{market_data_repo, prediction_repo};
use crate::engine::Engine;
use crate::models::{ScanPrediction, Side};

/// How many unvalidated predictions one validation pass may process.
const VALIDATION_BATCH: i64 = 100;

/// Score at or above which a prediction counts as high-confidence for the
/// validation-correctness predicate.
const HIGH_CONFIDENCE_SCORE: Decimal = Decimal::from_parts(70, 0, 0, false, 0);

// ---------------------------------------------------------------------------
// Market state & scoring plug-point
// ---------------------------------------------------------------------------

/// Snapshot of store-backed indicators for one symbol at scan time. Missing
/// store data leaves fields unset; scorers treat a miss as "no signal".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketState {
    pub price: Decimal,
    pub change_1h_pct: Option<Decimal>,
    pub change_4h_pct: Option<Decimal>,
    pub change_24h_pct: Option<Decimal>,
    pub rsi_14: Option<Decimal>,
    pub macd_hist: Option<Decimal>,
    /// Position of price inside the Bollinger band, 0 = lower, 1 = upper.
    pub bb_position: Option<Decimal>,
    pub atr_pct: Option<Decimal>,
    pub funding_rate: Option<Decimal>,
    pub btc_change_4h_pct: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct ScoreOutput {
    /// 0–100.
    pub score: Decimal,
    pub direction: Option<Side>,
    pub reasons: Vec<String>,
}

/// Pluggable scoring function. Implementations must be deterministic for a
/// given input and stamp a stable version so per-model statistics stay sound
/// when several models coexist in the store.
pub trait Scorer: Send + Sync {
    fn version(&self) -> &'static str;
    fn score(&self, symbol: &str, state: &MarketState) -> ScoreOutput;
}

// ---------------------------------------------------------------------------
// Per-scan entry points
// ---------------------------------------------------------------------------

/// Record one scored prediction per universe symbol. Runs strictly before
/// any copy execution in the scan.
pub async fn log_predictions(engine: &Engine, universe: &[String], mids: &HashMap<String, Decimal>) {
    engine.clear_scan_predictions();

    for symbol in universe {
        let Some(&mid) = mids.get(symbol) else {
            tracing::debug!(symbol = %symbol, "No mid-price — prediction skipped");
            continue;
        };

        let state = assemble_market_state(engine, symbol, mid).await;
        let output = engine.scorer.score(symbol, &state);
        let score = output.score.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
        let confidence = score / Decimal::ONE_HUNDRED;

        let mut prediction = ScanPrediction {
            id: uuid::Uuid::nil(),
            symbol: symbol.clone(),
            score,
            direction: output.direction,
            entry_price: mid,
            reasons: output.reasons,
        };

        let features = serde_json::to_value(&state).unwrap_or_default();
        let inserted = prediction_repo::insert_prediction(
            &engine.db,
            symbol,
            score,
            confidence,
            prediction.direction_value(),
            &prediction.reasons,
            mid,
            &features,
            engine.scorer.version(),
        )
        .await;

        match inserted {
            Ok(id) => {
                prediction.id = id;
                engine.insert_scan_prediction(prediction);
                counter!("predictions_recorded").increment(1);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Failed to persist prediction");
            }
        }
    }
}

/// Attach an executed copy action to this scan's prediction for the symbol.
/// Called by the planner strictly after execution.
pub async fn log_copy_action(engine: &Engine, symbol: &str, action: &str, side: &str, size: Decimal) {
    let Some(prediction) = engine.scan_prediction(symbol) else {
        tracing::debug!(symbol, action, "No scan prediction to attach copy action to");
        return;
    };

    if let Err(e) = prediction_repo::set_copy_action(
        &engine.db,
        prediction.id,
        action,
        Some(side),
        Some(size),
    )
    .await
    {
        tracing::warn!(symbol, error = %e, "Failed to attach copy action to prediction");
    }
}

/// Mark every untraded symbol's prediction as `none`. Runs strictly after
/// all per-symbol sync operations.
pub async fn finalize_scan_predictions(engine: &Engine, traded: &HashSet<String>) {
    for prediction in engine.scan_predictions_snapshot() {
        if traded.contains(&prediction.symbol) {
            continue;
        }
        if let Err(e) =
            prediction_repo::set_copy_action(&engine.db, prediction.id, "none", None, None).await
        {
            tracing::warn!(symbol = %prediction.symbol, error = %e, "Failed to finalize prediction");
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Compare matured predictions against the observed price and record paper
/// P&L. Bounded per pass; older rows are drained across passes.
pub async fn validate_past_predictions(engine: &Engine) -> anyhow::Result<()> {
    let cutoff = Utc::now() - ChronoDuration::hours(engine.config.validation_window_hours);
    let pending =
        prediction_repo::get_unvalidated_older_than(&engine.db, cutoff, VALIDATION_BATCH).await?;

    if pending.is_empty() {
        return Ok(());
    }

    let mut validated = 0u32;
    for row in &pending {
        let Some(exit_price) = market_data_repo::latest_hourly_close(&engine.db, &row.symbol)
            .await
            .ok()
            .flatten()
        else {
            tracing::debug!(symbol = %row.symbol, "No observed close yet — validation deferred");
            continue;
        };

        let direction = Decimal::from(row.direction.unwrap_or(0));
        let paper_pnl = (exit_price - row.entry_price) * direction;
        let paper_pnl_pct = if row.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            paper_pnl / row.entry_price * Decimal::ONE_HUNDRED
        };

        let correct = is_correct(
            row.score,
            row.direction,
            row.actual_label.unwrap_or(0),
            paper_pnl_pct,
        );

        prediction_repo::mark_validated(
            &engine.db,
            row.id,
            exit_price,
            paper_pnl,
            paper_pnl_pct,
            correct,
        )
        .await?;
        counter!("predictions_validated").increment(1);
        validated += 1;
    }

    tracing::info!(
        pending = pending.len(),
        validated,
        "Prediction validation pass complete"
    );
    Ok(())
}

/// Validation-correctness predicate.
///
/// A high-confidence directional prediction is correct when its paper P&L is
/// positive. A low-confidence prediction that led to no action is correct
/// when acting would not have won, i.e. abstaining was the right call.
pub fn is_correct(
    score: Decimal,
    direction: Option<i16>,
    actual_label: i16,
    paper_pnl_pct: Decimal,
) -> bool {
    let high_confidence = score >= HIGH_CONFIDENCE_SCORE;

    if high_confidence && direction.is_some() {
        return paper_pnl_pct > Decimal::ZERO;
    }

    if !high_confidence && actual_label == 0 {
        return paper_pnl_pct <= Decimal::ZERO;
    }

    false
}

// ---------------------------------------------------------------------------
// Market-state assembly
// ---------------------------------------------------------------------------

async fn assemble_market_state(engine: &Engine, symbol: &str, mid: Decimal) -> MarketState {
    let mut state = MarketState {
        price: mid,
        ..MarketState::default()
    };

    match market_data_repo::recent_candles(&engine.db, symbol, "1h", 25).await {
        Ok(candles) => {
            state.change_1h_pct = pct_change_from(&candles, mid, 1);
            state.change_4h_pct = pct_change_from(&candles, mid, 4);
            state.change_24h_pct = pct_change_from(&candles, mid, 24);
        }
        Err(e) => tracing::debug!(symbol, error = %e, "Candle lookup failed"),
    }

    match market_data_repo::latest_indicators(&engine.db, symbol).await {
        Ok(Some(ind)) => {
            state.rsi_14 = ind.rsi_14;
            state.macd_hist = ind.macd_hist;
            state.bb_position = bollinger_position(mid, ind.bb_lower, ind.bb_upper);
            state.atr_pct = ind.atr_14.and_then(|atr| {
                if mid.is_zero() {
                    None
                } else {
                    Some(atr / mid * Decimal::ONE_HUNDRED)
                }
            });
        }
        Ok(None) => {}
        Err(e) => tracing::debug!(symbol, error = %e, "Indicator lookup failed"),
    }

    match market_data_repo::latest_funding(&engine.db, symbol).await {
        Ok(funding) => state.funding_rate = funding.map(|f| f.rate),
        Err(e) => tracing::debug!(symbol, error = %e, "Funding lookup failed"),
    }

    if symbol != "BTC" {
        if let Ok(btc) = market_data_repo::recent_candles(&engine.db, "BTC", "1h", 5).await {
            if let (Some(latest), Some(old)) = (btc.first(), btc.get(4)) {
                if !old.close.is_zero() {
                    state.btc_change_4h_pct =
                        Some((latest.close - old.close) / old.close * Decimal::ONE_HUNDRED);
                }
            }
        }
    }

    state
}

/// Percent change of `mid` versus the close `hours_ago` candles back
/// (candles are newest-first).
fn pct_change_from(
    candles: &[market_data_repo::Candle],
    mid: Decimal,
    hours_ago: usize,
) -> Option<Decimal> {
    let reference = candles.get(hours_ago)?.close;
    if reference.is_zero() {
        return None;
    }
    Some((mid - reference) / reference * Decimal::ONE_HUNDRED)
}

fn bollinger_position(
    price: Decimal,
    lower: Option<Decimal>,
    upper: Option<Decimal>,
) -> Option<Decimal> {
    let (lower, upper) = (lower?, upper?);
    let width = upper - lower;
    if width <= Decimal::ZERO {
        return None;
    }
    Some((price - lower) / width)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_confidence_correct_direction() {
        // Long prediction, price went up → correct
        assert!(is_correct(Decimal::from(92), Some(1), 1, Decimal::from(3)));
        // Short prediction, price went up → paper pnl negative → incorrect
        assert!(!is_correct(Decimal::from(92), Some(-1), 1, Decimal::from(-3)));
    }

    #[test]
    fn test_high_confidence_wrong_direction() {
        assert!(!is_correct(Decimal::from(85), Some(1), 1, Decimal::from(-2)));
    }

    #[test]
    fn test_low_confidence_abstain_that_would_have_lost() {
        // Score 40, no action, the hypothetical trade lost → abstaining was right
        assert!(is_correct(Decimal::from(40), Some(1), 0, Decimal::from(-5)));
        // Flat outcome also vindicates abstaining
        assert!(is_correct(Decimal::from(40), None, 0, Decimal::ZERO));
    }

    #[test]
    fn test_low_confidence_abstain_that_missed_a_win() {
        assert!(!is_correct(Decimal::from(40), Some(1), 0, Decimal::from(6)));
    }

    #[test]
    fn test_high_confidence_without_direction_is_incorrect() {
        assert!(!is_correct(Decimal::from(90), None, 0, Decimal::from(2)));
    }

    #[test]
    fn test_bollinger_position() {
        let pos = bollinger_position(
            Decimal::from(105),
            Some(Decimal::from(100)),
            Some(Decimal::from(110)),
        )
        .unwrap();
        assert_eq!(pos, Decimal::new(5, 1)); // 0.5

        // Degenerate band yields no signal
        assert!(bollinger_position(
            Decimal::from(105),
            Some(Decimal::from(110)),
            Some(Decimal::from(110)),
        )
        .is_none());
    }
}
