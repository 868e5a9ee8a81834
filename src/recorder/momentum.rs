use rust_decimal::Decimal;

use crate::models::Side;

use super::{MarketState, ScoreOutput, Scorer};

/// Default scoring model: hourly momentum alignment plus mean-reversion
/// extremes, with BTC context and funding as modifiers.
///
/// Stateless and deterministic; the score is 50 ± accumulated signal points,
/// clamped to [0, 100].
pub struct MomentumScorer;

const DIRECTION_MARGIN: i64 = 10;

impl Scorer for MomentumScorer {
    fn version(&self) -> &'static str {
        "momentum-v1"
    }

    fn score(&self, _symbol: &str, state: &MarketState) -> ScoreOutput {
        let mut bull = 0i64;
        let mut bear = 0i64;
        let mut reasons = Vec::new();

        if let Some(rsi) = state.rsi_14 {
            if rsi < Decimal::from(30) {
                bull += 12;
                reasons.push("rsi_oversold".to_string());
            } else if rsi > Decimal::from(70) {
                bear += 12;
                reasons.push("rsi_overbought".to_string());
            }
        }

        if let Some(hist) = state.macd_hist {
            if hist > Decimal::ZERO {
                bull += 10;
                reasons.push("macd_bullish".to_string());
            } else if hist < Decimal::ZERO {
                bear += 10;
                reasons.push("macd_bearish".to_string());
            }
        }

        if let Some(bb) = state.bb_position {
            if bb < Decimal::new(15, 2) {
                bull += 8;
                reasons.push("bb_lower_band".to_string());
            } else if bb > Decimal::new(85, 2) {
                bear += 8;
                reasons.push("bb_upper_band".to_string());
            }
        }

        match (state.change_1h_pct, state.change_4h_pct, state.change_24h_pct) {
            (Some(h1), Some(h4), Some(h24))
                if h1 > Decimal::ZERO && h4 > Decimal::ZERO && h24 > Decimal::ZERO =>
            {
                bull += 15;
                reasons.push("momentum_aligned_up".to_string());
            }
            (Some(h1), Some(h4), Some(h24))
                if h1 < Decimal::ZERO && h4 < Decimal::ZERO && h24 < Decimal::ZERO =>
            {
                bear += 15;
                reasons.push("momentum_aligned_down".to_string());
            }
            (_, Some(h4), _) if h4 > Decimal::from(2) => {
                bull += 6;
                reasons.push("momentum_4h_up".to_string());
            }
            (_, Some(h4), _) if h4 < Decimal::from(-2) => {
                bear += 6;
                reasons.push("momentum_4h_down".to_string());
            }
            _ => {}
        }

        if let Some(funding) = state.funding_rate {
            // Negative funding pays longs; heavily positive funding crowds them.
            if funding < Decimal::ZERO {
                bull += 5;
                reasons.push("funding_negative".to_string());
            } else if funding > Decimal::new(5, 4) {
                bear += 5;
                reasons.push("funding_elevated".to_string());
            }
        }

        if let Some(btc) = state.btc_change_4h_pct {
            if btc > Decimal::ONE {
                bull += 6;
                reasons.push("btc_tailwind".to_string());
            } else if btc < Decimal::from(-1) {
                bear += 6;
                reasons.push("btc_headwind".to_string());
            }
        }

        let net = bull - bear;
        let score = (Decimal::from(50) + Decimal::from(net)).clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);

        let direction = if net >= DIRECTION_MARGIN {
            Some(Side::Long)
        } else if net <= -DIRECTION_MARGIN {
            Some(Side::Short)
        } else {
            None
        };

        ScoreOutput {
            score,
            direction,
            reasons,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bullish_state() -> MarketState {
        MarketState {
            price: Decimal::from(100),
            change_1h_pct: Some(Decimal::ONE),
            change_4h_pct: Some(Decimal::from(3)),
            change_24h_pct: Some(Decimal::from(5)),
            rsi_14: Some(Decimal::from(28)),
            macd_hist: Some(Decimal::new(5, 1)),
            bb_position: Some(Decimal::new(10, 2)),
            atr_pct: Some(Decimal::from(2)),
            funding_rate: Some(Decimal::new(-1, 4)),
            btc_change_4h_pct: Some(Decimal::from(2)),
        }
    }

    #[test]
    fn test_bullish_state_scores_long() {
        let out = MomentumScorer.score("ETH", &bullish_state());
        assert_eq!(out.direction, Some(Side::Long));
        assert!(out.score > Decimal::from(90));
        assert!(out.reasons.contains(&"rsi_oversold".to_string()));
        assert!(out.reasons.contains(&"momentum_aligned_up".to_string()));
        assert!(out.reasons.contains(&"funding_negative".to_string()));
    }

    #[test]
    fn test_bearish_state_scores_short() {
        let state = MarketState {
            price: Decimal::from(100),
            change_1h_pct: Some(Decimal::from(-1)),
            change_4h_pct: Some(Decimal::from(-3)),
            change_24h_pct: Some(Decimal::from(-6)),
            rsi_14: Some(Decimal::from(78)),
            macd_hist: Some(Decimal::new(-5, 1)),
            bb_position: Some(Decimal::new(95, 2)),
            atr_pct: None,
            funding_rate: Some(Decimal::new(8, 4)),
            btc_change_4h_pct: Some(Decimal::from(-3)),
        };
        let out = MomentumScorer.score("ETH", &state);
        assert_eq!(out.direction, Some(Side::Short));
        assert!(out.score < Decimal::from(10));
    }

    #[test]
    fn test_empty_state_is_neutral() {
        let state = MarketState {
            price: Decimal::from(100),
            ..MarketState::default()
        };
        let out = MomentumScorer.score("ETH", &state);
        assert_eq!(out.score, Decimal::from(50));
        assert_eq!(out.direction, None);
        assert!(out.reasons.is_empty());
    }

    #[test]
    fn test_weak_net_signal_has_no_direction() {
        // A lone funding signal (+5) stays under the direction margin.
        let state = MarketState {
            price: Decimal::from(100),
            funding_rate: Some(Decimal::new(-1, 4)), // +5 bull only
            ..MarketState::default()
        };
        let out = MomentumScorer.score("ETH", &state);
        assert_eq!(out.direction, None);
        assert_eq!(out.score, Decimal::from(55));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let a = MomentumScorer.score("ETH", &bullish_state());
        let b = MomentumScorer.score("ETH", &bullish_state());
        assert_eq!(a.score, b.score);
        assert_eq!(a.direction, b.direction);
        assert_eq!(a.reasons, b.reasons);
    }
}
