use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Why an independent position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Tp,
    Sl,
    Timeout,
    TargetConfirmed,
    TargetOpposite,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Tp => write!(f, "tp"),
            ExitReason::Sl => write!(f, "sl"),
            ExitReason::Timeout => write!(f, "timeout"),
            ExitReason::TargetConfirmed => write!(f, "target_confirmed"),
            ExitReason::TargetOpposite => write!(f, "target_opposite"),
        }
    }
}

/// Database row for the independent_positions table.
///
/// Lifecycle: `open` → (`confirmed`) → `closed`. `closed` is terminal and
/// always carries exit_price, exit_reason, realized_pnl, realized_pnl_pct
/// and closed_at together.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IndependentPosition {
    pub id: Uuid,
    pub symbol: String,
    pub side: String,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub notional_usd: Decimal,
    pub leverage: i32,
    pub tp_price: Decimal,
    pub sl_price: Decimal,
    pub timeout_at: DateTime<Utc>,
    pub status: String,
    pub confirmed_by_target: bool,
    pub prediction_score: Decimal,
    pub prediction_reasons: serde_json::Value,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub realized_pnl: Option<Decimal>,
    pub realized_pnl_pct: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl IndependentPosition {
    pub fn is_confirmed(&self) -> bool {
        self.status == "confirmed"
    }

    /// Margin locked by this position.
    pub fn margin(&self) -> Decimal {
        if self.leverage <= 0 {
            return self.notional_usd;
        }
        self.notional_usd / Decimal::from(self.leverage)
    }
}
