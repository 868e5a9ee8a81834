use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Side;

/// Database row for the predictions table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Prediction {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub score: Decimal,
    pub confidence: Decimal,
    /// +1 long, -1 short, NULL no direction.
    pub direction: Option<i16>,
    pub reasons: serde_json::Value,
    pub entry_price: Decimal,
    pub features: serde_json::Value,
    pub model_version: String,

    pub copy_action: Option<String>,
    pub copy_side: Option<String>,
    pub copy_size: Option<Decimal>,
    pub actual_label: Option<i16>,

    pub exit_price: Option<Decimal>,
    pub paper_pnl: Option<Decimal>,
    pub paper_pnl_pct: Option<Decimal>,
    pub correct: Option<bool>,
    pub validated_at: Option<DateTime<Utc>>,
}

/// In-memory mirror of the current scan's predictions.
///
/// Written by the recorder at the start of a scan, read by the independent
/// trader and by the planner's copy-action updates, cleared at the next scan
/// start.
#[derive(Debug, Clone)]
pub struct ScanPrediction {
    pub id: Uuid,
    pub symbol: String,
    pub score: Decimal,
    pub direction: Option<Side>,
    pub entry_price: Decimal,
    pub reasons: Vec<String>,
}

impl ScanPrediction {
    pub fn direction_value(&self) -> Option<i16> {
        self.direction.map(|d| match d {
            Side::Long => 1,
            Side::Short => -1,
        })
    }
}
