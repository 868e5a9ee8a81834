pub mod independent;
pub mod prediction;

pub use independent::{ExitReason, IndependentPosition};
pub use prediction::{Prediction, ScanPrediction};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Buy opens/extends a long, sell opens/extends a short.
    pub fn is_buy(self) -> bool {
        matches!(self, Side::Long)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

// ---------------------------------------------------------------------------
// CopyAction
// ---------------------------------------------------------------------------

/// Mutation the planner selected for one symbol in one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyAction {
    Open,
    Close,
    Flip,
    Adjust,
    None,
}

impl fmt::Display for CopyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyAction::Open => write!(f, "open"),
            CopyAction::Close => write!(f, "close"),
            CopyAction::Flip => write!(f, "flip"),
            CopyAction::Adjust => write!(f, "adjust"),
            CopyAction::None => write!(f, "none"),
        }
    }
}

// ---------------------------------------------------------------------------
// AccountPosition
// ---------------------------------------------------------------------------

/// One open perp position as reported by the venue.
///
/// `signed_size` is positive for longs, negative for shorts. A zero size is
/// treated everywhere as "no position".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPosition {
    pub symbol: String,
    pub signed_size: Decimal,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub liquidation_price: Option<Decimal>,
}

impl AccountPosition {
    /// Direction of the position, or `None` when flat.
    ///
    /// The entry-vs-liquidation comparison is the venue-agnostic derivation
    /// (a long liquidates below entry). Falls back to the sign of the size
    /// when the venue reports no liquidation price.
    pub fn side(&self) -> Option<Side> {
        if self.signed_size.is_zero() {
            return None;
        }
        match self.liquidation_price {
            Some(liq) if !liq.is_zero() => {
                if self.entry_price > liq {
                    Some(Side::Long)
                } else {
                    Some(Side::Short)
                }
            }
            _ => {
                if self.signed_size > Decimal::ZERO {
                    Some(Side::Long)
                } else {
                    Some(Side::Short)
                }
            }
        }
    }

    pub fn size(&self) -> Decimal {
        self.signed_size.abs()
    }
}

// ---------------------------------------------------------------------------
// PortfolioSnapshot
// ---------------------------------------------------------------------------

/// Account equity and free margin at fetch time. Never cached across scans.
#[derive(Debug, Clone, Copy)]
pub struct PortfolioSnapshot {
    pub equity: Decimal,
    pub withdrawable: Decimal,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
