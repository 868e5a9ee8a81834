use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::models::{AccountPosition, PortfolioSnapshot};

use super::VenueError;

/// Parse a venue-encoded decimal string ("60123.5").
pub fn parse_decimal(raw: &str) -> Result<Decimal, VenueError> {
    Decimal::from_str(raw).map_err(|_| VenueError::Parse(format!("bad decimal: {raw}")))
}

// ---------------------------------------------------------------------------
// Instrument metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    pub sz_decimals: u32,
    pub max_leverage: u32,
    #[serde(default)]
    pub only_isolated: Option<bool>,
    #[serde(default)]
    pub is_delisted: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub universe: Vec<AssetMeta>,
}

/// Cached per-symbol instrument metadata. Immutable for the process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct TickerMeta {
    pub asset_index: u32,
    pub sz_decimals: u32,
    pub max_leverage: u32,
}

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    pub account_value: String,
    #[serde(default)]
    pub total_margin_used: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageInfo {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub value: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub coin: String,
    /// Signed size: positive long, negative short.
    pub szi: String,
    #[serde(default)]
    pub entry_px: Option<String>,
    #[serde(default)]
    pub liquidation_px: Option<String>,
    pub leverage: LeverageInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: PositionData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    pub margin_summary: MarginSummary,
    pub withdrawable: String,
    #[serde(default)]
    pub asset_positions: Vec<AssetPosition>,
}

impl ClearinghouseState {
    pub fn portfolio(&self) -> Result<PortfolioSnapshot, VenueError> {
        Ok(PortfolioSnapshot {
            equity: parse_decimal(&self.margin_summary.account_value)?,
            withdrawable: parse_decimal(&self.withdrawable)?,
        })
    }

    /// Convert wire positions to domain positions, dropping zero-size rows.
    pub fn positions(&self) -> Result<Vec<AccountPosition>, VenueError> {
        let mut out = Vec::with_capacity(self.asset_positions.len());
        for ap in &self.asset_positions {
            let p = &ap.position;
            let signed_size = parse_decimal(&p.szi)?;
            if signed_size.is_zero() {
                continue;
            }
            let entry_price = match &p.entry_px {
                Some(raw) => parse_decimal(raw)?,
                None => Decimal::ZERO,
            };
            let liquidation_price = match &p.liquidation_px {
                Some(raw) => Some(parse_decimal(raw)?),
                None => None,
            };
            out.push(AccountPosition {
                symbol: p.coin.clone(),
                signed_size,
                leverage: p.leverage.value,
                entry_price,
                liquidation_price,
            });
        }
        Ok(out)
    }
}

/// allMids wire shape: symbol → price string.
pub type AllMids = HashMap<String, String>;

/// Parse the mid table, silently dropping entries the venue encoded badly
/// (a missing mid is a per-symbol skip signal downstream, not a scan error).
pub fn parse_mids(raw: AllMids) -> HashMap<String, Decimal> {
    raw.into_iter()
        .filter_map(|(sym, px)| Decimal::from_str(&px).ok().map(|d| (sym, d)))
        .collect()
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LimitTif {
    pub tif: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderType {
    pub limit: LimitTif,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub asset: u32,
    pub is_buy: bool,
    pub limit_px: String,
    pub sz: String,
    pub reduce_only: bool,
    pub order_type: OrderType,
}

impl OrderRequest {
    /// A market order modelled as an aggressive IOC limit.
    pub fn market(asset: u32, is_buy: bool, limit_px: Decimal, sz: Decimal, reduce_only: bool) -> Self {
        Self {
            asset,
            is_buy,
            limit_px: limit_px.normalize().to_string(),
            sz: sz.normalize().to_string(),
            reduce_only,
            order_type: OrderType {
                limit: LimitTif { tif: "Ioc".into() },
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    pub status: String,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

impl ExchangeResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub fn error_message(&self) -> String {
        self.response
            .as_ref()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| self.status.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
