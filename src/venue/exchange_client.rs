use std::time::Duration;

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;

use super::types::{ExchangeResponse, OrderRequest};
use super::VenueError;

const ORDER_TIMEOUT: Duration = Duration::from_secs(30);
const LEVERAGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
enum ExchangeAction {
    #[serde(rename_all = "camelCase")]
    UpdateLeverage {
        asset: u32,
        is_cross: bool,
        leverage: u32,
    },
    Order {
        orders: Vec<OrderRequest>,
    },
}

/// Authenticated client for mutating venue state (leverage, orders).
///
/// Authentication is an opaque bearer credential; signing schemes are
/// venue-specific and live behind the gateway this client talks to.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    http: Client,
    base_url: String,
    api_key: String,
    account: String,
}

impl ExchangeClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            account: account.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    async fn post(
        &self,
        action: &ExchangeAction,
        timeout: Duration,
    ) -> Result<ExchangeResponse, VenueError> {
        let url = format!("{}/exchange", self.base_url);
        let resp = self
            .http
            .post(&url)
            .timeout(timeout)
            .bearer_auth(&self.api_key)
            .json(action)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VenueError::Timeout(timeout)
                } else {
                    VenueError::Http(e)
                }
            })?
            .error_for_status()?;

        let body: ExchangeResponse = resp.json().await?;
        if !body.is_ok() {
            return Err(VenueError::Rejected(body.error_message()));
        }
        Ok(body)
    }

    /// Set cross-margin leverage for one asset.
    pub async fn update_leverage(&self, asset: u32, leverage: u32) -> Result<(), VenueError> {
        self.post(
            &ExchangeAction::UpdateLeverage {
                asset,
                is_cross: true,
                leverage,
            },
            LEVERAGE_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    /// Submit a market order modelled as an aggressive IOC limit at the
    /// caller's slippage-bounded price.
    pub async fn submit_market_order(
        &self,
        asset: u32,
        is_buy: bool,
        limit_px: Decimal,
        sz: Decimal,
        reduce_only: bool,
    ) -> Result<(), VenueError> {
        let order = OrderRequest::market(asset, is_buy, limit_px, sz, reduce_only);
        self.post(&ExchangeAction::Order { orders: vec![order] }, ORDER_TIMEOUT)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_leverage_serializes_cross() {
        let action = ExchangeAction::UpdateLeverage {
            asset: 7,
            is_cross: true,
            leverage: 10,
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["type"], "updateLeverage");
        assert_eq!(v["isCross"], true);
        assert_eq!(v["leverage"], 10);
    }

    #[test]
    fn test_order_action_wraps_orders() {
        let action = ExchangeAction::Order {
            orders: vec![OrderRequest::market(
                1,
                false,
                Decimal::from(58800),
                Decimal::new(4, 1),
                true,
            )],
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["type"], "order");
        assert_eq!(v["orders"][0]["reduce_only"], true);
        assert_eq!(v["orders"][0]["is_buy"], false);
    }
}
