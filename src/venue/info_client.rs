use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{AccountPosition, PortfolioSnapshot};

use super::types::{parse_mids, AllMids, ClearinghouseState, Meta};
use super::VenueError;

const STATE_TIMEOUT: Duration = Duration::from_secs(10);
const META_TIMEOUT: Duration = Duration::from_secs(20);
const MIDS_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only venue state requests, dispatched as JSON to a single /info
/// endpoint keyed by a `type` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
enum InfoRequest {
    Meta,
    AllMids,
    #[serde(rename_all = "camelCase")]
    ClearinghouseState {
        user: String,
    },
}

/// Unauthenticated client for venue market/account state.
#[derive(Debug, Clone)]
pub struct InfoClient {
    http: Client,
    base_url: String,
}

impl InfoClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn post<T: DeserializeOwned>(
        &self,
        req: &InfoRequest,
        timeout: Duration,
    ) -> Result<T, VenueError> {
        let url = format!("{}/info", self.base_url);
        let resp = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(req)
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

        Ok(resp.json::<T>().await?)
    }

    /// Instrument universe: symbol, size decimals, max leverage.
    pub async fn meta(&self) -> Result<Meta, VenueError> {
        self.post(&InfoRequest::Meta, META_TIMEOUT).await
    }

    /// Mid prices for every instrument, parsed to decimals.
    pub async fn all_mids(&self) -> Result<HashMap<String, Decimal>, VenueError> {
        let raw: AllMids = self.post(&InfoRequest::AllMids, MIDS_TIMEOUT).await?;
        Ok(parse_mids(raw))
    }

    /// Equity, withdrawable margin and open positions for one account.
    pub async fn clearinghouse_state(
        &self,
        account: &str,
    ) -> Result<(PortfolioSnapshot, Vec<AccountPosition>), VenueError> {
        let state: ClearinghouseState = self
            .post(
                &InfoRequest::ClearinghouseState {
                    user: account.to_string(),
                },
                STATE_TIMEOUT,
            )
            .await?;

        Ok((state.portfolio()?, state.positions()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_requests_serialize_with_type_tag() {
        let meta = serde_json::to_value(InfoRequest::Meta).unwrap();
        assert_eq!(meta["type"], "meta");

        let mids = serde_json::to_value(InfoRequest::AllMids).unwrap();
        assert_eq!(mids["type"], "allMids");

        let state = serde_json::to_value(InfoRequest::ClearinghouseState {
            user: "0xabc".into(),
        })
        .unwrap();
        assert_eq!(state["type"], "clearinghouseState");
        assert_eq!(state["user"], "0xabc");
    }
}
