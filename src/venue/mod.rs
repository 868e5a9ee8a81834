pub mod exchange_client;
pub mod info_client;
pub mod types;

pub use exchange_client::ExchangeClient;
pub use info_client::InfoClient;
pub use types::{AssetMeta, ClearinghouseState, Meta, TickerMeta};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("venue call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("venue rejected request: {0}")]
    Rejected(String),

    #[error("unexpected venue payload: {0}")]
    Parse(String),
}
