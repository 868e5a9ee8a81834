use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};

// Read-only access to externally maintained market-data tables: hourly
// candles, derived indicator bundles and funding-rate epochs. The backfill
// process that writes them is not part of this service.

#[derive(Debug, Clone, FromRow)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: String,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, FromRow)]
pub struct IndicatorBundle {
    pub symbol: String,
    pub rsi_14: Option<Decimal>,
    pub macd: Option<Decimal>,
    pub macd_signal: Option<Decimal>,
    pub macd_hist: Option<Decimal>,
    pub bb_upper: Option<Decimal>,
    pub bb_middle: Option<Decimal>,
    pub bb_lower: Option<Decimal>,
    pub atr_14: Option<Decimal>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FundingEpoch {
    pub symbol: String,
    pub rate: Decimal,
    pub epoch_at: DateTime<Utc>,
}

/// Most recent candle for a symbol/timeframe.
pub async fn latest_candle(
    pool: &PgPool,
    symbol: &str,
    timeframe: &str,
) -> anyhow::Result<Option<Candle>> {
    let row = sqlx::query_as::<_, Candle>(
        r#"
        SELECT symbol, timeframe, open_time, open, high, low, close, volume
        FROM candles
        WHERE symbol = $1 AND timeframe = $2
        ORDER BY open_time DESC
        LIMIT 1
        "#,
    )
    .bind(symbol)
    .bind(timeframe)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// The `n` most recent hourly candles, newest first.
pub async fn recent_candles(
    pool: &PgPool,
    symbol: &str,
    timeframe: &str,
    n: i64,
) -> anyhow::Result<Vec<Candle>> {
    let rows = sqlx::query_as::<_, Candle>(
        r#"
        SELECT symbol, timeframe, open_time, open, high, low, close, volume
        FROM candles
        WHERE symbol = $1 AND timeframe = $2
        ORDER BY open_time DESC
        LIMIT $3
        "#,
    )
    .bind(symbol)
    .bind(timeframe)
    .bind(n)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Latest derived indicator bundle for a symbol.
pub async fn latest_indicators(
    pool: &PgPool,
    symbol: &str,
) -> anyhow::Result<Option<IndicatorBundle>> {
    let row = sqlx::query_as::<_, IndicatorBundle>(
        r#"
        SELECT symbol, rsi_14, macd, macd_signal, macd_hist,
               bb_upper, bb_middle, bb_lower, atr_14, computed_at
        FROM indicator_bundles
        WHERE symbol = $1
        ORDER BY computed_at DESC
        LIMIT 1
        "#,
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Latest funding-rate epoch for a symbol.
pub async fn latest_funding(pool: &PgPool, symbol: &str) -> anyhow::Result<Option<FundingEpoch>> {
    let row = sqlx::query_as::<_, FundingEpoch>(
        r#"
        SELECT symbol, rate, epoch_at
        FROM funding_epochs
        WHERE symbol = $1
        ORDER BY epoch_at DESC
        LIMIT 1
        "#,
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Latest hourly close, used as the observed exit price when validating
/// past predictions.
pub async fn latest_hourly_close(pool: &PgPool, symbol: &str) -> anyhow::Result<Option<Decimal>> {
    Ok(latest_candle(pool, symbol, "1h").await?.map(|c| c.close))
}
