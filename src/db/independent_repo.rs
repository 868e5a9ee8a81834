use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ExitReason, IndependentPosition};

/// Open a new independent position record.
#[allow(clippy::too_many_arguments)]
pub async fn insert_position(
    pool: &PgPool,
    symbol: &str,
    entry_price: Decimal,
    size: Decimal,
    notional_usd: Decimal,
    leverage: i32,
    tp_price: Decimal,
    sl_price: Decimal,
    timeout_at: DateTime<Utc>,
    prediction_score: Decimal,
    prediction_reasons: &[String],
) -> anyhow::Result<IndependentPosition> {
    let row = sqlx::query_as::<_, IndependentPosition>(
        r#"
        INSERT INTO independent_positions
            (symbol, side, entry_price, size, notional_usd, leverage,
             tp_price, sl_price, timeout_at, prediction_score, prediction_reasons)
        VALUES ($1, 'long', $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(symbol)
    .bind(entry_price)
    .bind(size)
    .bind(notional_usd)
    .bind(leverage)
    .bind(tp_price)
    .bind(sl_price)
    .bind(timeout_at)
    .bind(prediction_score)
    .bind(serde_json::to_value(prediction_reasons)?)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// All positions still owned by the independent trader or the planner.
pub async fn get_active_positions(pool: &PgPool) -> anyhow::Result<Vec<IndependentPosition>> {
    let rows = sqlx::query_as::<_, IndependentPosition>(
        "SELECT * FROM independent_positions WHERE status IN ('open', 'confirmed') ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// The active position for one symbol, if any. The partial unique index
/// guarantees at most one row.
pub async fn get_active_by_symbol(
    pool: &PgPool,
    symbol: &str,
) -> anyhow::Result<Option<IndependentPosition>> {
    let row = sqlx::query_as::<_, IndependentPosition>(
        "SELECT * FROM independent_positions WHERE symbol = $1 AND status IN ('open', 'confirmed') LIMIT 1",
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Margin currently locked by the active independent book.
pub async fn total_active_margin(pool: &PgPool) -> anyhow::Result<Decimal> {
    let row: (Option<Decimal>,) = sqlx::query_as(
        "SELECT SUM(notional_usd / leverage) FROM independent_positions WHERE status IN ('open', 'confirmed')",
    )
    .fetch_one(pool)
    .await?;

    Ok(row.0.unwrap_or(Decimal::ZERO))
}

/// Transition open → confirmed: the target now holds the same direction and
/// the copy planner owns sizing from here on.
pub async fn confirm_position(pool: &PgPool, id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE independent_positions
        SET status = 'confirmed', confirmed_by_target = TRUE
        WHERE id = $1 AND status = 'open'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Terminal close: all exit fields are written atomically in one statement.
pub async fn close_position(
    pool: &PgPool,
    id: Uuid,
    exit_price: Decimal,
    reason: ExitReason,
    realized_pnl: Decimal,
    realized_pnl_pct: Decimal,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE independent_positions
        SET status = 'closed', exit_price = $2, exit_reason = $3,
            realized_pnl = $4, realized_pnl_pct = $5, closed_at = NOW()
        WHERE id = $1 AND status IN ('open', 'confirmed')
        "#,
    )
    .bind(id)
    .bind(exit_price)
    .bind(reason.to_string())
    .bind(realized_pnl)
    .bind(realized_pnl_pct)
    .execute(pool)
    .await?;

    Ok(())
}
