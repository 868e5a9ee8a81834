use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Prediction;

/// Insert one scored prediction at scan time. Returns the new row id.
#[allow(clippy::too_many_arguments)]
pub async fn insert_prediction(
    pool: &PgPool,
    symbol: &str,
    score: Decimal,
    confidence: Decimal,
    direction: Option<i16>,
    reasons: &[String],
    entry_price: Decimal,
    features: &serde_json::Value,
    model_version: &str,
) -> anyhow::Result<Uuid> {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO predictions
            (symbol, score, confidence, direction, reasons, entry_price, features, model_version)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(symbol)
    .bind(score)
    .bind(confidence)
    .bind(direction)
    .bind(serde_json::to_value(reasons)?)
    .bind(entry_price)
    .bind(features)
    .bind(model_version)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Attach the executed copy action to a scan's prediction row.
pub async fn set_copy_action(
    pool: &PgPool,
    id: Uuid,
    action: &str,
    side: Option<&str>,
    size: Option<Decimal>,
) -> anyhow::Result<()> {
    let label: i16 = if action == "none" { 0 } else { 1 };

    sqlx::query(
        r#"
        UPDATE predictions
        SET copy_action = $2, copy_side = $3, copy_size = $4, actual_label = $5
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(action)
    .bind(side)
    .bind(size)
    .bind(label)
    .execute(pool)
    .await?;

    Ok(())
}

/// Unvalidated predictions older than `cutoff`, oldest first, bounded.
pub async fn get_unvalidated_older_than(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> anyhow::Result<Vec<Prediction>> {
    let rows = sqlx::query_as::<_, Prediction>(
        r#"
        SELECT * FROM predictions
        WHERE validated_at IS NULL AND timestamp < $1
        ORDER BY timestamp ASC
        LIMIT $2
        "#,
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Record the validation outcome for one prediction.
pub async fn mark_validated(
    pool: &PgPool,
    id: Uuid,
    exit_price: Decimal,
    paper_pnl: Decimal,
    paper_pnl_pct: Decimal,
    correct: bool,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE predictions
        SET exit_price = $2, paper_pnl = $3, paper_pnl_pct = $4,
            correct = $5, validated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(exit_price)
    .bind(paper_pnl)
    .bind(paper_pnl_pct)
    .bind(correct)
    .execute(pool)
    .await?;

    Ok(())
}
