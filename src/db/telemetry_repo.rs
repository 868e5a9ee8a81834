use rust_decimal::Decimal;
use sqlx::PgPool;

/// Append one executed copy action to the telemetry table.
pub async fn insert_copy_action(
    pool: &PgPool,
    symbol: &str,
    action: &str,
    side: &str,
    size: Decimal,
    notional: Decimal,
    leverage: i32,
    scale_factor: Decimal,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO copy_actions (symbol, action, side, size, notional, leverage, scale_factor)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(symbol)
    .bind(action)
    .bind(side)
    .bind(size)
    .bind(notional)
    .bind(leverage)
    .bind(scale_factor)
    .execute(pool)
    .await?;

    Ok(())
}
