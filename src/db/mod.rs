pub mod independent_repo;
pub mod market_data_repo;
pub mod prediction_repo;
pub mod telemetry_repo;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

/// Pre-scan store health probe.
///
/// First attempt is bounded at 5 s. On failure a single retry is bounded at
/// 10 s; the pool establishes a fresh connection underneath. A second failure
/// aborts the calling scan.
pub async fn health_probe(pool: &PgPool) -> anyhow::Result<()> {
    let first = tokio::time::timeout(PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await;

    match first {
        Ok(Ok(_)) => return Ok(()),
        Ok(Err(e)) => tracing::warn!(error = %e, "Store probe failed, retrying once"),
        Err(_) => tracing::warn!(timeout_secs = 5, "Store probe timed out, retrying once"),
    }

    let retry =
        tokio::time::timeout(RETRY_PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await;

    match retry {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(anyhow::anyhow!("store unavailable after retry: {e}")),
        Err(_) => Err(anyhow::anyhow!("store probe retry timed out")),
    }
}
