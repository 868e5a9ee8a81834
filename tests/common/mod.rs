use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to the test database and run all migrations. Returns `None` when
/// TEST_DATABASE_URL is unset so store-backed tests are skipped on machines
/// without a Postgres instance.
#[allow(dead_code)]
pub async fn setup_test_db() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // Clean owned tables for test isolation
    sqlx::query("DELETE FROM copy_actions").execute(&pool).await.ok();
    sqlx::query("DELETE FROM independent_positions").execute(&pool).await.ok();
    sqlx::query("DELETE FROM predictions").execute(&pool).await.ok();

    Some(pool)
}
