mod common;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use perpcopy::db::independent_repo;
use perpcopy::models::ExitReason;

async fn seed_position(pool: &sqlx::PgPool, symbol: &str) -> perpcopy::models::IndependentPosition {
    independent_repo::insert_position(
        pool,
        symbol,
        Decimal::from(100),
        Decimal::from(2),
        Decimal::from(200),
        5,
        Decimal::ZERO,
        Decimal::ZERO,
        Utc::now() + Duration::hours(4),
        Decimal::from(92),
        &["momentum_aligned_up".to_string()],
    )
    .await
    .expect("insert independent position")
}

#[tokio::test]
async fn independent_position_full_lifecycle() {
    let Some(pool) = common::setup_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set — skipping");
        return;
    };

    let pos = seed_position(&pool, "AAVE").await;
    assert_eq!(pos.status, "open");
    assert!(!pos.confirmed_by_target);

    // Confirmation hands ownership to the copy planner.
    independent_repo::confirm_position(&pool, pos.id).await.expect("confirm");
    let active = independent_repo::get_active_by_symbol(&pool, "AAVE")
        .await
        .expect("query")
        .expect("still active");
    assert_eq!(active.status, "confirmed");
    assert!(active.confirmed_by_target);

    // Terminal close writes every exit field together.
    independent_repo::close_position(
        &pool,
        pos.id,
        Decimal::from(110),
        ExitReason::Timeout,
        Decimal::from(20),
        Decimal::from(10),
    )
    .await
    .expect("close");

    assert!(independent_repo::get_active_by_symbol(&pool, "AAVE")
        .await
        .expect("query")
        .is_none());

    let row: perpcopy::models::IndependentPosition =
        sqlx::query_as("SELECT * FROM independent_positions WHERE id = $1")
            .bind(pos.id)
            .fetch_one(&pool)
            .await
            .expect("fetch closed row");
    assert_eq!(row.status, "closed");
    assert_eq!(row.exit_reason.as_deref(), Some("timeout"));
    assert_eq!(row.exit_price, Some(Decimal::from(110)));
    assert!(row.closed_at.is_some());
    assert!(row.realized_pnl.is_some());
    assert!(row.realized_pnl_pct.is_some());
}

#[tokio::test]
async fn one_active_position_per_symbol_enforced() {
    let Some(pool) = common::setup_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set — skipping");
        return;
    };

    seed_position(&pool, "VVV").await;

    // Second active row for the same symbol violates the partial unique index.
    let second = independent_repo::insert_position(
        &pool,
        "VVV",
        Decimal::from(101),
        Decimal::ONE,
        Decimal::from(101),
        5,
        Decimal::ZERO,
        Decimal::ZERO,
        Utc::now() + Duration::hours(4),
        Decimal::from(95),
        &[],
    )
    .await;
    assert!(second.is_err());
}

#[tokio::test]
async fn allocation_sum_tracks_active_book() {
    let Some(pool) = common::setup_test_db().await else {
        eprintln!("TEST_DATABASE_URL not set — skipping");
        return;
    };

    assert_eq!(
        independent_repo::total_active_margin(&pool).await.expect("sum"),
        Decimal::ZERO
    );

    // notional 200 at 5x → margin 40
    let pos = seed_position(&pool, "SOL").await;
    let margin = independent_repo::total_active_margin(&pool).await.expect("sum");
    assert_eq!(margin, Decimal::from(40));

    independent_repo::close_position(
        &pool,
        pos.id,
        Decimal::from(90),
        ExitReason::Sl,
        Decimal::from(-20),
        Decimal::from(-10),
    )
    .await
    .expect("close");

    assert_eq!(
        independent_repo::total_active_margin(&pool).await.expect("sum"),
        Decimal::ZERO
    );
}
