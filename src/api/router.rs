use axum::routing::get;
use axum::Router;

use super::handlers;
use super::ApiState;

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_scrape))
        .with_state(state)
}
