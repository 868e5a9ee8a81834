pub mod handlers;
pub mod router;

pub use router::create_router;

use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;

/// State for the lifecycle/health surface. The engine itself is not exposed.
#[derive(Clone)]
pub struct ApiState {
    pub db: PgPool,
    pub metrics_handle: PrometheusHandle,
}
