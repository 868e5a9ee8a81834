use std::sync::Arc;

use perpcopy::api::{create_router, ApiState};
use perpcopy::config::AppConfig;
use perpcopy::db;
use perpcopy::engine::executor::OrderExecutor;
use perpcopy::engine::{orchestrator, Engine};
use perpcopy::metrics;
use perpcopy::recorder::MomentumScorer;
use perpcopy::venue::{ExchangeClient, InfoClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls CryptoProvider");

    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    // --- Prometheus metrics ---
    let metrics_handle = metrics::init_metrics();
    tracing::info!("Prometheus metrics initialized");

    tracing::info!("Connecting to store...");
    let pool = db::init_pool(&config.database_url).await?;
    tracing::info!("Store connected");

    // Run pending migrations
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Store migrations applied");

    // --- Venue clients ---
    let http = reqwest::Client::new();
    let info = InfoClient::new(http.clone(), config.venue_api_url.clone());

    let exchange = match &config.venue_api_key {
        Some(key) => Some(ExchangeClient::new(
            http,
            config.venue_api_url.clone(),
            key.clone(),
            config.operator_account.clone(),
        )),
        None => {
            tracing::warn!("No venue API key — running in monitor-only (dry-run) mode");
            None
        }
    };

    let dry_run = config.dry_run || exchange.is_none();
    if dry_run {
        tracing::info!("Executor running in DRY-RUN mode");
    } else {
        tracing::info!("Executor running in LIVE mode");
    }

    let executor = OrderExecutor::new(
        info.clone(),
        exchange,
        config.operator_account.clone(),
        dry_run,
    );

    // Fail loudly at startup on a mis-configured account id.
    log_startup_accounts(&info, &config).await;

    // Recover any active independent book left from a previous run.
    match perpcopy::db::independent_repo::get_active_positions(&pool).await {
        Ok(active) if !active.is_empty() => {
            tracing::info!(
                positions = active.len(),
                "Recovered active independent positions from store"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not read independent positions at startup"),
    }

    let engine = Arc::new(Engine::new(
        pool.clone(),
        config.clone(),
        info,
        executor,
        Box::new(MomentumScorer),
    ));

    // --- Scan scheduler ---
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            orchestrator::run_scheduler(engine).await;
        });
    }
    tracing::info!(
        interval_minutes = engine.config.poll_interval_minutes,
        copy_trading = engine.config.enable_copy_trading,
        independent_trading = engine.config.enable_independent_trading,
        "Copy engine spawned"
    );

    // --- Health/metrics surface ---
    let state = ApiState {
        db: pool.clone(),
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully...");
    // Give in-flight scan work a short drain window, then release the pool.
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    pool.close().await;

    Ok(())
}

async fn log_startup_accounts(info: &InfoClient, config: &AppConfig) {
    for (label, account) in [
        ("target", &config.target_account),
        ("operator", &config.operator_account),
    ] {
        match info.clearinghouse_state(account).await {
            Ok((portfolio, positions)) => tracing::info!(
                account = label,
                equity = %portfolio.equity,
                withdrawable = %portfolio.withdrawable,
                open_positions = positions.len(),
                "Account state at startup"
            ),
            Err(e) => tracing::error!(
                account = label,
                error = %e,
                "Failed to fetch account state at startup"
            ),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown..."),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
