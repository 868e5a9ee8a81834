use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use rust_decimal::Decimal;
use tokio::time::{sleep, timeout, Duration};

use crate::config::CopyMode;
use crate::db;
use crate::independent;
use crate::models::AccountPosition;
use crate::recorder;

use super::planner::{self, ScanContext};
use super::{Engine, ScanSlot, ORDER_COOLDOWN, SCAN_TIMEOUT};

/// Max concurrent per-symbol sync operations, so the venue is not saturated.
const SYNC_BATCH: usize = 5;

/// A symbol exceeding this is abandoned without poisoning its siblings.
const PER_SYMBOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Elapsed-time trigger for the prediction validation pass.
const VALIDATION_INTERVAL: Duration = Duration::from_secs(3600);

/// Fire scans on the configured cadence, aligned to the wall-clock minute
/// boundary, with one additional scan at process start.
pub async fn run_scheduler(engine: Arc<Engine>) {
    tracing::info!(
        interval_minutes = engine.config.poll_interval_minutes,
        "Scan scheduler started"
    );

    try_spawn_scan(&engine);

    loop {
        let delay = next_tick_delay(
            chrono::Utc::now().timestamp(),
            engine.config.poll_interval_minutes,
        );
        sleep(delay).await;
        try_spawn_scan(&engine);
    }
}

/// Seconds until the next tick aligned to the interval boundary.
fn next_tick_delay(now_epoch_secs: i64, interval_minutes: u64) -> Duration {
    let interval = (interval_minutes.max(1) * 60) as i64;
    let remainder = now_epoch_secs.rem_euclid(interval);
    Duration::from_secs((interval - remainder) as u64)
}

fn try_spawn_scan(engine: &Arc<Engine>) {
    match engine.try_begin_scan(SCAN_TIMEOUT) {
        ScanSlot::Busy { elapsed } => {
            counter!("scans_skipped").increment(1);
            tracing::warn!(
                running_secs = elapsed.as_secs(),
                "Previous scan still running — tick skipped"
            );
        }
        slot => {
            if slot == ScanSlot::RecoveredHung {
                tracing::warn!("Previous scan exceeded timeout — slot reclaimed");
            }
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                let started = Instant::now();
                if let Err(e) = run_scan(&engine).await {
                    counter!("scans_aborted").increment(1);
                    tracing::error!(error = %e, "Scan aborted");
                }
                engine.end_scan();
                let elapsed = started.elapsed();
                histogram!("scan_duration_seconds").record(elapsed.as_secs_f64());
                // One completion log per scan, unconditionally.
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Scan complete");
            });
        }
    }
}

/// One full scan body. The caller owns the single-flight slot.
pub async fn run_scan(engine: &Engine) -> anyhow::Result<()> {
    counter!("scans_total").increment(1);

    let expired = engine.expire_failed_orders(ORDER_COOLDOWN);
    if expired > 0 {
        tracing::debug!(expired, "Expired failed-order cool-downs");
    }

    // Store health gate: on repeated failure this scan aborts, the scheduler
    // retries from scratch on the next cadence.
    db::health_probe(&engine.db).await?;

    if engine.metadata_is_empty() {
        let meta = engine.info.meta().await?;
        let count = engine.store_metadata(&meta);
        tracing::info!(instruments = count, "Instrument metadata cache populated");
    }

    // All account/market state in parallel, each call with its own timeout.
    let (target_state, operator_state, mids) = tokio::join!(
        engine.info.clearinghouse_state(&engine.config.target_account),
        engine.info.clearinghouse_state(&engine.config.operator_account),
        engine.info.all_mids(),
    );
    let (target_portfolio, target_positions) = target_state?;
    let (operator_portfolio, operator_positions) = operator_state?;
    let mids = mids?;

    let scale_factor = compute_scale_factor(
        engine.config.copy_mode,
        operator_portfolio.equity,
        target_portfolio.equity,
        engine.config.scale_multiplier,
    )?;

    let target_map = position_map(target_positions);
    let mut operator_map = position_map(operator_positions);

    let whitelist: Option<&HashSet<String>> = engine
        .config
        .enable_independent_trading
        .then_some(&engine.config.independent_whitelist);
    let universe = build_universe(&target_map, &operator_map, whitelist);

    gauge!("scan_symbols").set(universe.len() as f64);
    tracing::info!(
        symbols = universe.len(),
        scale_factor = %scale_factor,
        target_equity = %target_portfolio.equity,
        operator_equity = %operator_portfolio.equity,
        "Scan state fetched"
    );

    // Predictions are recorded strictly before any execution.
    recorder::log_predictions(engine, &universe, &mids).await;

    if engine.config.enable_independent_trading {
        if let Err(e) = independent::process_signals(
            engine,
            &mids,
            &target_map,
            &operator_map,
            operator_portfolio,
        )
        .await
        {
            tracing::error!(error = %e, "Independent entry pass failed");
        }
        match independent::manage_positions(engine, &mids, &target_map).await {
            Ok(closed) => {
                // The planner must classify against the post-close book.
                for symbol in &closed {
                    operator_map.remove(symbol);
                }
            }
            Err(e) => tracing::error!(error = %e, "Independent management pass failed"),
        }
    }

    let traded = Mutex::new(HashSet::new());

    if engine.config.enable_copy_trading {
        let ctx = ScanContext {
            scale_factor,
            target_positions: &target_map,
            operator_positions: &operator_map,
            mids: &mids,
        };

        stream::iter(universe.iter().map(String::as_str))
            .for_each_concurrent(SYNC_BATCH, |symbol| {
                let ctx = &ctx;
                let traded = &traded;
                async move {
                    match timeout(
                        PER_SYMBOL_TIMEOUT,
                        planner::sync_position(engine, ctx, symbol, traded),
                    )
                    .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!(symbol, error = %e, "Symbol sync failed")
                        }
                        Err(_) => {
                            tracing::error!(
                                symbol,
                                timeout_secs = PER_SYMBOL_TIMEOUT.as_secs(),
                                "Symbol sync timed out — abandoned"
                            )
                        }
                    }
                }
            })
            .await;
    } else {
        tracing::debug!("Copy trading disabled — planner pass skipped");
    }

    let traded = traded.into_inner().unwrap();
    recorder::finalize_scan_predictions(engine, &traded).await;

    if engine.should_validate(VALIDATION_INTERVAL) {
        if let Err(e) = recorder::validate_past_predictions(engine).await {
            tracing::error!(error = %e, "Prediction validation pass failed");
        }
    }

    Ok(())
}

/// Equity-ratio scale factor, or 1.0 in exact mode.
pub fn compute_scale_factor(
    mode: CopyMode,
    operator_equity: Decimal,
    target_equity: Decimal,
    multiplier: Decimal,
) -> anyhow::Result<Decimal> {
    match mode {
        CopyMode::Exact => Ok(Decimal::ONE),
        CopyMode::Scaled => {
            if target_equity <= Decimal::ZERO {
                anyhow::bail!("target equity is non-positive; cannot scale");
            }
            Ok(operator_equity / target_equity * multiplier)
        }
    }
}

fn position_map(positions: Vec<AccountPosition>) -> HashMap<String, AccountPosition> {
    positions
        .into_iter()
        .filter(|p| !p.signed_size.is_zero())
        .map(|p| (p.symbol.clone(), p))
        .collect()
}

/// Union of target-held, operator-held and (when the feature is on) the
/// independent whitelist. Sorted for deterministic iteration.
pub fn build_universe(
    target: &HashMap<String, AccountPosition>,
    operator: &HashMap<String, AccountPosition>,
    whitelist: Option<&HashSet<String>>,
) -> Vec<String> {
    let mut set: HashSet<String> = target.keys().cloned().collect();
    set.extend(operator.keys().cloned());
    if let Some(wl) = whitelist {
        set.extend(wl.iter().cloned());
    }
    let mut universe: Vec<String> = set.into_iter().collect();
    universe.sort();
    universe
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
