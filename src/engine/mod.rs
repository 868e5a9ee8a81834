pub mod executor;
pub mod orchestrator;
pub mod planner;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::models::ScanPrediction;
use crate::recorder::Scorer;
use crate::venue::types::TickerMeta;
use crate::venue::{InfoClient, Meta};

use self::executor::OrderExecutor;

/// A scan older than this is considered hung and its slot is reclaimed.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(4 * 60);

/// Suppression window for open/flip after a failed order on the same symbol.
pub const ORDER_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Outcome of an attempt to take the single-flight scan slot.
#[derive(Debug, PartialEq, Eq)]
pub enum ScanSlot {
    Acquired,
    /// A scan is already running and is younger than the timeout.
    Busy { elapsed: Duration },
    /// The previous scan exceeded the timeout; its slot was reclaimed.
    RecoveredHung,
}

/// Process-wide engine state shared by the orchestrator, planner, executor,
/// recorder and independent trader.
///
/// All venue- and store-facing collaborators hang off this struct so that no
/// module needs a global; the orchestrator owns the lifecycle.
pub struct Engine {
    pub db: PgPool,
    pub config: AppConfig,
    pub info: InfoClient,
    pub executor: OrderExecutor,
    pub scorer: Box<dyn Scorer>,

    /// symbol → instrument metadata. Lazily populated on the first
    /// successful scan, never invalidated. A miss means "skip this symbol".
    metadata: RwLock<HashMap<String, TickerMeta>>,

    /// symbol → time of last failed open/flip.
    failed_orders: Mutex<HashMap<String, Instant>>,

    /// Current scan's predictions. Cleared at the start of every recorder
    /// pass; read by the independent trader and the copy-action updates.
    scan_predictions: Mutex<HashMap<String, ScanPrediction>>,

    scan_running: AtomicBool,
    scan_started_at: Mutex<Option<Instant>>,
    last_validated_at: Mutex<Option<Instant>>,
}

impl Engine {
    pub fn new(
        db: PgPool,
        config: AppConfig,
        info: InfoClient,
        executor: OrderExecutor,
        scorer: Box<dyn Scorer>,
    ) -> Self {
        Self {
            db,
            config,
            info,
            executor,
            scorer,
            metadata: RwLock::new(HashMap::new()),
            failed_orders: Mutex::new(HashMap::new()),
            scan_predictions: Mutex::new(HashMap::new()),
            scan_running: AtomicBool::new(false),
            scan_started_at: Mutex::new(None),
            last_validated_at: Mutex::new(None),
        }
    }

    // -- single-flight ------------------------------------------------------

    /// Try to take the scan slot. At most one scan body runs at a time; a
    /// previous scan that exceeded `timeout` is considered hung and its slot
    /// is reclaimed.
    pub fn try_begin_scan(&self, timeout: Duration) -> ScanSlot {
        if self
            .scan_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.scan_started_at.lock().unwrap() = Some(Instant::now());
            return ScanSlot::Acquired;
        }

        let mut started = self.scan_started_at.lock().unwrap();
        let elapsed = started.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed < timeout {
            return ScanSlot::Busy { elapsed };
        }

        // Previous scan considered hung; take over its slot.
        *started = Some(Instant::now());
        ScanSlot::RecoveredHung
    }

    /// Unconditionally release the scan slot. Called on every scan exit path.
    pub fn end_scan(&self) {
        self.scan_running.store(false, Ordering::Release);
    }

    /// True when the hourly validation pass is due; updates the marker.
    pub fn should_validate(&self, interval: Duration) -> bool {
        let mut last = self.last_validated_at.lock().unwrap();
        match *last {
            Some(t) if t.elapsed() < interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    // -- metadata cache -----------------------------------------------------

    pub fn metadata_is_empty(&self) -> bool {
        self.metadata.read().unwrap().is_empty()
    }

    /// Populate the cache from the venue's instrument universe. The asset
    /// index is the instrument's position in the universe listing.
    pub fn store_metadata(&self, meta: &Meta) -> usize {
        let mut cache = self.metadata.write().unwrap();
        for (idx, asset) in meta.universe.iter().enumerate() {
            if asset.is_delisted == Some(true) {
                continue;
            }
            cache.insert(
                asset.name.clone(),
                TickerMeta {
                    asset_index: idx as u32,
                    sz_decimals: asset.sz_decimals,
                    max_leverage: asset.max_leverage,
                },
            );
        }
        cache.len()
    }

    pub fn ticker_meta(&self, symbol: &str) -> Option<TickerMeta> {
        self.metadata.read().unwrap().get(symbol).copied()
    }

    // -- failed-order cool-downs -------------------------------------------

    pub fn record_failed_order(&self, symbol: &str) {
        self.failed_orders
            .lock()
            .unwrap()
            .insert(symbol.to_string(), Instant::now());
    }

    pub fn clear_failed_order(&self, symbol: &str) {
        self.failed_orders.lock().unwrap().remove(symbol);
    }

    /// Remaining suppression for a symbol, or `None` when it may trade.
    pub fn cooldown_remaining(&self, symbol: &str, cooldown: Duration) -> Option<Duration> {
        let map = self.failed_orders.lock().unwrap();
        let failed_at = map.get(symbol)?;
        cooldown.checked_sub(failed_at.elapsed()).filter(|d| !d.is_zero())
    }

    /// Drop expired entries at the top of every scan. Returns how many.
    pub fn expire_failed_orders(&self, cooldown: Duration) -> usize {
        let mut map = self.failed_orders.lock().unwrap();
        let before = map.len();
        map.retain(|_, failed_at| failed_at.elapsed() < cooldown);
        before - map.len()
    }

    // -- current-scan predictions ------------------------------------------

    pub fn clear_scan_predictions(&self) {
        self.scan_predictions.lock().unwrap().clear();
    }

    pub fn insert_scan_prediction(&self, prediction: ScanPrediction) {
        self.scan_predictions
            .lock()
            .unwrap()
            .insert(prediction.symbol.clone(), prediction);
    }

    pub fn scan_prediction(&self, symbol: &str) -> Option<ScanPrediction> {
        self.scan_predictions.lock().unwrap().get(symbol).cloned()
    }

    pub fn scan_predictions_snapshot(&self) -> Vec<ScanPrediction> {
        self.scan_predictions.lock().unwrap().values().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
