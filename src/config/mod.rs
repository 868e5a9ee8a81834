use rust_decimal::Decimal;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;

const DEFAULT_VENUE_API_URL: &str = "https://api.hyperliquid.xyz";

/// Copy sizing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Sizes scaled by the equity ratio times a multiplier.
    Scaled,
    /// Sizes mirrored 1:1.
    Exact,
}

impl CopyMode {
    fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "exact" => CopyMode::Exact,
            _ => CopyMode::Scaled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Venue
    pub venue_api_url: String,
    pub venue_api_key: Option<String>,
    pub target_account: String,
    pub operator_account: String,
    pub dry_run: bool,

    // Copy planner
    pub enable_copy_trading: bool,
    pub copy_mode: CopyMode,
    pub poll_interval_minutes: u64,
    pub scale_multiplier: Decimal,
    pub adjust_threshold: Decimal,
    pub min_position_margin_usd: Decimal,

    // Prediction recorder
    pub validation_window_hours: i64,

    // Independent trader
    pub enable_independent_trading: bool,
    pub independent_max_allocation_pct: Decimal,
    pub independent_max_positions: usize,
    pub independent_leverage: u32,
    pub independent_use_time_exit: bool,
    pub independent_hold_hours: i64,
    pub independent_tp_pct: Decimal,
    pub independent_sl_pct: Decimal,
    pub independent_min_score: Decimal,
    pub independent_whitelist: HashSet<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT").unwrap_or_else(|_| "8080".into()).parse()?,

            venue_api_url: env::var("VENUE_API_URL")
                .unwrap_or_else(|_| DEFAULT_VENUE_API_URL.into()),
            venue_api_key: env::var("VENUE_API_KEY").ok(),
            target_account: env::var("TARGET_ACCOUNT")
                .map_err(|_| anyhow::anyhow!("TARGET_ACCOUNT must be set"))?,
            operator_account: env::var("OPERATOR_ACCOUNT")
                .map_err(|_| anyhow::anyhow!("OPERATOR_ACCOUNT must be set"))?,
            dry_run: env_bool("DRY_RUN", true),

            enable_copy_trading: env_bool("ENABLE_COPY_TRADING", true),
            copy_mode: CopyMode::parse(
                &env::var("COPY_MODE").unwrap_or_else(|_| "scaled".into()),
            ),
            poll_interval_minutes: env_parse("COPY_POLL_INTERVAL_MINUTES", 5u64),
            scale_multiplier: env_decimal("COPY_SCALE_MULTIPLIER", Decimal::new(13, 1)),
            adjust_threshold: env_decimal("POSITION_ADJUST_THRESHOLD", Decimal::new(10, 2)),
            min_position_margin_usd: env_decimal("MIN_POSITION_SIZE_USD", Decimal::from(5)),

            validation_window_hours: env_parse("PREDICTION_VALIDATION_HOURS", 4i64),

            enable_independent_trading: env_bool("ENABLE_INDEPENDENT_TRADING", false),
            independent_max_allocation_pct: env_decimal(
                "INDEPENDENT_MAX_ALLOCATION_PCT",
                Decimal::new(10, 2),
            ),
            independent_max_positions: env_parse("INDEPENDENT_MAX_POSITIONS", 3usize),
            independent_leverage: env_parse("INDEPENDENT_LEVERAGE", 5u32),
            independent_use_time_exit: env_bool("INDEPENDENT_USE_TIME_EXIT", true),
            independent_hold_hours: env_parse("INDEPENDENT_HOLD_HOURS", 4i64),
            independent_tp_pct: env_decimal("INDEPENDENT_TP_PCT", Decimal::new(20, 2)),
            independent_sl_pct: env_decimal("INDEPENDENT_SL_PCT", Decimal::new(12, 2)),
            independent_min_score: env_decimal("INDEPENDENT_MIN_SCORE", Decimal::from(90)),
            independent_whitelist: parse_csv_set(
                &env::var("INDEPENDENT_WHITELIST").unwrap_or_default(),
            ),
        })
    }

    /// Live trading requires exchange credentials; without them the
    /// executor is forced into dry-run.
    pub fn has_venue_auth(&self) -> bool {
        self.venue_api_key.is_some()
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .unwrap_or(default)
}

fn parse_csv_set(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
