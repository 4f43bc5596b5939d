//! Process-wide engine configuration.
//!
//! Loaded once at startup via [`EngineConfig::from_env`], following the same
//! shape the rest of this codebase's configs use: defaults baked in,
//! `std::env::var` overrides parsed best-effort, never a hard failure on a
//! missing variable.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct SlippageConfig {
    pub max_slippage: f64,
    pub check_orderbook: bool,
    pub auto_cancel: bool,
    pub use_limit_orders: bool,
    pub limit_price_buffer: f64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub abort_on_excessive_slippage: bool,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            max_slippage: 0.02,
            check_orderbook: true,
            auto_cancel: true,
            use_limit_orders: false,
            limit_price_buffer: 0.005,
            max_retries: 3,
            retry_delay_ms: 500,
            abort_on_excessive_slippage: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum notional (price * size) accepted for a single order.
    pub max_order_size: Decimal,
    /// When true, orders are validated and logged but never sent over the
    /// wire; adapters return a synthetic `OrderResult`.
    pub dry_run: bool,
    pub slippage: SlippageConfig,
    pub heartbeat_interval_ms: u64,
    pub fill_gc_max_age_ms: u64,
    pub bracket_poll_interval_ms: u64,
    pub trigger_sweep_interval_ms: u64,
    pub redeemer_sweep_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_order_size: dec!(10000),
            dry_run: false,
            slippage: SlippageConfig::default(),
            heartbeat_interval_ms: 8_000,
            fill_gc_max_age_ms: 3_600_000,
            bracket_poll_interval_ms: 2_000,
            trigger_sweep_interval_ms: 5_000,
            redeemer_sweep_interval_ms: 60_000,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("EXEC_MAX_ORDER_SIZE") {
            if let Ok(d) = v.parse::<Decimal>() {
                cfg.max_order_size = d;
            }
        }
        if let Ok(v) = std::env::var("EXEC_DRY_RUN") {
            cfg.dry_run = v != "0" && v.to_lowercase() != "false";
        }
        if let Ok(v) = std::env::var("EXEC_MAX_SLIPPAGE") {
            if let Ok(f) = v.parse::<f64>() {
                cfg.slippage.max_slippage = f;
            }
        }
        if let Ok(v) = std::env::var("EXEC_USE_LIMIT_ORDERS") {
            cfg.slippage.use_limit_orders = v != "0" && v.to_lowercase() != "false";
        }
        if let Ok(v) = std::env::var("EXEC_HEARTBEAT_INTERVAL_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.heartbeat_interval_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("EXEC_FILL_GC_MAX_AGE_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.fill_gc_max_age_ms = ms;
            }
        }

        cfg
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub max_loss_usd: Decimal,
    pub max_loss_pct: f64,
    pub max_consecutive_losses: u32,
    pub max_error_rate: f64,
    pub min_trades_for_error_rate: u32,
    pub max_position_size: Decimal,
    pub max_daily_trades: u32,
    pub reset_timeout_ms: u64,
    pub initial_balance: Decimal,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_loss_usd: dec!(500),
            max_loss_pct: 10.0,
            max_consecutive_losses: 5,
            max_error_rate: 0.3,
            min_trades_for_error_rate: 10,
            max_position_size: dec!(5000),
            max_daily_trades: 500,
            reset_timeout_ms: 15 * 60 * 1000,
            initial_balance: dec!(10000),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("CB_MAX_LOSS_USD") {
            if let Ok(d) = v.parse::<Decimal>() {
                cfg.max_loss_usd = d;
            }
        }
        if let Ok(v) = std::env::var("CB_MAX_LOSS_PCT") {
            if let Ok(f) = v.parse::<f64>() {
                cfg.max_loss_pct = f;
            }
        }
        if let Ok(v) = std::env::var("CB_MAX_CONSECUTIVE_LOSSES") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.max_consecutive_losses = n;
            }
        }
        if let Ok(v) = std::env::var("CB_MAX_DAILY_TRADES") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.max_daily_trades = n;
            }
        }
        cfg
    }
}
