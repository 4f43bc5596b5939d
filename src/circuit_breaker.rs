//! Circuit breaker state machine (component #5, spec §4.4).
//!
//! Grounded loosely in `other_examples/f4ef5306_matlinat-poly_hft_bot`'s
//! `CircuitBreaker` (threshold/cooldown fields, `on_success`/`on_failure`),
//! generalized to the richer P&L/position/error-rate state machine spec §4.4
//! actually specifies. Interior mutability (`Mutex<Inner>`) because the
//! breaker is shared by reference across the Execution Service and every
//! venue adapter that wires it in via `set_circuit_breaker`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripReason {
    MaxLoss,
    MaxLossPct,
    ConsecutiveLosses,
    HighErrorRate,
    MaxPosition,
    MaxDailyTrades,
    Manual,
    SystemError,
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TripReason::MaxLoss => "max_loss",
            TripReason::MaxLossPct => "max_loss_pct",
            TripReason::ConsecutiveLosses => "consecutive_losses",
            TripReason::HighErrorRate => "high_error_rate",
            TripReason::MaxPosition => "max_position",
            TripReason::MaxDailyTrades => "max_daily_trades",
            TripReason::Manual => "manual",
            TripReason::SystemError => "system_error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub is_tripped: bool,
    pub trip_reason: Option<TripReason>,
    pub tripped_at: Option<Instant>,
    pub session_pnl: Decimal,
    pub consecutive_losses: u32,
    pub open_position_size: Decimal,
    pub daily_trades: u32,
    pub error_count: u32,
    pub total_trades: u32,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            is_tripped: false,
            trip_reason: None,
            tripped_at: None,
            session_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            open_position_size: Decimal::ZERO,
            daily_trades: 0,
            error_count: 0,
            total_trades: 0,
        }
    }
}

struct Inner {
    cfg: CircuitBreakerConfig,
    state: CircuitBreakerState,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
}

pub struct TradeOutcome {
    pub pnl_usd: Decimal,
    pub success: bool,
    pub size_usd: Decimal,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                cfg,
                state: CircuitBreakerState::default(),
            })),
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state.clone()
    }

    pub fn tripped_reason(&self) -> Option<TripReason> {
        self.inner.lock().expect("circuit breaker mutex poisoned").state.trip_reason
    }

    /// `canTrade ⇔ ¬isTripped ∧ openPositionSize < cap ∧ dailyTrades < cap`.
    pub fn can_trade(&self) -> bool {
        let inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        !inner.state.is_tripped
            && inner.state.open_position_size < inner.cfg.max_position_size
            && inner.state.daily_trades < inner.cfg.max_daily_trades
    }

    pub fn record_trade(&self, outcome: TradeOutcome) {
        let trip = {
            let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
            inner.state.session_pnl += outcome.pnl_usd;
            inner.state.daily_trades += 1;
            inner.state.total_trades += 1;

            if outcome.success && outcome.pnl_usd >= Decimal::ZERO {
                inner.state.consecutive_losses = 0;
            } else {
                inner.state.consecutive_losses += 1;
                if !outcome.success {
                    inner.state.error_count += 1;
                }
            }

            evaluate_trips(&inner.cfg, &inner.state)
        };

        if let Some(reason) = trip {
            self.trip(reason);
        }
    }

    pub fn update_position_size(&self, size: Decimal) {
        let trip = {
            let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
            inner.state.open_position_size = size;
            if size >= inner.cfg.max_position_size {
                Some(TripReason::MaxPosition)
            } else {
                None
            }
        };
        if let Some(reason) = trip {
            self.trip(reason);
        }
    }

    /// Idempotent first-wins trip. Schedules an auto-reset after
    /// `reset_timeout_ms` on a plain OS thread — `record_trade`/
    /// `update_position_size` (and therefore `trip`) are sync fns callable
    /// from sync strategy code with no async runtime in scope, so this
    /// cannot rely on `tokio::spawn`.
    pub fn trip(&self, reason: TripReason) {
        let reset_timeout_ms = {
            let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
            if inner.state.is_tripped {
                return;
            }
            inner.state.is_tripped = true;
            inner.state.trip_reason = Some(reason);
            inner.state.tripped_at = Some(Instant::now());
            warn!(%reason, "circuit breaker tripped");
            inner.cfg.reset_timeout_ms
        };

        let this = self.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(reset_timeout_ms));
            this.auto_reset();
        });
    }

    fn auto_reset(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state.is_tripped {
            info!("circuit breaker auto-reset after timeout");
            inner.state.is_tripped = false;
            inner.state.trip_reason = None;
            inner.state.tripped_at = None;
            inner.state.consecutive_losses = 0;
            inner.state.error_count = 0;
        }
    }

    /// Manual reset: clears tripped state and consecutive-loss/error
    /// counters, but not `session_pnl`/`daily_trades` (those reset at local
    /// midnight via [`CircuitBreaker::daily_reset`]).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state.is_tripped = false;
        inner.state.trip_reason = None;
        inner.state.tripped_at = None;
        inner.state.consecutive_losses = 0;
        inner.state.error_count = 0;
    }

    pub fn daily_reset(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state.session_pnl = Decimal::ZERO;
        inner.state.daily_trades = 0;
    }
}

fn evaluate_trips(cfg: &CircuitBreakerConfig, state: &CircuitBreakerState) -> Option<TripReason> {
    if state.session_pnl <= -cfg.max_loss_usd {
        return Some(TripReason::MaxLoss);
    }
    if cfg.initial_balance > Decimal::ZERO {
        let pnl_pct = (state.session_pnl / cfg.initial_balance)
            .abs()
            .to_string()
            .parse::<f64>()
            .unwrap_or(0.0)
            * 100.0;
        if state.session_pnl < Decimal::ZERO && pnl_pct >= cfg.max_loss_pct {
            return Some(TripReason::MaxLossPct);
        }
    }
    if state.consecutive_losses >= cfg.max_consecutive_losses {
        return Some(TripReason::ConsecutiveLosses);
    }
    if state.total_trades >= cfg.min_trades_for_error_rate {
        let error_rate = state.error_count as f64 / state.total_trades as f64;
        if error_rate >= cfg.max_error_rate {
            return Some(TripReason::HighErrorRate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_loss_usd: dec!(100),
            max_loss_pct: 50.0,
            max_consecutive_losses: 3,
            max_error_rate: 0.9,
            min_trades_for_error_rate: 100,
            max_position_size: dec!(1000),
            max_daily_trades: 1000,
            reset_timeout_ms: 50,
            initial_balance: dec!(10000),
        }
    }

    #[test]
    fn trips_on_consecutive_losses() {
        let cb = CircuitBreaker::new(cfg());
        for _ in 0..3 {
            cb.record_trade(TradeOutcome {
                pnl_usd: dec!(-1),
                success: true,
                size_usd: dec!(10),
            });
        }
        assert!(!cb.can_trade());
        assert_eq!(cb.tripped_reason(), Some(TripReason::ConsecutiveLosses));
    }

    #[test]
    fn trips_on_max_loss_boundary() {
        let cb = CircuitBreaker::new(cfg());
        cb.record_trade(TradeOutcome {
            pnl_usd: dec!(-100),
            success: false,
            size_usd: dec!(50),
        });
        assert_eq!(cb.tripped_reason(), Some(TripReason::MaxLoss));
    }

    #[test]
    fn trip_is_idempotent_first_wins() {
        let cb = CircuitBreaker::new(cfg());
        cb.trip(TripReason::Manual);
        cb.trip(TripReason::SystemError);
        assert_eq!(cb.tripped_reason(), Some(TripReason::Manual));
    }

    #[tokio::test]
    async fn auto_resets_after_timeout() {
        let cb = CircuitBreaker::new(cfg());
        cb.trip(TripReason::Manual);
        assert!(!cb.can_trade());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cb.can_trade());
    }

    #[test]
    fn reset_preserves_pnl_and_daily_trades() {
        let cb = CircuitBreaker::new(cfg());
        cb.record_trade(TradeOutcome {
            pnl_usd: dec!(-5),
            success: true,
            size_usd: dec!(10),
        });
        cb.trip(TripReason::Manual);
        cb.reset();
        let snap = cb.snapshot();
        assert!(!snap.is_tripped);
        assert_eq!(snap.session_pnl, dec!(-5));
        assert_eq!(snap.daily_trades, 1);
    }

    #[test]
    fn update_position_size_trips_at_cap() {
        let cb = CircuitBreaker::new(cfg());
        cb.update_position_size(dec!(1000));
        assert_eq!(cb.tripped_reason(), Some(TripReason::MaxPosition));
    }
}
