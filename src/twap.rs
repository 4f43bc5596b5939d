//! TWAP / Iceberg execution (component #9, spec §4.8) — slices a total size
//! into `sliceSize` clips placed at a jittered interval, with an optional
//! duration watchdog and price-limit cutoff. Iceberg is the same state
//! machine with `slice_size` set to the visible clip size.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::execution::Execution;
use crate::types::{Discipline, Side, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwapState {
    Pending,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TwapParams {
    pub venue: Venue,
    pub market: String,
    pub instrument: String,
    pub side: Side,
    pub total_size: Decimal,
    pub slice_size: Decimal,
    pub interval_ms: u64,
    pub jitter: f64,
    pub max_duration: Option<Duration>,
    pub price_limit: Option<Decimal>,
    pub discipline: Discipline,
}

impl TwapParams {
    pub fn slices_total(&self) -> u64 {
        if self.slice_size <= Decimal::ZERO {
            return 0;
        }
        (self.total_size / self.slice_size).ceil().to_u64().unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone)]
struct Inner {
    filled_size: Decimal,
    total_cost: Decimal,
    slices_completed: u64,
    last_order_id: Option<String>,
}

pub struct Twap {
    execution: Arc<Execution>,
    params: TwapParams,
    state: RwLock<TwapState>,
    inner: RwLock<Inner>,
    run_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    watchdog_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Twap {
    pub fn new(execution: Arc<Execution>, params: TwapParams) -> Arc<Self> {
        Arc::new(Self {
            execution,
            params,
            state: RwLock::new(TwapState::Pending),
            inner: RwLock::new(Inner::default()),
            run_task: Mutex::new(None),
            watchdog_task: Mutex::new(None),
        })
    }

    pub async fn state(&self) -> TwapState {
        *self.state.read().await
    }

    pub async fn progress(&self) -> (Decimal, Decimal, u64) {
        let inner = self.inner.read().await;
        (inner.filled_size, inner.total_cost, inner.slices_completed)
    }

    pub async fn start(self: &Arc<Self>) -> TwapState {
        {
            let mut state = self.state.write().await;
            if *state != TwapState::Pending {
                return *state;
            }
            *state = TwapState::Executing;
        }

        if let Some(max_duration) = self.params.max_duration {
            let this = self.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(max_duration).await;
                if this.state().await == TwapState::Executing {
                    warn!(market = %this.params.market, "twap max duration exceeded, cancelling remainder");
                    this.cancel().await;
                }
            });
            *self.watchdog_task.lock().await = Some(handle);
        }

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run().await });
        *self.run_task.lock().await = Some(handle);

        TwapState::Executing
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.state().await != TwapState::Executing {
                return;
            }

            let next_size = {
                let inner = self.inner.read().await;
                (self.params.slice_size).min(self.params.total_size - inner.filled_size)
            };

            if next_size <= Decimal::ZERO {
                self.finish(TwapState::Completed).await;
                return;
            }

            let Some(slice_price) = self.current_slice_price().await else {
                warn!(market = %self.params.market, "twap could not price next slice, retrying next interval");
                let delay = jittered_interval(self.params.interval_ms, self.params.jitter);
                tokio::time::sleep(delay).await;
                continue;
            };

            let req = crate::types::OrderRequest {
                venue: self.params.venue,
                market: self.params.market.clone(),
                instrument: Some(self.params.instrument.clone()),
                side: self.params.side,
                price: slice_price,
                size: next_size,
                discipline: self.params.discipline,
                expiration: None,
                post_only: false,
                neg_risk: false,
                yield_bearing: false,
                per_order_max_slippage: None,
                signature_type: crate::types::SignatureType::Eoa,
            };

            let result = match self.params.side {
                Side::Buy => self.execution.buy_limit(req).await,
                Side::Sell => self.execution.sell_limit(req).await,
            };

            if !result.success {
                warn!(order_error = ?result.error, "twap slice failed, retaining state");
            } else {
                let filled = result.filled_size.unwrap_or(next_size);
                let price = result.avg_fill_price.unwrap_or(slice_price);

                let mut inner = self.inner.write().await;
                inner.filled_size += filled;
                inner.total_cost += filled * price;
                inner.slices_completed += 1;
                inner.last_order_id = result.order_id.clone();
                let filled_size = inner.filled_size;
                drop(inner);

                if let Some(limit) = self.params.price_limit {
                    let breached = match self.params.side {
                        Side::Buy => price > limit,
                        Side::Sell => price < limit,
                    };
                    if breached {
                        info!(market = %self.params.market, %price, %limit, "twap price limit breached, cancelling remainder");
                        self.finish(TwapState::Cancelled).await;
                        return;
                    }
                }

                if filled_size >= self.params.total_size {
                    self.finish(TwapState::Completed).await;
                    return;
                }
            }

            let delay = jittered_interval(self.params.interval_ms, self.params.jitter);
            tokio::time::sleep(delay).await;
        }
    }

    /// Marketable price for the next slice, walked fresh off the book each
    /// iteration. `price_limit` (when set) is a post-fill breach check, not
    /// the order's own limit — a genuine limit order at the cap could never
    /// fill through it the way Scenario D's slice fill does.
    async fn current_slice_price(&self) -> Option<Decimal> {
        let books = self
            .execution
            .get_orderbooks_batch(vec![(self.params.venue, self.params.market.clone())])
            .await;
        let book = books.into_iter().next().flatten()?;
        let raw = match self.params.side {
            Side::Buy => book.best_ask().or_else(|| book.best_bid()),
            Side::Sell => book.best_bid().or_else(|| book.best_ask()),
        }?;
        let price = Decimal::try_from(raw).ok()?;
        Some(price.clamp(dec!(0.01), dec!(0.99)))
    }

    async fn finish(&self, terminal: TwapState) {
        let mut state = self.state.write().await;
        if *state != TwapState::Executing {
            return;
        }
        *state = terminal;
        if let Some(handle) = self.watchdog_task.lock().await.take() {
            handle.abort();
        }
    }

    /// External cancel (spec §4.8): clears timers and best-effort cancels
    /// the most recently placed slice's order.
    pub async fn cancel(&self) -> bool {
        let last_order = {
            let mut state = self.state.write().await;
            if *state != TwapState::Executing {
                return false;
            }
            *state = TwapState::Cancelled;
            self.inner.read().await.last_order_id.clone()
        };

        if let Some(handle) = self.watchdog_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.run_task.lock().await.take() {
            handle.abort();
        }
        if let Some(id) = last_order {
            let _ = self.execution.cancel_order(self.params.venue, &id).await;
        }
        true
    }
}

fn jittered_interval(interval_ms: u64, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    let factor = if jitter == 0.0 {
        1.0
    } else {
        let mut rng = rand::thread_rng();
        1.0 + rng.gen_range(-jitter..=jitter)
    };
    let ms = (interval_ms as f64 * factor).round().max(100.0);
    Duration::from_millis(ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_total_rounds_up() {
        let params = TwapParams {
            venue: Venue::Primary,
            market: "m".into(),
            instrument: "t".into(),
            side: Side::Buy,
            total_size: Decimal::from(100),
            slice_size: Decimal::from(30),
            interval_ms: 1000,
            jitter: 0.1,
            max_duration: None,
            price_limit: None,
            discipline: Discipline::Gtc,
        };
        assert_eq!(params.slices_total(), 4);
    }

    #[test]
    fn jittered_interval_has_a_floor() {
        let d = jittered_interval(100, 1.0);
        assert!(d.as_millis() >= 100);
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let d = jittered_interval(500, 0.0);
        assert_eq!(d.as_millis(), 500);
    }
}
