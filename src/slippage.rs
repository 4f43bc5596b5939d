//! Slippage guard (component #4, spec §4.3).
//!
//! Orderbook walk → VWAP fill price → slippage ratio, with a heuristic
//! fallback when the book is empty or too thin, and a bounded-retry wrapper
//! for protected execution.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use tokio::time::sleep;
use tracing::warn;

use crate::config::SlippageConfig;
use crate::errors::ExecError;
use crate::feed::FeedProvider;
use crate::types::{Orderbook, OrderRequest, OrderResult, PriceLevel, Side};

#[derive(Debug, Clone, Copy)]
pub struct SlippageEstimate {
    pub slippage: f64,
    pub expected_price: f64,
}

pub struct SlippageGuard {
    feed: Arc<dyn FeedProvider>,
    cfg: SlippageConfig,
}

impl SlippageGuard {
    pub fn new(feed: Arc<dyn FeedProvider>, cfg: SlippageConfig) -> Self {
        Self { feed, cfg }
    }

    pub async fn estimate_slippage(&self, req: &OrderRequest) -> SlippageEstimate {
        let book = self.feed.get_orderbook(req.venue, &req.market).await;
        let size = req.size.to_f64().unwrap_or(0.0);

        match book {
            Some(book) => estimate_from_book(&book, req.side, size),
            None => heuristic_estimate(size),
        }
    }

    /// `protectedBuy`/`protectedSell`: estimate first, reject before
    /// submission if slippage exceeds the cap, otherwise optionally convert
    /// to a limit order at a buffered price.
    pub async fn protect(
        &self,
        req: &OrderRequest,
        max_slippage_override: Option<f64>,
    ) -> Result<OrderRequest, ExecError> {
        let max = max_slippage_override.unwrap_or(self.cfg.max_slippage);
        let estimate = self.estimate_slippage(req).await;

        if estimate.slippage > max {
            return Err(ExecError::SlippageExceeded(format!(
                "estimated slippage {:.4} exceeds cap {:.4}",
                estimate.slippage, max
            )));
        }

        let mut protected = req.clone();
        if self.cfg.use_limit_orders {
            let buffer = self.cfg.limit_price_buffer;
            let buffered = match req.side {
                Side::Buy => estimate.expected_price * (1.0 + buffer),
                Side::Sell => estimate.expected_price * (1.0 - buffer),
            };
            let clamped = buffered.clamp(0.01, 0.99);
            protected.price = rust_decimal::Decimal::try_from(clamped)
                .unwrap_or(req.price)
                .round_dp(2);
            protected.discipline = crate::types::Discipline::Gtc;
        }
        Ok(protected)
    }

    /// Bounded-retry wrapper: re-checks the book each iteration, places via
    /// `place_fn`, and aborts early if slippage is excessive and
    /// `abort_on_excessive_slippage` is set.
    pub async fn execute_with_protection<F, Fut>(
        &self,
        req: &OrderRequest,
        place_fn: F,
    ) -> ProtectedExecutionResult
    where
        F: Fn(OrderRequest) -> Fut,
        Fut: std::future::Future<Output = OrderResult>,
    {
        let mut retries = 0u32;
        loop {
            let estimate = self.estimate_slippage(req).await;
            if estimate.slippage > self.cfg.max_slippage {
                if self.cfg.abort_on_excessive_slippage {
                    return ProtectedExecutionResult {
                        success: false,
                        actual_slippage: estimate.slippage,
                        retries,
                        abort_reason: Some(format!(
                            "slippage {:.4} exceeded cap on retry {retries}",
                            estimate.slippage
                        )),
                    };
                }
            } else {
                let result = place_fn(req.clone()).await;
                if result.success {
                    let actual_slippage = result
                        .avg_fill_price
                        .and_then(|p| p.to_f64())
                        .map(|filled| compute_slippage(req.side, estimate.expected_price, filled))
                        .unwrap_or(estimate.slippage);
                    return ProtectedExecutionResult {
                        success: true,
                        actual_slippage,
                        retries,
                        abort_reason: None,
                    };
                }
            }

            retries += 1;
            if retries >= self.cfg.max_retries {
                return ProtectedExecutionResult {
                    success: false,
                    actual_slippage: estimate.slippage,
                    retries,
                    abort_reason: Some("max retries exceeded".to_string()),
                };
            }
            warn!(retries, "slippage-protected execution retrying");
            sleep(Duration::from_millis(self.cfg.retry_delay_ms)).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProtectedExecutionResult {
    pub success: bool,
    pub actual_slippage: f64,
    pub retries: u32,
    pub abort_reason: Option<String>,
}

fn compute_slippage(side: Side, mid: f64, fill: f64) -> f64 {
    if mid <= 0.0 {
        return 0.0;
    }
    let raw = match side {
        Side::Buy => (fill - mid) / mid,
        Side::Sell => (mid - fill) / mid,
    };
    raw.max(0.0)
}

fn estimate_from_book(book: &Orderbook, side: Side, size: f64) -> SlippageEstimate {
    let levels: &[PriceLevel] = match side {
        Side::Buy => &book.asks,
        Side::Sell => &book.bids,
    };
    let mid = book.mid_price.unwrap_or_else(|| {
        match (book.best_bid(), book.best_ask()) {
            (Some(b), Some(a)) => (b + a) / 2.0,
            _ => 0.5,
        }
    });

    let mut remaining = size;
    let mut cost = 0.0;
    let mut filled = 0.0;
    for level in levels {
        if remaining <= 0.0 {
            break;
        }
        let take = remaining.min(level.size);
        cost += take * level.price;
        filled += take;
        remaining -= take;
    }

    if filled <= 0.0 || filled < size * 0.5 {
        return heuristic_estimate(size);
    }

    let vwap = cost / filled;
    let slippage = compute_slippage(side, mid, vwap);
    SlippageEstimate {
        slippage,
        expected_price: vwap,
    }
}

fn heuristic_estimate(size: f64) -> SlippageEstimate {
    let slippage = 0.005 + (0.0001 * size).min(0.05);
    SlippageEstimate {
        slippage,
        expected_price: 0.5,
    }
}
