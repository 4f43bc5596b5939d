//! Trigger Manager (component #10, spec §4.9) — price-conditional order
//! placement fed by a push price stream, plus a periodic expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::execution::Execution;
use crate::feed::{FeedProvider, PriceSubscriptionHandle};
use crate::types::{Discipline, OrderRequest, OrderResult, Side, SignatureType, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Active,
    Triggered,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub enum TriggerCondition {
    PriceAbove(Decimal),
    PriceBelow(Decimal),
    /// `up = true` crosses upward through `p`, `false` crosses downward.
    PriceCross { level: Decimal, up: bool },
    /// Never evaluates true: orderbook-driven, out of scope per spec §4.9.
    SpreadBelow(Decimal),
}

impl TriggerCondition {
    fn evaluate(&self, prev: Option<Decimal>, current: Decimal) -> bool {
        match *self {
            TriggerCondition::PriceAbove(p) => current >= p,
            TriggerCondition::PriceBelow(p) => current <= p,
            TriggerCondition::PriceCross { level, up } => match prev {
                Some(prev) if up => prev < level && current >= level,
                Some(prev) => prev > level && current <= level,
                None => false,
            },
            TriggerCondition::SpreadBelow(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TriggerOrderSpec {
    pub venue: Venue,
    pub market: String,
    pub instrument: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub discipline: Discipline,
}

#[derive(Debug, Clone)]
pub struct TriggerParams {
    pub venue: Venue,
    pub instrument_or_market: String,
    pub condition: TriggerCondition,
    pub order: TriggerOrderSpec,
    pub one_shot: bool,
    pub expires_at_ms: Option<u64>,
}

struct TriggerInner {
    state: TriggerState,
    prev_price: Option<Decimal>,
    result: Option<OrderResult>,
    unsub: Option<PriceSubscriptionHandle>,
}

pub struct Trigger {
    execution: Arc<Execution>,
    params: TriggerParams,
    inner: Mutex<TriggerInner>,
}

impl Trigger {
    pub fn new(execution: Arc<Execution>, params: TriggerParams) -> Arc<Self> {
        Arc::new(Self {
            execution,
            params,
            inner: Mutex::new(TriggerInner {
                state: TriggerState::Active,
                prev_price: None,
                result: None,
                unsub: None,
            }),
        })
    }

    pub async fn state(&self) -> TriggerState {
        self.inner.lock().await.state
    }

    pub async fn result(&self) -> Option<OrderResult> {
        self.inner.lock().await.result.clone()
    }

    /// Registers this trigger's price callback with `feed` and stores the
    /// returned unsubscribe handle for `one_shot` teardown.
    pub fn subscribe(self: &Arc<Self>, feed: &dyn FeedProvider) {
        let this = self.clone();
        let handle = feed.subscribe_price(self.params.venue, &self.params.instrument_or_market, Box::new(move |price| {
            let this = this.clone();
            tokio::spawn(async move {
                if let Ok(price) = Decimal::try_from(price) {
                    this.on_price(price).await;
                }
            });
        }));
        let this2 = self.clone();
        tokio::spawn(async move {
            this2.inner.lock().await.unsub = Some(handle);
        });
    }

    /// Direct ingestion point (spec §6): callers may feed prices without an
    /// owned `FeedProvider` push registration.
    pub async fn on_price(self: &Arc<Self>, current: Decimal) {
        let should_fire = {
            let mut inner = self.inner.lock().await;
            if inner.state != TriggerState::Active {
                return;
            }
            let fire = self.params.condition.evaluate(inner.prev_price, current);
            inner.prev_price = Some(current);
            fire
        };

        if should_fire {
            self.fire().await;
        }
    }

    async fn fire(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != TriggerState::Active {
                return;
            }
            inner.state = TriggerState::Triggered;
        }

        let spec = &self.params.order;
        let req = OrderRequest {
            venue: spec.venue,
            market: spec.market.clone(),
            instrument: Some(spec.instrument.clone()),
            side: spec.side,
            price: spec.price,
            size: spec.size,
            discipline: spec.discipline,
            expiration: None,
            post_only: false,
            neg_risk: false,
            yield_bearing: false,
            per_order_max_slippage: None,
            signature_type: SignatureType::Eoa,
        };

        let result = match spec.side {
            Side::Buy => self.execution.buy_limit(req).await,
            Side::Sell => self.execution.sell_limit(req).await,
        };

        info!(order_id = ?result.order_id, success = result.success, "trigger fired");

        let unsub = {
            let mut inner = self.inner.lock().await;
            inner.result = Some(result);
            if self.params.one_shot {
                inner.unsub.take()
            } else {
                None
            }
        };
        if let Some(handle) = unsub {
            handle.unsubscribe();
        }
    }

    /// Checked by [`TriggerRegistry`]'s periodic sweep (spec §4.9: "expiry
    /// sweep every 5s transitions active triggers whose `expiresAt` has
    /// passed to `expired`").
    async fn expire_if_due(self: &Arc<Self>, now_ms: u64) {
        let unsub = {
            let mut inner = self.inner.lock().await;
            if inner.state != TriggerState::Active {
                return;
            }
            match self.params.expires_at_ms {
                Some(expires_at) if now_ms >= expires_at => {
                    inner.state = TriggerState::Expired;
                    inner.unsub.take()
                }
                _ => return,
            }
        };
        if let Some(handle) = unsub {
            handle.unsubscribe();
        }
    }

    pub async fn cancel(&self) -> bool {
        let unsub = {
            let mut inner = self.inner.lock().await;
            if inner.state != TriggerState::Active {
                return false;
            }
            inner.state = TriggerState::Cancelled;
            inner.unsub.take()
        };
        if let Some(handle) = unsub {
            handle.unsubscribe();
        }
        true
    }
}

/// Owns the periodic 5s expiry sweep across every trigger it's told about.
pub struct TriggerRegistry {
    triggers: RwLock<Vec<Arc<Trigger>>>,
    sweep_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TriggerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            triggers: RwLock::new(Vec::new()),
            sweep_task: Mutex::new(None),
        })
    }

    pub async fn register(&self, trigger: Arc<Trigger>) {
        self.triggers.write().await.push(trigger);
    }

    pub async fn start_sweep(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.sweep_task.lock().await;
        if guard.is_some() {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now_ms = crate::nonce::now_ms();
                let triggers = this.triggers.read().await.clone();
                for trigger in triggers {
                    trigger.expire_if_due(now_ms).await;
                }
            }
        });
        *guard = Some(handle);
    }

    pub async fn stop_sweep(&self) {
        if let Some(handle) = self.sweep_task.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_above_fires_at_or_past_level() {
        let c = TriggerCondition::PriceAbove(dec!(0.6));
        assert!(!c.evaluate(None, dec!(0.59)));
        assert!(c.evaluate(None, dec!(0.60)));
        assert!(c.evaluate(None, dec!(0.61)));
    }

    #[test]
    fn price_below_fires_at_or_under_level() {
        let c = TriggerCondition::PriceBelow(dec!(0.4));
        assert!(c.evaluate(None, dec!(0.40)));
        assert!(!c.evaluate(None, dec!(0.41)));
    }

    #[test]
    fn price_cross_up_requires_prev_below_and_current_at_or_above() {
        let c = TriggerCondition::PriceCross { level: dec!(0.5), up: true };
        assert!(!c.evaluate(None, dec!(0.6)));
        assert!(c.evaluate(Some(dec!(0.4)), dec!(0.55)));
        assert!(!c.evaluate(Some(dec!(0.6)), dec!(0.7)));
    }

    #[test]
    fn price_cross_down_requires_prev_above_and_current_at_or_below() {
        let c = TriggerCondition::PriceCross { level: dec!(0.5), up: false };
        assert!(c.evaluate(Some(dec!(0.6)), dec!(0.45)));
        assert!(!c.evaluate(Some(dec!(0.4)), dec!(0.35)));
    }

    #[test]
    fn spread_below_never_fires() {
        let c = TriggerCondition::SpreadBelow(dec!(0.01));
        assert!(!c.evaluate(None, dec!(0.0)));
        assert!(!c.evaluate(Some(dec!(1.0)), dec!(0.0)));
    }
}
