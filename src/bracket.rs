//! OCO bracket (component #8, spec §4.7) — a take-profit/stop-loss pair
//! where the first leg to fill cancels its sibling.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::info;

use crate::execution::Execution;
use crate::types::{OrderRequest, OrderStatus, Side, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketState {
    Pending,
    Active,
    TakeProfitHit,
    StopLossHit,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BracketParams {
    pub venue: Venue,
    pub market: String,
    pub instrument: String,
    pub side: Side,
    pub size: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Default)]
struct Legs {
    tp_order_id: Option<String>,
    sl_order_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BracketOutcome {
    pub filled_side: Option<&'static str>,
    pub fill_price: Option<Decimal>,
}

struct Inner {
    state: BracketState,
    legs: Legs,
    filled_side: Option<&'static str>,
    fill_price: Option<Decimal>,
}

pub struct Bracket {
    execution: Arc<Execution>,
    params: BracketParams,
    inner: RwLock<Inner>,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Bracket {
    pub fn new(execution: Arc<Execution>, params: BracketParams) -> Arc<Self> {
        Arc::new(Self {
            execution,
            params,
            inner: RwLock::new(Inner {
                state: BracketState::Pending,
                legs: Legs::default(),
                filled_side: None,
                fill_price: None,
            }),
            poll_task: Mutex::new(None),
        })
    }

    pub async fn state(&self) -> BracketState {
        self.inner.read().await.state
    }

    /// Snapshot matching spec §3's Bracket entity (`status`, `filledSide?`,
    /// `fillPrice?`); `filled_side`/`fill_price` stay `None` until a leg
    /// fills and `finish` records them.
    pub async fn outcome(&self) -> BracketOutcome {
        let inner = self.inner.read().await;
        BracketOutcome {
            filled_side: inner.filled_side,
            fill_price: inner.fill_price,
        }
    }

    /// Places both legs concurrently. At least one must succeed to go
    /// `active`; if exactly one does, the bracket runs single-legged.
    pub async fn start(self: &Arc<Self>) -> BracketState {
        {
            let inner = self.inner.read().await;
            if inner.state != BracketState::Pending {
                return inner.state;
            }
        }

        let exit_side = match self.params.side {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        };

        let tp_req = self.leg_request(exit_side, self.params.take_profit_price);
        let sl_req = self.leg_request(exit_side, self.params.stop_loss_price);

        let place = |req: OrderRequest| async {
            match exit_side {
                Side::Buy => self.execution.buy_limit(req).await,
                Side::Sell => self.execution.sell_limit(req).await,
            }
        };
        let (tp_result, sl_result) = tokio::join!(place(tp_req.clone()), place(sl_req.clone()));

        let mut inner = self.inner.write().await;
        inner.legs.tp_order_id = if tp_result.success { tp_result.order_id } else { None };
        inner.legs.sl_order_id = if sl_result.success { sl_result.order_id } else { None };

        inner.state = if inner.legs.tp_order_id.is_some() || inner.legs.sl_order_id.is_some() {
            BracketState::Active
        } else {
            BracketState::Failed
        };
        let started = inner.state == BracketState::Active;
        drop(inner);

        if started {
            self.spawn_poll_loop().await;
        }
        self.state().await
    }

    fn leg_request(&self, side: Side, price: Decimal) -> OrderRequest {
        use crate::types::{Discipline, SignatureType};
        OrderRequest {
            venue: self.params.venue,
            market: self.params.market.clone(),
            instrument: Some(self.params.instrument.clone()),
            side,
            price,
            size: self.params.size,
            discipline: Discipline::Gtc,
            expiration: None,
            post_only: false,
            neg_risk: false,
            yield_bearing: false,
            per_order_max_slippage: None,
            signature_type: SignatureType::Eoa,
        }
    }

    async fn spawn_poll_loop(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                sleep(this.params.poll_interval).await;
                if this.state().await != BracketState::Active {
                    break;
                }
                if this.poll_once().await {
                    break;
                }
            }
        });
        *self.poll_task.lock().await = Some(handle);
    }

    /// Returns true once a terminal transition has happened and polling
    /// should stop.
    async fn poll_once(&self) -> bool {
        let (tp_id, sl_id) = {
            let inner = self.inner.read().await;
            (inner.legs.tp_order_id.clone(), inner.legs.sl_order_id.clone())
        };

        if let Some(id) = &tp_id {
            if let Some(order) = self.execution.get_order(self.params.venue, id).await {
                if order.status == OrderStatus::Filled {
                    self.finish(BracketState::TakeProfitHit, sl_id.as_deref(), Some(order.price)).await;
                    return true;
                }
            }
        }
        if let Some(id) = &sl_id {
            if let Some(order) = self.execution.get_order(self.params.venue, id).await {
                if order.status == OrderStatus::Filled {
                    self.finish(BracketState::StopLossHit, tp_id.as_deref(), Some(order.price)).await;
                    return true;
                }
            }
        }
        false
    }

    async fn finish(&self, terminal: BracketState, sibling: Option<&str>, fill_price: Option<Decimal>) {
        let mut inner = self.inner.write().await;
        if inner.state != BracketState::Active {
            return;
        }
        inner.state = terminal;
        inner.filled_side = match terminal {
            BracketState::TakeProfitHit => Some("take_profit"),
            BracketState::StopLossHit => Some("stop_loss"),
            _ => None,
        };
        inner.fill_price = fill_price;
        drop(inner);
        if let Some(id) = sibling {
            let _ = self.execution.cancel_order(self.params.venue, id).await;
        }
        info!(?terminal, "bracket reached terminal state");
    }

    /// External cancel: only effective from `active`.
    pub async fn cancel(&self) -> bool {
        let (tp_id, sl_id) = {
            let mut inner = self.inner.write().await;
            if inner.state != BracketState::Active {
                return false;
            }
            inner.state = BracketState::Cancelled;
            (inner.legs.tp_order_id.clone(), inner.legs.sl_order_id.clone())
        };
        if let Some(id) = tp_id {
            let _ = self.execution.cancel_order(self.params.venue, &id).await;
        }
        if let Some(id) = sl_id {
            let _ = self.execution.cancel_order(self.params.venue, &id).await;
        }
        if let Some(handle) = self.poll_task.lock().await.take() {
            handle.abort();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    use crate::config::EngineConfig;
    use crate::evm::{ContractCall, EvmProvider, TxResult};
    use crate::execution::fills::{FillTracker, FillsWsConfig};
    use crate::execution::heartbeat::HeartbeatService;
    use crate::execution::settlement::SettlementService;
    use crate::feed::{FeedProvider, PriceSubscriptionHandle};
    use crate::types::{OpenOrder, OrderResult};
    use crate::venues::VenueAdapter;
    use rust_decimal_macros::dec;

    struct ControllableAdapter {
        next_id: AtomicU64,
        orders: StdMutex<StdHashMap<String, OrderStatus>>,
    }

    impl ControllableAdapter {
        fn new() -> Self {
            Self { next_id: AtomicU64::new(1), orders: StdMutex::new(StdHashMap::new()) }
        }

        fn mark_filled(&self, order_id: &str) {
            self.orders.lock().unwrap().insert(order_id.to_string(), OrderStatus::Filled);
        }
    }

    #[async_trait]
    impl VenueAdapter for ControllableAdapter {
        async fn place(&self, _req: OrderRequest) -> OrderResult {
            let id = format!("o{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.orders.lock().unwrap().insert(id.clone(), OrderStatus::Open);
            OrderResult::accepted(id, OrderStatus::Open)
        }
        async fn cancel(&self, order_id: &str) -> bool {
            self.orders.lock().unwrap().insert(order_id.to_string(), OrderStatus::Cancelled);
            true
        }
        async fn cancel_all(&self, _market_filter: Option<&str>) -> usize {
            0
        }
        async fn list_open(&self) -> Vec<OpenOrder> {
            self.orders
                .lock()
                .unwrap()
                .iter()
                .map(|(id, status)| OpenOrder {
                    order_id: id.clone(),
                    venue: Venue::Primary,
                    market: "m".into(),
                    instrument: Some("t".into()),
                    side: Side::Sell,
                    price: dec!(0.5),
                    original_size: dec!(10),
                    filled_size: Decimal::ZERO,
                    discipline: crate::types::Discipline::Gtc,
                    status: *status,
                    created_at: std::time::Instant::now(),
                    expiration: None,
                    transaction_hash: None,
                    fill_status: None,
                })
                .collect()
        }
        async fn get_orderbook(&self, _instrument: &str) -> Option<crate::types::Orderbook> {
            None
        }
        async fn get_price(&self, _instrument: &str) -> Option<Decimal> {
            None
        }
    }

    struct NullFeed;
    #[async_trait]
    impl FeedProvider for NullFeed {
        async fn get_orderbook(&self, _v: Venue, _m: &str) -> Option<crate::types::Orderbook> {
            None
        }
        async fn get_price(&self, _v: Venue, _m: &str) -> Option<Decimal> {
            None
        }
        fn subscribe_price(
            &self,
            _v: Venue,
            _m: &str,
            _cb: Box<dyn Fn(f64) + Send + Sync>,
        ) -> PriceSubscriptionHandle {
            PriceSubscriptionHandle::new(|| {})
        }
    }

    struct NoopEvm;
    #[async_trait]
    impl EvmProvider for NoopEvm {
        async fn call_contract(&self, _call: ContractCall) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!(null))
        }
        async fn write_contract(&self, _call: ContractCall) -> anyhow::Result<TxResult> {
            Ok(TxResult { success: true, tx_hash: None, error: None })
        }
        async fn usdc_allowance(&self, _o: &str, _s: &str) -> anyhow::Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    fn test_execution(adapter: Arc<ControllableAdapter>) -> Arc<Execution> {
        let mut adapters: StdHashMap<Venue, Arc<dyn VenueAdapter>> = StdHashMap::new();
        adapters.insert(Venue::Primary, adapter);
        let feed: Arc<dyn FeedProvider> = Arc::new(NullFeed);
        let fills = FillTracker::new(FillsWsConfig {
            ws_url: "wss://example.invalid".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
            api_passphrase: "p".into(),
        });
        let heartbeat = HeartbeatService::new("https://example.invalid".into(), Duration::from_secs(8));
        let settlement = SettlementService::new(Arc::new(NoopEvm), "0xspender".into());
        Arc::new(Execution::new(adapters, EngineConfig::default(), feed, fills, heartbeat, settlement))
    }

    fn params() -> BracketParams {
        BracketParams {
            venue: Venue::Primary,
            market: "m".into(),
            instrument: "t".into(),
            side: Side::Buy,
            size: dec!(10),
            take_profit_price: dec!(0.60),
            stop_loss_price: dec!(0.40),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn start_places_both_legs_and_goes_active() {
        let adapter = Arc::new(ControllableAdapter::new());
        let exec = test_execution(adapter);
        let bracket = Bracket::new(exec, params());
        let state = bracket.start().await;
        assert_eq!(state, BracketState::Active);
    }

    #[tokio::test]
    async fn first_fill_wins_and_cancels_sibling() {
        let adapter = Arc::new(ControllableAdapter::new());
        let exec = test_execution(adapter.clone());
        let bracket = Bracket::new(exec, params());
        bracket.start().await;

        let tp_id = {
            let inner = bracket.inner.read().await;
            inner.legs.tp_order_id.clone().unwrap()
        };
        adapter.mark_filled(&tp_id);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bracket.state().await, BracketState::TakeProfitHit);

        let outcome = bracket.outcome().await;
        assert_eq!(outcome.filled_side, Some("take_profit"));
        assert_eq!(outcome.fill_price, Some(dec!(0.5)));

        let sl_id = {
            let inner = bracket.inner.read().await;
            inner.legs.sl_order_id.clone().unwrap()
        };
        let sl_status = adapter.orders.lock().unwrap().get(&sl_id).copied();
        assert_eq!(sl_status, Some(OrderStatus::Cancelled));
    }

    #[tokio::test]
    async fn external_cancel_only_works_from_active() {
        let adapter = Arc::new(ControllableAdapter::new());
        let exec = test_execution(adapter);
        let bracket = Bracket::new(exec, params());
        assert!(!bracket.cancel().await);
        bracket.start().await;
        assert!(bracket.cancel().await);
        assert_eq!(bracket.state().await, BracketState::Cancelled);
    }
}
