//! Execution Service (component #6, spec §4.5) — the unified order API
//! strategies call, dispatching to the venue adapter registered for each
//! request's `Venue` tag, gated by validators/slippage/circuit-breaker, and
//! wiring in fill-tracking, heartbeat, and settlement.

pub mod fills;
pub mod heartbeat;
pub mod settlement;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::EngineConfig;
use crate::errors::ExecError;
use crate::feed::FeedProvider;
use crate::slippage::SlippageGuard;
use crate::types::{Discipline, OpenOrder, OrderRequest, OrderResult, OrderStatus, Side, Venue};
use crate::validators::Validators;
use crate::venues::{CancelOutcome, VenueAdapter};

use fills::FillTracker;
use heartbeat::HeartbeatService;
use settlement::SettlementService;

#[derive(Debug, Clone, Copy)]
pub struct FillEstimate {
    pub avg_price: f64,
    pub filled_size: f64,
}

pub struct Execution {
    adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
    cfg: EngineConfig,
    circuit_breaker: RwLock<Option<CircuitBreaker>>,
    slippage: SlippageGuard,
    feed: Arc<dyn FeedProvider>,
    pub fills: Arc<FillTracker>,
    pub heartbeat: Arc<HeartbeatService>,
    pub settlement: SettlementService,
}

impl Execution {
    pub fn new(
        adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
        cfg: EngineConfig,
        feed: Arc<dyn FeedProvider>,
        fills: Arc<FillTracker>,
        heartbeat: Arc<HeartbeatService>,
        settlement: SettlementService,
    ) -> Self {
        let slippage = SlippageGuard::new(feed.clone(), cfg.slippage.clone());
        Self {
            adapters,
            cfg,
            circuit_breaker: RwLock::new(None),
            slippage,
            feed,
            fills,
            heartbeat,
            settlement,
        }
    }

    pub async fn set_circuit_breaker(&self, cb: Option<CircuitBreaker>) {
        *self.circuit_breaker.write().await = cb;
    }

    pub async fn circuit_breaker_state(&self) -> Option<crate::circuit_breaker::CircuitBreakerState> {
        self.circuit_breaker.read().await.as_ref().map(|cb| cb.snapshot())
    }

    fn adapter_for(&self, venue: Venue) -> Result<&Arc<dyn VenueAdapter>, ExecError> {
        self.adapters
            .get(&venue)
            .ok_or_else(|| ExecError::Unknown(format!("no adapter registered for venue {venue:?}")))
    }

    async fn validate_and_place(&self, req: OrderRequest) -> OrderResult {
        let cb_guard = self.circuit_breaker.read().await;
        let validators = Validators::new(self.cfg.max_order_size, cb_guard.as_ref());
        if let Err(e) = validators.validate(&req) {
            return OrderResult::rejected(e);
        }
        drop(cb_guard);

        let adapter = match self.adapter_for(req.venue) {
            Ok(a) => a.clone(),
            Err(e) => return OrderResult::rejected(e),
        };

        if self.cfg.dry_run {
            info!(?req.venue, market = %req.market, "dry_run: order validated but not submitted");
            return OrderResult {
                success: true,
                order_id: Some(format!("dry-run-{}", crate::nonce::now_ms())),
                filled_size: None,
                avg_fill_price: None,
                status: OrderStatus::Open,
                error: None,
                transaction_hash: None,
            };
        }

        adapter.place(req).await
    }

    pub async fn buy_limit(&self, req: OrderRequest) -> OrderResult {
        self.validate_and_place(req).await
    }

    pub async fn sell_limit(&self, req: OrderRequest) -> OrderResult {
        self.validate_and_place(req).await
    }

    /// Synthesized as a marketable limit at 0.99 FOK, a venue-specific
    /// convention rather than a native market-order type.
    pub async fn market_buy(&self, mut req: OrderRequest) -> OrderResult {
        req.price = rust_decimal_macros::dec!(0.99);
        req.discipline = Discipline::Fok;
        self.validate_and_place(req).await
    }

    /// Synthesized as a marketable limit at 0.01 FOK; see [`Self::market_buy`].
    pub async fn market_sell(&self, mut req: OrderRequest) -> OrderResult {
        req.price = rust_decimal_macros::dec!(0.01);
        req.discipline = Discipline::Fok;
        self.validate_and_place(req).await
    }

    pub async fn maker_buy(&self, mut req: OrderRequest) -> OrderResult {
        req.discipline = Discipline::Gtc;
        req.post_only = true;
        self.validate_and_place(req).await
    }

    pub async fn maker_sell(&self, mut req: OrderRequest) -> OrderResult {
        req.discipline = Discipline::Gtc;
        req.post_only = true;
        self.validate_and_place(req).await
    }

    pub async fn protected_buy(&self, req: OrderRequest, max_slippage_override: Option<f64>) -> OrderResult {
        match self.slippage.protect(&req, max_slippage_override).await {
            Ok(protected) => self.validate_and_place(protected).await,
            Err(e) => OrderResult::rejected(e),
        }
    }

    pub async fn protected_sell(&self, req: OrderRequest, max_slippage_override: Option<f64>) -> OrderResult {
        self.protected_buy(req, max_slippage_override).await
    }

    pub async fn cancel_order(&self, venue: Venue, order_id: &str) -> bool {
        match self.adapter_for(venue) {
            Ok(adapter) => adapter.cancel(order_id).await,
            Err(_) => false,
        }
    }

    pub async fn cancel_all_orders(&self, venue: Option<Venue>, market_filter: Option<&str>) -> usize {
        match venue {
            Some(v) => match self.adapter_for(v) {
                Ok(adapter) => adapter.cancel_all(market_filter).await,
                Err(_) => 0,
            },
            None => {
                let mut total = 0;
                for adapter in self.adapters.values() {
                    total += adapter.cancel_all(market_filter).await;
                }
                total
            }
        }
    }

    pub async fn get_open_orders(&self, venue: Option<Venue>) -> Vec<OpenOrder> {
        match venue {
            Some(v) => match self.adapter_for(v) {
                Ok(adapter) => adapter.list_open().await,
                Err(_) => Vec::new(),
            },
            None => {
                let mut all = Vec::new();
                for adapter in self.adapters.values() {
                    all.extend(adapter.list_open().await);
                }
                all
            }
        }
    }

    pub async fn get_order(&self, venue: Venue, order_id: &str) -> Option<OpenOrder> {
        let adapter = self.adapter_for(venue).ok()?;
        adapter.list_open().await.into_iter().find(|o| o.order_id == order_id)
    }

    /// Splits by venue, calls each adapter's batch path, splices results back
    /// in input order (spec §4.5 batching policy).
    pub async fn place_orders_batch(&self, reqs: Vec<OrderRequest>) -> Vec<OrderResult> {
        let n = reqs.len();
        let groups = crate::venues::partition_by_venue(reqs);

        let mut slots: Vec<Option<OrderResult>> = (0..n).map(|_| None).collect();
        for (venue, indexed) in groups {
            let (indices, venue_reqs): (Vec<usize>, Vec<OrderRequest>) = indexed.into_iter().unzip();
            let results = match self.adapter_for(venue) {
                Ok(adapter) => {
                    let mut out = Vec::with_capacity(venue_reqs.len());
                    for req in venue_reqs {
                        out.push(self.validate_and_place(req).await);
                    }
                    out
                }
                Err(e) => venue_reqs.iter().map(|_| OrderResult::rejected(e.clone())).collect(),
            };
            for (idx, result) in indices.into_iter().zip(results) {
                slots[idx] = Some(result);
            }
        }

        slots
            .into_iter()
            .map(|r| r.unwrap_or_else(|| OrderResult::rejected(ExecError::Unknown("order dropped during batching".into()))))
            .collect()
    }

    pub async fn cancel_orders_batch(&self, venue: Venue, order_ids: Vec<String>) -> Vec<CancelOutcome> {
        match self.adapter_for(venue) {
            Ok(adapter) => adapter.cancel_batch(order_ids).await,
            Err(_) => order_ids
                .into_iter()
                .map(|id| CancelOutcome { order_id: id, success: false })
                .collect(),
        }
    }

    pub async fn estimate_fill(&self, req: &OrderRequest) -> FillEstimate {
        let book = self.feed.get_orderbook(req.venue, &req.market).await;
        let size = req.size.to_f64().unwrap_or(0.0);
        let Some(book) = book else {
            return FillEstimate { avg_price: 0.5, filled_size: 0.0 };
        };
        let levels = match req.side {
            Side::Buy => &book.asks,
            Side::Sell => &book.bids,
        };
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
        let avg_price = if filled > 0.0 { cost / filled } else { 0.0 };
        FillEstimate { avg_price, filled_size: filled }
    }

    pub async fn estimate_slippage(&self, req: &OrderRequest) -> crate::slippage::SlippageEstimate {
        self.slippage.estimate_slippage(req).await
    }

    pub async fn approve_usdc(&self, owner: &str, amount: Option<Decimal>) -> crate::evm::TxResult {
        self.settlement.approve_usdc(owner, amount).await
    }

    pub async fn get_usdc_allowance(&self, owner: &str) -> anyhow::Result<Decimal> {
        self.settlement.get_usdc_allowance(owner).await
    }

    pub async fn get_orderbooks_batch(&self, requests: Vec<(Venue, String)>) -> Vec<Option<crate::types::Orderbook>> {
        let mut out = Vec::with_capacity(requests.len());
        for (venue, market) in requests {
            out.push(self.feed.get_orderbook(venue, &market).await);
        }
        out
    }

    pub async fn start_heartbeat(&self) -> anyhow::Result<String> {
        self.heartbeat.start().await
    }

    pub async fn stop_heartbeat(&self) {
        self.heartbeat.stop().await;
    }

    pub async fn is_heartbeat_active(&self) -> bool {
        self.heartbeat.is_active().await
    }

    pub async fn clear_old_fills(&self) {
        self.fills.clear_old_fills(Duration::from_millis(self.cfg.fill_gc_max_age_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct StubAdapter;

    #[async_trait]
    impl VenueAdapter for StubAdapter {
        async fn place(&self, _req: OrderRequest) -> OrderResult {
            OrderResult::accepted("stub-order".into(), OrderStatus::Open)
        }
        async fn cancel(&self, _order_id: &str) -> bool {
            true
        }
        async fn cancel_all(&self, _market_filter: Option<&str>) -> usize {
            1
        }
        async fn list_open(&self) -> Vec<OpenOrder> {
            vec![]
        }
        async fn get_orderbook(&self, _instrument: &str) -> Option<crate::types::Orderbook> {
            None
        }
        async fn get_price(&self, _instrument: &str) -> Option<Decimal> {
            None
        }
        // unused field silences dead_code in this minimal stub
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
        ) -> crate::feed::PriceSubscriptionHandle {
            crate::feed::PriceSubscriptionHandle::new(|| {})
        }
    }

    fn exec() -> Execution {
        let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(Venue::Primary, Arc::new(StubAdapter));
        let feed: Arc<dyn FeedProvider> = Arc::new(NullFeed);
        let fills = FillTracker::new(fills::FillsWsConfig {
            ws_url: "wss://example.invalid".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
            api_passphrase: "p".into(),
        });
        let heartbeat = HeartbeatService::new("https://example.invalid".into(), Duration::from_secs(8));
        let settlement = SettlementService::new(
            Arc::new(NoopEvm),
            "0xspender".into(),
        );
        Execution::new(adapters, EngineConfig::default(), feed, fills, heartbeat, settlement)
    }

    struct NoopEvm;
    #[async_trait]
    impl crate::evm::EvmProvider for NoopEvm {
        async fn call_contract(&self, _call: crate::evm::ContractCall) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!(null))
        }
        async fn write_contract(&self, _call: crate::evm::ContractCall) -> anyhow::Result<crate::evm::TxResult> {
            Ok(crate::evm::TxResult { success: true, tx_hash: None, error: None })
        }
        async fn usdc_allowance(&self, _o: &str, _s: &str) -> anyhow::Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    fn sample_req(venue: Venue) -> OrderRequest {
        use crate::types::SignatureType;
        OrderRequest {
            venue,
            market: "m".into(),
            instrument: Some("t".into()),
            side: Side::Buy,
            price: dec!(0.5),
            size: Decimal::from(10),
            discipline: Discipline::Gtc,
            expiration: None,
            post_only: false,
            neg_risk: false,
            yield_bearing: false,
            per_order_max_slippage: None,
            signature_type: SignatureType::Eoa,
        }
    }

    #[tokio::test]
    async fn buy_limit_happy_path() {
        let exec = exec();
        let result = exec.buy_limit(sample_req(Venue::Primary)).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn unregistered_venue_is_rejected() {
        let exec = exec();
        let result = exec.buy_limit(sample_req(Venue::Exchange)).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn market_buy_forces_price_and_fok() {
        let exec = exec();
        let mut req = sample_req(Venue::Primary);
        req.price = dec!(0.20);
        req.discipline = Discipline::Gtc;
        let result = exec.market_buy(req).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn dry_run_skips_adapter_and_returns_synthetic_result() {
        let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(Venue::Primary, Arc::new(StubAdapter));
        let feed: Arc<dyn FeedProvider> = Arc::new(NullFeed);
        let fills = FillTracker::new(fills::FillsWsConfig {
            ws_url: "wss://example.invalid".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
            api_passphrase: "p".into(),
        });
        let heartbeat = HeartbeatService::new("https://example.invalid".into(), Duration::from_secs(8));
        let settlement = SettlementService::new(Arc::new(NoopEvm), "0xspender".into());
        let mut cfg = EngineConfig::default();
        cfg.dry_run = true;
        let exec = Execution::new(adapters, cfg, feed, fills, heartbeat, settlement);
        let result = exec.buy_limit(sample_req(Venue::Primary)).await;
        assert!(result.success);
        assert!(result.order_id.unwrap().starts_with("dry-run-"));
    }

    #[tokio::test]
    async fn batch_splices_results_back_in_input_order() {
        let exec = exec();
        let reqs = vec![sample_req(Venue::Primary), sample_req(Venue::Exchange), sample_req(Venue::Primary)];
        let results = exec.place_orders_batch(reqs).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
    }
}
