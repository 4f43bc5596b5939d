//! Primary venue adapter (V1, spec §4.1) — EIP-712 signed orders against a
//! CLOB exchange contract pair (standard + neg-risk), with tick/negRisk/fee
//! caches and a postOnly cross pre-check.
//!
//! Grounded in the teacher's `polymarket::executor` (REST submission shape,
//! response parsing into `OrderResult`) and `polymarket::types` (wire field
//! names), with the signing step replaced by [`crate::signer::OrderSigner`]
//! since the teacher delegates that to a hosted SDK this crate does not
//! carry.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::errors::ExecError;
use crate::nonce::NonceGenerator;
use crate::signer::{OrderSide, OrderSigner, UnsignedOrder};
use crate::types::{
    Discipline, OpenOrder, OrderRequest, OrderResult, OrderStatus, Orderbook, PriceLevel, Side,
    Venue,
};
use crate::validators::Validators;
use crate::venues::VenueAdapter;

const TICK_TTL: Duration = Duration::from_secs(3600);
const NEG_RISK_TTL: Duration = Duration::from_secs(3600);
const FEE_TTL: Duration = Duration::from_secs(3600);
const ORDERBOOK_TTL: Duration = Duration::from_secs(5);
const DEFAULT_FEE_BPS_STANDARD: u64 = 0;
const DEFAULT_FEE_BPS_NEG_RISK: u64 = 25;
const MAX_BATCH: usize = 15;

pub struct PrimaryAdapterConfig {
    pub base_url: String,
    pub api_key: String,
    pub maker: Address,
    pub operator: Address,
    pub exchange_address: Address,
    pub neg_risk_exchange_address: Address,
}

pub struct PrimaryAdapter {
    client: reqwest::Client,
    cfg: PrimaryAdapterConfig,
    signer: OrderSigner,
    nonce: NonceGenerator,
    salt_seed: AtomicU64,
    tick_cache: TtlCache<String, Decimal>,
    neg_risk_cache: TtlCache<String, bool>,
    fee_cache: TtlCache<String, u64>,
    orderbook_cache: TtlCache<String, Orderbook>,
}

impl PrimaryAdapter {
    pub fn new(cfg: PrimaryAdapterConfig, signer: OrderSigner) -> Self {
        Self {
            client: reqwest::Client::new(),
            cfg,
            signer,
            nonce: NonceGenerator::new(),
            salt_seed: AtomicU64::new(1),
            tick_cache: TtlCache::new(TICK_TTL),
            neg_risk_cache: TtlCache::new(NEG_RISK_TTL),
            fee_cache: TtlCache::new(FEE_TTL),
            orderbook_cache: TtlCache::new(ORDERBOOK_TTL),
        }
    }

    /// `salt: round(random·now_ms)` (spec §6) — a process-unique seed mixed
    /// with a monotonic counter so concurrent placements never collide even
    /// if sampled in the same millisecond.
    fn next_salt(&self) -> u64 {
        let counter = self.salt_seed.fetch_add(1, Ordering::Relaxed);
        let now = crate::nonce::now_ms();
        now.wrapping_mul(1_000_003).wrapping_add(counter)
    }

    async fn tick_size(&self, instrument: &str) -> Result<Decimal, ExecError> {
        let base = self.cfg.base_url.clone();
        let client = self.client.clone();
        let instrument_owned = instrument.to_string();
        self.tick_cache
            .get_or_fetch(instrument.to_string(), || async move {
                fetch_tick_size(&client, &base, &instrument_owned).await
            })
            .await
    }

    async fn neg_risk_flag(&self, instrument: &str) -> Result<bool, ExecError> {
        let base = self.cfg.base_url.clone();
        let client = self.client.clone();
        let instrument_owned = instrument.to_string();
        self.neg_risk_cache
            .get_or_fetch(instrument.to_string(), || async move {
                fetch_neg_risk(&client, &base, &instrument_owned).await
            })
            .await
    }

    async fn fee_rate_bps(&self, instrument: &str, neg_risk: bool) -> u64 {
        let default = if neg_risk {
            DEFAULT_FEE_BPS_NEG_RISK
        } else {
            DEFAULT_FEE_BPS_STANDARD
        };
        let base = self.cfg.base_url.clone();
        let client = self.client.clone();
        let instrument_owned = instrument.to_string();
        self.fee_cache
            .get_or_fetch(instrument.to_string(), || async move {
                Ok::<u64, ExecError>(
                    fetch_fee_bps(&client, &base, &instrument_owned)
                        .await
                        .unwrap_or(default),
                )
            })
            .await
            .unwrap_or(default)
    }

    async fn orderbook_cached(&self, instrument: &str) -> Option<Orderbook> {
        if let Some(book) = self.orderbook_cache.get(&instrument.to_string()).await {
            return Some(book);
        }
        let book = fetch_orderbook(&self.client, &self.cfg.base_url, instrument)
            .await
            .ok()?;
        self.orderbook_cache.put(instrument.to_string(), book.clone()).await;
        Some(book)
    }

    async fn assemble_and_sign(
        &self,
        req: &OrderRequest,
        instrument: &str,
        neg_risk: bool,
        fee_rate_bps: u64,
    ) -> Result<(UnsignedOrder, Address, String), ExecError> {
        let verifying_contract = if neg_risk {
            self.cfg.neg_risk_exchange_address
        } else {
            self.cfg.exchange_address
        };

        let token_id = U256::from_str(instrument)
            .map_err(|_| ExecError::InvalidSize(format!("instrument {instrument} is not a valid tokenId")))?;

        // `round(size·100)/100` before scaling to 6-decimal USDC units.
        let rounded_size = (req.size * dec!(100)).round() / dec!(100);
        let rounded_price = (req.price * dec!(100)).round() / dec!(100);
        let notional_usdc = rounded_size * rounded_price * dec!(1_000_000);
        let shares_usdc = rounded_size * dec!(1_000_000);

        let maker_amount = decimal_to_u256(if req.side == Side::Buy { notional_usdc } else { shares_usdc })?;
        let taker_amount = decimal_to_u256(if req.side == Side::Buy { shares_usdc } else { notional_usdc })?;

        let order = UnsignedOrder {
            salt: self.next_salt(),
            maker: self.cfg.maker,
            signer: self.signer.address(),
            taker: self.cfg.operator,
            token_id,
            maker_amount,
            taker_amount,
            expiration: req.expiration.unwrap_or(0),
            nonce: self.nonce.next(),
            fee_rate_bps,
            side: match req.side {
                Side::Buy => OrderSide::Buy,
                Side::Sell => OrderSide::Sell,
            },
            signature_type: req.signature_type,
        };

        let signature = self
            .signer
            .sign(&order, verifying_contract)
            .await
            .map_err(|e| ExecError::Unknown(format!("signing failed: {e}")))?;

        Ok((order, verifying_contract, signature))
    }
}

fn decimal_to_u256(d: Decimal) -> Result<U256, ExecError> {
    let rounded = d.round();
    let as_u128 = rounded
        .to_u128()
        .ok_or_else(|| ExecError::InvalidSize(format!("amount {rounded} overflows u128")))?;
    Ok(U256::from(as_u128))
}

#[async_trait]
impl VenueAdapter for PrimaryAdapter {
    async fn place(&self, req: OrderRequest) -> OrderResult {
        let instrument = match &req.instrument {
            Some(i) => i.clone(),
            None => return OrderResult::rejected(ExecError::InvalidSize("instrument required".into())),
        };

        let tick = match self.tick_size(&instrument).await {
            Ok(t) => t,
            Err(e) => return OrderResult::rejected(e),
        };
        if let Err(e) = Validators::validate_tick(req.price, tick) {
            return OrderResult::rejected(e);
        }

        let neg_risk = match self.neg_risk_flag(&instrument).await {
            Ok(f) => f,
            Err(e) => return OrderResult::rejected(e),
        };

        if req.post_only {
            if let Some(book) = self.orderbook_cached(&instrument).await {
                if let Err(e) =
                    Validators::validate_post_only(req.side, req.price, book.best_bid(), book.best_ask())
                {
                    return OrderResult::rejected(e);
                }
            }
        }

        let fee_rate_bps = self.fee_rate_bps(&instrument, neg_risk).await;

        let (order, _verifying_contract, signature) =
            match self.assemble_and_sign(&req, &instrument, neg_risk, fee_rate_bps).await {
                Ok(v) => v,
                Err(e) => return OrderResult::rejected(e),
            };

        let body = PostOrderBody {
            order: WireOrder {
                salt: order.salt,
                maker: format!("{:#x}", order.maker),
                signer: format!("{:#x}", order.signer),
                taker: format!("{:#x}", order.taker),
                token_id: order.token_id.to_string(),
                maker_amount: order.maker_amount.to_string(),
                taker_amount: order.taker_amount.to_string(),
                expiration: order.expiration.to_string(),
                nonce: order.nonce.to_string(),
                fee_rate_bps: order.fee_rate_bps.to_string(),
                side: match req.side {
                    Side::Buy => "BUY",
                    Side::Sell => "SELL",
                },
                signature_type: req.signature_type as u8,
                signature,
            },
            owner: self.cfg.api_key.clone(),
            order_type: discipline_to_order_type(req.discipline),
            defer_exec: false,
            post_only: req.post_only,
        };

        match post_order(&self.client, &self.cfg.base_url, &body).await {
            Ok(resp) if resp.success => OrderResult::accepted(
                resp.order_id.unwrap_or_default(),
                OrderStatus::Open,
            ),
            Ok(resp) => OrderResult::rejected(ExecError::from_upstream(
                resp.error_msg.unwrap_or_else(|| "order rejected".to_string()),
            )),
            Err(e) => OrderResult::rejected(ExecError::Unknown(e.to_string())),
        }
    }

    async fn place_batch(&self, reqs: Vec<OrderRequest>) -> Vec<OrderResult> {
        let mut out = Vec::with_capacity(reqs.len());
        for chunk in reqs.chunks(MAX_BATCH) {
            for req in chunk {
                out.push(self.place(req.clone()).await);
            }
        }
        out
    }

    async fn cancel(&self, order_id: &str) -> bool {
        match cancel_order(&self.client, &self.cfg.base_url, order_id).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(order_id, error = %e, "primary cancel failed");
                false
            }
        }
    }

    async fn cancel_all(&self, market_filter: Option<&str>) -> usize {
        match cancel_all(&self.client, &self.cfg.base_url, market_filter).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "primary cancel_all failed");
                0
            }
        }
    }

    async fn list_open(&self) -> Vec<OpenOrder> {
        list_open_orders(&self.client, &self.cfg.base_url, Venue::Primary)
            .await
            .unwrap_or_default()
    }

    async fn get_orderbook(&self, instrument: &str) -> Option<Orderbook> {
        self.orderbook_cached(instrument).await
    }

    async fn get_price(&self, instrument: &str) -> Option<Decimal> {
        let book = self.orderbook_cached(instrument).await?;
        let mid = book.mid_price?;
        Decimal::try_from(mid).ok()
    }
}

fn discipline_to_order_type(d: Discipline) -> &'static str {
    match d {
        Discipline::Gtc => "GTC",
        Discipline::Gtd => "GTD",
        Discipline::Fok | Discipline::Fak => "FOK",
    }
}

#[derive(Debug, Serialize)]
struct WireOrder {
    salt: u64,
    maker: String,
    signer: String,
    taker: String,
    #[serde(rename = "tokenId")]
    token_id: String,
    #[serde(rename = "makerAmount")]
    maker_amount: String,
    #[serde(rename = "takerAmount")]
    taker_amount: String,
    expiration: String,
    nonce: String,
    #[serde(rename = "feeRateBps")]
    fee_rate_bps: String,
    side: &'static str,
    #[serde(rename = "signatureType")]
    signature_type: u8,
    signature: String,
}

#[derive(Debug, Serialize)]
struct PostOrderBody {
    order: WireOrder,
    owner: String,
    #[serde(rename = "orderType")]
    order_type: &'static str,
    #[serde(rename = "deferExec")]
    defer_exec: bool,
    #[serde(rename = "postOnly")]
    post_only: bool,
}

#[derive(Debug, Deserialize)]
struct PostOrderResponse {
    success: bool,
    #[serde(rename = "orderID")]
    order_id: Option<String>,
    #[serde(rename = "errorMsg")]
    error_msg: Option<String>,
}

async fn post_order(
    client: &reqwest::Client,
    base_url: &str,
    body: &PostOrderBody,
) -> anyhow::Result<PostOrderResponse> {
    let resp = client
        .post(format!("{base_url}/order"))
        .json(body)
        .send()
        .await?
        .json::<PostOrderResponse>()
        .await?;
    debug!(success = resp.success, "primary post_order");
    Ok(resp)
}

async fn cancel_order(client: &reqwest::Client, base_url: &str, order_id: &str) -> anyhow::Result<bool> {
    #[derive(Deserialize)]
    struct Resp {
        #[serde(default)]
        success: bool,
    }
    let resp: Resp = client
        .delete(format!("{base_url}/order/{order_id}"))
        .send()
        .await?
        .json()
        .await?;
    Ok(resp.success)
}

async fn cancel_all(
    client: &reqwest::Client,
    base_url: &str,
    market_filter: Option<&str>,
) -> anyhow::Result<usize> {
    #[derive(Deserialize)]
    struct Resp {
        #[serde(default)]
        cancelled: Vec<String>,
    }
    let mut req = client.delete(format!("{base_url}/orders"));
    if let Some(m) = market_filter {
        req = req.query(&[("market", m)]);
    }
    let resp: Resp = req.send().await?.json().await?;
    Ok(resp.cancelled.len())
}

async fn list_open_orders(
    client: &reqwest::Client,
    base_url: &str,
    venue: Venue,
) -> anyhow::Result<Vec<OpenOrder>> {
    #[derive(Deserialize)]
    struct WireOpenOrder {
        id: String,
        market: String,
        #[serde(rename = "tokenId")]
        token_id: Option<String>,
        side: String,
        price: String,
        #[serde(rename = "originalSize")]
        original_size: String,
        #[serde(rename = "sizeMatched")]
        size_matched: String,
        status: String,
    }
    let orders: Vec<WireOpenOrder> = client
        .get(format!("{base_url}/orders"))
        .send()
        .await?
        .json()
        .await?;

    Ok(orders
        .into_iter()
        .filter_map(|o| {
            Some(OpenOrder {
                order_id: o.id,
                venue,
                market: o.market,
                instrument: o.token_id,
                side: if o.side.eq_ignore_ascii_case("BUY") {
                    Side::Buy
                } else {
                    Side::Sell
                },
                price: o.price.parse().ok()?,
                original_size: o.original_size.parse().ok()?,
                filled_size: o.size_matched.parse().unwrap_or(Decimal::ZERO),
                discipline: Discipline::Gtc,
                status: match o.status.as_str() {
                    "LIVE" => OrderStatus::Open,
                    "MATCHED" | "FILLED" => OrderStatus::Filled,
                    "CANCELLED" => OrderStatus::Cancelled,
                    _ => OrderStatus::Open,
                },
                created_at: std::time::Instant::now(),
                expiration: None,
                transaction_hash: None,
                fill_status: None,
            })
        })
        .collect())
}

async fn fetch_tick_size(client: &reqwest::Client, base_url: &str, instrument: &str) -> Result<Decimal, ExecError> {
    #[derive(Deserialize)]
    struct Resp {
        #[serde(rename = "minimumTickSize")]
        tick: String,
    }
    let resp: Resp = client
        .get(format!("{base_url}/markets/{instrument}/tick"))
        .send()
        .await
        .map_err(|e| ExecError::Unknown(e.to_string()))?
        .json()
        .await
        .map_err(|e| ExecError::Unknown(e.to_string()))?;
    resp.tick
        .parse()
        .map_err(|_| ExecError::Unknown(format!("malformed tick size {}", resp.tick)))
}

async fn fetch_neg_risk(client: &reqwest::Client, base_url: &str, instrument: &str) -> Result<bool, ExecError> {
    #[derive(Deserialize)]
    struct Resp {
        #[serde(rename = "negRisk", default)]
        neg_risk: bool,
    }
    let resp: Resp = client
        .get(format!("{base_url}/markets/{instrument}"))
        .send()
        .await
        .map_err(|e| ExecError::Unknown(e.to_string()))?
        .json()
        .await
        .map_err(|e| ExecError::Unknown(e.to_string()))?;
    Ok(resp.neg_risk)
}

async fn fetch_fee_bps(client: &reqwest::Client, base_url: &str, instrument: &str) -> anyhow::Result<u64> {
    #[derive(Deserialize)]
    struct Resp {
        #[serde(rename = "feeRateBps")]
        fee_rate_bps: u64,
    }
    let resp: Resp = client
        .get(format!("{base_url}/markets/{instrument}/fee-rate"))
        .send()
        .await?
        .json()
        .await?;
    Ok(resp.fee_rate_bps)
}

async fn fetch_orderbook(client: &reqwest::Client, base_url: &str, instrument: &str) -> anyhow::Result<Orderbook> {
    #[derive(Deserialize)]
    struct WireLevel {
        price: String,
        size: String,
    }
    #[derive(Deserialize)]
    struct Resp {
        bids: Vec<WireLevel>,
        asks: Vec<WireLevel>,
    }
    let resp: Resp = client
        .get(format!("{base_url}/book?token_id={instrument}"))
        .send()
        .await?
        .json()
        .await?;

    let parse = |levels: Vec<WireLevel>| -> Vec<PriceLevel> {
        levels
            .into_iter()
            .filter_map(|l| {
                Some(PriceLevel {
                    price: l.price.parse().ok()?,
                    size: l.size.parse().ok()?,
                })
            })
            .collect()
    };
    let bids = parse(resp.bids);
    let asks = parse(resp.asks);
    let mid_price = match (bids.first(), asks.first()) {
        (Some(b), Some(a)) => Some((b.price + a.price) / 2.0),
        _ => None,
    };
    Ok(Orderbook { bids, asks, mid_price })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> PrimaryAdapterConfig {
        PrimaryAdapterConfig {
            base_url: "https://example.invalid".into(),
            api_key: "key".into(),
            maker: Address::ZERO,
            operator: Address::ZERO,
            exchange_address: Address::ZERO,
            neg_risk_exchange_address: Address::from([1u8; 20]),
        }
    }

    fn test_signer() -> OrderSigner {
        use alloy::signers::local::PrivateKeySigner;
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        OrderSigner::new(PrivateKeySigner::from_str(key).unwrap())
    }

    fn sample_req() -> OrderRequest {
        use crate::types::SignatureType;
        OrderRequest {
            venue: Venue::Primary,
            market: "m".into(),
            instrument: Some("1".into()),
            side: Side::Buy,
            price: dec!(0.42),
            size: Decimal::from(100),
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
    async fn buy_amounts_match_spec_example_a() {
        let adapter = PrimaryAdapter::new(test_cfg(), test_signer());
        let req = sample_req();
        let (order, _contract, _sig) = adapter
            .assemble_and_sign(&req, "1", false, DEFAULT_FEE_BPS_STANDARD)
            .await
            .unwrap();
        assert_eq!(order.maker_amount, U256::from(42_000_000u64));
        assert_eq!(order.taker_amount, U256::from(100_000_000u64));
        assert_eq!(order.side, OrderSide::Buy);
    }

    #[tokio::test]
    async fn sell_amounts_are_reversed() {
        let adapter = PrimaryAdapter::new(test_cfg(), test_signer());
        let mut req = sample_req();
        req.side = Side::Sell;
        let (order, _contract, _sig) = adapter
            .assemble_and_sign(&req, "1", false, DEFAULT_FEE_BPS_STANDARD)
            .await
            .unwrap();
        assert_eq!(order.maker_amount, U256::from(100_000_000u64));
        assert_eq!(order.taker_amount, U256::from(42_000_000u64));
    }

    #[tokio::test]
    async fn neg_risk_selects_alternate_contract() {
        let adapter = PrimaryAdapter::new(test_cfg(), test_signer());
        let req = sample_req();
        let (_order, contract, _sig) = adapter
            .assemble_and_sign(&req, "1", true, DEFAULT_FEE_BPS_NEG_RISK)
            .await
            .unwrap();
        assert_eq!(contract, adapter.cfg.neg_risk_exchange_address);
    }

    #[test]
    fn salts_are_distinct_across_calls() {
        let adapter = PrimaryAdapter::new(test_cfg(), test_signer());
        let a = adapter.next_salt();
        let b = adapter.next_salt();
        assert_ne!(a, b);
    }
}
