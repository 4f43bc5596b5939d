//! NegRiskYield venue adapter (V4, spec §4.1) — per-order EIP-712 signing
//! like Primary, but cancellation requires the order's neg-risk/yield-bearing
//! flag pair, which this adapter tracks locally and falls back to a list
//! query for when it wasn't the one that placed the order.

use std::collections::HashMap;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::ExecError;
use crate::nonce::NonceGenerator;
use crate::signer::{OrderSide, OrderSigner, UnsignedOrder};
use crate::types::{OpenOrder, OrderRequest, OrderResult, OrderStatus, Orderbook, Side, Venue};
use crate::venues::VenueAdapter;

#[derive(Debug, Clone, Copy)]
pub struct NegRiskFlags {
    pub neg_risk: bool,
    pub yield_bearing: bool,
}

pub struct NegRiskAdapterConfig {
    pub base_url: String,
    pub api_key: String,
    pub maker: Address,
    pub operator: Address,
    pub exchange_address: Address,
}

pub struct NegRiskAdapter {
    client: reqwest::Client,
    cfg: NegRiskAdapterConfig,
    signer: OrderSigner,
    nonce: NonceGenerator,
    /// orderId -> flag pair, required by the venue's cancel-one endpoint.
    flags: RwLock<HashMap<String, NegRiskFlags>>,
}

impl NegRiskAdapter {
    pub fn new(cfg: NegRiskAdapterConfig, signer: OrderSigner) -> Self {
        Self {
            client: reqwest::Client::new(),
            cfg,
            signer,
            nonce: NonceGenerator::new(),
            flags: RwLock::new(HashMap::new()),
        }
    }

    async fn flags_for(&self, order_id: &str) -> Option<NegRiskFlags> {
        if let Some(f) = self.flags.read().await.get(order_id).copied() {
            return Some(f);
        }
        // Not an order we placed ourselves — query the venue's open-order
        // list and cache the result before cancelling, per spec §4.1 V4.
        // The list endpoint does not echo the flag pair itself, so a cold
        // cancel conservatively assumes neg-risk without yield.
        let open = self.list_open().await;
        open.iter().find(|o| o.order_id == order_id)?;
        let flags = NegRiskFlags {
            neg_risk: true,
            yield_bearing: false,
        };
        self.flags.write().await.insert(order_id.to_string(), flags);
        Some(flags)
    }
}

#[async_trait]
impl VenueAdapter for NegRiskAdapter {
    async fn place(&self, req: OrderRequest) -> OrderResult {
        let instrument = match &req.instrument {
            Some(i) => i.clone(),
            None => return OrderResult::rejected(ExecError::InvalidSize("instrument required".into())),
        };
        let token_id = match U256::from_str(&instrument) {
            Ok(t) => t,
            Err(_) => {
                return OrderResult::rejected(ExecError::InvalidSize(format!(
                    "instrument {instrument} is not a valid tokenId"
                )))
            }
        };

        let rounded_size = (req.size * dec!(100)).round() / dec!(100);
        let rounded_price = (req.price * dec!(100)).round() / dec!(100);
        let notional_usdc = rounded_size * rounded_price * dec!(1_000_000);
        let shares_usdc = rounded_size * dec!(1_000_000);

        let to_u256 = |d: Decimal| -> Option<U256> {
            use rust_decimal::prelude::ToPrimitive;
            d.round().to_u128().map(U256::from)
        };
        let (maker_amount, taker_amount) = match req.side {
            Side::Buy => (to_u256(notional_usdc), to_u256(shares_usdc)),
            Side::Sell => (to_u256(shares_usdc), to_u256(notional_usdc)),
        };
        let (maker_amount, taker_amount) = match (maker_amount, taker_amount) {
            (Some(m), Some(t)) => (m, t),
            _ => return OrderResult::rejected(ExecError::InvalidSize("amount overflow".into())),
        };

        let order = UnsignedOrder {
            salt: self.nonce.next(),
            maker: self.cfg.maker,
            signer: self.signer.address(),
            taker: self.cfg.operator,
            token_id,
            maker_amount,
            taker_amount,
            expiration: req.expiration.unwrap_or(0),
            nonce: self.nonce.next(),
            fee_rate_bps: 25,
            side: match req.side {
                Side::Buy => OrderSide::Buy,
                Side::Sell => OrderSide::Sell,
            },
            signature_type: req.signature_type,
        };

        let signature = match self.signer.sign(&order, self.cfg.exchange_address).await {
            Ok(sig) => sig,
            Err(e) => return OrderResult::rejected(ExecError::Unknown(format!("signing failed: {e}"))),
        };

        #[derive(serde::Serialize)]
        struct Body<'a> {
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
            nonce: String,
            #[serde(rename = "negRisk")]
            neg_risk: bool,
            #[serde(rename = "yieldBearing")]
            yield_bearing: bool,
            signature: String,
            owner: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            success: bool,
            #[serde(rename = "orderID")]
            order_id: Option<String>,
            #[serde(rename = "errorMsg")]
            error_msg: Option<String>,
        }

        let yield_bearing = req.yield_bearing;
        let body = Body {
            salt: order.salt,
            maker: format!("{:#x}", order.maker),
            signer: format!("{:#x}", order.signer),
            taker: format!("{:#x}", order.taker),
            token_id: order.token_id.to_string(),
            maker_amount: order.maker_amount.to_string(),
            taker_amount: order.taker_amount.to_string(),
            nonce: order.nonce.to_string(),
            neg_risk: req.neg_risk,
            yield_bearing,
            signature,
            owner: &self.cfg.api_key,
        };

        let resp = self
            .client
            .post(format!("{}/order", self.cfg.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e: reqwest::Error| e.to_string());

        match resp {
            Ok(http_resp) => match http_resp.json::<Resp>().await {
                Ok(parsed) if parsed.success => {
                    let order_id = parsed.order_id.unwrap_or_default();
                    self.flags.write().await.insert(
                        order_id.clone(),
                        NegRiskFlags {
                            neg_risk: req.neg_risk,
                            yield_bearing,
                        },
                    );
                    OrderResult::accepted(order_id, OrderStatus::Open)
                }
                Ok(parsed) => OrderResult::rejected(ExecError::from_upstream(
                    parsed.error_msg.unwrap_or_else(|| "order rejected".into()),
                )),
                Err(e) => OrderResult::rejected(ExecError::Unknown(e.to_string())),
            },
            Err(e) => OrderResult::rejected(ExecError::Unknown(e)),
        }
    }

    async fn cancel(&self, order_id: &str) -> bool {
        let Some(flags) = self.flags_for(order_id).await else {
            warn!(order_id, "negrisk cancel: flag pair unresolvable, refusing to cancel");
            return false;
        };

        #[derive(serde::Serialize)]
        struct Body {
            #[serde(rename = "negRisk")]
            neg_risk: bool,
            #[serde(rename = "yieldBearing")]
            yield_bearing: bool,
        }
        let body = Body {
            neg_risk: flags.neg_risk,
            yield_bearing: flags.yield_bearing,
        };

        let ok = self
            .client
            .delete(format!("{}/order/{order_id}", self.cfg.base_url))
            .json(&body)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        if ok {
            self.flags.write().await.remove(order_id);
        }
        ok
    }

    async fn cancel_all(&self, market_filter: Option<&str>) -> usize {
        let open = self.list_open().await;
        let mut cancelled = 0;
        for order in open {
            if let Some(filter) = market_filter {
                if order.market != filter {
                    continue;
                }
            }
            if self.cancel(&order.order_id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    async fn list_open(&self) -> Vec<OpenOrder> {
        #[derive(serde::Deserialize)]
        struct Wire {
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
        }
        let Ok(resp) = self.client.get(format!("{}/orders", self.cfg.base_url)).send().await else {
            return Vec::new();
        };
        let Ok(orders) = resp.json::<Vec<Wire>>().await else {
            return Vec::new();
        };
        orders
            .into_iter()
            .filter_map(|o| {
                Some(OpenOrder {
                    order_id: o.id,
                    venue: Venue::NegRiskYield,
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
                    discipline: crate::types::Discipline::Gtc,
                    status: OrderStatus::Open,
                    created_at: std::time::Instant::now(),
                    expiration: None,
                    transaction_hash: None,
                    fill_status: None,
                })
            })
            .collect()
    }

    async fn get_orderbook(&self, _instrument: &str) -> Option<Orderbook> {
        None
    }

    async fn get_price(&self, _instrument: &str) -> Option<Decimal> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> NegRiskAdapterConfig {
        NegRiskAdapterConfig {
            base_url: "https://example.invalid".into(),
            api_key: "k".into(),
            maker: Address::ZERO,
            operator: Address::ZERO,
            exchange_address: Address::ZERO,
        }
    }

    fn test_signer() -> OrderSigner {
        use alloy::signers::local::PrivateKeySigner;
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        OrderSigner::new(PrivateKeySigner::from_str(key).unwrap())
    }

    #[tokio::test]
    async fn cancel_without_known_flags_and_unreachable_list_fails_closed() {
        let adapter = NegRiskAdapter::new(cfg(), test_signer());
        let ok = adapter.cancel("unknown-order").await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn placed_order_flags_are_cached_for_cancel() {
        let adapter = NegRiskAdapter::new(cfg(), test_signer());
        adapter
            .flags
            .write()
            .await
            .insert("o1".to_string(), NegRiskFlags { neg_risk: true, yield_bearing: true });
        let flags = adapter.flags_for("o1").await.unwrap();
        assert!(flags.neg_risk);
        assert!(flags.yield_bearing);
    }
}
