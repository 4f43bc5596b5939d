//! Vault-signed venue adapter (V3, spec §4.1) — delegates signing to an
//! external vault/multi-sig SDK the engine does not own; this adapter's job
//! is passing the vault address through and rate-gating outbound calls.
//!
//! The SDK boundary mirrors [`crate::feed::FeedProvider`] /
//! [`crate::evm::EvmProvider`]: a trait the caller implements, never a
//! concrete client this crate links against.

use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::errors::ExecError;
use crate::types::{OpenOrder, OrderRequest, OrderResult, OrderStatus, Orderbook, Venue};
use crate::venues::VenueAdapter;

/// Minimum inter-request gap for this venue's externally-rate-limited API
/// (spec §5 "~14 req/s for V3").
const MIN_REQUEST_GAP: Duration = Duration::from_millis(1000 / 14);

#[async_trait]
pub trait VaultSigningProvider: Send + Sync {
    async fn place(&self, vault_address: &str, req: &OrderRequest) -> anyhow::Result<OrderResult>;
    async fn cancel(&self, vault_address: &str, order_id: &str) -> anyhow::Result<bool>;
    async fn cancel_all(&self, vault_address: &str, market_filter: Option<&str>) -> anyhow::Result<usize>;
    async fn list_open(&self, vault_address: &str) -> anyhow::Result<Vec<OpenOrder>>;
    async fn get_orderbook(&self, instrument: &str) -> anyhow::Result<Orderbook>;
    async fn get_price(&self, instrument: &str) -> anyhow::Result<Decimal>;
}

/// Monotonic-clock gate: blocks the caller until at least `MIN_REQUEST_GAP`
/// has elapsed since the last call returned.
struct RateGate {
    last: StdMutex<Option<Instant>>,
}

impl RateGate {
    fn new() -> Self {
        Self {
            last: StdMutex::new(None),
        }
    }

    async fn wait(&self) {
        let delay = {
            let mut last = self.last.lock().expect("rate gate mutex poisoned");
            let now = Instant::now();
            let delay = match *last {
                Some(prev) if now.duration_since(prev) < MIN_REQUEST_GAP => {
                    MIN_REQUEST_GAP - now.duration_since(prev)
                }
                _ => Duration::ZERO,
            };
            *last = Some(now + delay);
            delay
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

pub struct VaultAdapter {
    vault_address: String,
    sdk: std::sync::Arc<dyn VaultSigningProvider>,
    gate: RateGate,
    /// Serializes the gate's wait-then-call sequence so concurrent callers
    /// don't both observe a stale `last` and burst past the limit.
    call_lock: Mutex<()>,
}

impl VaultAdapter {
    pub fn new(vault_address: String, sdk: std::sync::Arc<dyn VaultSigningProvider>) -> Self {
        Self {
            vault_address,
            sdk,
            gate: RateGate::new(),
            call_lock: Mutex::new(()),
        }
    }

    async fn gated<T, F, Fut>(&self, call: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let _guard = self.call_lock.lock().await;
        self.gate.wait().await;
        call().await
    }
}

#[async_trait]
impl VenueAdapter for VaultAdapter {
    async fn place(&self, req: OrderRequest) -> OrderResult {
        let sdk = self.sdk.clone();
        let vault = self.vault_address.clone();
        match self.gated(|| async move { sdk.place(&vault, &req).await }).await {
            Ok(result) => result,
            Err(e) => OrderResult::rejected(ExecError::Unknown(e.to_string())),
        }
    }

    async fn cancel(&self, order_id: &str) -> bool {
        let sdk = self.sdk.clone();
        let vault = self.vault_address.clone();
        let order_id = order_id.to_string();
        self.gated(|| async move { sdk.cancel(&vault, &order_id).await })
            .await
            .unwrap_or(false)
    }

    async fn cancel_all(&self, market_filter: Option<&str>) -> usize {
        let sdk = self.sdk.clone();
        let vault = self.vault_address.clone();
        let market_filter = market_filter.map(str::to_string);
        self.gated(|| async move { sdk.cancel_all(&vault, market_filter.as_deref()).await })
            .await
            .unwrap_or(0)
    }

    async fn list_open(&self) -> Vec<OpenOrder> {
        let sdk = self.sdk.clone();
        let vault = self.vault_address.clone();
        self.gated(|| async move { sdk.list_open(&vault).await })
            .await
            .unwrap_or_default()
    }

    async fn get_orderbook(&self, instrument: &str) -> Option<Orderbook> {
        self.sdk.get_orderbook(instrument).await.ok()
    }

    async fn get_price(&self, instrument: &str) -> Option<Decimal> {
        self.sdk.get_price(instrument).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FailingSdk;

    #[async_trait]
    impl VaultSigningProvider for FailingSdk {
        async fn place(&self, _vault: &str, _req: &OrderRequest) -> anyhow::Result<OrderResult> {
            anyhow::bail!("vault SDK unreachable")
        }
        async fn cancel(&self, _vault: &str, _id: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn cancel_all(&self, _vault: &str, _m: Option<&str>) -> anyhow::Result<usize> {
            Ok(0)
        }
        async fn list_open(&self, _vault: &str) -> anyhow::Result<Vec<OpenOrder>> {
            Ok(vec![])
        }
        async fn get_orderbook(&self, _i: &str) -> anyhow::Result<Orderbook> {
            anyhow::bail!("no book")
        }
        async fn get_price(&self, _i: &str) -> anyhow::Result<Decimal> {
            anyhow::bail!("no price")
        }
    }

    #[tokio::test]
    async fn sdk_failures_surface_as_rejected_result() {
        use crate::types::{Discipline, Side, SignatureType};
        let adapter = VaultAdapter::new("0xvault".into(), Arc::new(FailingSdk));
        let req = OrderRequest {
            venue: Venue::VaultSigned,
            market: "m".into(),
            instrument: None,
            side: Side::Buy,
            price: rust_decimal_macros::dec!(0.5),
            size: Decimal::from(10),
            discipline: Discipline::Gtc,
            expiration: None,
            post_only: false,
            neg_risk: false,
            yield_bearing: false,
            per_order_max_slippage: None,
            signature_type: SignatureType::Eoa,
        };
        let result = adapter.place(req).await;
        assert!(!result.success);
        assert_eq!(result.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn rate_gate_spaces_out_consecutive_calls() {
        let gate = RateGate::new();
        let start = Instant::now();
        gate.wait().await;
        gate.wait().await;
        assert!(start.elapsed() >= MIN_REQUEST_GAP);
    }
}
