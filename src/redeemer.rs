//! Auto-Redeemer (component #11, spec §4.10) — periodic sweep that claims
//! resolved positions and marks out losing sides, via the standard CTF
//! contract or the neg-risk adapter depending on each position's flag.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::evm::{ContractCall, EvmProvider};

const POLYGON_CHAIN_ID: u64 = 137;
const ZERO_COLLECTION_ID: &str = "0x0000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone)]
pub struct Position {
    pub condition_id: String,
    pub token_id: String,
    pub size: Decimal,
    pub neg_risk: bool,
}

/// The venue's authenticated positions endpoint (spec §4.10 step 1) —
/// modeled as a trait for the same reason `FeedProvider`/`EvmProvider` are:
/// the core never owns the venue's auth/session machinery directly.
#[async_trait]
pub trait PositionsProvider: Send + Sync {
    async fn get_positions(&self) -> anyhow::Result<Vec<Position>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    Expired,
    Success,
    Failed,
    NotYetResolved,
}

#[derive(Debug, Clone)]
pub struct RedeemerConfig {
    pub ctf_address: String,
    pub neg_risk_adapter_address: String,
    pub owner_address: String,
    pub sweep_interval: Duration,
}

struct Inner {
    redeemed: HashSet<String>,
    pending: Vec<String>,
}

pub struct AutoRedeemer {
    positions: Arc<dyn PositionsProvider>,
    evm: Arc<dyn EvmProvider>,
    cfg: RedeemerConfig,
    inner: RwLock<Inner>,
    sweep_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AutoRedeemer {
    pub fn new(positions: Arc<dyn PositionsProvider>, evm: Arc<dyn EvmProvider>, cfg: RedeemerConfig) -> Arc<Self> {
        Arc::new(Self {
            positions,
            evm,
            cfg,
            inner: RwLock::new(Inner { redeemed: HashSet::new(), pending: Vec::new() }),
            sweep_task: Mutex::new(None),
        })
    }

    pub async fn redeemed_conditions(&self) -> Vec<String> {
        self.inner.read().await.redeemed.iter().cloned().collect()
    }

    pub async fn pending_conditions(&self) -> Vec<String> {
        self.inner.read().await.pending.clone()
    }

    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.sweep_task.lock().await;
        if guard.is_some() {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.cfg.sweep_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = this.sweep_once().await {
                    warn!(error = %e, "redeemer sweep failed to fetch positions");
                }
            }
        });
        *guard = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.sweep_task.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn sweep_once(&self) -> anyhow::Result<Vec<(String, RedeemOutcome)>> {
        let positions = self.positions.get_positions().await?;
        let mut outcomes = Vec::new();
        for position in positions {
            if position.size <= Decimal::ZERO {
                continue;
            }
            if self.inner.read().await.redeemed.contains(&position.condition_id) {
                continue;
            }
            let outcome = self.process_position(&position).await;
            outcomes.push((position.condition_id, outcome));
        }
        Ok(outcomes)
    }

    async fn process_position(&self, position: &Position) -> RedeemOutcome {
        match self.payout_denominator(&position.condition_id).await {
            Ok(d) if d > 0 => {}
            Ok(_) => return RedeemOutcome::NotYetResolved,
            Err(e) => {
                warn!(condition_id = %position.condition_id, error = %e, "payoutDenominator read failed");
                return RedeemOutcome::NotYetResolved;
            }
        };

        let balance = match self.token_balance(&position.token_id).await {
            Ok(b) => b,
            Err(e) => {
                warn!(condition_id = %position.condition_id, error = %e, "balance read failed");
                return RedeemOutcome::NotYetResolved;
            }
        };

        if balance == Decimal::ZERO {
            self.inner.write().await.redeemed.insert(position.condition_id.clone());
            info!(condition_id = %position.condition_id, "position_expired");
            return RedeemOutcome::Expired;
        }

        match self.submit_redemption(position).await {
            Ok(()) => {
                let mut inner = self.inner.write().await;
                inner.redeemed.insert(position.condition_id.clone());
                inner.pending.retain(|c| c != &position.condition_id);
                info!(condition_id = %position.condition_id, "redemption_success");
                RedeemOutcome::Success
            }
            Err(e) => {
                warn!(condition_id = %position.condition_id, error = %e, "redemption_failed");
                let mut inner = self.inner.write().await;
                if !inner.pending.contains(&position.condition_id) {
                    inner.pending.push(position.condition_id.clone());
                }
                RedeemOutcome::Failed
            }
        }
    }

    async fn payout_denominator(&self, condition_id: &str) -> anyhow::Result<u64> {
        let call = ContractCall {
            chain: POLYGON_CHAIN_ID,
            address: self.cfg.ctf_address.clone(),
            abi: payout_denominator_abi(),
            method: "payoutDenominator".to_string(),
            args: vec![json!(condition_id)],
        };
        let value = self.evm.call_contract(call).await?;
        Ok(value.as_u64().or_else(|| value.as_str().and_then(|s| s.parse().ok())).unwrap_or(0))
    }

    async fn token_balance(&self, token_id: &str) -> anyhow::Result<Decimal> {
        let call = ContractCall {
            chain: POLYGON_CHAIN_ID,
            address: self.cfg.ctf_address.clone(),
            abi: balance_of_abi(),
            method: "balanceOf".to_string(),
            args: vec![json!(self.cfg.owner_address), json!(token_id)],
        };
        let value = self.evm.call_contract(call).await?;
        let raw = value.as_u64().or_else(|| value.as_str().and_then(|s| s.parse().ok())).unwrap_or(0);
        Ok(Decimal::from(raw))
    }

    async fn submit_redemption(&self, position: &Position) -> anyhow::Result<()> {
        let (address, args) = if position.neg_risk {
            (
                self.cfg.neg_risk_adapter_address.clone(),
                vec![json!(position.condition_id), json!([1, 2])],
            )
        } else {
            (
                self.cfg.ctf_address.clone(),
                vec![json!(ZERO_COLLECTION_ID), json!(position.condition_id), json!([1, 2])],
            )
        };

        let call = ContractCall {
            chain: POLYGON_CHAIN_ID,
            address,
            abi: redeem_positions_abi(),
            method: "redeemPositions".to_string(),
            args,
        };

        let result = self.evm.write_contract(call).await?;
        if result.success {
            Ok(())
        } else {
            anyhow::bail!(result.error.unwrap_or_else(|| "redemption reverted".to_string()))
        }
    }
}

fn payout_denominator_abi() -> serde_json::Value {
    json!([{
        "name": "payoutDenominator",
        "type": "function",
        "inputs": [{ "name": "conditionId", "type": "bytes32" }],
        "outputs": [{ "name": "", "type": "uint256" }],
    }])
}

fn balance_of_abi() -> serde_json::Value {
    json!([{
        "name": "balanceOf",
        "type": "function",
        "inputs": [
            { "name": "account", "type": "address" },
            { "name": "id", "type": "uint256" }
        ],
        "outputs": [{ "name": "", "type": "uint256" }],
    }])
}

fn redeem_positions_abi() -> serde_json::Value {
    json!([{
        "name": "redeemPositions",
        "type": "function",
        "inputs": [
            { "name": "parentCollectionId", "type": "bytes32" },
            { "name": "conditionId", "type": "bytes32" },
            { "name": "indexSets", "type": "uint256[]" }
        ],
        "outputs": [],
    }])
}
