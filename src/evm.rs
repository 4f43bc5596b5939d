//! EVM RPC collaborator interface (spec §6). The Execution Core calls only
//! this trait's three methods — `call_contract` (read), `write_contract`
//! (on-chain tx), and `usdc_allowance` (ERC-20 `allowance` read) — never a
//! concrete provider. The Auto-Redeemer (component #11) and
//! `Execution::approve_usdc`/`get_usdc_allowance` are the two consumers.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ContractCall {
    pub chain: u64,
    pub address: String,
    pub abi: Value,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait EvmProvider: Send + Sync {
    async fn call_contract(&self, call: ContractCall) -> anyhow::Result<Value>;
    async fn write_contract(&self, call: ContractCall) -> anyhow::Result<TxResult>;

    /// Reads ERC-20 `allowance(owner, spender)` on Polygon and returns
    /// dollars (the raw wei value divided by 1e6 — USDC has 6 decimals).
    async fn usdc_allowance(&self, owner: &str, spender: &str) -> anyhow::Result<Decimal>;
}
