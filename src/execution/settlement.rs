//! USDC settlement helpers (spec §4.5) — `getPendingSettlements`,
//! `approveUSDC`, `getUSDCAllowance`, all thin wrappers over the
//! caller-supplied [`EvmProvider`].

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use crate::evm::{ContractCall, EvmProvider, TxResult};
use crate::types::{PendingSettlement, ResolutionStatus};

const POLYGON_CHAIN_ID: u64 = 137;
const USDC_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

pub struct SettlementService {
    evm: Arc<dyn EvmProvider>,
    spender: String,
}

impl SettlementService {
    pub fn new(evm: Arc<dyn EvmProvider>, spender: String) -> Self {
        Self { evm, spender }
    }

    pub async fn get_usdc_allowance(&self, owner: &str) -> anyhow::Result<Decimal> {
        self.evm.usdc_allowance(owner, &self.spender).await
    }

    pub async fn approve_usdc(&self, owner: &str, amount: Option<Decimal>) -> TxResult {
        let amount = amount.unwrap_or(dec!(1_000_000_000));
        let raw_units = (amount * dec!(1_000_000)).round();

        let call = ContractCall {
            chain: POLYGON_CHAIN_ID,
            address: USDC_ADDRESS.to_string(),
            abi: erc20_approve_abi(),
            method: "approve".to_string(),
            args: vec![json!(self.spender), json!(raw_units.to_string())],
        };
        let _ = owner;

        match self.evm.write_contract(call).await {
            Ok(result) => result,
            Err(e) => TxResult {
                success: false,
                tx_hash: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Lists positions with a positive `payoutDenominator`-backed claimable
    /// amount (spec §4.10 step 2); returns an empty list if `positions` is
    /// empty rather than polling — the Auto-Redeemer owns the sweep cadence.
    pub fn pending_from_positions(
        &self,
        positions: &[(String, String, Decimal, Decimal, ResolutionStatus)],
    ) -> Vec<PendingSettlement> {
        positions
            .iter()
            .filter(|(_, _, _, claimable, status)| *claimable > Decimal::ZERO && *status == ResolutionStatus::Resolved)
            .map(|(condition_id, instrument_id, size, claimable, status)| PendingSettlement {
                condition_id: condition_id.clone(),
                instrument_id: instrument_id.clone(),
                size: *size,
                claimable: *claimable,
                resolution_status: *status,
                resolved_at: None,
            })
            .collect()
    }
}

fn erc20_approve_abi() -> serde_json::Value {
    json!([{
        "name": "approve",
        "type": "function",
        "inputs": [
            { "name": "spender", "type": "address" },
            { "name": "amount", "type": "uint256" }
        ],
        "outputs": [{ "name": "", "type": "bool" }],
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    struct MockEvm {
        allowance: Decimal,
    }

    #[async_trait]
    impl EvmProvider for MockEvm {
        async fn call_contract(&self, _call: ContractCall) -> anyhow::Result<Value> {
            Ok(json!(null))
        }
        async fn write_contract(&self, _call: ContractCall) -> anyhow::Result<TxResult> {
            Ok(TxResult {
                success: true,
                tx_hash: Some("0xabc".into()),
                error: None,
            })
        }
        async fn usdc_allowance(&self, _owner: &str, _spender: &str) -> anyhow::Result<Decimal> {
            Ok(self.allowance)
        }
    }

    #[tokio::test]
    async fn allowance_passes_through() {
        let svc = SettlementService::new(Arc::new(MockEvm { allowance: dec!(42) }), "0xspender".into());
        assert_eq!(svc.get_usdc_allowance("0xowner").await.unwrap(), dec!(42));
    }

    #[tokio::test]
    async fn approve_returns_tx_hash_on_success() {
        let svc = SettlementService::new(Arc::new(MockEvm { allowance: dec!(0) }), "0xspender".into());
        let result = svc.approve_usdc("0xowner", Some(dec!(100))).await;
        assert!(result.success);
        assert_eq!(result.tx_hash.as_deref(), Some("0xabc"));
    }

    #[test]
    fn pending_filters_nonpositive_and_unresolved() {
        let svc = SettlementService::new(Arc::new(MockEvm { allowance: dec!(0) }), "0xspender".into());
        let positions = vec![
            ("c1".to_string(), "i1".to_string(), dec!(10), dec!(5), ResolutionStatus::Resolved),
            ("c2".to_string(), "i2".to_string(), dec!(10), dec!(0), ResolutionStatus::Resolved),
            ("c3".to_string(), "i3".to_string(), dec!(10), dec!(5), ResolutionStatus::Pending),
        ];
        let pending = svc.pending_from_positions(&positions);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].condition_id, "c1");
    }
}
