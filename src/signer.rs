//! EIP-712 domain hashing + secp256k1 signing for the Primary venue
//! (component #2, ~6% of the budget).
//!
//! The teacher's `Cargo.toml` already pulls in the full `alloy-signer-local`
//! / `alloy-sol-types` / `alloy-primitives` stack; the teacher itself never
//! exercises it directly because `polymarket::executor` delegates signing to
//! a hosted SDK (`polymarket-client-sdk`). This module is the from-scratch
//! replacement the spec requires: it reproduces the exact type string from
//! spec §6 via `alloy_sol_types::sol!` and signs with a local
//! `PrivateKeySigner`.

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer as _;
use alloy_primitives::{Address, U256};
use alloy_sol_types::{eip712_domain, sol, SolStruct};

use crate::types::SignatureType;

sol! {
    #[derive(Debug)]
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy = 0,
    Sell = 1,
}

#[derive(Debug, Clone)]
pub struct UnsignedOrder {
    pub salt: u64,
    pub maker: Address,
    pub signer: Address,
    pub taker: Address,
    pub token_id: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub expiration: u64,
    pub nonce: u64,
    pub fee_rate_bps: u64,
    pub side: OrderSide,
    pub signature_type: SignatureType,
}

const EXCHANGE_NAME: &str = "Primary CTF Exchange";
const EXCHANGE_VERSION: &str = "1";
const CHAIN_ID: u64 = 137;

pub struct OrderSigner {
    signer: PrivateKeySigner,
}

impl OrderSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Produces a `0x`-prefixed `r || s || v` signature over the order's
    /// EIP-712 signing hash for the given exchange contract.
    pub async fn sign(
        &self,
        order: &UnsignedOrder,
        verifying_contract: Address,
    ) -> anyhow::Result<String> {
        let domain = eip712_domain! {
            name: EXCHANGE_NAME,
            version: EXCHANGE_VERSION,
            chain_id: CHAIN_ID,
            verifying_contract: verifying_contract,
        };

        let sol_order = Order {
            salt: U256::from(order.salt),
            maker: order.maker,
            signer: order.signer,
            taker: order.taker,
            tokenId: order.token_id,
            makerAmount: order.maker_amount,
            takerAmount: order.taker_amount,
            expiration: U256::from(order.expiration),
            nonce: U256::from(order.nonce),
            feeRateBps: U256::from(order.fee_rate_bps),
            side: order.side as u8,
            signatureType: order.signature_type as u8,
        };

        let signing_hash = sol_order.eip712_signing_hash(&domain);
        let signature = self.signer.sign_hash(&signing_hash).await?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn test_signer() -> OrderSigner {
        // Well-known Anvil/Hardhat test key #0. Never used on mainnet.
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let signer = PrivateKeySigner::from_str(key).unwrap();
        OrderSigner::new(signer)
    }

    fn sample_order() -> UnsignedOrder {
        UnsignedOrder {
            salt: 12345,
            maker: Address::ZERO,
            signer: Address::ZERO,
            taker: Address::ZERO,
            token_id: U256::from(1u64),
            maker_amount: U256::from(42_000_000u64),
            taker_amount: U256::from(100_000_000u64),
            expiration: 0,
            nonce: 1,
            fee_rate_bps: 0,
            side: OrderSide::Buy,
            signature_type: SignatureType::Eoa,
        }
    }

    #[tokio::test]
    async fn signature_is_deterministic_and_well_formed() {
        let signer = test_signer();
        let order = sample_order();
        let verifying_contract = Address::ZERO;

        let sig1 = signer.sign(&order, verifying_contract).await.unwrap();
        let sig2 = signer.sign(&order, verifying_contract).await.unwrap();

        assert_eq!(sig1, sig2, "ECDSA signing is deterministic (RFC6979)");
        assert!(sig1.starts_with("0x"));
        // r(32) + s(32) + v(1) = 65 bytes = 130 hex chars + "0x".
        assert_eq!(sig1.len(), 2 + 130);
    }

    #[tokio::test]
    async fn different_orders_produce_different_signatures() {
        let signer = test_signer();
        let mut order = sample_order();
        let verifying_contract = Address::ZERO;

        let sig1 = signer.sign(&order, verifying_contract).await.unwrap();
        order.nonce += 1;
        let sig2 = signer.sign(&order, verifying_contract).await.unwrap();

        assert_ne!(sig1, sig2);
    }
}
