//! Shared order domain types.
//!
//! Mirrors the teacher's `polymarket::types` wire structs (`OrderParams`,
//! `SignedOrder`, `PostOrderRequest`, `OrderResponse`) but generalizes the
//! request/result pair across all four venues instead of hard-coding the
//! primary CLOB.

use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    /// EIP-712 signed orders, tick/negRisk/fee caches, postOnly pre-check.
    Primary,
    /// API-key HMAC, cents-denominated prices, amend-in-place.
    Exchange,
    /// Delegates signing to an external vault/multi-sig SDK.
    VaultSigned,
    /// Per-order EIP-712 signing with a negRisk/yield-bearing flag pair.
    NegRiskYield,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    Gtc,
    Gtd,
    Fok,
    Fak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    Eoa = 0,
    Proxy = 1,
    Safe = 2,
}

/// A high-level trading intent before it is translated into a venue-native
/// signed order. Field availability differs per venue (e.g. `signature_type`
/// only matters to `Primary`/`NegRiskYield`); adapters ignore fields that
/// don't apply to them.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub venue: Venue,
    pub market: String,
    pub instrument: Option<String>,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub discipline: Discipline,
    /// Only meaningful with `Discipline::Gtd`.
    pub expiration: Option<u64>,
    pub post_only: bool,
    pub neg_risk: bool,
    /// V4-only: whether this order should be placed against the
    /// yield-bearing collateral variant. Ignored by every other venue.
    pub yield_bearing: bool,
    pub per_order_max_slippage: Option<f64>,
    pub signature_type: SignatureType,
}

impl OrderRequest {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    Cancelled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// §3 invariant: status only advances forward through this order.
    fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Open => 1,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired
            | OrderStatus::Rejected => 2,
        }
    }

    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        next.rank() >= self.rank()
    }
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub filled_size: Option<Decimal>,
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub error: Option<String>,
    pub transaction_hash: Option<String>,
}

impl OrderResult {
    pub fn rejected(err: crate::errors::ExecError) -> Self {
        Self {
            success: false,
            order_id: None,
            filled_size: None,
            avg_fill_price: None,
            status: OrderStatus::Rejected,
            error: Some(err.to_string()),
            transaction_hash: None,
        }
    }

    pub fn accepted(order_id: String, status: OrderStatus) -> Self {
        Self {
            success: true,
            order_id: Some(order_id),
            filled_size: None,
            avg_fill_price: None,
            status,
            error: None,
            transaction_hash: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// Unknown/absent prior state; only `Failed` is allowed to overwrite it
    /// at priority 0, per spec §3.
    Matched = 1,
    Mined = 2,
    Confirmed = 3,
    Failed = 0,
}

impl FillStatus {
    pub fn priority(self) -> u8 {
        self as u8
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FillStatus::Confirmed | FillStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub venue: Venue,
    pub market: String,
    pub instrument: Option<String>,
    pub side: Side,
    pub price: Decimal,
    pub original_size: Decimal,
    pub filled_size: Decimal,
    pub discipline: Discipline,
    pub status: OrderStatus,
    pub created_at: Instant,
    pub expiration: Option<u64>,
    pub transaction_hash: Option<String>,
    pub fill_status: Option<FillStatus>,
}

impl OpenOrder {
    pub fn remaining_size(&self) -> Decimal {
        self.original_size - self.filled_size
    }
}

#[derive(Debug, Clone)]
pub struct TrackedFill {
    pub order_id: String,
    pub venue: Venue,
    pub market: String,
    pub instrument: Option<String>,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub status: FillStatus,
    pub transaction_hash: Option<String>,
    pub venue_timestamp: Option<u64>,
    pub received_at: Instant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orderbook {
    /// Descending by price.
    pub bids: Vec<PriceLevel>,
    /// Ascending by price.
    pub asks: Vec<PriceLevel>,
    pub mid_price: Option<f64>,
}

impl Orderbook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn is_consistent(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b <= a,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStatus {
    Resolved,
    Pending,
    Disputed,
}

#[derive(Debug, Clone)]
pub struct PendingSettlement {
    pub condition_id: String,
    pub instrument_id: String,
    pub size: Decimal,
    pub claimable: Decimal,
    pub resolution_status: ResolutionStatus,
    pub resolved_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_cannot_move_backward() {
        assert!(OrderStatus::Pending.can_advance_to(OrderStatus::Open));
        assert!(OrderStatus::Open.can_advance_to(OrderStatus::Filled));
        assert!(!OrderStatus::Filled.can_advance_to(OrderStatus::Open));
        assert!(!OrderStatus::Cancelled.can_advance_to(OrderStatus::Pending));
    }

    #[test]
    fn fill_status_priority_orders_confirmed_above_matched() {
        assert!(FillStatus::Confirmed.priority() > FillStatus::Matched.priority());
        assert!(FillStatus::Matched.priority() > FillStatus::Failed.priority());
    }

    #[test]
    fn remaining_size_matches_original_minus_filled() {
        let order = OpenOrder {
            order_id: "o1".into(),
            venue: Venue::Primary,
            market: "m".into(),
            instrument: None,
            side: Side::Buy,
            price: Decimal::new(42, 2),
            original_size: Decimal::from(100),
            filled_size: Decimal::from(30),
            discipline: Discipline::Gtc,
            status: OrderStatus::Open,
            created_at: Instant::now(),
            expiration: None,
            transaction_hash: None,
            fill_status: None,
        };
        assert_eq!(order.remaining_size(), Decimal::from(70));
    }
}
