//! Venue adapters (component #1, spec §4.1) — per-venue translation of the
//! generic [`OrderRequest`](crate::types::OrderRequest) into each exchange's
//! wire format, behind one shared [`VenueAdapter`] trait.

pub mod exchange;
pub mod negrisk;
pub mod primary;
pub mod vault;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{OpenOrder, OrderRequest, OrderResult, Orderbook};

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub order_id: String,
    pub success: bool,
}

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    async fn place(&self, req: OrderRequest) -> OrderResult;

    /// Default batch implementation is sequential placement — venues with a
    /// native batch endpoint (Primary up to 15, Exchange up to 20) override
    /// this. A single per-order failure must not abort the remainder (spec
    /// §4.5 batching policy).
    async fn place_batch(&self, reqs: Vec<OrderRequest>) -> Vec<OrderResult> {
        let mut out = Vec::with_capacity(reqs.len());
        for req in reqs {
            out.push(self.place(req).await);
        }
        out
    }

    async fn cancel(&self, order_id: &str) -> bool;

    async fn cancel_batch(&self, order_ids: Vec<String>) -> Vec<CancelOutcome> {
        let mut out = Vec::with_capacity(order_ids.len());
        for id in order_ids {
            let success = self.cancel(&id).await;
            out.push(CancelOutcome { order_id: id, success });
        }
        out
    }

    async fn cancel_all(&self, market_filter: Option<&str>) -> usize;
    async fn list_open(&self) -> Vec<OpenOrder>;
    async fn get_orderbook(&self, instrument: &str) -> Option<Orderbook>;
    async fn get_price(&self, instrument: &str) -> Option<Decimal>;
}

/// Splits a batch of requests by venue, preserving each request's original
/// index so results can be spliced back in input order — the splice half of
/// spec §4.5's batching policy.
pub fn partition_by_venue(reqs: Vec<OrderRequest>) -> Vec<(crate::types::Venue, Vec<(usize, OrderRequest)>)> {
    use crate::types::Venue;
    use std::collections::HashMap;

    let mut groups: HashMap<Venue, Vec<(usize, OrderRequest)>> = HashMap::new();
    for (idx, req) in reqs.into_iter().enumerate() {
        groups.entry(req.venue).or_default().push((idx, req));
    }
    groups.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Discipline, Side, SignatureType, Venue};
    use rust_decimal_macros::dec;

    fn req(venue: Venue) -> OrderRequest {
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

    #[test]
    fn partition_groups_by_venue_and_preserves_index() {
        let reqs = vec![req(Venue::Primary), req(Venue::Exchange), req(Venue::Primary)];
        let groups = partition_by_venue(reqs);
        let total: usize = groups.iter().map(|(_, v)| v.len()).sum();
        assert_eq!(total, 3);
        let primary_indices: Vec<usize> = groups
            .iter()
            .find(|(v, _)| *v == Venue::Primary)
            .unwrap()
            .1
            .iter()
            .map(|(i, _)| *i)
            .collect();
        assert_eq!(primary_indices, vec![0, 2]);
    }
}
