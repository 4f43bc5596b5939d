//! Smart Router (component #7, spec §4.6) — quotes every enabled venue in
//! parallel, scores the quotes by the caller's chosen mode, and optionally
//! plans a multi-venue split.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;

use crate::feed::FeedProvider;
use crate::types::{OrderRequest, Side, Venue};

#[derive(Debug, Clone, Copy)]
pub struct VenueFees {
    pub maker_bps: f64,
    pub taker_bps: f64,
}

impl Default for VenueFees {
    fn default() -> Self {
        Self { maker_bps: 0.0, taker_bps: 20.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub venue: Venue,
    pub price: f64,
    pub available_size: f64,
    pub estimated_fees: f64,
    pub net_price: f64,
    pub slippage: f64,
    pub execution_time_ms: u64,
    pub is_maker: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    BestPrice,
    BestLiquidity,
    LowestFee,
    Balanced,
}

/// Scoring weights for `RouteMode::Balanced` (spec §4.6 step 2). Exposed so
/// callers can override the literal constants from the spec's worked
/// example without forking the router.
#[derive(Debug, Clone, Copy)]
pub struct RouterWeights {
    pub price_weight: f64,
    pub liquidity_weight: f64,
    pub fee_weight: f64,
    pub liquidity_norm: f64,
    pub fee_norm: f64,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            price_weight: 0.5,
            liquidity_weight: 0.3,
            fee_weight: 0.2,
            liquidity_norm: 10_000.0,
            fee_norm: 100.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_slippage: f64,
    pub allow_splitting: bool,
    pub max_split_platforms: usize,
    pub min_split_improvement_pct: f64,
    pub prefer_maker: bool,
    pub weights: RouterWeights,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_slippage: 0.02,
            allow_splitting: false,
            max_split_platforms: 3,
            min_split_improvement_pct: 0.5,
            prefer_maker: false,
            weights: RouterWeights::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitLeg {
    pub venue: Venue,
    pub size: f64,
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub best: Option<Quote>,
    pub split_routes: Option<Vec<SplitLeg>>,
}

pub struct SmartRouter {
    feed: Arc<dyn FeedProvider>,
    fees: HashMap<Venue, VenueFees>,
    cfg: RouterConfig,
}

impl SmartRouter {
    pub fn new(feed: Arc<dyn FeedProvider>, fees: HashMap<Venue, VenueFees>, cfg: RouterConfig) -> Self {
        Self { feed, fees, cfg }
    }

    /// Quotes every venue in `venues` in parallel and discards any whose
    /// walked-book slippage exceeds `cfg.max_slippage`.
    pub async fn quote_all(&self, venues: &[Venue], market: &str, req: &OrderRequest) -> Vec<Quote> {
        let futures = venues.iter().map(|&venue| {
            let market = market.to_string();
            async move { self.quote_one(venue, &market, req).await }
        });
        let quotes = futures::future::join_all(futures).await;
        quotes
            .into_iter()
            .flatten()
            .filter(|q| q.slippage <= self.cfg.max_slippage)
            .collect()
    }

    async fn quote_one(&self, venue: Venue, market: &str, req: &OrderRequest) -> Option<Quote> {
        let book = self.feed.get_orderbook(venue, market).await?;
        let size = req.size.to_f64().unwrap_or(0.0);
        let levels = match req.side {
            Side::Buy => &book.asks,
            Side::Sell => &book.bids,
        };
        let mid = book.mid_price.unwrap_or_else(|| match (book.best_bid(), book.best_ask()) {
            (Some(b), Some(a)) => (b + a) / 2.0,
            _ => 0.5,
        });

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
        if filled <= 0.0 {
            return None;
        }
        let price = cost / filled;
        let slippage = match req.side {
            Side::Buy => ((price - mid) / mid).max(0.0),
            Side::Sell => ((mid - price) / mid).max(0.0),
        };

        let fees = self.fees.get(&venue).copied().unwrap_or_default();
        let is_maker = self.cfg.prefer_maker
            && match req.side {
                Side::Buy => book.best_ask().map(|a| req.price.to_f64().unwrap_or(0.0) < a).unwrap_or(false),
                Side::Sell => book.best_bid().map(|b| req.price.to_f64().unwrap_or(0.0) > b).unwrap_or(false),
            };
        let fee_bps = if is_maker { fees.maker_bps } else { fees.taker_bps };
        let estimated_fees = price * filled * (fee_bps / 10_000.0);
        let net_price = match req.side {
            Side::Buy => price + estimated_fees / filled.max(1e-9),
            Side::Sell => price - estimated_fees / filled.max(1e-9),
        };

        Some(Quote {
            venue,
            price,
            available_size: filled,
            estimated_fees,
            net_price,
            slippage,
            execution_time_ms: 0,
            is_maker,
        })
    }

    pub fn select(&self, quotes: &[Quote], mode: RouteMode, side: Side) -> Option<Quote> {
        if quotes.is_empty() {
            return None;
        }
        match mode {
            RouteMode::BestPrice => quotes
                .iter()
                .copied()
                .min_by(|a, b| {
                    let (a, b) = match side {
                        Side::Buy => (a.net_price, b.net_price),
                        Side::Sell => (-a.net_price, -b.net_price),
                    };
                    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
                }),
            RouteMode::BestLiquidity => quotes
                .iter()
                .copied()
                .max_by(|a, b| a.available_size.partial_cmp(&b.available_size).unwrap_or(std::cmp::Ordering::Equal)),
            RouteMode::LowestFee => quotes
                .iter()
                .copied()
                .min_by(|a, b| a.estimated_fees.partial_cmp(&b.estimated_fees).unwrap_or(std::cmp::Ordering::Equal)),
            RouteMode::Balanced => quotes
                .iter()
                .copied()
                .max_by(|a, b| {
                    self.balanced_score(a, side)
                        .partial_cmp(&self.balanced_score(b, side))
                        .unwrap_or(std::cmp::Ordering::Equal)
                }),
        }
    }

    fn balanced_score(&self, q: &Quote, side: Side) -> f64 {
        let w = &self.cfg.weights;
        let price_term = match side {
            Side::Buy => -q.net_price,
            Side::Sell => q.net_price,
        };
        w.price_weight * price_term
            + w.liquidity_weight * (q.available_size / w.liquidity_norm)
            + w.fee_weight * (-q.estimated_fees / w.fee_norm)
    }

    /// Greedily fills from best to worst net price across up to
    /// `max_split_platforms` venues, accepting the split only if it beats
    /// the best single route by `min_split_improvement_pct` percent.
    pub fn plan_split(&self, quotes: &[Quote], side: Side, total_size: f64) -> Option<Vec<SplitLeg>> {
        if !self.cfg.allow_splitting || quotes.len() < 2 {
            return None;
        }
        let mut ranked: Vec<Quote> = quotes.to_vec();
        ranked.sort_by(|a, b| match side {
            Side::Buy => a.net_price.partial_cmp(&b.net_price).unwrap_or(std::cmp::Ordering::Equal),
            Side::Sell => b.net_price.partial_cmp(&a.net_price).unwrap_or(std::cmp::Ordering::Equal),
        });

        let best_single_cost = ranked.first()?.net_price * total_size;

        let mut remaining = total_size;
        let mut legs = Vec::new();
        let mut split_cost = 0.0;
        for quote in ranked.iter().take(self.cfg.max_split_platforms) {
            if remaining <= 0.0 {
                break;
            }
            let take = remaining.min(quote.available_size);
            if take <= 0.0 {
                continue;
            }
            legs.push(SplitLeg { venue: quote.venue, size: take, price: quote.net_price });
            split_cost += take * quote.net_price;
            remaining -= take;
        }
        if remaining > 1e-9 || legs.len() < 2 {
            return None;
        }

        let improvement_pct = match side {
            Side::Buy => (best_single_cost - split_cost) / best_single_cost.abs().max(1e-9) * 100.0,
            Side::Sell => (split_cost - best_single_cost) / best_single_cost.abs().max(1e-9) * 100.0,
        };
        if improvement_pct < self.cfg.min_split_improvement_pct {
            return None;
        }
        Some(legs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::types::{Orderbook, PriceLevel};

    struct MultiFeed {
        books: HashMap<Venue, Orderbook>,
    }

    #[async_trait]
    impl FeedProvider for MultiFeed {
        async fn get_orderbook(&self, venue: Venue, _market: &str) -> Option<Orderbook> {
            self.books.get(&venue).cloned()
        }
        async fn get_price(&self, _v: Venue, _m: &str) -> Option<rust_decimal::Decimal> {
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

    fn book(ask: f64) -> Orderbook {
        Orderbook {
            bids: vec![PriceLevel { price: ask - 0.02, size: 500.0 }],
            asks: vec![PriceLevel { price: ask, size: 500.0 }],
            mid_price: Some(ask - 0.01),
        }
    }

    fn req() -> OrderRequest {
        use crate::types::{Discipline, SignatureType};
        OrderRequest {
            venue: Venue::Primary,
            market: "m".into(),
            instrument: Some("t".into()),
            side: Side::Buy,
            price: rust_decimal_macros::dec!(0.50),
            size: rust_decimal::Decimal::from(100),
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
    async fn best_price_picks_cheapest_buy() {
        let mut books = HashMap::new();
        books.insert(Venue::Primary, book(0.52));
        books.insert(Venue::Exchange, book(0.50));
        let router = SmartRouter::new(Arc::new(MultiFeed { books }), HashMap::new(), RouterConfig::default());
        let quotes = router.quote_all(&[Venue::Primary, Venue::Exchange], "m", &req()).await;
        let best = router.select(&quotes, RouteMode::BestPrice, Side::Buy).unwrap();
        assert_eq!(best.venue, Venue::Exchange);
    }

    #[tokio::test]
    async fn slippage_filter_drops_expensive_quotes() {
        let mut books = HashMap::new();
        books.insert(Venue::Primary, book(0.80));
        let mut cfg = RouterConfig::default();
        cfg.max_slippage = 0.001;
        let router = SmartRouter::new(Arc::new(MultiFeed { books }), HashMap::new(), cfg);
        let quotes = router.quote_all(&[Venue::Primary], "m", &req()).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn split_not_offered_below_improvement_threshold() {
        let mut books = HashMap::new();
        books.insert(Venue::Primary, book(0.50));
        books.insert(Venue::Exchange, book(0.5001));
        let mut cfg = RouterConfig::default();
        cfg.allow_splitting = true;
        cfg.min_split_improvement_pct = 50.0;
        let router = SmartRouter::new(Arc::new(MultiFeed { books }), HashMap::new(), cfg);
        let quotes = router.quote_all(&[Venue::Primary, Venue::Exchange], "m", &req()).await;
        let split = router.plan_split(&quotes, Side::Buy, 200.0);
        assert!(split.is_none());
    }
}
