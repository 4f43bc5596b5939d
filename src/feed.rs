//! Market-data feed collaborator interface (spec §6, explicitly out of
//! scope as a *component* — the Execution Core only ever reaches a feed
//! through this trait, never via a concrete WebSocket/REST client).

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Orderbook, Venue};

/// A handle returned by [`FeedProvider::subscribe_price`]; dropping or
/// calling `unsubscribe` detaches the callback. Mirrors the
/// `subscribePrice(...) -> unsubscribe` shape from spec §6.
pub struct PriceSubscriptionHandle {
    unsubscribe: Box<dyn FnOnce() + Send>,
}

impl PriceSubscriptionHandle {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Box::new(unsubscribe),
        }
    }

    pub fn unsubscribe(self) {
        (self.unsubscribe)();
    }
}

#[async_trait]
pub trait FeedProvider: Send + Sync {
    async fn get_orderbook(&self, venue: Venue, market: &str) -> Option<Orderbook>;
    async fn get_price(&self, venue: Venue, market: &str) -> Option<Decimal>;

    /// Registers `callback` to be invoked on every price tick for
    /// `market_or_instrument` on `venue`. The Trigger Manager (component
    /// #10) is the primary consumer; it never talks to a feed transport
    /// directly.
    fn subscribe_price(
        &self,
        venue: Venue,
        market_or_instrument: &str,
        callback: Box<dyn Fn(f64) + Send + Sync>,
    ) -> PriceSubscriptionHandle;
}
