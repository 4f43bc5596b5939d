//! Pre-trade validation pipeline (component #3, spec §4.2).
//!
//! Every `place` runs this ordered gate and stops at the first rejection.
//! All failures here are fatal — the caller must change the request, not
//! retry it verbatim.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::circuit_breaker::CircuitBreaker;
use crate::errors::ExecError;
use crate::types::{Discipline, OrderRequest, Venue};

pub const MIN_PRICE: Decimal = dec!(0.01);
pub const MAX_PRICE: Decimal = dec!(0.99);

pub struct Validators<'a> {
    pub max_order_size: Decimal,
    pub circuit_breaker: Option<&'a CircuitBreaker>,
}

impl<'a> Validators<'a> {
    pub fn new(max_order_size: Decimal, circuit_breaker: Option<&'a CircuitBreaker>) -> Self {
        Self {
            max_order_size,
            circuit_breaker,
        }
    }

    /// Runs the ordered gate from spec §4.2, steps 1-5. Tick-size and
    /// postOnly-cross checks (step 6) are venue-specific and run separately
    /// inside the Primary adapter, which has the cached tick size and
    /// orderbook this check needs.
    pub fn validate(&self, req: &OrderRequest) -> Result<(), ExecError> {
        if let Some(cb) = self.circuit_breaker {
            if !cb.can_trade() {
                let reason = cb
                    .tripped_reason()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "position/trade cap reached".to_string());
                return Err(ExecError::CircuitBreakerTripped(reason));
            }
        }

        if req.notional() > self.max_order_size {
            return Err(ExecError::InvalidSize(format!(
                "notional {} exceeds cap {}",
                req.notional(),
                self.max_order_size
            )));
        }

        if req.price < MIN_PRICE || req.price > MAX_PRICE {
            return Err(ExecError::InvalidPrice(format!(
                "price {} outside [{}, {}]",
                req.price, MIN_PRICE, MAX_PRICE
            )));
        }

        if req.size <= Decimal::ZERO {
            return Err(ExecError::InvalidSize(format!(
                "size {} must be positive",
                req.size
            )));
        }

        if req.discipline == Discipline::Gtd && req.expiration.is_none() {
            return Err(ExecError::InvalidSize(
                "GTD discipline requires an expiration".to_string(),
            ));
        }

        if req.venue != Venue::VaultSigned && req.instrument.is_none() {
            return Err(ExecError::InvalidSize(
                "instrument identifier required".to_string(),
            ));
        }

        Ok(())
    }

    /// Tick-size validation used by venues that publish a tick (Primary,
    /// NegRiskYield). Tolerance is 1% of the tick, per spec §3.
    pub fn validate_tick(price: Decimal, tick: Decimal) -> Result<(), ExecError> {
        if tick <= Decimal::ZERO {
            return Err(ExecError::InvalidTickSize("tick must be positive".into()));
        }
        let quotient = price / tick;
        let nearest = quotient.round();
        let drift = (quotient - nearest).abs() * tick;
        let tolerance = tick / dec!(100);
        if drift > tolerance {
            return Err(ExecError::InvalidTickSize(format!(
                "price {price} is not a multiple of tick {tick} (drift {drift} > tolerance {tolerance})"
            )));
        }
        Ok(())
    }

    /// PostOnly cross pre-check (spec §4.1.d): reject a buy that would meet
    /// or cross the best ask, or a sell that would meet or cross the best
    /// bid.
    pub fn validate_post_only(
        side: crate::types::Side,
        price: Decimal,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
    ) -> Result<(), ExecError> {
        use crate::types::Side;
        let price_f = price
            .to_string()
            .parse::<f64>()
            .unwrap_or(f64::NAN);
        match side {
            Side::Buy => {
                if let Some(ask) = best_ask {
                    if price_f >= ask {
                        return Err(ExecError::OrderWouldMatch(format!(
                            "buy {price} would cross best ask {ask}"
                        )));
                    }
                }
            }
            Side::Sell => {
                if let Some(bid) = best_bid {
                    if price_f <= bid {
                        return Err(ExecError::OrderWouldMatch(format!(
                            "sell {price} would cross best bid {bid}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, SignatureType};

    fn base_req() -> OrderRequest {
        OrderRequest {
            venue: Venue::Primary,
            market: "m".into(),
            instrument: Some("t1".into()),
            side: Side::Buy,
            price: dec!(0.42),
            size: Decimal::from(100),
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
    fn notional_cap_rejects_oversized_orders() {
        let v = Validators::new(dec!(10), None);
        assert!(v.validate(&base_req()).is_err());
    }

    #[test]
    fn price_out_of_range_is_rejected() {
        let v = Validators::new(dec!(10000), None);
        let mut req = base_req();
        req.price = dec!(1.00);
        assert!(matches!(v.validate(&req), Err(ExecError::InvalidPrice(_))));
    }

    #[test]
    fn zero_size_is_rejected() {
        let v = Validators::new(dec!(10000), None);
        let mut req = base_req();
        req.size = Decimal::ZERO;
        assert!(matches!(v.validate(&req), Err(ExecError::InvalidSize(_))));
    }

    #[test]
    fn happy_path_passes() {
        let v = Validators::new(dec!(10000), None);
        assert!(v.validate(&base_req()).is_ok());
    }

    #[test]
    fn tick_validation_allows_one_percent_drift() {
        let tick = dec!(0.01);
        assert!(Validators::validate_tick(dec!(0.42), tick).is_ok());
        // 0.4201 is within 1% of tick (0.0001) of a multiple.
        assert!(Validators::validate_tick(dec!(0.4201), tick).is_ok());
        assert!(Validators::validate_tick(dec!(0.425), tick).is_err());
    }

    #[test]
    fn post_only_buy_crossing_ask_is_rejected() {
        let res = Validators::validate_post_only(Side::Buy, dec!(0.50), Some(0.49), Some(0.50));
        assert!(matches!(res, Err(ExecError::OrderWouldMatch(_))));
    }

    #[test]
    fn post_only_buy_below_ask_is_allowed() {
        let res = Validators::validate_post_only(Side::Buy, dec!(0.48), Some(0.47), Some(0.50));
        assert!(res.is_ok());
    }
}
