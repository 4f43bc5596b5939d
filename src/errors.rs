//! Closed error taxonomy surfaced to strategy callers.
//!
//! Every rejection the engine can produce — pre-trade, venue-side, or
//! engine-local — collapses into one of these variants. `Display` renders
//! the `[CODE] message` prefix the wire contract (`OrderResult.error`)
//! expects.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("[INVALID_PRICE] {0}")]
    InvalidPrice(String),

    #[error("[INVALID_SIZE] {0}")]
    InvalidSize(String),

    #[error("[INVALID_TICK_SIZE] {0}")]
    InvalidTickSize(String),

    #[error("[INSUFFICIENT_BALANCE] {0}")]
    InsufficientBalance(String),

    #[error("[MARKET_HALTED] {0}")]
    MarketHalted(String),

    #[error("[INVALID_NONCE] {0}")]
    InvalidNonce(String),

    #[error("[ORDER_WOULD_MATCH] {0}")]
    OrderWouldMatch(String),

    #[error("[SLIPPAGE_EXCEEDED] {0}")]
    SlippageExceeded(String),

    #[error("[CIRCUIT_BREAKER_TRIPPED] {0}")]
    CircuitBreakerTripped(String),

    #[error("[UNKNOWN] {0}")]
    Unknown(String),
}

impl ExecError {
    /// True for errors that must never be retried by the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExecError::InvalidNonce(_))
    }

    /// Map a venue's raw error string into the closed taxonomy. Venues speak
    /// different dialects; each adapter calls this with its own mapping
    /// table first and falls back here only for genuinely unrecognized text.
    pub fn from_upstream(message: impl Into<String>) -> Self {
        let message = message.into();
        let upper = message.to_uppercase();
        if upper.contains("TICK") {
            ExecError::InvalidTickSize(message)
        } else if upper.contains("BALANCE") || upper.contains("INSUFFICIENT") {
            ExecError::InsufficientBalance(message)
        } else if upper.contains("HALTED") || upper.contains("PAUSED") {
            ExecError::MarketHalted(message)
        } else if upper.contains("NONCE") {
            ExecError::InvalidNonce(message)
        } else if upper.contains("WOULD_MATCH") || upper.contains("CROSS") {
            ExecError::OrderWouldMatch(message)
        } else {
            ExecError::Unknown(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_match_wire_contract() {
        assert_eq!(
            ExecError::InvalidPrice("too low".into()).to_string(),
            "[INVALID_PRICE] too low"
        );
        assert_eq!(
            ExecError::Unknown("venue exploded".into()).to_string(),
            "[UNKNOWN] venue exploded"
        );
    }

    #[test]
    fn upstream_mapping_recognizes_known_strings() {
        assert!(matches!(
            ExecError::from_upstream("INVALID_TICK_SIZE: bad price"),
            ExecError::InvalidTickSize(_)
        ));
        assert!(matches!(
            ExecError::from_upstream("market is halted for review"),
            ExecError::MarketHalted(_)
        ));
        assert!(matches!(
            ExecError::from_upstream("totally new venue error"),
            ExecError::Unknown(_)
        ));
    }

    #[test]
    fn only_invalid_nonce_is_non_fatal() {
        assert!(!ExecError::InvalidNonce("stale".into()).is_fatal());
        assert!(ExecError::InvalidPrice("x".into()).is_fatal());
    }
}
