//! Error types
//!
//! `CycleError` is what a per-instrument pass returns to the runner; every
//! variant means "skip this instrument for this cycle", none is fatal.

use thiserror::Error;

/// Exchange gateway failures
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network, timeout or connection failures
    #[error("transport error: {0}")]
    Transport(String),
    /// Exchange answered with a business error (e.g. insufficient margin)
    #[error("exchange error: {0}")]
    Exchange(String),
    /// Response could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
    /// Unknown symbol or market
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience alias for gateway results
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Reasoning oracle failures
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),
    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("oracle response could not be decoded: {0}")]
    Decode(String),
    #[error("oracle returned an empty reply")]
    EmptyReply,
}

/// Startup configuration errors (fatal)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
    #[error("{left} and {right} must have the same number of entries")]
    LengthMismatch { left: String, right: String },
    #[error("duplicate instrument symbol: {0}")]
    DuplicateSymbol(String),
    #[error("config file error: {0}")]
    File(String),
}

/// Reasons a single instrument's pass ends early
#[derive(Debug, Error)]
pub enum CycleError {
    /// Snapshot or position read failed
    #[error("[{symbol}] data unavailable at {stage}: {reason}")]
    DataUnavailable {
        symbol: String,
        stage: &'static str,
        reason: String,
    },
    /// Oracle call failed; not retried this cycle
    #[error("[{symbol}] reasoning oracle unavailable: {reason}")]
    OracleUnavailable { symbol: String, reason: String },
    /// No parse strategy recovered a structured payload
    #[error("[{symbol}] could not parse decision: {reason}")]
    DecisionParseFailure {
        symbol: String,
        reason: String,
        raw_reply: String,
    },
    /// Payload parsed but fields are out of their domain
    #[error("[{symbol}] invalid decision fields: {reason}")]
    InvalidDecisionFields { symbol: String, reason: String },
    /// Exchange rejected or errored on an order
    #[error("[{symbol}] order execution failed on {leg}: {reason}{}", filled_note(.filled))]
    OrderExecutionFailure {
        symbol: String,
        leg: String,
        reason: String,
        /// Legs that filled before the failure
        filled: Vec<String>,
    },
}

fn filled_note(filled: &[String]) -> String {
    if filled.is_empty() {
        String::new()
    } else {
        format!(" (already filled: {})", filled.join(", "))
    }
}

impl CycleError {
    /// Pipeline stage the error came from
    pub fn stage(&self) -> &'static str {
        match self {
            CycleError::DataUnavailable { stage, .. } => *stage,
            CycleError::OracleUnavailable { .. } => "oracle",
            CycleError::DecisionParseFailure { .. } => "parse",
            CycleError::InvalidDecisionFields { .. } => "validation",
            CycleError::OrderExecutionFailure { .. } => "execution",
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            CycleError::DataUnavailable { symbol, .. }
            | CycleError::OracleUnavailable { symbol, .. }
            | CycleError::DecisionParseFailure { symbol, .. }
            | CycleError::InvalidDecisionFields { symbol, .. }
            | CycleError::OrderExecutionFailure { symbol, .. } => symbol,
        }
    }

    pub(crate) fn data(symbol: &str, stage: &'static str, err: impl std::fmt::Display) -> Self {
        CycleError::DataUnavailable {
            symbol: symbol.to_string(),
            stage,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_stage_and_symbol() {
        let err = CycleError::data("BTC/USDT", "snapshot", GatewayError::Transport("timeout".into()));
        assert_eq!(err.stage(), "snapshot");
        assert_eq!(err.symbol(), "BTC/USDT");
        assert!(err.to_string().contains("transport error: timeout"));

        let err = CycleError::OrderExecutionFailure {
            symbol: "ETH/USDT".to_string(),
            leg: "open short".to_string(),
            reason: "insufficient margin".to_string(),
            filled: vec!["close long".to_string()],
        };
        assert_eq!(err.stage(), "execution");
        assert_eq!(
            err.to_string(),
            "[ETH/USDT] order execution failed on open short: insufficient margin (already filled: close long)"
        );
    }
}
