//! Core types for the decision loop
//!
//! These types define the contract between the snapshot builder, the decision
//! pipeline, the sizing calculator and the reconciler.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::Timeframe;

/// One completed OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    /// True when the bar closed above its open
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Open-to-close move in percent (zero for a zero open)
    pub fn change_pct(&self) -> Decimal {
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        (self.close - self.open) / self.open * Decimal::ONE_HUNDRED
    }
}

/// Market data read for one instrument in one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Instrument symbol (e.g. "BTC/USDT")
    pub symbol: String,
    /// Sampling period the bars were fetched at
    pub timeframe: Timeframe,
    /// Last close
    pub price: Decimal,
    /// High of the latest bar
    pub high: Decimal,
    /// Low of the latest bar
    pub low: Decimal,
    /// Volume of the latest bar
    pub volume: Decimal,
    /// Percent change of the latest close vs. the previous close
    pub price_change_pct: Decimal,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Most recent bars, oldest first
    pub recent_bars: Vec<Bar>,
}

impl MarketSnapshot {
    /// Base asset of the symbol ("BTC" for "BTC/USDT")
    pub fn base_asset(&self) -> &str {
        self.symbol.split('/').next().unwrap_or(&self.symbol)
    }
}

/// Direction of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Open position as reported by the exchange
///
/// A flat instrument has no record; `size` is always positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute position size
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Signed amount (positive long, negative short)
    pub position_amt: Decimal,
}

impl PositionRecord {
    /// Build a record from a signed position amount. Returns `None` when flat.
    pub fn from_signed_amount(
        symbol: impl Into<String>,
        position_amt: Decimal,
        entry_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> Option<Self> {
        if position_amt.is_zero() {
            return None;
        }
        let side = if position_amt.is_sign_positive() {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        Some(Self {
            symbol: symbol.into(),
            side,
            size: position_amt.abs(),
            entry_price,
            unrealized_pnl,
            position_amt,
        })
    }

    /// Human readable description used in prompts and logs
    pub fn describe(&self) -> String {
        let side = match self.side {
            PositionSide::Long => "Long",
            PositionSide::Short => "Short",
        };
        format!(
            "{} position, size: {}, entry price: ${:.2}, unrealized PnL: ${:.2} USDT",
            side, self.size, self.entry_price, self.unrealized_pnl
        )
    }
}

/// Describe an optional position ("No position" when flat)
pub fn describe_position(position: Option<&PositionRecord>) -> String {
    position
        .map(PositionRecord::describe)
        .unwrap_or_else(|| "No position".to_string())
}

/// Trading signal returned by the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Signal::Buy),
            "SELL" => Some(Signal::Sell),
            "HOLD" => Some(Signal::Hold),
            _ => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

/// Oracle confidence in its signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Confidence::High),
            "MEDIUM" => Some(Confidence::Medium),
            "LOW" => Some(Confidence::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "HIGH"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::Low => write!(f, "LOW"),
        }
    }
}

/// Validated trading decision for one instrument in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub signal: Signal,
    /// Free-text rationale
    pub reason: String,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub confidence: Confidence,
    /// Oracle's own risk narrative
    pub risk_assessment: Option<String>,
    /// Recommended allocation in percent of equity (unclamped)
    pub position_percentage: Option<Decimal>,
    /// Free-form reasoning that preceded the structured section, if any
    pub reasoning: Option<String>,
    /// Timestamp of the snapshot this decision was derived from
    pub timestamp: DateTime<Utc>,
}
