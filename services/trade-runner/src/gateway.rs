//! Exchange gateway capability
//!
//! Every call is a single round trip against the account. Implementations own
//! their own timeouts, rate limits and signing.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::Timeframe;
use crate::error::GatewayResult;
use crate::types::{Bar, PositionRecord};

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Exchange acknowledgement of a submitted market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
}

/// Trait for the exchange account the runner trades on
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Most recent completed bars, oldest first
    async fn fetch_recent_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> GatewayResult<Vec<Bar>>;

    /// All open positions keyed by configured symbol; flat symbols are absent
    async fn fetch_all_positions(&self) -> GatewayResult<HashMap<String, PositionRecord>>;

    /// Total account equity in the settlement currency
    async fn fetch_equity(&self) -> GatewayResult<Decimal>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()>;

    async fn market_buy(&self, symbol: &str, quantity: Decimal) -> GatewayResult<OrderAck>;

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> GatewayResult<OrderAck>;

    /// Decimal places allowed in an order quantity
    async fn quantity_precision(&self, symbol: &str) -> GatewayResult<u32>;

    /// Name used in logs
    fn name(&self) -> &str;

    /// Submit a market order on either side
    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> GatewayResult<OrderAck> {
        match side {
            OrderSide::Buy => self.market_buy(symbol, quantity).await,
            OrderSide::Sell => self.market_sell(symbol, quantity).await,
        }
    }
}

/// Map an exchange position symbol onto the configured key.
///
/// Perpetual markets report `BASE/QUOTE:SETTLE`; instruments are configured as
/// `BASE/QUOTE`.
pub fn normalize_symbol(exchange_symbol: &str) -> &str {
    exchange_symbol
        .split(':')
        .next()
        .unwrap_or(exchange_symbol)
}
