//! Paper exchange - in-memory gateway for dry runs and tests
//!
//! Market orders fill instantly at the last known close and move the signed
//! position amount, so a post-trade position read reflects the fill.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Timeframe;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{normalize_symbol, ExchangeGateway, OrderAck, OrderSide};
use crate::types::{Bar, PositionRecord};

/// Precision used for symbols without an explicit one
const DEFAULT_PRECISION: u32 = 3;

#[derive(Debug, Default)]
struct PaperState {
    equity: Decimal,
    bars: HashMap<String, Vec<Bar>>,
    precision: HashMap<String, u32>,
    /// Signed amount and entry price per symbol
    positions: HashMap<String, (Decimal, Decimal)>,
    leverage: HashMap<String, u32>,
    orders: Vec<OrderAck>,
    failing_bars: HashSet<String>,
    failing_orders: HashSet<String>,
    fail_positions: bool,
    fail_equity: bool,
}

/// In-memory exchange account
#[derive(Debug, Default)]
pub struct PaperExchange {
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(equity: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                equity,
                ..PaperState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the bar series for a symbol (oldest first)
    pub fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.lock().bars.insert(symbol.to_string(), bars);
    }

    pub fn set_precision(&self, symbol: &str, precision: u32) {
        self.lock().precision.insert(symbol.to_string(), precision);
    }

    /// Seed a position (positive long, negative short, zero flat).
    /// Accepts exchange-style `BASE/QUOTE:SETTLE` symbols.
    pub fn set_position(&self, symbol: &str, amount: Decimal, entry_price: Decimal) {
        let mut state = self.lock();
        if amount.is_zero() {
            state.positions.remove(symbol);
        } else {
            state.positions.insert(symbol.to_string(), (amount, entry_price));
        }
    }

    pub fn fail_bars_for(&self, symbol: &str) {
        self.lock().failing_bars.insert(symbol.to_string());
    }

    pub fn reject_orders_for(&self, symbol: &str) {
        self.lock().failing_orders.insert(symbol.to_string());
    }

    pub fn fail_positions(&self, fail: bool) {
        self.lock().fail_positions = fail;
    }

    pub fn fail_equity(&self, fail: bool) {
        self.lock().fail_equity = fail;
    }

    /// Orders accepted so far, in submission order
    pub fn orders(&self) -> Vec<OrderAck> {
        self.lock().orders.clone()
    }

    pub fn leverage(&self, symbol: &str) -> Option<u32> {
        self.lock().leverage.get(symbol).copied()
    }

    fn fill(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> GatewayResult<OrderAck> {
        let mut state = self.lock();
        if state.failing_orders.contains(symbol) {
            return Err(GatewayError::Exchange(format!(
                "order rejected for {}: insufficient margin",
                symbol
            )));
        }
        if quantity <= Decimal::ZERO {
            return Err(GatewayError::Exchange(format!(
                "invalid quantity {} for {}",
                quantity, symbol
            )));
        }

        let price = state
            .bars
            .get(symbol)
            .and_then(|bars| bars.last())
            .map(|bar| bar.close)
            .unwrap_or(Decimal::ZERO);

        let delta = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        // Positions may have been seeded under the exchange-style key
        let key = state
            .positions
            .keys()
            .find(|k| normalize_symbol(k) == symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_string());

        let (amount, entry) = state
            .positions
            .get(&key)
            .copied()
            .unwrap_or((Decimal::ZERO, price));
        let new_amount = amount + delta;
        if new_amount.is_zero() {
            state.positions.remove(&key);
        } else {
            let entry = if amount.is_zero() || amount.is_sign_positive() != new_amount.is_sign_positive() {
                price
            } else {
                entry
            };
            state.positions.insert(key, (new_amount, entry));
        }

        let ack = OrderAck {
            order_id: format!("paper-{}", Uuid::new_v4()),
            symbol: symbol.to_string(),
            side,
            quantity,
        };
        state.orders.push(ack.clone());
        info!("Paper fill: {} {} {} @ {}", side, quantity, symbol, price);
        Ok(ack)
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn fetch_recent_bars(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        limit: usize,
    ) -> GatewayResult<Vec<Bar>> {
        let state = self.lock();
        if state.failing_bars.contains(symbol) {
            return Err(GatewayError::Transport(format!("klines request for {} timed out", symbol)));
        }
        let bars = state.bars.get(symbol).cloned().unwrap_or_default();
        let skip = bars.len().saturating_sub(limit);
        Ok(bars.into_iter().skip(skip).collect())
    }

    async fn fetch_all_positions(&self) -> GatewayResult<HashMap<String, PositionRecord>> {
        let state = self.lock();
        if state.fail_positions {
            return Err(GatewayError::Transport("positions request failed".to_string()));
        }
        let mut out = HashMap::new();
        for (symbol, (amount, entry)) in &state.positions {
            let key = normalize_symbol(symbol);
            let mark = state
                .bars
                .get(key)
                .and_then(|bars| bars.last())
                .map(|bar| bar.close)
                .unwrap_or(*entry);
            let pnl = (mark - *entry) * *amount;
            if let Some(record) = PositionRecord::from_signed_amount(key, *amount, *entry, pnl) {
                out.insert(key.to_string(), record);
            }
        }
        Ok(out)
    }

    async fn fetch_equity(&self) -> GatewayResult<Decimal> {
        let state = self.lock();
        if state.fail_equity {
            return Err(GatewayError::Transport("balance request failed".to_string()));
        }
        Ok(state.equity)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        debug!("Paper leverage {} -> {}x", symbol, leverage);
        self.lock().leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn market_buy(&self, symbol: &str, quantity: Decimal) -> GatewayResult<OrderAck> {
        self.fill(symbol, OrderSide::Buy, quantity)
    }

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> GatewayResult<OrderAck> {
        self.fill(symbol, OrderSide::Sell, quantity)
    }

    async fn quantity_precision(&self, symbol: &str) -> GatewayResult<u32> {
        Ok(self
            .lock()
            .precision
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_PRECISION))
    }

    fn name(&self) -> &str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(close: i64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open: Decimal::from(close),
            high: Decimal::from(close),
            low: Decimal::from(close),
            close: Decimal::from(close),
            volume: Decimal::ONE,
        }
    }

    #[tokio::test]
    async fn test_fills_move_positions() {
        let exchange = PaperExchange::new(Decimal::from(1000));
        exchange.set_bars("SOL/USDT", vec![bar(100)]);

        exchange.market_buy("SOL/USDT", Decimal::ONE).await.unwrap();
        let positions = exchange.fetch_all_positions().await.unwrap();
        assert_eq!(positions["SOL/USDT"].position_amt, Decimal::ONE);

        exchange.market_sell("SOL/USDT", Decimal::from(3)).await.unwrap();
        let positions = exchange.fetch_all_positions().await.unwrap();
        let pos = &positions["SOL/USDT"];
        assert_eq!(pos.position_amt, Decimal::from(-2));
        assert_eq!(pos.entry_price, Decimal::from(100));

        exchange.market_buy("SOL/USDT", Decimal::from(2)).await.unwrap();
        assert!(exchange.fetch_all_positions().await.unwrap().is_empty());
        assert_eq!(exchange.orders().len(), 3);
    }

    #[tokio::test]
    async fn test_exchange_style_symbols_are_normalized() {
        let exchange = PaperExchange::new(Decimal::from(1000));
        exchange.set_position("SOL/USDT:USDT", Decimal::from(-1), Decimal::from(90));

        let positions = exchange.fetch_all_positions().await.unwrap();
        assert!(positions.contains_key("SOL/USDT"));

        exchange.market_buy("SOL/USDT", Decimal::ONE).await.unwrap();
        assert!(exchange.fetch_all_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let exchange = PaperExchange::new(Decimal::from(1000));
        exchange.reject_orders_for("BTC/USDT");
        exchange.fail_bars_for("BTC/USDT");

        assert!(exchange.market_buy("BTC/USDT", Decimal::ONE).await.is_err());
        assert!(exchange
            .fetch_recent_bars("BTC/USDT", Timeframe::Minute15, 10)
            .await
            .is_err());
        assert!(exchange.orders().is_empty());
    }
}
