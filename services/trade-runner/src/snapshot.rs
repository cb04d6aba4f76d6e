//! Market snapshot builder

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use crate::config::{ExecutionConfig, InstrumentConfig};
use crate::error::CycleError;
use crate::gateway::ExchangeGateway;
use crate::types::{Bar, MarketSnapshot};

/// Builds one snapshot per instrument per cycle from the latest bars
pub struct SnapshotBuilder {
    gateway: Arc<dyn ExchangeGateway>,
    bar_limit: usize,
    bar_window: usize,
}

impl SnapshotBuilder {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, execution: &ExecutionConfig) -> Self {
        Self {
            gateway,
            bar_limit: execution.bar_limit.max(2),
            bar_window: execution.bar_window.max(1),
        }
    }

    /// Fetch bars and derive the snapshot. Not retried on failure.
    pub async fn build(&self, instrument: &InstrumentConfig) -> Result<MarketSnapshot, CycleError> {
        let symbol = instrument.symbol.as_str();
        let bars = self
            .gateway
            .fetch_recent_bars(symbol, instrument.timeframe, self.bar_limit)
            .await
            .map_err(|e| CycleError::data(symbol, "snapshot", e))?;

        let snapshot = snapshot_from_bars(instrument, bars, self.bar_window)
            .ok_or_else(|| CycleError::data(symbol, "snapshot", "exchange returned no bars"))?;

        debug!(
            "[{}] Snapshot: price={}, change={:.2}%, bars={}",
            symbol,
            snapshot.price,
            snapshot.price_change_pct,
            snapshot.recent_bars.len()
        );
        Ok(snapshot)
    }
}

/// Derive a snapshot from bars ordered oldest first. `None` when empty.
pub fn snapshot_from_bars(
    instrument: &InstrumentConfig,
    bars: Vec<Bar>,
    window: usize,
) -> Option<MarketSnapshot> {
    let latest = bars.last()?.clone();
    let previous_close = bars
        .len()
        .checked_sub(2)
        .and_then(|i| bars.get(i))
        .map(|bar| bar.close)
        .unwrap_or(latest.close);

    let skip = bars.len().saturating_sub(window);
    let recent_bars: Vec<Bar> = bars.into_iter().skip(skip).collect();

    Some(MarketSnapshot {
        symbol: instrument.symbol.clone(),
        timeframe: instrument.timeframe,
        price: latest.close,
        high: latest.high,
        low: latest.low,
        volume: latest.volume,
        price_change_pct: percent_change(previous_close, latest.close),
        timestamp: Utc::now(),
        recent_bars,
    })
}

fn percent_change(previous: Decimal, current: Decimal) -> Decimal {
    if previous.is_zero() {
        return Decimal::ZERO;
    }
    (current - previous) / previous * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeframe;
    use crate::paper::PaperExchange;

    fn instrument() -> InstrumentConfig {
        InstrumentConfig {
            symbol: "BTC/USDT".to_string(),
            leverage: 10,
            timeframe: Timeframe::Minute15,
            simulation: false,
            fixed_quantity: None,
        }
    }

    fn bars(closes: &[i64]) -> Vec<Bar> {
        closes
            .iter()
            .map(|c| Bar {
                timestamp: Utc::now(),
                open: Decimal::from(*c),
                high: Decimal::from(*c + 1),
                low: Decimal::from(*c - 1),
                close: Decimal::from(*c),
                volume: Decimal::from(7),
            })
            .collect()
    }

    #[test]
    fn test_change_against_previous_close() {
        let snap = snapshot_from_bars(&instrument(), bars(&[90, 100, 105]), 5).unwrap();
        assert_eq!(snap.price, Decimal::from(105));
        assert_eq!(snap.price_change_pct, Decimal::from(5));
        assert_eq!(snap.high, Decimal::from(106));
        assert_eq!(snap.recent_bars.len(), 3);
    }

    #[test]
    fn test_single_bar_has_zero_change() {
        let snap = snapshot_from_bars(&instrument(), bars(&[100]), 5).unwrap();
        assert_eq!(snap.price_change_pct, Decimal::ZERO);
        assert!(snapshot_from_bars(&instrument(), vec![], 5).is_none());
    }

    #[test]
    fn test_window_keeps_latest_bars_in_order() {
        let snap = snapshot_from_bars(&instrument(), bars(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]), 5).unwrap();
        let closes: Vec<Decimal> = snap.recent_bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, (6..=10).map(Decimal::from).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_build_reports_data_unavailable() {
        let exchange = Arc::new(PaperExchange::new(Decimal::from(1000)));
        let builder = SnapshotBuilder::new(exchange.clone(), &ExecutionConfig::immediate());

        let err = builder.build(&instrument()).await.unwrap_err();
        assert_eq!(err.stage(), "snapshot");

        exchange.fail_bars_for("BTC/USDT");
        let err = builder.build(&instrument()).await.unwrap_err();
        assert!(matches!(err, CycleError::DataUnavailable { .. }));

        let ok = Arc::new(PaperExchange::new(Decimal::from(1000)));
        ok.set_bars("BTC/USDT", bars(&[100, 110]));
        let builder = SnapshotBuilder::new(ok, &ExecutionConfig::immediate());
        let snap = builder.build(&instrument()).await.unwrap();
        assert_eq!(snap.price_change_pct, Decimal::from(10));
    }
}
