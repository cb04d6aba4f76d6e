//! Position reconciliation - move the live position toward the decision's target
//!
//! | Current | Signal | Actions                                   |
//! |---------|--------|-------------------------------------------|
//! | flat    | BUY    | open long                                 |
//! | flat    | SELL   | open short                                |
//! | long    | BUY    | none                                      |
//! | short   | SELL   | none                                      |
//! | long    | SELL   | close long (current size), settle, open short |
//! | short   | BUY    | close short (current size), settle, open long |
//! | any     | HOLD   | none                                      |
//!
//! The closing leg always uses the exchange-reported size; the opening leg uses
//! the sized quantity. The position is read live before acting and re-read after.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{ExecutionConfig, InstrumentConfig};
use crate::error::CycleError;
use crate::gateway::{ExchangeGateway, OrderAck, OrderSide};
use crate::sizing::{size_order, SizingOutcome};
use crate::store::Store;
use crate::types::{describe_position, Decision, MarketSnapshot, PositionRecord, PositionSide, Signal};

/// What the (position, signal) pair calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to do
    NoOp(&'static str),
    /// Flat: open a new position
    Open(PositionSide),
    /// Opposite position held: close it, then open the other side
    Flip {
        close_side: PositionSide,
        close_quantity: Decimal,
        open_side: PositionSide,
    },
}

/// One step of an execution plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderAction {
    /// Market order against the held side
    Close { side: PositionSide, quantity: Decimal },
    /// Wait for the close to settle
    Settle,
    /// Market order opening a new position
    Open { side: PositionSide, quantity: Decimal },
}

impl OrderAction {
    /// Exchange order side, `None` for [`OrderAction::Settle`]
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            OrderAction::Close { side, .. } => Some(match side {
                PositionSide::Long => OrderSide::Sell,
                PositionSide::Short => OrderSide::Buy,
            }),
            OrderAction::Open { side, .. } => Some(match side {
                PositionSide::Long => OrderSide::Buy,
                PositionSide::Short => OrderSide::Sell,
            }),
            OrderAction::Settle => None,
        }
    }

    pub fn quantity(&self) -> Option<Decimal> {
        match self {
            OrderAction::Close { quantity, .. } | OrderAction::Open { quantity, .. } => {
                Some(*quantity)
            }
            OrderAction::Settle => None,
        }
    }

    /// Leg label for logs and errors ("close long", "open short")
    pub fn leg(&self) -> String {
        match self {
            OrderAction::Close { side, .. } => format!("close {}", side),
            OrderAction::Open { side, .. } => format!("open {}", side),
            OrderAction::Settle => "settle".to_string(),
        }
    }
}

/// Map the live position and the signal onto a transition
pub fn plan_transition(current: Option<&PositionRecord>, signal: Signal) -> Transition {
    let target = match signal {
        Signal::Hold => return Transition::NoOp("hold signal"),
        Signal::Buy => PositionSide::Long,
        Signal::Sell => PositionSide::Short,
    };
    match current {
        None => Transition::Open(target),
        Some(pos) if pos.side == target => Transition::NoOp("position already aligned"),
        Some(pos) => Transition::Flip {
            close_side: pos.side,
            close_quantity: pos.size,
            open_side: target,
        },
    }
}

/// Expand a transition into ordered actions
pub fn build_actions(transition: &Transition, open_quantity: Decimal) -> Vec<OrderAction> {
    match transition {
        Transition::NoOp(_) => Vec::new(),
        Transition::Open(side) => vec![OrderAction::Open {
            side: *side,
            quantity: open_quantity,
        }],
        Transition::Flip {
            close_side,
            close_quantity,
            open_side,
        } => vec![
            OrderAction::Close {
                side: *close_side,
                quantity: *close_quantity,
            },
            OrderAction::Settle,
            OrderAction::Open {
                side: *open_side,
                quantity: open_quantity,
            },
        ],
    }
}

/// Result of one reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    NoOp { reason: &'static str },
    /// Sizing produced no tradable quantity; nothing was submitted
    NoTradeQuantity,
    Executed {
        actions: Vec<OrderAction>,
        acks: Vec<OrderAck>,
        /// Orders were logged but not submitted
        simulated: bool,
        sizing_fallback: bool,
        /// Position re-read after execution (`None` if flat or the read failed)
        position_after: Option<PositionRecord>,
    },
}

/// Executes transitions against the exchange
pub struct PositionReconciler {
    gateway: Arc<dyn ExchangeGateway>,
    execution: ExecutionConfig,
}

impl PositionReconciler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, execution: ExecutionConfig) -> Self {
        Self { gateway, execution }
    }

    /// Reconcile one instrument against its decision
    pub async fn reconcile(
        &self,
        store: &mut Store,
        instrument: &InstrumentConfig,
        decision: &Decision,
        snapshot: &MarketSnapshot,
    ) -> Result<ReconcileOutcome, CycleError> {
        let symbol = instrument.symbol.as_str();
        let positions = self
            .gateway
            .fetch_all_positions()
            .await
            .map_err(|e| CycleError::data(symbol, "positions", e))?;
        let current = positions.get(symbol).cloned();

        info!(
            "[{}] Signal {} ({}) | stop loss {} | take profit {} | allocation {} | {}",
            symbol,
            decision.signal,
            decision.confidence,
            fmt_opt(decision.stop_loss),
            fmt_opt(decision.take_profit),
            decision
                .position_percentage
                .map(|p| format!("{}%", p))
                .unwrap_or_else(|| "n/a".to_string()),
            describe_position(current.as_ref())
        );
        debug!("[{}] Reason: {}", symbol, decision.reason);

        let transition = plan_transition(current.as_ref(), decision.signal);
        if let Transition::NoOp(reason) = transition {
            info!("[{}] No action: {}", symbol, reason);
            store.record_position(symbol, current);
            return Ok(ReconcileOutcome::NoOp { reason });
        }

        let (open_quantity, sizing_fallback) =
            match self.open_quantity(instrument, decision, snapshot).await? {
                SizingOutcome::Quantity {
                    quantity,
                    fallback_applied,
                } => (quantity, fallback_applied),
                SizingOutcome::NoTradeQuantity { .. } => {
                    warn!("[{}] Sized quantity is zero, skipping order", symbol);
                    return Ok(ReconcileOutcome::NoTradeQuantity);
                }
            };

        let actions = build_actions(&transition, open_quantity);
        let simulated = instrument.simulation;
        let (acks, failure) = self.execute(symbol, &actions, simulated).await;

        if let Some(err) = failure {
            // A filled close leaves the account in a different state than the cache
            if !acks.is_empty() {
                self.refresh(store, symbol).await;
            }
            return Err(err);
        }

        let position_after = self.refresh(store, symbol).await;

        Ok(ReconcileOutcome::Executed {
            actions,
            acks,
            simulated,
            sizing_fallback,
            position_after,
        })
    }

    /// Fixed quantity when configured, dynamic sizing otherwise
    async fn open_quantity(
        &self,
        instrument: &InstrumentConfig,
        decision: &Decision,
        snapshot: &MarketSnapshot,
    ) -> Result<SizingOutcome, CycleError> {
        let symbol = instrument.symbol.as_str();
        if let Some(quantity) = instrument.fixed_quantity {
            debug!("[{}] Using fixed quantity {}", symbol, quantity);
            return Ok(SizingOutcome::Quantity {
                quantity,
                fallback_applied: false,
            });
        }

        let equity = self
            .gateway
            .fetch_equity()
            .await
            .map_err(|e| CycleError::data(symbol, "sizing", e))?;
        let precision = self
            .gateway
            .quantity_precision(symbol)
            .await
            .map_err(|e| CycleError::data(symbol, "sizing", e))?;

        let outcome = size_order(equity, decision.position_percentage, snapshot.price, precision);
        if let Some(qty) = outcome.quantity() {
            info!(
                "[{}] Sized {} {} from equity {} USDT at {}",
                symbol,
                qty,
                snapshot.base_asset(),
                equity,
                snapshot.price
            );
        }
        Ok(outcome)
    }

    /// Walk actions in order, stopping at the first failed leg.
    ///
    /// Simulation follows the same trace, settle included, without submitting.
    /// Acks for legs that filled are returned alongside any failure.
    async fn execute(
        &self,
        symbol: &str,
        actions: &[OrderAction],
        simulated: bool,
    ) -> (Vec<OrderAck>, Option<CycleError>) {
        let marker = if simulated { "[simulation] " } else { "" };
        let mut acks = Vec::with_capacity(actions.len());
        let mut filled = Vec::new();
        for action in actions {
            let (side, quantity) = match (action.order_side(), action.quantity()) {
                (Some(side), Some(quantity)) => (side, quantity),
                _ => {
                    debug!(
                        "{}[{}] Settling for {:?}",
                        marker,
                        symbol,
                        self.execution.settle_delay()
                    );
                    tokio::time::sleep(self.execution.settle_delay()).await;
                    continue;
                }
            };

            info!("{}[{}] {}: market {} {}", marker, symbol, action.leg(), side, quantity);
            if simulated {
                info!("[simulation] [{}] {} not submitted", symbol, action.leg());
                continue;
            }

            match self.gateway.market_order(symbol, side, quantity).await {
                Ok(ack) => {
                    info!("[{}] {} filled: order_id={}", symbol, action.leg(), ack.order_id);
                    acks.push(ack);
                    filled.push(action.leg());
                }
                Err(e) => {
                    error!(
                        "[{}] {} failed ({} {}): {}; already filled: [{}]",
                        symbol,
                        action.leg(),
                        side,
                        quantity,
                        e,
                        filled.join(", ")
                    );
                    let err = CycleError::OrderExecutionFailure {
                        symbol: symbol.to_string(),
                        leg: action.leg(),
                        reason: e.to_string(),
                        filled,
                    };
                    return (acks, Some(err));
                }
            }
        }
        (acks, None)
    }

    /// Re-read the position after the refresh delay and update the display cache
    async fn refresh(&self, store: &mut Store, symbol: &str) -> Option<PositionRecord> {
        tokio::time::sleep(self.execution.refresh_delay()).await;
        match self.gateway.fetch_all_positions().await {
            Ok(positions) => {
                let position = positions.get(symbol).cloned();
                info!(
                    "[{}] Position after execution: {}",
                    symbol,
                    describe_position(position.as_ref())
                );
                store.record_position(symbol, position.clone());
                position
            }
            Err(e) => {
                warn!("[{}] Position refresh failed: {}", symbol, e);
                None
            }
        }
    }
}

fn fmt_opt(value: Option<Decimal>) -> String {
    value
        .map(|v| format!("${:.2}", v))
        .unwrap_or_else(|| "n/a".to_string())
}
