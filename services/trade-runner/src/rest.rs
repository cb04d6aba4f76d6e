//! HTTP exchange gateway
//!
//! Talks JSON to an exchange-gateway sidecar that owns credentials, request
//! signing and rate limiting for the futures account.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Timeframe;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{normalize_symbol, ExchangeGateway, OrderAck, OrderSide};
use crate::types::{Bar, PositionRecord};

/// Default request timeout (seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Settlement asset equity is reported in
const SETTLEMENT_ASSET: &str = "USDT";

/// Exchange gateway over HTTP
pub struct HttpExchangeGateway {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpExchangeGateway {
    pub fn new(base_url: &str, api_key: Option<String>) -> GatewayResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {}", e)))?;

        info!("Exchange gateway client initialized: url={}", base_url);

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http_client.get(format!("{}{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http_client.post(format!("{}{}", self.base_url, path)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-API-KEY", key),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> GatewayResult<T> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Transport(format!("request timed out: {}", e))
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;
        let response = Self::check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn check_status(response: Response) -> GatewayResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            Err(GatewayError::NotFound(body))
        } else {
            Err(GatewayError::Exchange(format!("status {}: {}", status, body)))
        }
    }

    async fn submit(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> GatewayResult<OrderAck> {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type: "MARKET".to_string(),
            quantity,
            client_order_id: Uuid::new_v4().to_string(),
        };
        debug!(
            "Submitting market order: {} {} {} ({})",
            side, quantity, symbol, request.client_order_id
        );
        let resp: OrderResponse = self.send(self.post("/v1/orders").json(&request)).await?;
        Ok(OrderAck {
            order_id: resp.order_id,
            symbol: symbol.to_string(),
            side,
            quantity: resp.executed_qty.unwrap_or(quantity),
        })
    }
}

#[async_trait]
impl ExchangeGateway for HttpExchangeGateway {
    async fn fetch_recent_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> GatewayResult<Vec<Bar>> {
        let limit = limit.to_string();
        let rows: Vec<KlineRow> = self
            .send(self.get("/v1/klines").query(&[
                ("symbol", symbol),
                ("interval", timeframe.as_str()),
                ("limit", limit.as_str()),
            ]))
            .await?;
        rows.into_iter().map(Bar::try_from).collect()
    }

    async fn fetch_all_positions(&self) -> GatewayResult<HashMap<String, PositionRecord>> {
        let rows: Vec<PositionRow> = self.send(self.get("/v1/positions")).await?;
        let mut positions = HashMap::new();
        for row in rows {
            let symbol = normalize_symbol(&row.symbol).to_string();
            if let Some(record) = PositionRecord::from_signed_amount(
                symbol.clone(),
                row.position_amt,
                row.entry_price,
                row.unrealized_pnl,
            ) {
                positions.insert(symbol, record);
            }
        }
        Ok(positions)
    }

    async fn fetch_equity(&self) -> GatewayResult<Decimal> {
        let balances: Vec<BalanceRow> = self.send(self.get("/v1/balance")).await?;
        balances
            .into_iter()
            .find(|b| b.asset == SETTLEMENT_ASSET)
            .map(|b| b.total)
            .ok_or_else(|| GatewayError::NotFound(format!("{} balance", SETTLEMENT_ASSET)))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        let body = LeverageRequest {
            symbol: symbol.to_string(),
            leverage,
        };
        let _: serde_json::Value = self.send(self.post("/v1/leverage").json(&body)).await?;
        Ok(())
    }

    async fn market_buy(&self, symbol: &str, quantity: Decimal) -> GatewayResult<OrderAck> {
        self.submit(symbol, OrderSide::Buy, quantity).await
    }

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> GatewayResult<OrderAck> {
        self.submit(symbol, OrderSide::Sell, quantity).await
    }

    async fn quantity_precision(&self, symbol: &str) -> GatewayResult<u32> {
        let market: MarketInfo = self
            .send(self.get("/v1/markets").query(&[("symbol", symbol)]))
            .await?;
        Ok(market.quantity_precision)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// `[open_time_ms, open, high, low, close, volume]`
#[derive(Debug, Deserialize)]
struct KlineRow(i64, Decimal, Decimal, Decimal, Decimal, Decimal);

impl TryFrom<KlineRow> for Bar {
    type Error = GatewayError;

    fn try_from(row: KlineRow) -> Result<Self, Self::Error> {
        let timestamp: DateTime<Utc> = Utc
            .timestamp_millis_opt(row.0)
            .single()
            .ok_or_else(|| GatewayError::Decode(format!("invalid kline timestamp {}", row.0)))?;
        Ok(Bar {
            timestamp,
            open: row.1,
            high: row.2,
            low: row.3,
            close: row.4,
            volume: row.5,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRow {
    symbol: String,
    position_amt: Decimal,
    #[serde(default)]
    entry_price: Decimal,
    #[serde(default)]
    unrealized_pnl: Decimal,
}

#[derive(Debug, Deserialize)]
struct BalanceRow {
    asset: String,
    total: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketInfo {
    quantity_precision: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest {
    symbol: String,
    side: OrderSide,
    #[serde(rename = "type")]
    order_type: String,
    quantity: Decimal,
    client_order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: String,
    #[serde(default)]
    executed_qty: Option<Decimal>,
}

#[derive(Debug, Serialize)]
struct LeverageRequest {
    symbol: String,
    leverage: u32,
}
