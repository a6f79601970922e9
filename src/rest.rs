//! REST surface of the venue
//!
//! A narrow trait over the calls the replica and the quoter need, plus the
//! signed MEXC implementation. Payload fields arrive as strings or numbers
//! depending on endpoint; deserializers accept both.

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

use crate::config::Credentials;
use crate::error::{DepthFlowError, Result};
use crate::parser::{decimal_of, int_of, RestDepth};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const RECV_WINDOW_MS: &str = "10000";

/// Order side on the venue wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Venue-declared minima and increments a valid order must satisfy
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SymbolFilters {
    pub min_price: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub step_size: Decimal,
    pub min_notional: Decimal,
}

/// One asset row from the account snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub asset: String,
    #[serde(deserialize_with = "flex_decimal", default)]
    pub free: Decimal,
    #[serde(deserialize_with = "flex_decimal", default)]
    pub locked: Decimal,
}

/// Account snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub balances: Vec<Balance>,
    #[serde(rename = "updateTime", deserialize_with = "flex_opt_i64", default)]
    pub update_time: Option<i64>,
}

impl AccountInfo {
    pub fn balance(&self, asset: &str) -> (Decimal, Decimal) {
        self.balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| (b.free.max(Decimal::ZERO), b.locked.max(Decimal::ZERO)))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO))
    }
}

/// Open or queried order
#[derive(Debug, Clone, Deserialize)]
pub struct OrderReport {
    #[serde(rename = "clientOrderId", default)]
    pub client_order_id: String,
    #[serde(default)]
    pub side: String,
    #[serde(deserialize_with = "flex_decimal", default)]
    pub price: Decimal,
    #[serde(rename = "origQty", deserialize_with = "flex_decimal", default)]
    pub orig_qty: Decimal,
    #[serde(rename = "executedQty", deserialize_with = "flex_decimal", default)]
    pub executed_qty: Decimal,
    #[serde(default)]
    pub status: String,
}

impl OrderReport {
    pub fn remaining_qty(&self) -> Decimal {
        (self.orig_qty - self.executed_qty).max(Decimal::ZERO)
    }

    /// NEW and PARTIALLY_FILLED orders are still working; everything else is
    /// terminal.
    pub fn is_closed(&self) -> bool {
        matches!(
            self.status.as_str(),
            "CANCELED" | "FILLED" | "REJECTED" | "EXPIRED"
        )
    }
}

/// Acknowledgement of a placed or cancelled order
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    #[serde(rename = "orderId", deserialize_with = "flex_opt_string", default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One fill row from the account trade list
#[derive(Debug, Clone, Deserialize)]
pub struct TradeRow {
    #[serde(deserialize_with = "flex_i64", default)]
    pub id: i64,
    #[serde(rename = "isBuyer", default)]
    pub is_buyer: bool,
    #[serde(rename = "isMaker", default)]
    pub is_maker: bool,
    #[serde(deserialize_with = "flex_decimal", default)]
    pub price: Decimal,
    #[serde(deserialize_with = "flex_decimal", default)]
    pub qty: Decimal,
    #[serde(rename = "quoteQty", deserialize_with = "flex_decimal", default)]
    pub quote_qty: Decimal,
    #[serde(deserialize_with = "flex_decimal", default)]
    pub commission: Decimal,
    #[serde(rename = "commissionAsset", default)]
    pub commission_asset: String,
    #[serde(deserialize_with = "flex_i64", default)]
    pub time: i64,
}

/// The REST calls the core consumes. Implementations own transport concerns
/// (timeouts, signing); every call may fail with a typed error carrying the
/// HTTP status.
#[allow(async_fn_in_trait)]
pub trait SpotRest: Send + Sync {
    async fn depth(&self, symbol: &str, limit: u32) -> Result<RestDepth>;
    async fn exchange_info(&self, symbol: &str) -> Result<Option<SymbolFilters>>;
    async fn account_info(&self) -> Result<AccountInfo>;
    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderReport>>;
    async fn query_order(&self, symbol: &str, client_order_id: &str) -> Result<OrderReport>;
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        price: &str,
        quantity: &str,
        client_order_id: &str,
    ) -> Result<OrderAck>;
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Option<&str>,
        quote_order_qty: Option<&str>,
    ) -> Result<OrderAck>;
    async fn cancel_order(&self, symbol: &str, client_order_id: &str) -> Result<OrderAck>;
    async fn cancel_open_orders(&self, symbol: &str) -> Result<()>;
    async fn my_trades(
        &self,
        symbol: &str,
        from_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<TradeRow>>;
}

/// Signed MEXC spot REST client
#[derive(Clone)]
pub struct MexcRest {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl MexcRest {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| DepthFlowError::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.credentials.api_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, mut params: Vec<(String, String)>) -> String {
        params.push((
            "timestamp".to_string(),
            chrono::Utc::now().timestamp_millis().to_string(),
        ));
        let query = encode_query(&params);
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        params: Vec<(String, String)>,
        signed: bool,
    ) -> Result<String> {
        let query = if signed {
            self.signed_query(params)
        } else {
            encode_query(&params)
        };

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        debug!(%method, path, "venue request");

        let mut request = self.http.request(method, &url);
        if signed {
            request = request.header("X-MEXC-APIKEY", &self.credentials.api_key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(DepthFlowError::RateLimited { retry_after_ms });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(DepthFlowError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }

    async fn get(&self, path: &str, params: Vec<(String, String)>, signed: bool) -> Result<String> {
        self.request(reqwest::Method::GET, path, params, signed).await
    }
}

impl SpotRest for MexcRest {
    async fn depth(&self, symbol: &str, limit: u32) -> Result<RestDepth> {
        let body = self
            .get(
                "/depth",
                vec![
                    ("symbol".into(), symbol.into()),
                    ("limit".into(), limit.to_string()),
                ],
                false,
            )
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn exchange_info(&self, symbol: &str) -> Result<Option<SymbolFilters>> {
        let body = self
            .get(
                "/exchangeInfo",
                vec![("symbol".into(), symbol.into())],
                false,
            )
            .await?;
        let json: Value = serde_json::from_str(&body)?;
        Ok(parse_symbol_filters(&json, symbol))
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let body = self.get("/account", Vec::new(), true).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderReport>> {
        let body = self
            .get("/openOrders", vec![("symbol".into(), symbol.into())], true)
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn query_order(&self, symbol: &str, client_order_id: &str) -> Result<OrderReport> {
        let body = self
            .get(
                "/order",
                vec![
                    ("symbol".into(), symbol.into()),
                    ("origClientOrderId".into(), client_order_id.into()),
                    ("recvWindow".into(), RECV_WINDOW_MS.into()),
                ],
                true,
            )
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        price: &str,
        quantity: &str,
        client_order_id: &str,
    ) -> Result<OrderAck> {
        let params = vec![
            ("symbol".into(), symbol.into()),
            ("side".into(), side.as_str().into()),
            ("type".into(), "LIMIT".into()),
            ("timeInForce".into(), "GTC".into()),
            ("quantity".into(), quantity.into()),
            ("price".into(), price.into()),
            ("newClientOrderId".into(), client_order_id.into()),
            ("recvWindow".into(), RECV_WINDOW_MS.into()),
        ];
        let body = self
            .request(reqwest::Method::POST, "/order", params, true)
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Option<&str>,
        quote_order_qty: Option<&str>,
    ) -> Result<OrderAck> {
        let mut params = vec![
            ("symbol".into(), symbol.into()),
            ("side".into(), side.as_str().into()),
            ("type".into(), "MARKET".into()),
            ("recvWindow".into(), RECV_WINDOW_MS.into()),
        ];
        if let Some(quantity) = quantity {
            params.push(("quantity".into(), quantity.into()));
        }
        if let Some(quote) = quote_order_qty {
            params.push(("quoteOrderQty".into(), quote.into()));
        }
        let body = self
            .request(reqwest::Method::POST, "/order", params, true)
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn cancel_order(&self, symbol: &str, client_order_id: &str) -> Result<OrderAck> {
        let params = vec![
            ("symbol".into(), symbol.into()),
            ("origClientOrderId".into(), client_order_id.into()),
            ("recvWindow".into(), RECV_WINDOW_MS.into()),
        ];
        let body = self
            .request(reqwest::Method::DELETE, "/order", params, true)
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn cancel_open_orders(&self, symbol: &str) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            "/openOrders",
            vec![("symbol".into(), symbol.into())],
            true,
        )
        .await?;
        Ok(())
    }

    async fn my_trades(
        &self,
        symbol: &str,
        from_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<TradeRow>> {
        let mut params = vec![
            ("symbol".into(), symbol.into()),
            ("limit".into(), limit.to_string()),
        ];
        if let Some(from_id) = from_id {
            params.push(("fromId".into(), from_id.to_string()));
        }
        let body = self.get("/myTrades", params, true).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Extract the filter block for `symbol` from an exchangeInfo response.
pub fn parse_symbol_filters(json: &Value, symbol: &str) -> Option<SymbolFilters> {
    let symbols = json.get("symbols")?.as_array()?;
    let entry = symbols
        .iter()
        .find(|s| s.get("symbol").and_then(Value::as_str) == Some(symbol))?;

    let mut filters = SymbolFilters::default();
    for filter in entry.get("filters")?.as_array()? {
        let kind = filter.get("filterType").and_then(Value::as_str).unwrap_or("");
        let field = |key: &str| filter.get(key).and_then(decimal_of).unwrap_or(Decimal::ZERO);
        match kind {
            "PRICE_FILTER" => {
                filters.min_price = field("minPrice");
                filters.tick_size = field("tickSize");
            }
            "LOT_SIZE" => {
                filters.min_qty = field("minQty");
                filters.step_size = field("stepSize");
            }
            "MIN_NOTIONAL" => {
                filters.min_notional = field("minNotional");
            }
            _ => {}
        }
    }
    Some(filters)
}

fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn flex_decimal<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(decimal_of(&value).unwrap_or(Decimal::ZERO))
}

fn flex_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(int_of(&value).unwrap_or(0))
}

fn flex_opt_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(int_of(&value))
}

fn flex_opt_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
