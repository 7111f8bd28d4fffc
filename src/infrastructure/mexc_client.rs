//! MEXC spot REST adapter
//!
//! Public market endpoints are unsigned. Order endpoints are signed with
//! HMAC-SHA256 over the full query string (hex digest in `signature`) and carry
//! the API key in the `X-MEXC-APIKEY` header.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::domain::entities::new_coin::SymbolConstraints;
use crate::domain::entities::order::{OrderRequest, OrderStatus, OrderType, PlacedOrder};
use crate::domain::errors::ExchangeError;
use crate::domain::repositories::exchange_client::{
    ExchangeClient, ExchangeResult, ListingInfo, MarketData, SymbolInfo,
};
use crate::rate_limit::{acquire, ExchangeRateLimiter};

const MEXC_API_BASE: &str = "https://api.mexc.com";
const API_KEY_HEADER: &str = "X-MEXC-APIKEY";
const USER_AGENT: &str = "listing-trader/0.1.0";
/// Exchange error code for an unknown symbol
const INVALID_SYMBOL_CODE: i64 = -1121;

type HmacSha256 = Hmac<Sha256>;

/// MEXC connection settings
#[derive(Clone)]
pub struct MexcConfig {
    pub api_base: String,
    pub api_key: Option<Zeroizing<String>>,
    pub api_secret: Option<Zeroizing<String>>,
    pub timeout: Duration,
    pub recv_window_ms: u64,
}

impl MexcConfig {
    pub fn new(
        api_key: Option<Zeroizing<String>>,
        api_secret: Option<Zeroizing<String>>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_base: MEXC_API_BASE.to_string(),
            api_key,
            api_secret,
            timeout,
            recv_window_ms: 5000,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

// ---- wire types ----

#[derive(Debug, Deserialize)]
struct NewListingsResponse {
    #[serde(default)]
    symbols: Vec<NewListingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewListingEntry {
    symbol: String,
    #[serde(default)]
    base_asset: String,
    #[serde(default)]
    quote_asset: String,
    #[serde(default)]
    listing_time: i64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    min_price: String,
    #[serde(default)]
    max_price: String,
    #[serde(default)]
    min_qty: String,
    #[serde(default)]
    max_qty: String,
    #[serde(default)]
    price_scale: u32,
    #[serde(default)]
    qty_scale: u32,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    #[serde(default)]
    symbols: Vec<ExchangeInfoSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfoSymbol {
    symbol: String,
    status: String,
    #[serde(default)]
    base_asset: String,
    #[serde(default)]
    quote_asset: String,
    #[serde(default)]
    base_asset_precision: u32,
    #[serde(default)]
    quote_precision: u32,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price {
        #[serde(default)]
        min_price: String,
        #[serde(default)]
        max_price: String,
    },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        #[serde(default)]
        min_qty: String,
        #[serde(default)]
        max_qty: String,
        #[serde(default)]
        step_size: String,
    },
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional {
        #[serde(default)]
        min_notional: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    #[serde(default)]
    price_change: String,
    #[serde(default)]
    volume: String,
    #[serde(default)]
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    #[serde(default)]
    price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

/// Which operation a failed HTTP call belonged to, for error mapping
#[derive(Debug, Clone, Copy)]
enum CallKind {
    Market,
    PlaceOrder,
    OrderStatus,
}

/// MEXC client for API interactions
pub struct MexcClient {
    client: Client,
    config: MexcConfig,
    limiter: ExchangeRateLimiter,
}

impl MexcClient {
    pub fn new(config: MexcConfig, limiter: ExchangeRateLimiter) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExchangeError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        info!(api_base = %config.api_base, signed = config.api_key.is_some(), "MEXC client initialized");

        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    fn credentials(&self) -> ExchangeResult<(&str, &str)> {
        match (&self.config.api_key, &self.config.api_secret) {
            (Some(key), Some(secret)) => Ok((key.as_str(), secret.as_str())),
            _ => Err(ExchangeError::AuthenticationError(
                "MEXC API credentials not configured".to_string(),
            )),
        }
    }

    async fn public_get<T>(&self, path: &str, query: &str, kind: CallKind) -> ExchangeResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = if query.is_empty() {
            format!("{}{}", self.config.api_base, path)
        } else {
            format!("{}{}?{}", self.config.api_base, path, query)
        };
        acquire(&self.limiter, path).await;
        debug!(%url, "MEXC public request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;
        decode_response(response, kind).await
    }

    async fn signed_request<T>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        kind: CallKind,
    ) -> ExchangeResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let (api_key, api_secret) = self.credentials()?;

        let mut query = encode_params(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            self.config.recv_window_ms,
            Utc::now().timestamp_millis()
        ));
        let signature = sign_query(api_secret, &query)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.config.api_base, path, query, signature
        );

        acquire(&self.limiter, path).await;
        debug!(%method, path, "MEXC signed request");

        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, api_key)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;
        decode_response(response, kind).await
    }
}

#[async_trait]
impl ExchangeClient for MexcClient {
    fn name(&self) -> &str {
        "MEXC"
    }

    async fn get_new_listings(&self) -> ExchangeResult<Vec<ListingInfo>> {
        let response: NewListingsResponse = self
            .public_get("/api/v3/ticker/new", "", CallKind::Market)
            .await?;
        response
            .symbols
            .into_iter()
            .map(listing_from_entry)
            .collect()
    }

    async fn get_symbol_status(&self, symbol: &str) -> ExchangeResult<SymbolInfo> {
        let response: ExchangeInfoResponse = self
            .public_get(
                "/api/v3/exchangeInfo",
                &format!("symbol={}", symbol),
                CallKind::Market,
            )
            .await?;
        let entry = response
            .symbols
            .into_iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))?;
        symbol_info_from_entry(entry)
    }

    async fn get_market_data(&self, symbol: &str) -> ExchangeResult<MarketData> {
        let ticker: Ticker24h = self
            .public_get(
                "/api/v3/ticker/24hr",
                &format!("symbol={}", symbol),
                CallKind::Market,
            )
            .await?;
        market_data_from_ticker(ticker, Utc::now())
    }

    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<PlacedOrder> {
        let params = order_params(order);
        let response: OrderResponse = self
            .signed_request(Method::POST, "/api/v3/order", &params, CallKind::PlaceOrder)
            .await?;
        let placed = placed_order_from_response(response)?;
        info!(
            symbol = %placed.symbol,
            order_id = %placed.order_id,
            side = %order.side,
            quantity = order.quantity.value(),
            "MEXC order placed"
        );
        Ok(placed)
    }

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> ExchangeResult<PlacedOrder> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let response: OrderResponse = self
            .signed_request(Method::GET, "/api/v3/order", &params, CallKind::OrderStatus)
            .await?;
        placed_order_from_response(response)
    }
}

// ---- helpers ----

/// Hex HMAC-SHA256 of `query` keyed by `secret`.
fn sign_query(secret: &str, query: &str) -> ExchangeResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::AuthenticationError(format!("HMAC error: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn order_params(order: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", order.symbol.clone()),
        ("side", order.side.to_string()),
        ("type", order.order_type.to_string()),
        ("quantity", format_decimal(order.quantity.value())),
    ];
    if order.order_type == OrderType::Limit {
        if let Some(price) = order.price {
            params.push(("price", format_decimal(price.value())));
        }
        params.push(("timeInForce", order.time_in_force.to_string()));
    }
    params
}

/// Plain decimal with at most 10 fractional digits, trailing zeros dropped.
fn format_decimal(value: f64) -> String {
    let fixed = format!("{:.10}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

fn is_trading_status(status: &str) -> bool {
    matches!(
        status.trim().to_ascii_uppercase().as_str(),
        "TRADING" | "ENABLED" | "1"
    )
}

fn parse_order_status(status: &str) -> OrderStatus {
    match status.trim().to_ascii_uppercase().as_str() {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "CANCELLED" | "PARTIALLY_CANCELED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::Unknown,
    }
}

/// Decimal string field; empty means zero.
fn parse_decimal(field: &str, raw: &str) -> ExchangeResult<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ExchangeError::MalformedResponse(format!("{} is not a number: '{}'", field, raw)))
}

fn listing_from_entry(entry: NewListingEntry) -> ExchangeResult<ListingInfo> {
    let constraints = SymbolConstraints {
        min_price: parse_decimal("minPrice", &entry.min_price)?,
        max_price: parse_decimal("maxPrice", &entry.max_price)?,
        min_quantity: parse_decimal("minQty", &entry.min_qty)?,
        max_quantity: parse_decimal("maxQty", &entry.max_qty)?,
        step_size: 0.0,
        min_notional: 0.0,
        price_scale: entry.price_scale,
        quantity_scale: entry.qty_scale,
    };
    let expected_listing_time = if entry.listing_time > 0 {
        DateTime::<Utc>::from_timestamp_millis(entry.listing_time)
    } else {
        None
    };
    Ok(ListingInfo {
        is_trading: is_trading_status(&entry.status),
        symbol: entry.symbol,
        base_asset: entry.base_asset,
        quote_asset: entry.quote_asset,
        expected_listing_time,
        constraints,
    })
}

fn symbol_info_from_entry(entry: ExchangeInfoSymbol) -> ExchangeResult<SymbolInfo> {
    let mut constraints = SymbolConstraints {
        price_scale: entry.quote_precision,
        quantity_scale: entry.base_asset_precision,
        ..SymbolConstraints::default()
    };
    for filter in &entry.filters {
        match filter {
            SymbolFilter::Price {
                min_price,
                max_price,
            } => {
                constraints.min_price = parse_decimal("minPrice", min_price)?;
                constraints.max_price = parse_decimal("maxPrice", max_price)?;
            }
            SymbolFilter::LotSize {
                min_qty,
                max_qty,
                step_size,
            } => {
                constraints.min_quantity = parse_decimal("minQty", min_qty)?;
                constraints.max_quantity = parse_decimal("maxQty", max_qty)?;
                constraints.step_size = parse_decimal("stepSize", step_size)?;
            }
            SymbolFilter::MinNotional { min_notional } => {
                constraints.min_notional = parse_decimal("minNotional", min_notional)?;
            }
            SymbolFilter::Other => {}
        }
    }
    Ok(SymbolInfo {
        is_trading: is_trading_status(&entry.status),
        symbol: entry.symbol,
        base_asset: entry.base_asset,
        quote_asset: entry.quote_asset,
        constraints,
    })
}

fn market_data_from_ticker(ticker: Ticker24h, now: DateTime<Utc>) -> ExchangeResult<MarketData> {
    Ok(MarketData {
        last_price: parse_decimal("lastPrice", &ticker.last_price)?,
        price_change_24h: parse_decimal("priceChange", &ticker.price_change)?,
        base_volume_24h: parse_decimal("volume", &ticker.volume)?,
        quote_volume_24h: parse_decimal("quoteVolume", &ticker.quote_volume)?,
        symbol: ticker.symbol,
        observed_at: now,
    })
}

fn placed_order_from_response(response: OrderResponse) -> ExchangeResult<PlacedOrder> {
    if response.order_id.trim().is_empty() {
        return Err(ExchangeError::MalformedResponse(
            "order response without orderId".to_string(),
        ));
    }
    let executed_quantity = match &response.executed_qty {
        Some(raw) => parse_decimal("executedQty", raw)?,
        None => 0.0,
    };
    let quote_filled = match &response.cummulative_quote_qty {
        Some(raw) => parse_decimal("cummulativeQuoteQty", raw)?,
        None => 0.0,
    };
    let average_price = if executed_quantity > 0.0 && quote_filled > 0.0 {
        Some(quote_filled / executed_quantity)
    } else {
        match &response.price {
            Some(raw) => Some(parse_decimal("price", raw)?).filter(|p| *p > 0.0),
            None => None,
        }
    };
    // The placement acknowledgement carries no status
    let status = response
        .status
        .as_deref()
        .map(parse_order_status)
        .unwrap_or(OrderStatus::New);

    Ok(PlacedOrder {
        order_id: response.order_id,
        symbol: response.symbol,
        status,
        executed_quantity,
        average_price,
    })
}

fn map_transport_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout
    } else {
        ExchangeError::NetworkError(e.to_string())
    }
}

async fn decode_response<T>(response: reqwest::Response, kind: CallKind) -> ExchangeResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    let body = response.text().await.map_err(map_transport_error)?;
    if status.is_success() {
        return serde_json::from_str(&body)
            .map_err(|e| ExchangeError::MalformedResponse(format!("{}: {}", e, truncate(&body))));
    }
    let error = map_api_error(status, &body, kind);
    warn!(%status, error = %error, "MEXC request failed");
    Err(error)
}

fn map_api_error(status: StatusCode, body: &str, kind: CallKind) -> ExchangeError {
    let api_error: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let message = match &api_error {
        Some(e) if !e.msg.is_empty() => format!("{} (code {})", e.msg, e.code),
        _ => format!("HTTP {}: {}", status, truncate(body)),
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ExchangeError::RateLimited;
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ExchangeError::AuthenticationError(message);
    }
    if api_error.as_ref().is_some_and(|e| e.code == INVALID_SYMBOL_CODE) {
        return ExchangeError::SymbolNotFound(message);
    }
    match kind {
        CallKind::PlaceOrder => ExchangeError::OrderPlacementFailed(message),
        CallKind::OrderStatus => ExchangeError::OrderStatusFailed(message),
        CallKind::Market => ExchangeError::NetworkError(message),
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
