//! Binance-style spot REST client
//!
//! Public endpoints (klines, ticker, exchange info) need no credentials.
//! Orders and account calls are signed with HMAC-SHA256 over the query string.

use super::{Exchange, ExchangeConnector, MarketData};
use crate::credentials::ApiCredentials;
use crate::error::{BotError, ExchangeErrorKind, Result};
use crate::types::{Candle, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5000;

/// Spot REST client
#[derive(Clone)]
pub struct BinanceClient {
    http: Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
struct SymbolFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "stepSize")]
    step_size: Option<String>,
}

impl BinanceClient {
    /// Create an unauthenticated client
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn credentials(&self) -> Result<&ApiCredentials> {
        self.credentials
            .as_ref()
            .filter(|c| c.is_complete())
            .ok_or_else(|| BotError::NotConfigured("Exchange credentials".into()))
    }

    /// Send a signed request and return the raw JSON body
    async fn signed(&self, method: Method, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let creds = self.credentials()?;

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query.push(format!("recvWindow={}", RECV_WINDOW_MS));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let query = query.join("&");
        let signature = sign(&creds.secret, &query)?;

        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &creds.key)
            .send()
            .await
            .map_err(|e| BotError::exchange(ExchangeErrorKind::Network, e.to_string()))?;

        read_json(resp).await
    }

    async fn public(&self, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.get(&url).query(params).send().await?;
        read_json(resp).await
    }
}

/// HMAC-SHA256 hex signature of `payload`
pub fn sign(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::Internal(format!("Invalid API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Map an error response onto the exchange error taxonomy
pub fn classify(status: u16, code: Option<i64>, msg: &str) -> ExchangeErrorKind {
    if status == 429 || status == 418 || code == Some(-1003) {
        return ExchangeErrorKind::RateLimit;
    }
    if status == 401 || matches!(code, Some(-2014) | Some(-2015) | Some(-1022)) {
        return ExchangeErrorKind::Auth;
    }
    if msg.to_lowercase().contains("insufficient balance") {
        return ExchangeErrorKind::InsufficientFunds;
    }
    if status >= 500 {
        return ExchangeErrorKind::Network;
    }
    ExchangeErrorKind::Rejected
}

async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| BotError::exchange(ExchangeErrorKind::Network, e.to_string()))?;

    if status.is_success() {
        return Ok(serde_json::from_str(&body)?);
    }

    let (code, msg) = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(err) => (Some(err.code), err.msg),
        Err(_) => (None, body),
    };
    let kind = classify(status.as_u16(), code, &msg);
    Err(BotError::exchange(
        kind,
        format!("HTTP {} code {:?}: {}", status.as_u16(), code, msg),
    ))
}

fn decimal_field(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Parse kline rows `[openTime, open, high, low, close, volume, ...]`.
/// Malformed rows are dropped.
pub fn parse_klines(rows: &serde_json::Value) -> Vec<Candle> {
    let Some(rows) = rows.as_array() else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            if row.len() < 6 {
                return None;
            }
            let open_time = DateTime::<Utc>::from_timestamp_millis(row[0].as_i64()?)?;
            Some(Candle {
                open_time,
                open: decimal_field(&row[1])?,
                high: decimal_field(&row[2])?,
                low: decimal_field(&row[3])?,
                close: decimal_field(&row[4])?,
                volume: decimal_field(&row[5])?,
            })
        })
        .collect()
}

fn lot_step(info: &ExchangeInfo, symbol: &str) -> Option<Decimal> {
    info.symbols
        .iter()
        .find(|s| s.symbol == symbol)?
        .filters
        .iter()
        .find(|f| f.filter_type == "LOT_SIZE")?
        .step_size
        .as_deref()
        .and_then(|s| Decimal::from_str(s).ok())
        .filter(|step| *step > Decimal::ZERO)
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn fetch_ohlcv(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let body = self
            .public(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.min(1000).to_string()),
                ],
            )
            .await
            .map_err(|e| BotError::MarketData(format!("{} {}: {}", symbol, interval, e)))?;

        let candles = parse_klines(&body);
        debug!("Fetched {} candles for {} at {} interval", candles.len(), symbol, interval);
        Ok(candles)
    }

    async fn latest_price(&self, symbol: &str) -> Result<Decimal> {
        let body = self
            .public("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        let ticker: TickerPrice = serde_json::from_value(body)?;
        Decimal::from_str(&ticker.price)
            .map_err(|e| BotError::MarketData(format!("Invalid price for {}: {}", symbol, e)))
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn place_market_order(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<String> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newClientOrderId", uuid::Uuid::new_v4().simple().to_string()),
        ];
        let body = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let order: OrderResponse = serde_json::from_value(body)?;
        Ok(order.order_id.to_string())
    }

    async fn lot_step_size(&self, symbol: &str) -> Result<Option<Decimal>> {
        let body = self
            .public("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        let info: ExchangeInfo = serde_json::from_value(body)?;
        Ok(lot_step(&info, symbol))
    }

    async fn ping(&self) -> Result<()> {
        self.signed(Method::GET, "/api/v3/account", &[]).await?;
        Ok(())
    }
}

/// Connects [`BinanceClient`]s for live trading
pub struct BinanceConnector {
    base_url: String,
}

impl BinanceConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl ExchangeConnector for BinanceConnector {
    fn connect(&self, credentials: &ApiCredentials) -> Result<Arc<dyn Exchange>> {
        if !credentials.is_complete() {
            return Err(BotError::NotConfigured("Exchange credentials".into()));
        }
        let client = BinanceClient::new(&self.base_url)?.with_credentials(credentials.clone());
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sign_matches_reference_vector() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(429, None, ""), ExchangeErrorKind::RateLimit);
        assert_eq!(classify(400, Some(-1003), "too many requests"), ExchangeErrorKind::RateLimit);
        assert_eq!(classify(401, Some(-2015), "Invalid API-key"), ExchangeErrorKind::Auth);
        assert_eq!(
            classify(400, Some(-2010), "Account has insufficient balance for requested action."),
            ExchangeErrorKind::InsufficientFunds
        );
        assert_eq!(classify(400, Some(-1013), "Filter failure: LOT_SIZE"), ExchangeErrorKind::Rejected);
        assert_eq!(classify(503, None, "unavailable"), ExchangeErrorKind::Network);
    }

    #[test]
    fn test_parse_klines() {
        let rows = serde_json::json!([
            [1499040000000i64, "0.01634790", "0.80000000", "0.01575800", "0.01577100", "148976.11427815", 1499644799999i64],
            [1499043600000i64, "0.01577100", "0.01600000", "0.01500000", "0.01590000", "1000.0", 1499647199999i64],
            ["bad row"]
        ]);

        let candles = parse_klines(&rows);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, dec!(0.01577100));
        assert_eq!(candles[1].volume, dec!(1000.0));
        assert!(candles[0].open_time < candles[1].open_time);
    }

    #[test]
    fn test_lot_step_from_exchange_info() {
        let info: ExchangeInfo = serde_json::from_value(serde_json::json!({
            "symbols": [{
                "symbol": "BTCUSDT",
                "filters": [
                    {"filterType": "PRICE_FILTER", "tickSize": "0.01000000"},
                    {"filterType": "LOT_SIZE", "minQty": "0.00001000", "stepSize": "0.00001000"}
                ]
            }]
        }))
        .unwrap();

        assert_eq!(lot_step(&info, "BTCUSDT"), Some(dec!(0.00001)));
        assert_eq!(lot_step(&info, "ETHUSDT"), None);
    }

    #[test]
    fn test_connector_requires_credentials() {
        let connector = BinanceConnector::new("https://api.binance.com");
        assert!(matches!(
            connector.connect(&ApiCredentials::default()),
            Err(BotError::NotConfigured(_))
        ));
        assert!(connector.connect(&ApiCredentials::new("k", "s")).is_ok());
    }
}
