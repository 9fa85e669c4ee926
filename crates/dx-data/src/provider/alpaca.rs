//! Alpaca Market Data v2 클라이언트 (미국 주식 다중 심볼 바).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dx_core::Candle;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::candle::{CandleRequest, MultiCandleProvider};
use super::{http_client, RateLimiter};
use crate::error::{DataError, Result};

pub const DEFAULT_BASE_URL: &str = "https://data.alpaca.markets";

const BARS_PATH: &str = "/v2/stocks/bars";

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Option<HashMap<String, Vec<Bar>>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Bar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    #[serde(default)]
    n: Option<i64>,
    #[serde(default)]
    vw: Option<f64>,
}

/// 내부 타임프레임을 Alpaca 표기로 변환합니다.
pub fn alpaca_timeframe(timeframe: &str) -> Result<&'static str> {
    match timeframe {
        "1m" => Ok("1Min"),
        "5m" => Ok("5Min"),
        "1d" => Ok("1Day"),
        other => Err(DataError::InvalidData(format!(
            "unsupported Alpaca timeframe: {}",
            other
        ))),
    }
}

pub struct AlpacaClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    limiter: RateLimiter,
}

impl AlpacaClient {
    pub fn new(base_url: &str, api_key: &str, api_secret: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(60))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            // 무료 플랜 분당 200회
            limiter: RateLimiter::new(200.0 / 60.0, 3),
        })
    }
}

#[async_trait]
impl MultiCandleProvider for AlpacaClient {
    fn name(&self) -> &str {
        "alpaca"
    }

    async fn fetch_multi(
        &self,
        symbols: &[String],
        request: &CandleRequest,
    ) -> Result<HashMap<String, Vec<Candle>>> {
        let timeframe = alpaca_timeframe(&request.timeframe)?;
        let joined = symbols.join(",");
        let start = request.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = request.end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut out: HashMap<String, Vec<Candle>> = HashMap::new();
        let mut page_token: Option<String> = None;

        loop {
            self.limiter.acquire().await;

            let mut params = vec![
                ("symbols", joined.as_str()),
                ("timeframe", timeframe),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("limit", "10000"),
                ("adjustment", "split"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("page_token", token));
            }

            let response: BarsResponse = self
                .client
                .get(format!("{}{}", self.base_url, BARS_PATH))
                .query(&params)
                .header("APCA-API-KEY-ID", &self.api_key)
                .header("APCA-API-SECRET-KEY", &self.api_secret)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .map_err(|e| DataError::UnrecognizedSchema {
                    provider: "alpaca".to_string(),
                    detail: e.to_string(),
                })?;

            for (symbol, bars) in response.bars.unwrap_or_default() {
                let candles = out.entry(symbol.clone()).or_default();
                candles.extend(bars.into_iter().map(|b| Candle {
                    market: request.market.as_str().to_string(),
                    symbol: symbol.clone(),
                    timeframe: request.timeframe.clone(),
                    ts: b.t.timestamp(),
                    open: b.o,
                    high: b.h,
                    low: b.l,
                    close: b.c,
                    volume: b.v,
                    vwap: b.vw,
                    trade_count: b.n,
                }));
            }

            match response.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => {
                    debug!("Alpaca next page");
                    page_token = Some(token);
                }
                None => break,
            }
        }

        Ok(out)
    }
}
