//! 키움 REST 게이트웨이 어댑터 (한국 주식, 단일 심볼).
//!
//! 분봉과 일봉은 서로 다른 엔드포인트/응답 스키마를 가지므로
//! 어댑터를 분리합니다. 기대한 스키마가 아니면 `UnrecognizedSchema`를 반환합니다.
//!
//! - 분봉: `GET /stocks/{code}/minute-ohlcv?start_datetime&end_datetime`
//! - 일봉: `GET /stocks/{code}/period-ohlcv?start_date&end_date`
//!
//! 두 응답 모두 `{count, data: [...]}` 형태이며 시각은 한국 시간입니다.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use dx_core::Candle;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use super::candle::{CandleRequest, SingleCandleProvider};
use super::{http_client, RateLimiter};
use crate::error::{DataError, Result};

const PROVIDER: &str = "kiwoom_rest";

#[derive(Debug, Deserialize)]
struct MinuteResponse {
    data: Vec<MinuteBar>,
}

#[derive(Debug, Deserialize)]
struct MinuteBar {
    /// `YYYY-MM-DD HH:MM:SS[.fffffffff]` (KST) 또는 RFC 3339
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct DailyResponse {
    data: Vec<DailyBar>,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    /// `YYYY-MM-DD` 또는 `YYYYMMDD`
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// 공통 HTTP 부분.
struct KiwoomRest {
    client: Client,
    base_url: String,
    limiter: RateLimiter,
}

impl KiwoomRest {
    fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(30))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::per_second(5),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        self.limiter.acquire().await;

        let body = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        serde_json::from_str(&body).map_err(|e| DataError::UnrecognizedSchema {
            provider: PROVIDER.to_string(),
            detail: format!("{}: {}", path, e),
        })
    }
}

fn parse_kst_datetime(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    Seoul.from_local_datetime(&naive).single().map(|dt| dt.timestamp())
}

fn parse_kst_date(s: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Seoul.from_local_datetime(&midnight).single().map(|dt| dt.timestamp())
}

fn kst(dt: DateTime<Utc>) -> chrono::DateTime<chrono_tz::Tz> {
    dt.with_timezone(&Seoul)
}

/// 분봉 어댑터.
pub struct KiwoomMinuteAdapter {
    rest: KiwoomRest,
}

impl KiwoomMinuteAdapter {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            rest: KiwoomRest::new(base_url)?,
        })
    }
}

#[async_trait]
impl SingleCandleProvider for KiwoomMinuteAdapter {
    fn name(&self) -> &str {
        "kiwoom_rest_minute"
    }

    async fn fetch_candles(&self, symbol: &str, request: &CandleRequest) -> Result<Vec<Candle>> {
        let params = [
            (
                "start_datetime",
                kst(request.start).format("%Y-%m-%dT%H:%M:%S").to_string(),
            ),
            (
                "end_datetime",
                kst(request.end).format("%Y-%m-%dT%H:%M:%S").to_string(),
            ),
        ];
        let response: MinuteResponse = self
            .rest
            .get(&format!("/stocks/{}/minute-ohlcv", symbol), &params)
            .await?;

        let mut candles = Vec::with_capacity(response.data.len());
        for bar in response.data {
            let Some(ts) = parse_kst_datetime(&bar.time) else {
                warn!(symbol, time = %bar.time, "Skipping minute bar with unparsable time");
                continue;
            };
            candles.push(Candle {
                market: request.market.as_str().to_string(),
                symbol: symbol.to_string(),
                timeframe: request.timeframe.clone(),
                ts,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                vwap: None,
                trade_count: None,
            });
        }
        Ok(candles)
    }
}

/// 일봉 어댑터.
pub struct KiwoomDailyAdapter {
    rest: KiwoomRest,
}

impl KiwoomDailyAdapter {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            rest: KiwoomRest::new(base_url)?,
        })
    }
}

#[async_trait]
impl SingleCandleProvider for KiwoomDailyAdapter {
    fn name(&self) -> &str {
        "kiwoom_rest_daily"
    }

    async fn fetch_candles(&self, symbol: &str, request: &CandleRequest) -> Result<Vec<Candle>> {
        let params = [
            ("start_date", kst(request.start).format("%Y-%m-%d").to_string()),
            ("end_date", kst(request.end).format("%Y-%m-%d").to_string()),
        ];
        let response: DailyResponse = self
            .rest
            .get(&format!("/stocks/{}/period-ohlcv", symbol), &params)
            .await?;

        let mut candles = Vec::with_capacity(response.data.len());
        for bar in response.data {
            let Some(ts) = parse_kst_date(&bar.date) else {
                warn!(symbol, date = %bar.date, "Skipping daily bar with unparsable date");
                continue;
            };
            candles.push(Candle {
                market: request.market.as_str().to_string(),
                symbol: symbol.to_string(),
                timeframe: request.timeframe.clone(),
                ts,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                vwap: None,
                trade_count: None,
            });
        }
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dx_core::Market;
    use mockito::Matcher;

    fn request(timeframe: &str) -> CandleRequest {
        CandleRequest {
            market: Market::Kr,
            timeframe: timeframe.to_string(),
            start: DateTime::parse_from_rfc3339("2024-05-02T00:00:00Z").unwrap().into(),
            end: DateTime::parse_from_rfc3339("2024-05-02T06:30:00Z").unwrap().into(),
        }
    }

    #[tokio::test]
    async fn test_minute_adapter() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stocks/005930/minute-ohlcv")
            .match_query(Matcher::UrlEncoded(
                "start_datetime".into(),
                "2024-05-02T09:00:00".into(),
            ))
            .with_body(
                r#"{"count":2,"data":[
                    {"time":"2024-05-02 09:00:00.000000000","open":1,"high":2,"low":1,"close":2,"volume":10},
                    {"time":"garbage","open":1,"high":2,"low":1,"close":2,"volume":10}
                ]}"#,
            )
            .create_async()
            .await;

        let adapter = KiwoomMinuteAdapter::new(&server.url()).unwrap();
        let candles = adapter.fetch_candles("005930", &request("1m")).await.unwrap();
        assert_eq!(candles.len(), 1);
        // 09:00 KST == 00:00 UTC
        assert_eq!(candles[0].ts, 1_714_608_000);
        assert_eq!(candles[0].market, "KR");
    }

    #[tokio::test]
    async fn test_daily_adapter() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stocks/005930/period-ohlcv")
            .match_query(Matcher::Any)
            .with_body(r#"{"count":1,"data":[{"date":"2024-05-02","open":1,"high":2,"low":1,"close":2,"volume":10}]}"#)
            .create_async()
            .await;

        let adapter = KiwoomDailyAdapter::new(&server.url()).unwrap();
        let candles = adapter.fetch_candles("005930", &request("1d")).await.unwrap();
        assert_eq!(candles[0].ts, 1_714_575_600);
    }

    #[tokio::test]
    async fn test_unknown_payload_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stocks/005930/period-ohlcv")
            .match_query(Matcher::Any)
            .with_body(r#"{"stk_dt_pole_chart_qry":[{"dt":"20240502"}]}"#)
            .create_async()
            .await;

        let adapter = KiwoomDailyAdapter::new(&server.url()).unwrap();
        assert!(matches!(
            adapter.fetch_candles("005930", &request("1d")).await,
            Err(DataError::UnrecognizedSchema { .. })
        ));
    }
}
