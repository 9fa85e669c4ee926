//! Financial Modeling Prep 스크리너 (미국 유니버스).

use async_trait::async_trait;
use chrono::Utc;
use dx_core::{Instrument, Market};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::candle::UniverseProvider;
use super::http_client;
use crate::error::{DataError, Result};

pub const DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

const US_EXCHANGES: &str = "NASDAQ,NYSE,AMEX";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreenerItem {
    symbol: String,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    exchange_short_name: Option<String>,
}

pub struct FmpClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FmpClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(30))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl UniverseProvider for FmpClient {
    fn name(&self) -> &str {
        "fmp"
    }

    async fn fetch_universe(&self, min_market_cap: f64) -> Result<Vec<Instrument>> {
        let min = format!("{:.0}", min_market_cap);
        let items: Vec<ScreenerItem> = self
            .client
            .get(format!("{}/stock-screener", self.base_url))
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("marketCapMoreThan", min.as_str()),
                ("exchange", US_EXCHANGES),
                ("country", "US"),
                ("limit", "10000"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| DataError::UnrecognizedSchema {
                provider: "fmp".to_string(),
                detail: e.to_string(),
            })?;

        let now = Utc::now().timestamp();
        Ok(items
            .into_iter()
            .map(|item| Instrument {
                market: Market::Us.as_str().to_string(),
                symbol: item.symbol,
                name: item.company_name,
                exchange: item.exchange_short_name,
                currency: Some("USD".to_string()),
                market_cap: item.market_cap,
                market_cap_ts: Some(now),
                is_active: true,
                updated_at: now,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_fetch_universe() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stock-screener")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("marketCapMoreThan".into(), "1000000000".into()),
                Matcher::UrlEncoded("exchange".into(), US_EXCHANGES.into()),
            ]))
            .with_body(
                r#"[{"symbol":"AAPL","companyName":"Apple Inc.","marketCap":2.9e12,"exchangeShortName":"NASDAQ","isEtf":false}]"#,
            )
            .create_async()
            .await;

        let client = FmpClient::new(&server.url(), "key").unwrap();
        let universe = client.fetch_universe(1e9).await.unwrap();
        assert_eq!(universe.len(), 1);
        assert_eq!(universe[0].symbol, "AAPL");
        assert_eq!(universe[0].market, "US");
        assert_eq!(universe[0].currency.as_deref(), Some("USD"));
    }
}
