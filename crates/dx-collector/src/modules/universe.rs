//! 수집 대상 유니버스 생성.
//!
//! 시장별 제공자에서 종목 목록을 받아 instruments를 갱신하고
//! `(날짜, 시장, 최소 시가총액)` 스냅샷을 저장합니다.

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use dx_core::{Instrument, Market, StockQuery, StockSort, UniverseSnapshot};
use dx_data::{JudalRepository, UniverseProvider, UniverseStore};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{CollectorError, Result};

/// 크롤링된 종목 시가총액 단위 (억 원).
const EOK: f64 = 100_000_000.0;

/// 한 번에 읽을 최대 종목 수.
const KR_UNIVERSE_LIMIT: i64 = 5_000;

/// 시장의 기준 시간대.
pub fn market_timezone(market: Market) -> Tz {
    match market {
        Market::Kr => chrono_tz::Asia::Seoul,
        Market::Us => chrono_tz::America::New_York,
    }
}

/// 시장 기준 오늘 날짜 (`YYYY-MM-DD`).
pub fn market_today(market: Market) -> String {
    Utc::now()
        .with_timezone(&market_timezone(market))
        .format("%Y-%m-%d")
        .to_string()
}

/// 크롤링된 종목 테이블을 한국 시장 유니버스로 사용합니다.
pub struct CrawledStockUniverse {
    repo: Arc<JudalRepository>,
}

impl CrawledStockUniverse {
    pub fn new(repo: Arc<JudalRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl UniverseProvider for CrawledStockUniverse {
    fn name(&self) -> &str {
        "judal_stocks"
    }

    async fn fetch_universe(&self, min_market_cap: f64) -> dx_data::Result<Vec<Instrument>> {
        let query = StockQuery {
            sort: StockSort::MarketCap,
            descending: true,
            market: None,
            limit: KR_UNIVERSE_LIMIT,
            offset: 0,
        };
        let (_, stocks) = self.repo.stocks(&query).await?;
        let now = Utc::now().timestamp();

        Ok(stocks
            .into_iter()
            .filter_map(|stock| {
                let market_cap = stock.indicators.market_cap.map(|cap| cap as f64 * EOK);
                if min_market_cap > 0.0 && market_cap.unwrap_or(0.0) < min_market_cap {
                    return None;
                }
                Some(Instrument {
                    market: Market::Kr.as_str().to_string(),
                    symbol: stock.code,
                    name: Some(stock.name),
                    exchange: (!stock.market.is_empty()).then_some(stock.market),
                    currency: Some("KRW".to_string()),
                    market_cap,
                    market_cap_ts: Some(stock.updated_at.timestamp()),
                    is_active: true,
                    updated_at: now,
                })
            })
            .collect())
    }
}

/// 유니버스 생성기.
pub struct UniverseBuilder {
    store: Arc<dyn UniverseStore>,
    providers: HashMap<Market, Arc<dyn UniverseProvider>>,
}

impl UniverseBuilder {
    pub fn new(store: Arc<dyn UniverseStore>) -> Self {
        Self {
            store,
            providers: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, market: Market, provider: Arc<dyn UniverseProvider>) -> Self {
        self.providers.insert(market, provider);
        self
    }

    pub fn supports(&self, market: Market) -> bool {
        self.providers.contains_key(&market)
    }

    /// 유니버스를 새로 만들고 스냅샷을 저장합니다.
    #[instrument(skip(self))]
    pub async fn build(&self, market: Market, min_market_cap: f64, ymd: &str) -> Result<UniverseSnapshot> {
        let provider = self.providers.get(&market).ok_or_else(|| {
            CollectorError::NotConfigured(format!("universe provider for {}", market))
        })?;

        let instruments: Vec<Instrument> = provider
            .fetch_universe(min_market_cap)
            .await?
            .into_iter()
            .filter(|i| i.market == market.as_str())
            .collect();

        let updated = self.store.upsert_instruments(&instruments).await?;

        let symbols: BTreeSet<String> = instruments.into_iter().map(|i| i.symbol).collect();
        let snapshot = UniverseSnapshot {
            ymd: ymd.to_string(),
            market: market.as_str().to_string(),
            market_cap_min: min_market_cap,
            symbols: symbols.into_iter().collect(),
            created_at: Utc::now().timestamp(),
        };
        self.store.save_snapshot(&snapshot).await?;

        info!(
            provider = provider.name(),
            instruments = updated,
            symbols = snapshot.symbols.len(),
            "유니버스 생성 완료"
        );
        Ok(snapshot)
    }

    /// 해당 날짜 스냅샷이 있으면 그대로, 없으면 새로 만듭니다.
    pub async fn ensure(&self, market: Market, min_market_cap: f64, ymd: &str) -> Result<Vec<String>> {
        if let Some(symbols) = self.store.load_symbols(ymd, market.as_str()).await? {
            return Ok(symbols);
        }
        Ok(self.build(market, min_market_cap, ymd).await?.symbols)
    }
}
