//! 서비스 조립과 예약 작업 등록.
//!
//! 도메인마다 저장소를 따로 엽니다. 하나가 실패해도 나머지 도메인은 동작하며,
//! 자격 증명이 없는 도메인의 작업은 등록하지 않습니다.

use dx_core::{AppConfig, IngestParams, IngestRun, Market};
use dx_data::provider::{
    dart, AlpacaClient, DartClient, FmpClient, JudalClient, KiwoomDailyAdapter,
    KiwoomMinuteAdapter, NaverNewsFetcher, NewsApiFetcher,
};
use dx_data::{
    Database, DartRepository, Fetcher, JudalRepository, SqliteCandleStore, SqliteNewsStore,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{CollectorError, Result};
use crate::modules::universe::market_today;
use crate::modules::{
    CandleService, CandleSource, CrawlCoordinator, CrawledStockUniverse, DartJobs, NewsProcessor,
    ThemeCrawler, TitleSimilarityDeduplicator, UniverseBuilder,
};
use crate::scheduler::Scheduler;

/// 도메인별 저장소와 파이프라인.
///
/// 열리지 않았거나 설정되지 않은 도메인은 `None`입니다.
#[derive(Clone, Default)]
pub struct Services {
    pub news_store: Option<Arc<SqliteNewsStore>>,
    pub news: Option<Arc<NewsProcessor>>,
    pub judal: Option<Arc<JudalRepository>>,
    pub crawl: Option<Arc<CrawlCoordinator>>,
    pub dart_repo: Option<Arc<DartRepository>>,
    pub dart: Option<Arc<DartJobs>>,
    pub candle_store: Option<Arc<SqliteCandleStore>>,
    pub candles: Option<Arc<CandleService>>,
    pub universe: Option<Arc<UniverseBuilder>>,
    /// 스케줄 작업의 유니버스 최소 시가총액
    pub min_market_cap: f64,
}

async fn open_database(domain: &str, path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => Some(db),
        Err(e) => {
            warn!(domain, path, error = %e, "Store unavailable, domain disabled");
            None
        }
    }
}

impl Services {
    /// 설정으로부터 모든 도메인을 엽니다.
    pub async fn open(config: &AppConfig) -> Self {
        let mut services = Self {
            min_market_cap: config.candle.universe_min_market_cap,
            ..Default::default()
        };

        services.open_news(config).await;
        services.open_judal(config).await;
        services.open_dart(config).await;
        services.open_candles(config).await;

        info!(
            news = services.news.is_some(),
            judal = services.crawl.is_some(),
            dart = services.dart.is_some(),
            candles = services.candles.is_some(),
            "Services ready"
        );
        services
    }

    async fn open_news(&mut self, config: &AppConfig) {
        let Some(db) = open_database("news", &config.storage.news_db_path).await else {
            return;
        };
        let store = match SqliteNewsStore::new(db).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(domain = "news", error = %e, "Domain disabled");
                return;
            }
        };
        self.news_store = Some(store.clone());

        let keys = &config.keys;
        let mut fetchers: Vec<Arc<dyn Fetcher>> = Vec::new();
        if let (Some(id), Some(secret)) = (&keys.naver_client_id, &keys.naver_client_secret) {
            match NaverNewsFetcher::new(&config.news.naver_base_url, id, secret) {
                Ok(fetcher) => fetchers.push(Arc::new(fetcher)),
                Err(e) => warn!(error = %e, "Naver fetcher disabled"),
            }
        }
        if let Some(key) = &keys.newsapi_key {
            match NewsApiFetcher::new(&config.news.newsapi_base_url, key) {
                Ok(fetcher) => fetchers.push(Arc::new(fetcher)),
                Err(e) => warn!(error = %e, "NewsAPI fetcher disabled"),
            }
        }
        if fetchers.is_empty() {
            warn!("No news fetcher configured, news pipeline disabled");
            return;
        }

        let dedup = Arc::new(TitleSimilarityDeduplicator::new(store.clone(), &config.news));
        self.news = Some(Arc::new(NewsProcessor::new(fetchers, store, dedup)));
    }

    async fn open_judal(&mut self, config: &AppConfig) {
        let Some(db) = open_database("judal", &config.storage.judal_db_path).await else {
            return;
        };
        let repo = match JudalRepository::new(db).await {
            Ok(repo) => Arc::new(repo),
            Err(e) => {
                warn!(domain = "judal", error = %e, "Domain disabled");
                return;
            }
        };
        self.judal = Some(repo.clone());

        let crawler_config = &config.crawler;
        let client = match JudalClient::new(
            &crawler_config.base_url,
            std::time::Duration::from_secs(crawler_config.timeout_secs),
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(domain = "judal crawler", error = %e, "Domain disabled");
                return;
            }
        };
        let crawler = ThemeCrawler::new(client, repo, crawler_config.delay());
        self.crawl = Some(Arc::new(CrawlCoordinator::new(Arc::new(crawler))));
    }

    async fn open_dart(&mut self, config: &AppConfig) {
        let Some(db) = open_database("dart", &config.storage.dart_db_path).await else {
            return;
        };
        let repo = match DartRepository::new(db).await {
            Ok(repo) => Arc::new(repo),
            Err(e) => {
                warn!(domain = "dart", error = %e, "Domain disabled");
                return;
            }
        };
        self.dart_repo = Some(repo.clone());

        let Some(key) = &config.keys.dart_api_key else {
            warn!("DART_API_KEY not set, DART jobs disabled");
            return;
        };
        match DartClient::new(dart::DEFAULT_BASE_URL, key) {
            Ok(client) => {
                self.dart = Some(Arc::new(DartJobs::new(
                    Arc::new(client),
                    repo,
                    &config.storage.storage_dir,
                )));
            }
            Err(e) => warn!(error = %e, "DART client disabled"),
        }
    }

    async fn open_candles(&mut self, config: &AppConfig) {
        let Some(db) = open_database("candle", &config.storage.candle_db_path).await else {
            return;
        };
        let store = match SqliteCandleStore::new(db).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(domain = "candle", error = %e, "Domain disabled");
                return;
            }
        };
        self.candle_store = Some(store.clone());

        let keys = &config.keys;
        let candle_config = &config.candle;

        let mut universe = UniverseBuilder::new(store.clone());
        if let Some(key) = &keys.fmp_api_key {
            match FmpClient::new(&candle_config.fmp_base_url, key) {
                Ok(fmp) => universe = universe.with_provider(Market::Us, Arc::new(fmp)),
                Err(e) => warn!(error = %e, "FMP universe provider disabled"),
            }
        }
        if let Some(judal) = &self.judal {
            universe = universe.with_provider(Market::Kr, Arc::new(CrawledStockUniverse::new(judal.clone())));
        }
        self.universe = Some(Arc::new(universe));

        let mut service = CandleService::new(store.clone(), store.clone(), store, candle_config);
        if let (Some(key), Some(secret)) = (&keys.alpaca_api_key, &keys.alpaca_api_secret) {
            match AlpacaClient::new(&candle_config.alpaca_base_url, key, secret) {
                Ok(alpaca) => {
                    service = service.with_source(
                        Market::Us,
                        &["1m", "5m", "1d"],
                        CandleSource::Multi(Arc::new(alpaca)),
                    );
                }
                Err(e) => warn!(error = %e, "Alpaca provider disabled"),
            }
        }
        if let Some(url) = &keys.kiwoom_rest_api_url {
            match (KiwoomMinuteAdapter::new(url), KiwoomDailyAdapter::new(url)) {
                (Ok(minute), Ok(daily)) => {
                    service = service
                        .with_source(Market::Kr, &["1m"], CandleSource::Single(Arc::new(minute)))
                        .with_source(Market::Kr, &["1d"], CandleSource::Single(Arc::new(daily)));
                }
                (Err(e), _) | (_, Err(e)) => warn!(error = %e, "Kiwoom provider disabled"),
            }
        }

        if service.has_sources() {
            self.candles = Some(Arc::new(service));
        } else {
            warn!("No candle provider configured, candle ingest disabled");
        }
    }

    /// 유니버스 스냅샷을 확보한 뒤 캔들을 수집합니다.
    ///
    /// 유니버스 제공자가 없는 시장은 저장된 스냅샷만 사용합니다.
    pub async fn collect_candles(&self, params: IngestParams) -> Result<IngestRun> {
        let candles = self
            .candles
            .as_ref()
            .ok_or_else(|| CollectorError::NotConfigured("candle ingest".to_string()))?;

        let ymd = params
            .ymd
            .clone()
            .unwrap_or_else(|| market_today(params.market));

        if let Some(universe) = self.universe.as_ref().filter(|u| u.supports(params.market)) {
            if let Err(e) = universe.ensure(params.market, self.min_market_cap, &ymd).await {
                warn!(market = %params.market, %ymd, error = %e, "Universe refresh failed");
            }
        }

        candles
            .ingest(&IngestParams {
                ymd: Some(ymd),
                ..params
            })
            .await
    }

    /// 시작 시 한 번 실행하는 초기화 작업.
    pub async fn initial_setup(&self) {
        if let Some(dart) = &self.dart {
            if let Err(e) = dart.initial_setup().await {
                error!(error = %e, "DART initial setup failed");
            }
        }
    }
}

/// 설정된 도메인의 예약 작업을 등록하고 등록된 개수를 반환합니다.
pub fn register_jobs(scheduler: &mut Scheduler, services: &Services, config: &AppConfig) -> Result<usize> {
    let schedule = &config.schedule;
    let before = scheduler.jobs().len();

    if let Some(news) = &services.news {
        let news = news.clone();
        scheduler.add_job("news_fetch", &schedule.news_fetch, move || {
            let news = news.clone();
            async move {
                if let Err(e) = news.run().await {
                    error!(error = %e, "News run failed");
                }
            }
        })?;
    }

    if let Some(crawl) = &services.crawl {
        let crawl = crawl.clone();
        scheduler.add_job("judal_crawl", &schedule.judal_crawl, move || {
            let crawl = crawl.clone();
            async move {
                // 이미 실행 중이면 coordinator가 경고를 남김
                if let Ok(result) = crawl.run(true).await {
                    info!(
                        themes = result.themes_crawled,
                        stocks = result.stocks_crawled,
                        history = result.history_saved,
                        errors = result.errors.len(),
                        duration_secs = result.duration_seconds,
                        "Scheduled judal crawl finished"
                    );
                }
            }
        })?;
    }

    if let Some(dart) = &services.dart {
        let jobs = dart.clone();
        scheduler.add_job("dart_filings", &schedule.dart_filings, move || {
            let jobs = jobs.clone();
            async move {
                if let Err(e) = jobs.fetch_filings().await {
                    error!(error = %e, "DART filings job failed");
                }
            }
        })?;

        let jobs = dart.clone();
        scheduler.add_job("dart_documents", &schedule.dart_documents, move || {
            let jobs = jobs.clone();
            async move {
                if let Err(e) = jobs.download_documents().await {
                    error!(error = %e, "DART document job failed");
                }
            }
        })?;

        let jobs = dart.clone();
        scheduler.add_job("dart_corps", &schedule.dart_corps, move || {
            let jobs = jobs.clone();
            async move {
                if let Err(e) = jobs.update_corp_codes().await {
                    error!(error = %e, "DART corp code job failed");
                }
            }
        })?;
    }

    if let Some(candles) = &services.candles {
        for (name, cron, timeframe) in [
            ("candle_us_daily", &schedule.candle_us_daily, "1d"),
            ("candle_us_minute", &schedule.candle_us_minute, "1m"),
        ] {
            if !candles.supports(Market::Us, timeframe) {
                continue;
            }
            let services = services.clone();
            scheduler.add_job(name, cron, move || {
                let services = services.clone();
                async move {
                    let params = IngestParams {
                        market: Market::Us,
                        timeframe: timeframe.to_string(),
                        ymd: None,
                    };
                    if let Err(e) = services.collect_candles(params).await {
                        error!(timeframe, error = %e, "Candle ingest failed");
                    }
                }
            })?;
        }
    }

    let registered = scheduler.jobs().len() - before;
    info!(registered, "Scheduled jobs registered");
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        let path = |name: &str| dir.join(name).to_string_lossy().into_owned();
        config.storage.news_db_path = path("news.db");
        config.storage.judal_db_path = path("judal.db");
        config.storage.dart_db_path = path("dart.db");
        config.storage.candle_db_path = path("candle.db");
        config.storage.storage_dir = path("storage");
        config
    }

    #[tokio::test]
    async fn test_domains_without_keys_are_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let services = Services::open(&config).await;
        assert!(services.news_store.is_some());
        assert!(services.news.is_none());
        assert!(services.dart_repo.is_some());
        assert!(services.dart.is_none());
        assert!(services.candles.is_none());
        assert!(services.crawl.is_some());

        let universe = services.universe.as_ref().unwrap();
        assert!(universe.supports(Market::Kr));
        assert!(!universe.supports(Market::Us));

        let mut scheduler = Scheduler::new(config.schedule.tz().unwrap());
        assert_eq!(register_jobs(&mut scheduler, &services, &config).unwrap(), 1);
        assert_eq!(scheduler.jobs()[0].name, "judal_crawl");

        assert!(matches!(
            services
                .collect_candles(IngestParams {
                    market: Market::Us,
                    timeframe: "1d".to_string(),
                    ymd: None,
                })
                .await,
            Err(CollectorError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_keys_enable_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.keys.dart_api_key = Some("dart".to_string());
        config.keys.newsapi_key = Some("news".to_string());
        config.keys.alpaca_api_key = Some("id".to_string());
        config.keys.alpaca_api_secret = Some("secret".to_string());

        let services = Services::open(&config).await;
        assert_eq!(services.news.as_ref().unwrap().sources(), vec!["newsapi"]);

        let mut scheduler = Scheduler::new(config.schedule.tz().unwrap());
        assert_eq!(register_jobs(&mut scheduler, &services, &config).unwrap(), 7);

        let names: Vec<&str> = scheduler.jobs().iter().map(|j| j.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "news_fetch",
                "judal_crawl",
                "dart_filings",
                "dart_documents",
                "dart_corps",
                "candle_us_daily",
                "candle_us_minute"
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_cron_fails_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.schedule.judal_crawl = "not a cron".to_string();

        let services = Services::open(&config).await;
        let mut scheduler = Scheduler::new(config.schedule.tz().unwrap());
        assert!(matches!(
            register_jobs(&mut scheduler, &services, &config),
            Err(CollectorError::Scheduler(_))
        ));
    }
}
