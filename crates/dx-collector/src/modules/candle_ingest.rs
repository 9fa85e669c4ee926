//! 캔들 수집.
//!
//! 1. 날짜/시장의 유니버스 스냅샷에서 대상 심볼을 읽습니다.
//! 2. 다중 심볼 제공자는 배치로, 단일 심볼 제공자는 하나씩 호출합니다.
//! 3. 심볼별 마지막 저장 시각 이후만 요청하고, 응답도 그 이후 봉만 남깁니다.
//! 4. 실행 기록(IngestRun)을 시작 시 생성하고 종료 시 갱신합니다.
//!
//! 배치/심볼 하나의 제공자 에러는 로그만 남기고 기여분 0으로 처리합니다.

use chrono::{DateTime, Duration, Utc};
use dx_core::{Candle, CandleConfig, IngestParams, IngestRun, Market};
use dx_data::{
    CandleRequest, CandleStore, IngestRunStore, MultiCandleProvider, SingleCandleProvider,
    UniverseStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::universe::market_today;
use crate::error::Result;
use crate::stats::CollectionStats;

/// 실행 기록의 작업 이름.
const JOB_NAME: &str = "candles";

/// 등록된 제공자.
#[derive(Clone)]
pub enum CandleSource {
    Multi(Arc<dyn MultiCandleProvider>),
    Single(Arc<dyn SingleCandleProvider>),
}

impl CandleSource {
    pub fn name(&self) -> &str {
        match self {
            Self::Multi(p) => p.name(),
            Self::Single(p) => p.name(),
        }
    }
}

/// 마지막 저장 시각보다 뒤의 봉만 남깁니다.
pub fn filter_new_bars(bars: Vec<Candle>, last_ts: Option<i64>) -> Vec<Candle> {
    match last_ts {
        Some(last) => bars.into_iter().filter(|c| c.ts > last).collect(),
        None => bars,
    }
}

/// 캔들 수집 서비스.
pub struct CandleService {
    candles: Arc<dyn CandleStore>,
    universe: Arc<dyn UniverseStore>,
    runs: Arc<dyn IngestRunStore>,
    routes: HashMap<(Market, String), CandleSource>,
    backfill: Duration,
    batch_size: usize,
}

impl CandleService {
    pub fn new(
        candles: Arc<dyn CandleStore>,
        universe: Arc<dyn UniverseStore>,
        runs: Arc<dyn IngestRunStore>,
        config: &CandleConfig,
    ) -> Self {
        Self {
            candles,
            universe,
            runs,
            routes: HashMap::new(),
            backfill: Duration::days(config.backfill_days.max(1)),
            batch_size: config.batch_size.max(1),
        }
    }

    /// 시장/타임프레임 조합에 제공자를 등록합니다.
    pub fn with_source(mut self, market: Market, timeframes: &[&str], source: CandleSource) -> Self {
        for tf in timeframes {
            self.routes.insert((market, tf.to_string()), source.clone());
        }
        self
    }

    pub fn supports(&self, market: Market, timeframe: &str) -> bool {
        self.routes.contains_key(&(market, timeframe.to_string()))
    }

    pub fn has_sources(&self) -> bool {
        !self.routes.is_empty()
    }

    /// 한 번의 수집 실행.
    ///
    /// 실행 기록 생성 자체가 실패한 경우에만 에러를 반환합니다.
    #[instrument(skip(self), fields(market = %params.market, timeframe = %params.timeframe))]
    pub async fn ingest(&self, params: &IngestParams) -> Result<IngestRun> {
        let started = Instant::now();
        let market = params.market;
        let ymd = params.ymd.clone().unwrap_or_else(|| market_today(market));

        let universe = self.universe.load_symbols(&ymd, market.as_str()).await;
        let symbols_count = match &universe {
            Ok(Some(symbols)) => symbols.len() as i64,
            _ => 0,
        };

        let mut run = IngestRun {
            id: 0,
            started_at: Utc::now().timestamp(),
            finished_at: None,
            market: market.as_str().to_string(),
            job: JOB_NAME.to_string(),
            timeframe: Some(params.timeframe.clone()),
            symbols_count,
            inserted_rows: 0,
            status: "running".to_string(),
            error_message: None,
        };
        run.id = self.runs.create_run(&run).await?;

        info!(run_id = run.id, %ymd, symbols = symbols_count, "캔들 수집 시작");

        let outcome = match universe {
            Ok(Some(symbols)) => match self.routes.get(&(market, params.timeframe.clone())) {
                Some(source) => Ok(self.collect(source, &symbols, params).await),
                None => Err(format!(
                    "no provider for {} {}",
                    market.as_str(),
                    params.timeframe
                )),
            },
            Ok(None) => Err(format!("universe snapshot not found for {} {}", ymd, market.as_str())),
            Err(e) => Err(format!("failed to load universe: {}", e)),
        };

        run.finished_at = Some(Utc::now().timestamp());
        match outcome {
            Ok(stats) => {
                run.inserted_rows = stats.rows as i64;
                run.status = "success".to_string();
                stats.log_summary("캔들 수집");
            }
            Err(message) => {
                error!(run_id = run.id, error = %message, "Candle ingest failed");
                run.status = "failed".to_string();
                run.error_message = Some(message);
            }
        }

        if let Err(e) = self.runs.finish_run(&run).await {
            error!(run_id = run.id, error = %e, "Failed to finish ingest run");
        }

        metrics::counter!("candles_inserted_total", "market" => market.as_str())
            .increment(run.inserted_rows as u64);
        metrics::counter!("pipeline_runs_total", "pipeline" => "candles", "status" => run.status.clone())
            .increment(1);

        info!(
            run_id = run.id,
            status = %run.status,
            inserted = run.inserted_rows,
            elapsed = format!("{:.1}s", started.elapsed().as_secs_f64()),
            "캔들 수집 완료"
        );
        Ok(run)
    }

    async fn collect(&self, source: &CandleSource, symbols: &[String], params: &IngestParams) -> CollectionStats {
        let started = Instant::now();
        let mut stats = CollectionStats::new();
        let end = Utc::now();

        match source {
            CandleSource::Multi(provider) => {
                let size = self.batch_size.min(provider.batch_size()).max(1);
                for chunk in symbols.chunks(size) {
                    stats.total += chunk.len();
                    self.collect_batch(provider.as_ref(), chunk, params, end, &mut stats)
                        .await;
                }
            }
            CandleSource::Single(provider) => {
                for symbol in symbols {
                    stats.total += 1;
                    self.collect_symbol(provider.as_ref(), symbol, params, end, &mut stats)
                        .await;
                }
            }
        }

        stats.elapsed = started.elapsed();
        stats
    }

    fn start_after(&self, last_ts: Option<i64>, end: DateTime<Utc>) -> DateTime<Utc> {
        last_ts
            .and_then(|ts| DateTime::from_timestamp(ts + 1, 0))
            .unwrap_or(end - self.backfill)
    }

    async fn last_ts(&self, market: Market, symbol: &str, timeframe: &str) -> Option<i64> {
        match self.candles.last_ts(market.as_str(), symbol, timeframe).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(symbol, error = %e, "Failed to read last timestamp, using backfill window");
                None
            }
        }
    }

    async fn collect_batch(
        &self,
        provider: &dyn MultiCandleProvider,
        chunk: &[String],
        params: &IngestParams,
        end: DateTime<Utc>,
        stats: &mut CollectionStats,
    ) {
        let mut last_seen: HashMap<&str, Option<i64>> = HashMap::with_capacity(chunk.len());
        for symbol in chunk {
            let last = self.last_ts(params.market, symbol, &params.timeframe).await;
            last_seen.insert(symbol.as_str(), last);
        }

        // 배치 안에서 가장 오래된 지점부터 요청
        let start = last_seen
            .values()
            .map(|last| self.start_after(*last, end))
            .min()
            .unwrap_or(end - self.backfill);
        let request = CandleRequest {
            market: params.market,
            timeframe: params.timeframe.clone(),
            start,
            end,
        };

        let bars = match provider.fetch_multi(chunk, &request).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!(provider = provider.name(), symbols = chunk.len(), error = %e, "Batch fetch failed");
                stats.errors += chunk.len();
                return;
            }
        };

        for symbol in chunk {
            let received = bars.get(symbol).cloned().unwrap_or_default();
            let last = last_seen.get(symbol.as_str()).copied().flatten();
            self.store_bars(symbol, received, last, stats).await;
        }
    }

    async fn collect_symbol(
        &self,
        provider: &dyn SingleCandleProvider,
        symbol: &str,
        params: &IngestParams,
        end: DateTime<Utc>,
        stats: &mut CollectionStats,
    ) {
        let last = self.last_ts(params.market, symbol, &params.timeframe).await;
        let request = CandleRequest {
            market: params.market,
            timeframe: params.timeframe.clone(),
            start: self.start_after(last, end),
            end,
        };

        match provider.fetch_candles(symbol, &request).await {
            Ok(received) => self.store_bars(symbol, received, last, stats).await,
            Err(e) => {
                warn!(provider = provider.name(), symbol, error = %e, "Symbol fetch failed");
                stats.errors += 1;
            }
        }
    }

    async fn store_bars(
        &self,
        symbol: &str,
        received: Vec<Candle>,
        last: Option<i64>,
        stats: &mut CollectionStats,
    ) {
        if received.is_empty() {
            stats.empty += 1;
            return;
        }
        let fresh = filter_new_bars(received, last);
        if fresh.is_empty() {
            stats.skipped += 1;
            return;
        }

        match self.candles.append(&fresh).await {
            Ok(inserted) => {
                debug!(symbol, inserted, "Stored candles");
                stats.success += 1;
                stats.rows += inserted;
            }
            Err(e) => {
                warn!(symbol, error = %e, "Failed to append candles");
                stats.errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dx_core::UniverseSnapshot;
    use dx_data::{Database, DataError, SqliteCandleStore};
    use std::sync::Mutex;

    fn bar(symbol: &str, ts: i64) -> Candle {
        Candle {
            market: "US".to_string(),
            symbol: symbol.to_string(),
            timeframe: "1m".to_string(),
            ts,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 100.0,
            vwap: None,
            trade_count: None,
        }
    }

    /// 고정 마지막 시각을 돌려주고 append 입력을 기록하는 저장소.
    struct RecordingStore {
        last: Option<i64>,
        appended: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl CandleStore for RecordingStore {
        async fn last_ts(&self, _: &str, _: &str, _: &str) -> dx_data::Result<Option<i64>> {
            Ok(self.last)
        }

        async fn append(&self, candles: &[Candle]) -> dx_data::Result<usize> {
            self.appended
                .lock()
                .unwrap()
                .extend(candles.iter().map(|c| c.ts));
            Ok(candles.len())
        }
    }

    struct FixedSingle {
        bars: Vec<i64>,
        requests: Mutex<Vec<CandleRequest>>,
    }

    #[async_trait]
    impl SingleCandleProvider for FixedSingle {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch_candles(&self, symbol: &str, request: &CandleRequest) -> dx_data::Result<Vec<Candle>> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.bars.iter().map(|ts| bar(symbol, *ts)).collect())
        }
    }

    /// 특정 심볼이 포함된 배치는 실패하는 다중 제공자.
    struct FlakyMulti {
        poison: &'static str,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl MultiCandleProvider for FlakyMulti {
        fn name(&self) -> &str {
            "flaky"
        }

        fn batch_size(&self) -> usize {
            2
        }

        async fn fetch_multi(
            &self,
            symbols: &[String],
            _request: &CandleRequest,
        ) -> dx_data::Result<HashMap<String, Vec<Candle>>> {
            *self.calls.lock().unwrap() += 1;
            if symbols.iter().any(|s| s == self.poison) {
                return Err(DataError::FetchError("timeout".to_string()));
            }
            Ok(symbols
                .iter()
                .map(|s| (s.clone(), vec![bar(s, 1_714_600_000), bar(s, 1_714_600_060)]))
                .collect())
        }
    }

    async fn sqlite() -> Arc<SqliteCandleStore> {
        Arc::new(
            SqliteCandleStore::new(Database::open_in_memory().await.unwrap())
                .await
                .unwrap(),
        )
    }

    async fn seed_universe(store: &SqliteCandleStore, symbols: &[&str]) {
        store
            .save_snapshot(&UniverseSnapshot {
                ymd: "2024-05-02".to_string(),
                market: "US".to_string(),
                market_cap_min: 0.0,
                symbols: symbols.iter().map(|s| s.to_string()).collect(),
                created_at: 0,
            })
            .await
            .unwrap();
    }

    fn params(timeframe: &str) -> IngestParams {
        IngestParams {
            market: Market::Us,
            timeframe: timeframe.to_string(),
            ymd: Some("2024-05-02".to_string()),
        }
    }

    #[test]
    fn test_filter_new_bars() {
        let bars = [900, 1000, 1100, 1200].iter().map(|ts| bar("AAPL", *ts)).collect();
        let kept: Vec<i64> = filter_new_bars(bars, Some(1000)).iter().map(|c| c.ts).collect();
        assert_eq!(kept, vec![1100, 1200]);
    }

    #[tokio::test]
    async fn test_overlapping_response_is_filtered_before_append() {
        let meta = sqlite().await;
        seed_universe(&meta, &["AAPL"]).await;

        let recording = Arc::new(RecordingStore {
            last: Some(1000),
            appended: Mutex::new(Vec::new()),
        });
        let provider = Arc::new(FixedSingle {
            bars: vec![900, 1000, 1100, 1200],
            requests: Mutex::new(Vec::new()),
        });
        let service = CandleService::new(recording.clone(), meta.clone(), meta.clone(), &CandleConfig::default())
            .with_source(Market::Us, &["1m"], CandleSource::Single(provider.clone()));

        let run = service.ingest(&params("1m")).await.unwrap();

        assert_eq!(*recording.appended.lock().unwrap(), vec![1100, 1200]);
        assert_eq!(run.inserted_rows, 2);
        assert_eq!(run.status, "success");
        assert_eq!(provider.requests.lock().unwrap()[0].start.timestamp(), 1001);
    }

    #[tokio::test]
    async fn test_batch_error_contributes_zero() {
        let store = sqlite().await;
        seed_universe(&store, &["AAPL", "MSFT", "BAD", "NVDA"]).await;

        let provider = Arc::new(FlakyMulti {
            poison: "BAD",
            calls: Mutex::new(0),
        });
        let service = CandleService::new(store.clone(), store.clone(), store.clone(), &CandleConfig::default())
            .with_source(Market::Us, &["1m"], CandleSource::Multi(provider.clone()));

        let run = service.ingest(&params("1m")).await.unwrap();
        assert_eq!(*provider.calls.lock().unwrap(), 2);
        assert_eq!(run.status, "success");
        assert_eq!(run.symbols_count, 4);
        // 스냅샷 순서: AAPL, MSFT | BAD, NVDA
        assert_eq!(run.inserted_rows, 4);

        // 재실행은 같은 봉을 다시 넣지 않음
        let again = service.ingest(&params("1m")).await.unwrap();
        assert_eq!(again.inserted_rows, 0);

        let runs = store.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.finished_at.is_some() && r.status == "success"));
    }

    #[tokio::test]
    async fn test_failed_runs_are_finalized() {
        let store = sqlite().await;
        let service = CandleService::new(store.clone(), store.clone(), store.clone(), &CandleConfig::default());

        // 스냅샷 없음
        let run = service.ingest(&params("1m")).await.unwrap();
        assert_eq!(run.status, "failed");
        assert!(run.error_message.unwrap().contains("universe"));

        // 제공자 없음
        seed_universe(&store, &["AAPL"]).await;
        let run = service.ingest(&params("5m")).await.unwrap();
        assert_eq!(run.status, "failed");
        assert!(run.error_message.unwrap().contains("no provider"));

        let runs = store.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.finished_at.is_some() && r.status == "failed"));
    }
}
