//! 캔들/유니버스/수집 기록 저장소.
//!
//! 캔들은 `(market, symbol, timeframe, ts)` 자연 키로 append-only이며,
//! 같은 키의 재삽입은 조용히 무시됩니다.

use async_trait::async_trait;
use dx_core::{Candle, CandleQuery, IngestRun, Instrument, UniverseSnapshot};
use sqlx::{QueryBuilder, Sqlite};
use tracing::debug;

use super::Database;
use crate::error::Result;

pub const CANDLE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS instruments (
        market TEXT NOT NULL,
        symbol TEXT NOT NULL,
        name TEXT,
        exchange TEXT,
        currency TEXT,
        market_cap REAL,
        market_cap_ts INTEGER,
        is_active INTEGER NOT NULL DEFAULT 1,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (market, symbol)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS universe_snapshots (
        ymd TEXT NOT NULL,
        market TEXT NOT NULL,
        market_cap_min REAL NOT NULL,
        symbols_json TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (ymd, market, market_cap_min)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS candles (
        market TEXT NOT NULL,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        ts INTEGER NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        volume REAL NOT NULL,
        vwap REAL,
        trade_count INTEGER,
        PRIMARY KEY (market, symbol, timeframe, ts)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_candles_ts ON candles (timeframe, ts DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS ingest_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at INTEGER NOT NULL,
        finished_at INTEGER,
        market TEXT NOT NULL,
        job TEXT NOT NULL,
        timeframe TEXT,
        symbols_count INTEGER NOT NULL DEFAULT 0,
        inserted_rows INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        error_message TEXT
    )
    "#,
];

/// 캔들 시계열 저장소.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// 심볼/타임프레임의 마지막 저장 시각 (epoch 초).
    async fn last_ts(&self, market: &str, symbol: &str, timeframe: &str) -> Result<Option<i64>>;

    /// 캔들을 추가하고 실제로 삽입된 행 수를 돌려줍니다. 기존 키는 무시됩니다.
    async fn append(&self, candles: &[Candle]) -> Result<usize>;
}

/// 종목 마스터와 유니버스 스냅샷 저장소.
#[async_trait]
pub trait UniverseStore: Send + Sync {
    async fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<usize>;

    async fn save_snapshot(&self, snapshot: &UniverseSnapshot) -> Result<()>;

    /// 일자/시장의 가장 최근 스냅샷 심볼. 스냅샷이 없으면 `None`.
    async fn load_symbols(&self, ymd: &str, market: &str) -> Result<Option<Vec<String>>>;

    /// 활성 종목을 시가총액 내림차순으로 조회합니다.
    async fn list_instruments(&self, market: Option<&str>, limit: i64) -> Result<Vec<Instrument>>;
}

/// 수집 실행 기록 저장소. 실행당 생성 한 번, 종료 갱신 한 번.
#[async_trait]
pub trait IngestRunStore: Send + Sync {
    /// running 상태 기록을 만들고 ID를 돌려줍니다.
    async fn create_run(&self, run: &IngestRun) -> Result<i64>;

    async fn finish_run(&self, run: &IngestRun) -> Result<()>;

    async fn list_runs(&self, limit: i64) -> Result<Vec<IngestRun>>;
}

/// SQLite 기반 캔들 도메인 저장소.
#[derive(Clone)]
pub struct SqliteCandleStore {
    db: Database,
}

impl SqliteCandleStore {
    pub async fn new(db: Database) -> Result<Self> {
        db.apply_schema(CANDLE_SCHEMA).await?;
        Ok(Self { db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// 캔들 조회 (최신순).
    pub async fn query_candles(&self, query: &CandleQuery) -> Result<Vec<Candle>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM candles WHERE timeframe = ");
        qb.push_bind(query.timeframe.clone());
        if let Some(market) = &query.market {
            qb.push(" AND market = ").push_bind(market.clone());
        }
        if let Some(symbol) = &query.symbol {
            qb.push(" AND symbol = ").push_bind(symbol.clone());
        }
        if let Some(from) = query.ts_from {
            qb.push(" AND ts >= ").push_bind(from);
        }
        if let Some(to) = query.ts_to {
            qb.push(" AND ts <= ").push_bind(to);
        }
        qb.push(" ORDER BY ts DESC, symbol ASC LIMIT ")
            .push_bind(query.limit);

        let candles = qb.build_query_as::<Candle>().fetch_all(self.db.pool()).await?;
        Ok(candles)
    }

    /// 데이터가 있는 UTC 일자 목록 (최신순).
    pub async fn available_dates(&self, market: Option<&str>, limit: i64) -> Result<Vec<String>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT date(ts, 'unixepoch') AS day FROM candles",
        );
        if let Some(market) = market {
            qb.push(" WHERE market = ").push_bind(market.to_string());
        }
        qb.push(" ORDER BY day DESC LIMIT ").push_bind(limit);

        let rows: Vec<(String,)> = qb.build_query_as().fetch_all(self.db.pool()).await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }
}

#[async_trait]
impl CandleStore for SqliteCandleStore {
    async fn last_ts(&self, market: &str, symbol: &str, timeframe: &str) -> Result<Option<i64>> {
        let (ts,): (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(ts) FROM candles WHERE market = ? AND symbol = ? AND timeframe = ?",
        )
        .bind(market)
        .bind(symbol)
        .bind(timeframe)
        .fetch_one(self.db.pool())
        .await?;
        Ok(ts)
    }

    async fn append(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0u64;
        let mut tx = self.db.pool().begin().await?;
        for c in candles {
            let result = sqlx::query(
                r#"
                INSERT INTO candles (
                    market, symbol, timeframe, ts, open, high, low, close, volume, vwap, trade_count
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (market, symbol, timeframe, ts) DO NOTHING
                "#,
            )
            .bind(&c.market)
            .bind(&c.symbol)
            .bind(&c.timeframe)
            .bind(c.ts)
            .bind(c.open)
            .bind(c.high)
            .bind(c.low)
            .bind(c.close)
            .bind(c.volume)
            .bind(c.vwap)
            .bind(c.trade_count)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        debug!(received = candles.len(), inserted, "Appended candles");
        Ok(inserted as usize)
    }
}

#[async_trait]
impl UniverseStore for SqliteCandleStore {
    async fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<usize> {
        let mut tx = self.db.pool().begin().await?;
        for i in instruments {
            sqlx::query(
                r#"
                INSERT INTO instruments (
                    market, symbol, name, exchange, currency, market_cap,
                    market_cap_ts, is_active, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (market, symbol) DO UPDATE SET
                    name = excluded.name,
                    exchange = excluded.exchange,
                    currency = excluded.currency,
                    market_cap = excluded.market_cap,
                    market_cap_ts = excluded.market_cap_ts,
                    is_active = excluded.is_active,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&i.market)
            .bind(&i.symbol)
            .bind(&i.name)
            .bind(&i.exchange)
            .bind(&i.currency)
            .bind(i.market_cap)
            .bind(i.market_cap_ts)
            .bind(i.is_active)
            .bind(i.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(instruments.len())
    }

    async fn save_snapshot(&self, snapshot: &UniverseSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO universe_snapshots (ymd, market, market_cap_min, symbols_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (ymd, market, market_cap_min) DO UPDATE SET
                symbols_json = excluded.symbols_json,
                created_at = excluded.created_at
            "#,
        )
        .bind(&snapshot.ymd)
        .bind(&snapshot.market)
        .bind(snapshot.market_cap_min)
        .bind(serde_json::to_string(&snapshot.symbols)?)
        .bind(snapshot.created_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn load_symbols(&self, ymd: &str, market: &str) -> Result<Option<Vec<String>>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT symbols_json FROM universe_snapshots
            WHERE ymd = ? AND market = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(ymd)
        .bind(market)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list_instruments(&self, market: Option<&str>, limit: i64) -> Result<Vec<Instrument>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM instruments WHERE is_active = 1");
        if let Some(market) = market {
            qb.push(" AND market = ").push_bind(market.to_string());
        }
        qb.push(" ORDER BY market_cap DESC NULLS LAST LIMIT ")
            .push_bind(limit);

        let instruments = qb
            .build_query_as::<Instrument>()
            .fetch_all(self.db.pool())
            .await?;
        Ok(instruments)
    }
}

#[async_trait]
impl IngestRunStore for SqliteCandleStore {
    async fn create_run(&self, run: &IngestRun) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO ingest_runs (started_at, market, job, timeframe, symbols_count, status)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.started_at)
        .bind(&run.market)
        .bind(&run.job)
        .bind(&run.timeframe)
        .bind(run.symbols_count)
        .bind(&run.status)
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn finish_run(&self, run: &IngestRun) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingest_runs
            SET finished_at = ?, symbols_count = ?, inserted_rows = ?, status = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(run.finished_at)
        .bind(run.symbols_count)
        .bind(run.inserted_rows)
        .bind(&run.status)
        .bind(&run.error_message)
        .bind(run.id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn list_runs(&self, limit: i64) -> Result<Vec<IngestRun>> {
        let runs = sqlx::query_as::<_, IngestRun>(
            "SELECT * FROM ingest_runs ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(runs)
    }
}
