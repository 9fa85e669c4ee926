//! 테마/종목 저장소.
//!
//! - `themes`, `stocks`: 자연 키 기준 upsert (최신 값 유지)
//! - `theme_stocks`: 고유 쌍, 충돌 시 무시
//! - `stock_history`: `(crawl_date, code)`당 한 행, 같은 날 재수집 시에만 갱신

use chrono::{DateTime, NaiveDate, Utc};
use dx_core::{
    CrawlLog, JudalStats, NewCrawlLog, Stock, StockHistory, StockIndicators, StockQuery, Theme,
};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{QueryBuilder, Sqlite};
use tracing::instrument;

use super::Database;
use crate::error::Result;

pub const JUDAL_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS themes (
        theme_idx INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        stock_count INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stocks (
        code TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        market TEXT NOT NULL DEFAULT '',
        current_price INTEGER,
        price_change INTEGER,
        change_rate REAL,
        three_day_sum REAL,
        high_52w INTEGER,
        low_52w INTEGER,
        change_rate_52w_up REAL,
        change_rate_52w_down REAL,
        neglect_index_52w REAL,
        high_3y INTEGER,
        low_3y INTEGER,
        change_rate_3y_up REAL,
        change_rate_3y_down REAL,
        neglect_index_3y REAL,
        price_index_3y REAL,
        expected_return REAL,
        pbr REAL,
        per REAL,
        eps INTEGER,
        market_cap INTEGER,
        volume_index REAL,
        volume_index_7d REAL,
        buffett_choice INTEGER,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_stocks_market ON stocks (market)",
    "CREATE INDEX IF NOT EXISTS idx_stocks_market_cap ON stocks (market_cap)",
    r#"
    CREATE TABLE IF NOT EXISTS theme_stocks (
        theme_idx INTEGER NOT NULL,
        stock_code TEXT NOT NULL,
        UNIQUE (theme_idx, stock_code)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_theme_stocks_stock ON theme_stocks (stock_code)",
    r#"
    CREATE TABLE IF NOT EXISTS stock_history (
        crawl_date TEXT NOT NULL,
        code TEXT NOT NULL,
        name TEXT NOT NULL,
        market TEXT NOT NULL DEFAULT '',
        current_price INTEGER,
        price_change INTEGER,
        change_rate REAL,
        three_day_sum REAL,
        high_52w INTEGER,
        low_52w INTEGER,
        change_rate_52w_up REAL,
        change_rate_52w_down REAL,
        neglect_index_52w REAL,
        high_3y INTEGER,
        low_3y INTEGER,
        change_rate_3y_up REAL,
        change_rate_3y_down REAL,
        neglect_index_3y REAL,
        price_index_3y REAL,
        expected_return REAL,
        pbr REAL,
        per REAL,
        eps INTEGER,
        market_cap INTEGER,
        volume_index REAL,
        volume_index_7d REAL,
        buffett_choice INTEGER,
        UNIQUE (crawl_date, code)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_stock_history_code ON stock_history (code)",
    r#"
    CREATE TABLE IF NOT EXISTS crawl_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        crawl_date TEXT NOT NULL,
        crawl_type TEXT NOT NULL,
        themes_count INTEGER NOT NULL DEFAULT 0,
        stocks_count INTEGER NOT NULL DEFAULT 0,
        history_count INTEGER NOT NULL DEFAULT 0,
        duration_seconds REAL NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'completed',
        error_message TEXT,
        created_at TEXT NOT NULL
    )
    "#,
];

/// `stocks`/`stock_history` 공통 지표 컬럼 (바인딩 순서와 동일).
const INDICATOR_COLUMNS: &str = "current_price, price_change, change_rate, three_day_sum, \
     high_52w, low_52w, change_rate_52w_up, change_rate_52w_down, neglect_index_52w, \
     high_3y, low_3y, change_rate_3y_up, change_rate_3y_down, neglect_index_3y, \
     price_index_3y, expected_return, pbr, per, eps, market_cap, \
     volume_index, volume_index_7d, buffett_choice";

const INDICATOR_PLACEHOLDERS: &str =
    "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

const INDICATOR_UPDATES: &str = "current_price = excluded.current_price, \
     price_change = excluded.price_change, change_rate = excluded.change_rate, \
     three_day_sum = excluded.three_day_sum, high_52w = excluded.high_52w, \
     low_52w = excluded.low_52w, change_rate_52w_up = excluded.change_rate_52w_up, \
     change_rate_52w_down = excluded.change_rate_52w_down, \
     neglect_index_52w = excluded.neglect_index_52w, high_3y = excluded.high_3y, \
     low_3y = excluded.low_3y, change_rate_3y_up = excluded.change_rate_3y_up, \
     change_rate_3y_down = excluded.change_rate_3y_down, \
     neglect_index_3y = excluded.neglect_index_3y, price_index_3y = excluded.price_index_3y, \
     expected_return = excluded.expected_return, pbr = excluded.pbr, per = excluded.per, \
     eps = excluded.eps, market_cap = excluded.market_cap, \
     volume_index = excluded.volume_index, volume_index_7d = excluded.volume_index_7d, \
     buffett_choice = excluded.buffett_choice";

fn bind_indicators<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    i: &StockIndicators,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(i.current_price)
        .bind(i.price_change)
        .bind(i.change_rate)
        .bind(i.three_day_sum)
        .bind(i.high_52w)
        .bind(i.low_52w)
        .bind(i.change_rate_52w_up)
        .bind(i.change_rate_52w_down)
        .bind(i.neglect_index_52w)
        .bind(i.high_3y)
        .bind(i.low_3y)
        .bind(i.change_rate_3y_up)
        .bind(i.change_rate_3y_down)
        .bind(i.neglect_index_3y)
        .bind(i.price_index_3y)
        .bind(i.expected_return)
        .bind(i.pbr)
        .bind(i.per)
        .bind(i.eps)
        .bind(i.market_cap)
        .bind(i.volume_index)
        .bind(i.volume_index_7d)
        .bind(i.buffett_choice)
}

/// 테마/종목 저장소.
#[derive(Clone)]
pub struct JudalRepository {
    db: Database,
}

impl JudalRepository {
    pub async fn new(db: Database) -> Result<Self> {
        db.apply_schema(JUDAL_SCHEMA).await?;
        Ok(Self { db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ===== 쓰기 =====

    pub async fn upsert_theme(&self, theme_idx: i64, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO themes (theme_idx, name, stock_count, updated_at)
            VALUES (?, ?, 0, ?)
            ON CONFLICT (theme_idx) DO UPDATE SET
                name = excluded.name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(theme_idx)
        .bind(name)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// 종목 최신 값을 upsert합니다. 모든 지표는 수신 값으로 덮어씁니다.
    pub async fn upsert_stock(&self, stock: &Stock) -> Result<()> {
        let sql = format!(
            "INSERT INTO stocks (code, name, market, {cols}, updated_at) \
             VALUES (?, ?, ?, {ph}, ?) \
             ON CONFLICT (code) DO UPDATE SET \
             name = excluded.name, market = excluded.market, {upd}, \
             updated_at = excluded.updated_at",
            cols = INDICATOR_COLUMNS,
            ph = INDICATOR_PLACEHOLDERS,
            upd = INDICATOR_UPDATES,
        );
        let query = sqlx::query(&sql)
            .bind(&stock.code)
            .bind(&stock.name)
            .bind(&stock.market);
        bind_indicators(query, &stock.indicators)
            .bind(stock.updated_at)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// 테마-종목 매핑을 추가합니다. 이미 있으면 무시합니다.
    pub async fn add_theme_stock(&self, theme_idx: i64, stock_code: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO theme_stocks (theme_idx, stock_code) VALUES (?, ?)")
            .bind(theme_idx)
            .bind(stock_code)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn update_theme_stock_count(&self, theme_idx: i64, count: i64) -> Result<()> {
        sqlx::query("UPDATE themes SET stock_count = ?, updated_at = ? WHERE theme_idx = ?")
            .bind(count)
            .bind(Utc::now())
            .bind(theme_idx)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// 일별 스냅샷을 저장합니다. 같은 `(crawl_date, code)`는 최신 값으로 갱신됩니다.
    #[instrument(skip(self, stock), fields(code = %stock.code))]
    pub async fn save_stock_history(&self, crawl_date: NaiveDate, stock: &Stock) -> Result<()> {
        let sql = format!(
            "INSERT INTO stock_history (crawl_date, code, name, market, {cols}) \
             VALUES (?, ?, ?, ?, {ph}) \
             ON CONFLICT (crawl_date, code) DO UPDATE SET \
             name = excluded.name, market = excluded.market, {upd}",
            cols = INDICATOR_COLUMNS,
            ph = INDICATOR_PLACEHOLDERS,
            upd = INDICATOR_UPDATES,
        );
        let query = sqlx::query(&sql)
            .bind(crawl_date)
            .bind(&stock.code)
            .bind(&stock.name)
            .bind(&stock.market);
        bind_indicators(query, &stock.indicators)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn insert_crawl_log(&self, log: &NewCrawlLog) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO crawl_logs (
                crawl_date, crawl_type, themes_count, stocks_count, history_count,
                duration_seconds, status, error_message, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.crawl_date)
        .bind(&log.crawl_type)
        .bind(log.themes_count)
        .bind(log.stocks_count)
        .bind(log.history_count)
        .bind(log.duration_seconds)
        .bind(&log.status)
        .bind(&log.error_message)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    // ===== 조회 =====

    pub async fn themes(&self) -> Result<Vec<Theme>> {
        let themes = sqlx::query_as::<_, Theme>("SELECT * FROM themes ORDER BY name")
            .fetch_all(self.db.pool())
            .await?;
        Ok(themes)
    }

    pub async fn theme(&self, theme_idx: i64) -> Result<Option<Theme>> {
        let theme = sqlx::query_as::<_, Theme>("SELECT * FROM themes WHERE theme_idx = ?")
            .bind(theme_idx)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(theme)
    }

    pub async fn stocks_by_theme(&self, theme_idx: i64) -> Result<Vec<Stock>> {
        let stocks = sqlx::query_as::<_, Stock>(
            r#"
            SELECT s.* FROM stocks s
            JOIN theme_stocks ts ON ts.stock_code = s.code
            WHERE ts.theme_idx = ?
            ORDER BY s.name
            "#,
        )
        .bind(theme_idx)
        .fetch_all(self.db.pool())
        .await?;
        Ok(stocks)
    }

    pub async fn themes_for_stock(&self, code: &str) -> Result<Vec<Theme>> {
        let themes = sqlx::query_as::<_, Theme>(
            r#"
            SELECT t.* FROM themes t
            JOIN theme_stocks ts ON ts.theme_idx = t.theme_idx
            WHERE ts.stock_code = ?
            ORDER BY t.name
            "#,
        )
        .bind(code)
        .fetch_all(self.db.pool())
        .await?;
        Ok(themes)
    }

    /// 종목 목록 `(전체 건수, 페이지)`. 정렬 컬럼은 화이트리스트에서만 옵니다.
    pub async fn stocks(&self, query: &StockQuery) -> Result<(i64, Vec<Stock>)> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM stocks");
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM stocks");
        if let Some(market) = &query.market {
            count_qb.push(" WHERE market = ").push_bind(market.clone());
            qb.push(" WHERE market = ").push_bind(market.clone());
        }
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(self.db.pool()).await?;

        let direction = if query.descending { "DESC" } else { "ASC" };
        qb.push(format!(
            " ORDER BY {} {} NULLS LAST, code ASC LIMIT ",
            query.sort.column(),
            direction
        ))
        .push_bind(query.limit)
        .push(" OFFSET ")
        .push_bind(query.offset);

        let stocks = qb.build_query_as::<Stock>().fetch_all(self.db.pool()).await?;
        Ok((total, stocks))
    }

    pub async fn stock(&self, code: &str) -> Result<Option<Stock>> {
        let stock = sqlx::query_as::<_, Stock>("SELECT * FROM stocks WHERE code = ?")
            .bind(code)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(stock)
    }

    pub async fn stock_history(&self, code: &str, limit: i64) -> Result<Vec<StockHistory>> {
        let history = sqlx::query_as::<_, StockHistory>(
            "SELECT * FROM stock_history WHERE code = ? ORDER BY crawl_date DESC LIMIT ?",
        )
        .bind(code)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(history)
    }

    pub async fn history_dates(&self, limit: i64) -> Result<Vec<NaiveDate>> {
        let rows: Vec<(NaiveDate,)> = sqlx::query_as(
            "SELECT DISTINCT crawl_date FROM stock_history ORDER BY crawl_date DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    pub async fn crawl_logs(&self, limit: i64) -> Result<Vec<CrawlLog>> {
        let logs = sqlx::query_as::<_, CrawlLog>(
            "SELECT * FROM crawl_logs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(logs)
    }

    pub async fn stats(&self) -> Result<JudalStats> {
        let pool = self.db.pool();
        let (theme_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM themes")
            .fetch_one(pool)
            .await?;
        let (stock_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stocks")
            .fetch_one(pool)
            .await?;
        let (mapping_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM theme_stocks")
            .fetch_one(pool)
            .await?;
        let (history_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stock_history")
            .fetch_one(pool)
            .await?;
        let last_updated: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT updated_at FROM stocks ORDER BY updated_at DESC LIMIT 1")
                .fetch_optional(pool)
                .await?;
        let last_crawl_date: Option<(NaiveDate,)> = sqlx::query_as(
            "SELECT crawl_date FROM stock_history ORDER BY crawl_date DESC LIMIT 1",
        )
        .fetch_optional(pool)
        .await?;

        Ok(JudalStats {
            theme_count,
            stock_count,
            mapping_count,
            history_count,
            last_updated: last_updated.map(|(t,)| t),
            last_crawl_date: last_crawl_date.map(|(d,)| d),
        })
    }
}
