//! 뉴스 기사/실행 로그 저장소.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dx_core::{ArticleQuery, CanonicalArticle, DupState, RunLog, RunStats, RunStatus};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::debug;

use super::Database;
use crate::error::{DataError, Result};

pub const NEWS_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS news_articles (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        url TEXT NOT NULL,
        canonical_url TEXT NOT NULL,
        source TEXT NOT NULL,
        publisher TEXT NOT NULL DEFAULT '',
        published_at TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        dup_state TEXT NOT NULL DEFAULT 'unique',
        dup_of TEXT,
        dup_score REAL NOT NULL DEFAULT 0,
        tags TEXT NOT NULL DEFAULT '[]'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_news_articles_published ON news_articles (published_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_news_articles_source ON news_articles (source)",
    r#"
    CREATE TABLE IF NOT EXISTS news_runs (
        run_id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        status TEXT NOT NULL,
        stats TEXT NOT NULL DEFAULT '{}',
        errors TEXT NOT NULL DEFAULT '[]'
    )
    "#,
];

/// 뉴스 파이프라인이 사용하는 저장소 기능.
#[async_trait]
pub trait NewsStore: Send + Sync {
    /// 기사 배치를 하나의 트랜잭션으로 upsert합니다.
    ///
    /// 충돌 시 본문 필드와 `fetched_at`을 갱신하고, 최초 저장 시 정해진
    /// `dup_state`/`dup_of`/`dup_score`는 유지합니다.
    async fn upsert_articles(&self, articles: &[CanonicalArticle]) -> Result<usize>;

    /// 같은 ID의 기사가 이미 있는지 확인합니다.
    async fn article_exists(&self, id: &str) -> Result<bool>;

    /// 유사도 비교 후보 `(id, title)`를 최신순으로 돌려줍니다.
    async fn similarity_candidates(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(String, String)>>;

    /// 실행 시작 시 running 상태의 로그를 생성합니다.
    async fn create_run(&self, run: &RunLog) -> Result<()>;

    /// 실행 로그를 확정합니다. 이미 확정된 로그는 다시 쓰지 않습니다.
    async fn finalize_run(&self, run: &RunLog) -> Result<()>;
}

#[derive(Debug, FromRow)]
struct ArticleRow {
    id: String,
    title: String,
    summary: String,
    url: String,
    canonical_url: String,
    source: String,
    publisher: String,
    published_at: DateTime<Utc>,
    fetched_at: DateTime<Utc>,
    dup_state: String,
    dup_of: Option<String>,
    dup_score: f64,
    tags: String,
}

impl TryFrom<ArticleRow> for CanonicalArticle {
    type Error = DataError;

    fn try_from(row: ArticleRow) -> Result<Self> {
        Ok(CanonicalArticle {
            id: row.id,
            title: row.title,
            summary: row.summary,
            url: row.url,
            canonical_url: row.canonical_url,
            source: row.source,
            publisher: row.publisher,
            published_at: row.published_at,
            fetched_at: row.fetched_at,
            dup_state: row
                .dup_state
                .parse::<DupState>()
                .map_err(DataError::InvalidData)?,
            dup_of: row.dup_of,
            dup_score: row.dup_score,
            tags: serde_json::from_str(&row.tags)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    run_id: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: String,
    stats: String,
    errors: String,
}

impl TryFrom<RunRow> for RunLog {
    type Error = DataError;

    fn try_from(row: RunRow) -> Result<Self> {
        Ok(RunLog {
            run_id: row.run_id,
            started_at: row.started_at,
            ended_at: row.ended_at,
            status: row
                .status
                .parse::<RunStatus>()
                .map_err(DataError::InvalidData)?,
            stats: serde_json::from_str::<RunStats>(&row.stats)?,
            errors: serde_json::from_str(&row.errors)?,
        })
    }
}

/// SQLite 기반 뉴스 저장소.
#[derive(Clone)]
pub struct SqliteNewsStore {
    db: Database,
}

impl SqliteNewsStore {
    /// 스키마를 적용하고 저장소를 만듭니다.
    pub async fn new(db: Database) -> Result<Self> {
        db.apply_schema(NEWS_SCHEMA).await?;
        Ok(Self { db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, query: &'a ArticleQuery) {
        qb.push(" WHERE 1=1");
        if let Some(source) = &query.source {
            qb.push(" AND source = ").push_bind(source.clone());
        }
        if let Some(keyword) = query.keyword.as_deref().filter(|k| !k.is_empty()) {
            let pattern = format!("%{}%", keyword);
            qb.push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" OR summary LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(before) = query.published_before {
            qb.push(" AND published_at <= ").push_bind(before);
        }
    }

    /// 조건에 맞는 기사 `(전체 건수, 페이지)`를 최신순으로 조회합니다.
    pub async fn list_articles(&self, query: &ArticleQuery) -> Result<(i64, Vec<CanonicalArticle>)> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM news_articles");
        Self::push_filters(&mut count_qb, query);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(self.db.pool()).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM news_articles");
        Self::push_filters(&mut qb, query);
        qb.push(" ORDER BY published_at DESC LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);

        let rows: Vec<ArticleRow> = qb.build_query_as().fetch_all(self.db.pool()).await?;
        let articles = rows
            .into_iter()
            .map(CanonicalArticle::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok((total, articles))
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<CanonicalArticle>> {
        let row: Option<ArticleRow> = sqlx::query_as("SELECT * FROM news_articles WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(CanonicalArticle::try_from).transpose()
    }

    pub async fn list_runs(&self, limit: i64) -> Result<Vec<RunLog>> {
        let rows: Vec<RunRow> =
            sqlx::query_as("SELECT * FROM news_runs ORDER BY started_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?;
        rows.into_iter().map(RunLog::try_from).collect()
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunLog>> {
        let row: Option<RunRow> = sqlx::query_as("SELECT * FROM news_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(RunLog::try_from).transpose()
    }

    pub async fn count_articles(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM news_articles")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl NewsStore for SqliteNewsStore {
    async fn upsert_articles(&self, articles: &[CanonicalArticle]) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.pool().begin().await?;
        for article in articles {
            let tags = serde_json::to_string(&article.tags)?;
            sqlx::query(
                r#"
                INSERT INTO news_articles (
                    id, title, summary, url, canonical_url, source, publisher,
                    published_at, fetched_at, dup_state, dup_of, dup_score, tags
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    title = excluded.title,
                    summary = excluded.summary,
                    url = excluded.url,
                    canonical_url = excluded.canonical_url,
                    source = excluded.source,
                    publisher = excluded.publisher,
                    published_at = excluded.published_at,
                    fetched_at = excluded.fetched_at,
                    tags = excluded.tags
                "#,
            )
            .bind(&article.id)
            .bind(&article.title)
            .bind(&article.summary)
            .bind(&article.url)
            .bind(&article.canonical_url)
            .bind(&article.source)
            .bind(&article.publisher)
            .bind(article.published_at)
            .bind(article.fetched_at)
            .bind(article.dup_state.as_str())
            .bind(&article.dup_of)
            .bind(article.dup_score)
            .bind(tags)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = articles.len(), "Upserted news articles");
        Ok(articles.len())
    }

    async fn article_exists(&self, id: &str) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM news_articles WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(found.is_some())
    }

    async fn similarity_candidates(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as(
            r#"
            SELECT id, title FROM news_articles
            WHERE published_at >= ? AND dup_state = 'unique'
            ORDER BY published_at DESC
            LIMIT ?
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    async fn create_run(&self, run: &RunLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO news_runs (run_id, started_at, ended_at, status, stats, errors)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.stats)?)
        .bind(serde_json::to_string(&run.errors)?)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn finalize_run(&self, run: &RunLog) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE news_runs
            SET ended_at = ?, status = ?, stats = ?, errors = ?
            WHERE run_id = ? AND ended_at IS NULL
            "#,
        )
        .bind(run.ended_at)
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.stats)?)
        .bind(serde_json::to_string(&run.errors)?)
        .bind(&run.run_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!(
                "open run log {}",
                run.run_id
            )));
        }
        Ok(())
    }
}
