//! DART 공시 저장소.
//!
//! `corps`/`filings`는 자연 키 기준 upsert, `filing_documents`는
//! `(rcept_no, doc_type)`당 한 행입니다. 다운로드 실패는 `sha256`이 빈 행에
//! `retry_count`로 누적되고, 저장에 성공하면 같은 행이 채워집니다.

use chrono::Utc;
use dx_core::{
    Corp, ExtractedEvent, Filing, FilingDocument, FilingQuery, NewFilingDocument,
    DOC_TYPE_MAIN_XML_ZIP,
};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, instrument};

use super::Database;
use crate::error::Result;

/// 기업 upsert 트랜잭션 단위.
pub const CORP_BATCH_SIZE: usize = 100;

/// 이 횟수만큼 실패한 원문은 다운로드 대상에서 제외합니다.
pub const MAX_DOWNLOAD_RETRIES: i64 = 3;

pub const DART_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS corps (
        corp_code TEXT PRIMARY KEY,
        corp_name TEXT NOT NULL,
        stock_code TEXT NOT NULL DEFAULT '',
        modified_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_corps_stock_code ON corps (stock_code)",
    r#"
    CREATE TABLE IF NOT EXISTS filings (
        rcept_no TEXT PRIMARY KEY,
        corp_code TEXT NOT NULL,
        corp_name TEXT NOT NULL,
        report_nm TEXT NOT NULL,
        rcept_dt TEXT NOT NULL,
        flr_nm TEXT NOT NULL DEFAULT '',
        rm TEXT NOT NULL DEFAULT '',
        dcm_no TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_filings_corp_code ON filings (corp_code)",
    "CREATE INDEX IF NOT EXISTS idx_filings_rcept_dt ON filings (rcept_dt DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS filing_documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rcept_no TEXT NOT NULL REFERENCES filings (rcept_no),
        doc_type TEXT NOT NULL,
        storage_uri TEXT NOT NULL,
        sha256 TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        extracted_at TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE (rcept_no, doc_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS extracted_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rcept_no TEXT NOT NULL REFERENCES filings (rcept_no),
        event_type TEXT NOT NULL,
        payload_json TEXT NOT NULL DEFAULT '{}',
        evidence_spans_json TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_extracted_events_rcept_no ON extracted_events (rcept_no)",
];

/// 공시 상세 (문서/이벤트 포함).
#[derive(Debug, Clone, serde::Serialize)]
pub struct FilingDetail {
    pub filing: Filing,
    pub documents: Vec<FilingDocument>,
    pub events: Vec<ExtractedEvent>,
}

/// DART 저장소.
#[derive(Clone)]
pub struct DartRepository {
    db: Database,
}

impl DartRepository {
    pub async fn new(db: Database) -> Result<Self> {
        db.apply_schema(DART_SCHEMA).await?;
        Ok(Self { db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ===== 쓰기 =====

    /// 기업 목록을 100건 단위 트랜잭션으로 upsert합니다.
    #[instrument(skip(self, corps), fields(count = corps.len()))]
    pub async fn upsert_corps(&self, corps: &[Corp]) -> Result<usize> {
        let mut written = 0;
        for chunk in corps.chunks(CORP_BATCH_SIZE) {
            let mut tx = self.db.pool().begin().await?;
            for corp in chunk {
                sqlx::query(
                    r#"
                    INSERT INTO corps (corp_code, corp_name, stock_code, modified_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT (corp_code) DO UPDATE SET
                        corp_name = excluded.corp_name,
                        stock_code = excluded.stock_code,
                        modified_at = excluded.modified_at
                    "#,
                )
                .bind(&corp.corp_code)
                .bind(&corp.corp_name)
                .bind(&corp.stock_code)
                .bind(corp.modified_at)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            written += chunk.len();
        }
        debug!(written, "Upserted corps");
        Ok(written)
    }

    /// 공시 목록을 하나의 트랜잭션으로 upsert합니다.
    ///
    /// `created_at`은 최초 값을 유지하고 `updated_at`은 매번 현재 시각으로 갱신됩니다.
    #[instrument(skip(self, filings), fields(count = filings.len()))]
    pub async fn upsert_filings(&self, filings: &[Filing]) -> Result<usize> {
        if filings.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        for filing in filings {
            sqlx::query(
                r#"
                INSERT INTO filings (
                    rcept_no, corp_code, corp_name, report_nm, rcept_dt,
                    flr_nm, rm, dcm_no, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (rcept_no) DO UPDATE SET
                    corp_code = excluded.corp_code,
                    corp_name = excluded.corp_name,
                    report_nm = excluded.report_nm,
                    rcept_dt = excluded.rcept_dt,
                    flr_nm = excluded.flr_nm,
                    rm = excluded.rm,
                    dcm_no = excluded.dcm_no,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&filing.rcept_no)
            .bind(&filing.corp_code)
            .bind(&filing.corp_name)
            .bind(&filing.report_nm)
            .bind(&filing.rcept_dt)
            .bind(&filing.flr_nm)
            .bind(&filing.rm)
            .bind(&filing.dcm_no)
            .bind(filing.created_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(filings.len())
    }

    /// 원문 문서를 기록합니다. 이미 저장된 문서가 있으면 `false`.
    ///
    /// 실패 기록만 있는 행은 이 문서로 채워지고 `retry_count`는 유지됩니다.
    pub async fn insert_document(&self, doc: &NewFilingDocument) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO filing_documents (rcept_no, doc_type, storage_uri, sha256, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (rcept_no, doc_type) DO UPDATE SET
                storage_uri = excluded.storage_uri,
                sha256 = excluded.sha256,
                fetched_at = excluded.fetched_at
            WHERE filing_documents.sha256 = ''
            "#,
        )
        .bind(&doc.rcept_no)
        .bind(&doc.doc_type)
        .bind(&doc.storage_uri)
        .bind(&doc.sha256)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 다운로드 실패를 기록하고 누적 실패 횟수를 돌려줍니다.
    ///
    /// 이미 저장된 문서가 있으면 기록하지 않고 `None`.
    pub async fn record_download_failure(&self, rcept_no: &str, doc_type: &str) -> Result<Option<i64>> {
        let retry_count: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO filing_documents (rcept_no, doc_type, storage_uri, sha256, fetched_at, retry_count)
            VALUES (?, ?, '', '', ?, 1)
            ON CONFLICT (rcept_no, doc_type) DO UPDATE SET
                retry_count = filing_documents.retry_count + 1,
                fetched_at = excluded.fetched_at
            WHERE filing_documents.sha256 = ''
            RETURNING retry_count
            "#,
        )
        .bind(rcept_no)
        .bind(doc_type)
        .bind(Utc::now())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(retry_count.map(|(n,)| n))
    }

    // ===== 조회 =====

    pub async fn corps_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM corps")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// 원문 ZIP이 아직 없는 공시를 조회합니다.
    ///
    /// 실패 횟수가 적은 공시부터, 같으면 최신 접수일 순입니다.
    /// [`MAX_DOWNLOAD_RETRIES`]번 실패한 공시는 제외됩니다.
    pub async fn filings_without_documents(&self, limit: i64) -> Result<Vec<Filing>> {
        let filings = sqlx::query_as::<_, Filing>(
            r#"
            SELECT f.* FROM filings f
            LEFT JOIN filing_documents d ON d.rcept_no = f.rcept_no AND d.doc_type = ?
            WHERE d.id IS NULL OR (d.sha256 = '' AND d.retry_count < ?)
            ORDER BY COALESCE(d.retry_count, 0) ASC, f.rcept_dt DESC, f.rcept_no DESC
            LIMIT ?
            "#,
        )
        .bind(DOC_TYPE_MAIN_XML_ZIP)
        .bind(MAX_DOWNLOAD_RETRIES)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(filings)
    }

    /// 기업 목록 (이름순, 1부터 시작하는 페이지).
    pub async fn list_corps(&self, page: i64, limit: i64) -> Result<(i64, Vec<Corp>)> {
        let total = self.corps_count().await?;
        let corps = sqlx::query_as::<_, Corp>(
            "SELECT * FROM corps ORDER BY corp_name ASC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind((page.max(1) - 1) * limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok((total, corps))
    }

    fn push_filing_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, query: &FilingQuery) {
        if query.stock_code.is_some() {
            qb.push(" JOIN corps c ON c.corp_code = f.corp_code");
        }
        qb.push(" WHERE 1=1");
        if let Some(corp_code) = &query.corp_code {
            qb.push(" AND f.corp_code = ").push_bind(corp_code.clone());
        }
        if let Some(stock_code) = &query.stock_code {
            qb.push(" AND c.stock_code = ").push_bind(stock_code.clone());
        }
        if let Some(from) = &query.date_from {
            qb.push(" AND f.rcept_dt >= ").push_bind(from.clone());
        }
        if let Some(to) = &query.date_to {
            qb.push(" AND f.rcept_dt <= ").push_bind(to.clone());
        }
    }

    /// 공시 목록 (최신순).
    pub async fn list_filings(&self, query: &FilingQuery) -> Result<(i64, Vec<Filing>)> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM filings f");
        Self::push_filing_filters(&mut count_qb, query);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(self.db.pool()).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT f.* FROM filings f");
        Self::push_filing_filters(&mut qb, query);
        qb.push(" ORDER BY f.rcept_dt DESC, f.rcept_no DESC LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind((query.page.max(1) - 1) * query.limit);

        let filings = qb.build_query_as::<Filing>().fetch_all(self.db.pool()).await?;
        Ok((total, filings))
    }

    /// 가장 최근 접수일 (YYYYMMDD).
    pub async fn latest_rcept_dt(&self) -> Result<Option<String>> {
        let (latest,): (Option<String>,) = sqlx::query_as("SELECT MAX(rcept_dt) FROM filings")
            .fetch_one(self.db.pool())
            .await?;
        Ok(latest)
    }

    pub async fn get_filing(&self, rcept_no: &str) -> Result<Option<Filing>> {
        let filing = sqlx::query_as::<_, Filing>("SELECT * FROM filings WHERE rcept_no = ?")
            .bind(rcept_no)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(filing)
    }

    /// 공시와 관련 문서/이벤트를 함께 조회합니다.
    pub async fn filing_detail(&self, rcept_no: &str) -> Result<Option<FilingDetail>> {
        let Some(filing) = self.get_filing(rcept_no).await? else {
            return Ok(None);
        };

        let documents = sqlx::query_as::<_, FilingDocument>(
            "SELECT * FROM filing_documents WHERE rcept_no = ? AND sha256 <> '' ORDER BY id",
        )
        .bind(rcept_no)
        .fetch_all(self.db.pool())
        .await?;

        let events = sqlx::query_as::<_, ExtractedEvent>(
            "SELECT * FROM extracted_events WHERE rcept_no = ? ORDER BY id",
        )
        .bind(rcept_no)
        .fetch_all(self.db.pool())
        .await?;

        Ok(Some(FilingDetail {
            filing,
            documents,
            events,
        }))
    }
}
