//! DART 수집 작업.
//!
//! - 기업 고유번호 갱신 (주 1회)
//! - 최근 3일 공시 목록 수집 (매시)
//! - 원문이 없는 공시의 문서 ZIP 다운로드 (5분마다, 10건씩, 실패가 적은 공시 우선)
//! - 최초 실행 시 기업 테이블이 비어 있으면 고유번호 적재

use chrono::{Duration, Utc};
use chrono_tz::Asia::Seoul;
use dx_core::{NewFilingDocument, DOC_TYPE_MAIN_XML_ZIP};
use dx_data::provider::DartClient;
use dx_data::{DartRepository, MAX_DOWNLOAD_RETRIES};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::Result;
use crate::stats::CollectionStats;

/// 공시 목록 조회 일수 (오늘 포함).
const LOOKBACK_DAYS: i64 = 3;

/// 한 번에 내려받을 최대 원문 수.
const DOWNLOAD_BATCH: i64 = 10;

/// 원문 다운로드 간격.
const DOWNLOAD_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// DART 작업 모음.
pub struct DartJobs {
    client: Arc<DartClient>,
    repo: Arc<DartRepository>,
    storage_dir: PathBuf,
    download_interval: std::time::Duration,
}

impl DartJobs {
    pub fn new(client: Arc<DartClient>, repo: Arc<DartRepository>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            repo,
            storage_dir: storage_dir.into(),
            download_interval: DOWNLOAD_INTERVAL,
        }
    }

    pub fn with_download_interval(mut self, interval: std::time::Duration) -> Self {
        self.download_interval = interval;
        self
    }

    /// 기업 고유번호 전체를 갱신합니다.
    pub async fn update_corp_codes(&self) -> Result<CollectionStats> {
        let started = Instant::now();
        let mut stats = CollectionStats::new();

        let corps = self.client.corp_codes().await?;
        stats.total = corps.len();
        stats.rows = self.repo.upsert_corps(&corps).await?;
        stats.success = stats.rows;
        stats.elapsed = started.elapsed();

        stats.log_summary("DART 기업코드 갱신");
        Ok(stats)
    }

    /// 최근 공시 목록을 날짜별로 수집합니다. 하루치 실패는 건너뜁니다.
    pub async fn fetch_filings(&self) -> Result<CollectionStats> {
        let started = Instant::now();
        let mut stats = CollectionStats::new();
        let today = Utc::now().with_timezone(&Seoul).date_naive();

        for offset in 0..LOOKBACK_DAYS {
            let date = (today - Duration::days(offset)).format("%Y%m%d").to_string();
            stats.total += 1;

            let filings = match self.client.filings(&date, &date).await {
                Ok(filings) => filings,
                Err(e) => {
                    warn!(%date, error = %e, "Failed to fetch DART filings");
                    stats.errors += 1;
                    continue;
                }
            };
            if filings.is_empty() {
                stats.empty += 1;
                continue;
            }

            match self.repo.upsert_filings(&filings).await {
                Ok(n) => {
                    info!(%date, count = n, "DART filings stored");
                    stats.success += 1;
                    stats.rows += n;
                }
                Err(e) => {
                    warn!(%date, error = %e, "Failed to store DART filings");
                    stats.errors += 1;
                }
            }
        }

        stats.elapsed = started.elapsed();
        stats.log_summary("DART 공시 수집");
        Ok(stats)
    }

    /// 원문이 없는 공시의 ZIP을 내려받아 해시와 함께 기록합니다.
    pub async fn download_documents(&self) -> Result<CollectionStats> {
        let started = Instant::now();
        let mut stats = CollectionStats::new();

        let pending = self.repo.filings_without_documents(DOWNLOAD_BATCH).await?;
        if pending.is_empty() {
            return Ok(stats);
        }

        for (i, filing) in pending.iter().enumerate() {
            if i > 0 && !self.download_interval.is_zero() {
                tokio::time::sleep(self.download_interval).await;
            }
            stats.total += 1;

            let downloaded = match self
                .client
                .download_document(&filing.rcept_no, &self.storage_dir)
                .await
            {
                Ok(doc) => doc,
                Err(e) => {
                    stats.errors += 1;
                    match self
                        .repo
                        .record_download_failure(&filing.rcept_no, DOC_TYPE_MAIN_XML_ZIP)
                        .await
                    {
                        Ok(attempts) => warn!(
                            rcept_no = %filing.rcept_no,
                            corp = %filing.corp_name,
                            attempts = attempts.unwrap_or_default(),
                            max_attempts = MAX_DOWNLOAD_RETRIES,
                            error = %e,
                            "Document download failed"
                        ),
                        Err(record_err) => warn!(
                            rcept_no = %filing.rcept_no,
                            error = %e,
                            record_error = %record_err,
                            "Document download failed and could not be recorded"
                        ),
                    }
                    continue;
                }
            };

            let doc = NewFilingDocument {
                rcept_no: filing.rcept_no.clone(),
                doc_type: DOC_TYPE_MAIN_XML_ZIP.to_string(),
                storage_uri: downloaded.path.to_string_lossy().into_owned(),
                sha256: downloaded.sha256,
            };
            match self.repo.insert_document(&doc).await {
                Ok(true) => {
                    stats.success += 1;
                    stats.rows += 1;
                }
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    warn!(rcept_no = %filing.rcept_no, error = %e, "Failed to record document");
                    stats.errors += 1;
                }
            }
        }

        stats.elapsed = started.elapsed();
        stats.log_summary("DART 원문 다운로드");
        Ok(stats)
    }

    /// 기업 테이블이 비어 있을 때만 고유번호를 적재합니다.
    pub async fn initial_setup(&self) -> Result<Option<CollectionStats>> {
        let count = self.repo.corps_count().await?;
        if count > 0 {
            info!(count, "Corp table already populated, skipping initial load");
            return Ok(None);
        }
        info!("Corp table empty, loading corp codes");
        self.update_corp_codes().await.map(Some)
    }
}
