//! 뉴스 수집 파이프라인.
//!
//! 한 번의 실행은 설정된 순서대로 각 제공자를 처리합니다:
//! 가져오기 → 정규화 → 중복 판정 → 소스별 배치 저장.
//!
//! 한 제공자의 실패(가져오기/저장)는 에러 목록에 기록되고 다음 제공자로 넘어갑니다.
//! 실행 로그는 시작 시 생성되고 종료 시 정확히 한 번 확정됩니다.

use chrono::Utc;
use dx_core::{CanonicalArticle, DupState, RunLog, RunStatus, SourceStats};
use dx_data::{Fetcher, NewsStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dedup::Deduplicator;
use super::normalize::normalize;
use crate::error::Result;

/// 뉴스 파이프라인 실행기.
pub struct NewsProcessor {
    fetchers: Vec<Arc<dyn Fetcher>>,
    store: Arc<dyn NewsStore>,
    dedup: Arc<dyn Deduplicator>,
}

impl NewsProcessor {
    pub fn new(
        fetchers: Vec<Arc<dyn Fetcher>>,
        store: Arc<dyn NewsStore>,
        dedup: Arc<dyn Deduplicator>,
    ) -> Self {
        Self {
            fetchers,
            store,
            dedup,
        }
    }

    /// 등록된 제공자 이름 목록.
    pub fn sources(&self) -> Vec<String> {
        self.fetchers.iter().map(|f| f.name().to_string()).collect()
    }

    /// 한 번의 수집 실행.
    ///
    /// 실행 로그 생성에 실패한 경우에만 에러를 반환합니다.
    /// 제공자 실패는 반환된 로그의 `errors`와 `status`로 드러납니다.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RunLog> {
        let started = Instant::now();
        let mut log = RunLog::start(Uuid::new_v4().to_string(), Utc::now());

        if let Err(e) = self.store.create_run(&log).await {
            error!(run_id = %log.run_id, error = %e, "Failed to create news run log");
            metrics::counter!("pipeline_runs_total", "pipeline" => "news", "status" => RunStatus::Failed.as_str())
                .increment(1);
            return Err(e.into());
        }

        info!(run_id = %log.run_id, sources = self.fetchers.len(), "뉴스 수집 시작");

        // 이번 실행에서 판정을 마친 기사 (소스 간 중복 판정용)
        let mut seen: Vec<CanonicalArticle> = Vec::new();

        for fetcher in &self.fetchers {
            let source = fetcher.name().to_string();
            let stats = self.process_source(fetcher.as_ref(), &mut seen, &mut log.errors).await;
            log.stats.record_source(&source, stats);
        }

        log.finalize(Utc::now());

        if let Err(e) = self.store.finalize_run(&log).await {
            // 재시도하지 않음
            error!(run_id = %log.run_id, error = %e, "Failed to finalize news run log");
        }

        metrics::counter!("pipeline_runs_total", "pipeline" => "news", "status" => log.status.as_str())
            .increment(1);

        info!(
            run_id = %log.run_id,
            status = %log.status,
            fetched = log.stats.total_fetched,
            stored = log.stats.total_stored,
            duplicates = log.stats.total_dups,
            errors = log.errors.len(),
            elapsed = format!("{:.1}s", started.elapsed().as_secs_f64()),
            "뉴스 수집 완료"
        );

        Ok(log)
    }

    async fn process_source(
        &self,
        fetcher: &dyn Fetcher,
        seen: &mut Vec<CanonicalArticle>,
        errors: &mut Vec<String>,
    ) -> SourceStats {
        let source = fetcher.name();
        let mut stats = SourceStats::default();

        let raws = match fetcher.fetch().await {
            Ok(raws) => raws,
            Err(e) => {
                warn!(source = %source, error = %e, "Fetcher failed");
                errors.push(format!("fetcher {}: {}", source, e));
                return stats;
            }
        };
        stats.fetched = raws.len() as u64;
        metrics::counter!("news_articles_fetched_total", "source" => source.to_string())
            .increment(stats.fetched);

        let fetched_at = Utc::now();
        let mut batch: Vec<CanonicalArticle> = Vec::with_capacity(raws.len());

        for raw in &raws {
            let mut article = match normalize(raw, source, fetched_at) {
                Ok(article) => article,
                Err(e) => {
                    warn!(source = %source, url = %raw.url, error = %e, "Skipping article");
                    continue;
                }
            };

            let repeated_in_run = seen.iter().any(|s| s.id == article.id);

            match self.dedup.check(&article, seen).await {
                Ok(decision) if decision.is_duplicate => {
                    article.dup_state = DupState::Duplicate;
                    article.dup_of = decision.dup_of;
                    article.dup_score = decision.score;
                    stats.duplicates += 1;
                }
                Ok(decision) => {
                    article.dup_score = decision.score;
                }
                Err(e) => {
                    // 판정 불가 시 unique로 저장
                    warn!(source = %source, id = %article.id, error = %e, "Dedup check failed");
                    errors.push(format!("dedup {}: {}", source, e));
                }
            }

            if repeated_in_run {
                continue;
            }
            seen.push(article.clone());
            batch.push(article);
        }

        if batch.is_empty() {
            return stats;
        }

        match self.store.upsert_articles(&batch).await {
            Ok(stored) => {
                stats.stored = stored as u64;
                metrics::counter!("news_articles_stored_total", "source" => source.to_string())
                    .increment(stats.stored);
            }
            Err(e) => {
                error!(source = %source, count = batch.len(), error = %e, "Failed to store articles");
                errors.push(format!("store {}: {}", source, e));
            }
        }
        metrics::counter!("news_duplicates_total").increment(stats.duplicates);

        stats
    }
}
