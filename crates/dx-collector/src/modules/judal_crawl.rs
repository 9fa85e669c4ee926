//! 테마/종목 크롤링.
//!
//! 테마 목록 → 테마별 종목 목록 → 종목/매핑 upsert → (선택) 일별 스냅샷 순으로 진행합니다.
//! 테마는 순서대로 하나씩, 요청 사이에 고정 간격을 두고 처리합니다.
//! 한 테마의 실패는 결과의 에러 목록에 남기고 다음 테마로 넘어갑니다.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Asia::Seoul;
use dx_core::{CrawlResult, NewCrawlLog, Stock, ThemeEntry};
use dx_data::provider::JudalClient;
use dx_data::JudalRepository;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::crawl_guard::CrawlRunner;

/// 크롤링 대상 페이지 공급자.
#[async_trait]
pub trait CrawlSource: Send + Sync {
    async fn themes(&self) -> dx_data::Result<Vec<ThemeEntry>>;

    async fn theme_stocks(&self, theme_idx: i64) -> dx_data::Result<Vec<Stock>>;
}

#[async_trait]
impl CrawlSource for JudalClient {
    async fn themes(&self) -> dx_data::Result<Vec<ThemeEntry>> {
        self.fetch_themes().await
    }

    async fn theme_stocks(&self, theme_idx: i64) -> dx_data::Result<Vec<Stock>> {
        self.fetch_theme_stocks(theme_idx).await
    }
}

/// 크롤링 날짜 (한국 시간 기준 달력 날짜).
pub fn crawl_date_today() -> NaiveDate {
    Utc::now().with_timezone(&Seoul).date_naive()
}

/// 테마 크롤러.
pub struct ThemeCrawler {
    source: Arc<dyn CrawlSource>,
    repo: Arc<JudalRepository>,
    delay: Duration,
}

impl ThemeCrawler {
    pub fn new(source: Arc<dyn CrawlSource>, repo: Arc<JudalRepository>, delay: Duration) -> Self {
        Self {
            source,
            repo,
            delay,
        }
    }

    /// 전체 크롤링.
    ///
    /// `with_history`이면 이번 실행에서 처음 본 종목마다 오늘 날짜의 스냅샷을 저장합니다.
    pub async fn crawl(&self, with_history: bool) -> CrawlResult {
        self.crawl_on(crawl_date_today(), with_history).await
    }

    pub async fn crawl_on(&self, crawl_date: NaiveDate, with_history: bool) -> CrawlResult {
        let start_time = Utc::now();
        let mut errors: Vec<String> = Vec::new();

        info!(%crawl_date, with_history, "테마 크롤링 시작");

        let themes = match self.source.themes().await {
            Ok(themes) => themes,
            Err(e) => {
                error!(error = %e, "Theme list crawl failed");
                errors.push(format!("theme list: {}", e));
                Vec::new()
            }
        };

        for theme in &themes {
            if let Err(e) = self.repo.upsert_theme(theme.theme_idx, &theme.name).await {
                warn!(theme_idx = theme.theme_idx, error = %e, "Failed to upsert theme");
                errors.push(format!("theme {} upsert: {}", theme.theme_idx, e));
            }
        }

        let mut seen_codes: HashSet<String> = HashSet::new();
        let mut history_saved: u64 = 0;

        for (i, theme) in themes.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            debug!(
                progress = format!("{}/{}", i + 1, themes.len()),
                theme_idx = theme.theme_idx,
                name = %theme.name,
                "Crawling theme stocks"
            );

            let stocks = match self.source.theme_stocks(theme.theme_idx).await {
                Ok(stocks) => stocks,
                Err(e) => {
                    warn!(theme_idx = theme.theme_idx, error = %e, "Theme stock crawl failed");
                    errors.push(format!("theme {} stocks: {}", theme.theme_idx, e));
                    continue;
                }
            };

            for stock in &stocks {
                if let Err(e) = self.repo.upsert_stock(stock).await {
                    warn!(code = %stock.code, error = %e, "Failed to upsert stock");
                    errors.push(format!("stock {} upsert: {}", stock.code, e));
                    continue;
                }

                let first_seen = seen_codes.insert(stock.code.clone());
                if first_seen && with_history {
                    match self.repo.save_stock_history(crawl_date, stock).await {
                        Ok(()) => history_saved += 1,
                        Err(e) => {
                            warn!(code = %stock.code, error = %e, "Failed to save stock history")
                        }
                    }
                }

                if let Err(e) = self.repo.add_theme_stock(theme.theme_idx, &stock.code).await {
                    warn!(theme_idx = theme.theme_idx, code = %stock.code, error = %e, "Failed to map theme stock");
                }
            }

            if let Err(e) = self
                .repo
                .update_theme_stock_count(theme.theme_idx, stocks.len() as i64)
                .await
            {
                warn!(theme_idx = theme.theme_idx, error = %e, "Failed to update theme stock count");
            }
        }

        let end_time = Utc::now();
        let duration_seconds = (end_time - start_time).num_milliseconds() as f64 / 1000.0;

        let result = CrawlResult {
            themes_crawled: themes.len() as u64,
            stocks_crawled: seen_codes.len() as u64,
            history_saved,
            crawl_date,
            errors,
            start_time,
            end_time,
            duration_seconds,
        };

        self.write_log(&result, with_history).await;

        let status = crawl_status(&result);
        metrics::counter!("judal_stocks_crawled_total").increment(result.stocks_crawled);
        metrics::counter!("pipeline_runs_total", "pipeline" => "judal", "status" => status)
            .increment(1);

        info!(
            themes = result.themes_crawled,
            stocks = result.stocks_crawled,
            history = result.history_saved,
            errors = result.errors.len(),
            elapsed = format!("{:.1}s", result.duration_seconds),
            "테마 크롤링 완료"
        );

        result
    }

    async fn write_log(&self, result: &CrawlResult, with_history: bool) {
        let log = NewCrawlLog {
            crawl_date: result.crawl_date,
            crawl_type: if with_history { "daily_batch" } else { "manual" }.to_string(),
            themes_count: result.themes_crawled as i64,
            stocks_count: result.stocks_crawled as i64,
            history_count: result.history_saved as i64,
            duration_seconds: result.duration_seconds,
            status: crawl_status(result).to_string(),
            error_message: (!result.errors.is_empty()).then(|| result.errors.join("; ")),
        };
        if let Err(e) = self.repo.insert_crawl_log(&log).await {
            error!(error = %e, "Failed to save crawl log");
        }
    }
}

/// 결과로부터 로그 상태를 정합니다.
fn crawl_status(result: &CrawlResult) -> &'static str {
    if result.errors.is_empty() {
        "completed"
    } else if result.themes_crawled == 0 {
        "failed"
    } else {
        "partial_failure"
    }
}

#[async_trait]
impl CrawlRunner for ThemeCrawler {
    async fn run_crawl(&self, with_history: bool) -> CrawlResult {
        self.crawl(with_history).await
    }
}
