//! 크롤링 단일 실행 보호.
//!
//! 실행 중 여부는 원자적 플래그로, 마지막 결과는 뮤텍스로 보관합니다.
//! 실행 중일 때의 추가 요청은 대기열에 넣지 않고 즉시 거절합니다.
//! 요청으로 시작된 크롤링은 호출자의 [`TaskTracker`]에 등록되어 종료 시 대기됩니다.

use async_trait::async_trait;
use dx_core::CrawlResult;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// 크롤링 실행 주체.
#[async_trait]
pub trait CrawlRunner: Send + Sync {
    async fn run_crawl(&self, with_history: bool) -> CrawlResult;
}

/// 이미 실행 중.
#[derive(Debug, Error)]
#[error("Crawling already in progress")]
pub struct CrawlInFlight;

/// 현재 상태.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlStatus {
    pub is_crawling: bool,
    pub last_crawl: Option<CrawlResult>,
}

/// 크롤링 조정자.
pub struct CrawlCoordinator {
    runner: Arc<dyn CrawlRunner>,
    running: AtomicBool,
    last_result: Mutex<Option<CrawlResult>>,
}

/// 실행 종료 시 플래그를 내립니다 (작업이 패닉해도).
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CrawlCoordinator {
    pub fn new(runner: Arc<dyn CrawlRunner>) -> Self {
        Self {
            runner,
            running: AtomicBool::new(false),
            last_result: Mutex::new(None),
        }
    }

    fn try_acquire(&self) -> Result<RunningGuard<'_>, CrawlInFlight> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RunningGuard(&self.running))
            .map_err(|_| CrawlInFlight)
    }

    fn store_result(&self, result: CrawlResult) {
        match self.last_result.lock() {
            Ok(mut last) => *last = Some(result),
            Err(poisoned) => *poisoned.into_inner() = Some(result),
        }
    }

    /// 유휴 상태면 `tracker`에 등록된 백그라운드 작업으로 크롤링을 시작합니다.
    pub fn try_spawn(
        self: &Arc<Self>,
        tracker: &TaskTracker,
        with_history: bool,
    ) -> Result<(), CrawlInFlight> {
        // 플래그는 호출 시점에 올려야 연속 요청이 모두 거절됨
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CrawlInFlight)?;

        let this = Arc::clone(self);
        tracker.spawn(async move {
            let _guard = RunningGuard(&this.running);
            info!(with_history, "Crawl started");
            let result = this.runner.run_crawl(with_history).await;
            this.store_result(result);
        });
        Ok(())
    }

    /// 호출한 쪽에서 끝까지 실행합니다 (스케줄 작업용).
    pub async fn run(&self, with_history: bool) -> Result<CrawlResult, CrawlInFlight> {
        let _guard = self.try_acquire().inspect_err(|_| {
            warn!("Skipping crawl, another crawl is in progress");
        })?;
        let result = self.runner.run_crawl(with_history).await;
        self.store_result(result.clone());
        Ok(result)
    }

    pub fn is_crawling(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> CrawlStatus {
        let last_crawl = match self.last_result.lock() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        CrawlStatus {
            is_crawling: self.is_crawling(),
            last_crawl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// 해제 신호를 받을 때까지 끝나지 않는 실행기.
    struct SlowRunner {
        calls: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl CrawlRunner for SlowRunner {
        async fn run_crawl(&self, with_history: bool) -> CrawlResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            let now = Utc::now();
            CrawlResult {
                themes_crawled: 1,
                stocks_crawled: 2,
                history_saved: if with_history { 2 } else { 0 },
                crawl_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                errors: vec![],
                start_time: now,
                end_time: now,
                duration_seconds: 0.0,
            }
        }
    }

    async fn wait_until_idle(coordinator: &CrawlCoordinator) {
        for _ in 0..100 {
            if !coordinator.is_crawling() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("crawl did not finish");
    }

    #[tokio::test]
    async fn test_second_trigger_is_rejected() {
        let runner = Arc::new(SlowRunner {
            calls: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let coordinator = Arc::new(CrawlCoordinator::new(runner.clone()));
        let tracker = TaskTracker::new();

        assert!(coordinator.try_spawn(&tracker, true).is_ok());
        assert!(coordinator.try_spawn(&tracker, true).is_err());
        assert!(coordinator.run(false).await.is_err());
        assert!(coordinator.status().is_crawling);

        runner.release.notify_one();
        wait_until_idle(&coordinator).await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        let status = coordinator.status();
        assert!(!status.is_crawling);
        assert_eq!(status.last_crawl.unwrap().history_saved, 2);

        // 끝난 뒤에는 다시 시작 가능
        assert!(coordinator.try_spawn(&tracker, false).is_ok());
        runner.release.notify_one();
        wait_until_idle(&coordinator).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tracker_waits_for_spawned_crawl() {
        let runner = Arc::new(SlowRunner {
            calls: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let coordinator = Arc::new(CrawlCoordinator::new(runner.clone()));
        let tracker = TaskTracker::new();

        coordinator.try_spawn(&tracker, true).unwrap();
        assert_eq!(tracker.len(), 1);
        tracker.close();

        // 크롤링이 끝나기 전에는 대기가 끝나지 않음
        let pending = tokio::time::timeout(Duration::from_millis(50), tracker.wait()).await;
        assert!(pending.is_err());

        runner.release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), tracker.wait())
            .await
            .unwrap();
        assert!(tracker.is_empty());

        let status = coordinator.status();
        assert!(!status.is_crawling);
        assert_eq!(status.last_crawl.unwrap().stocks_crawled, 2);
    }
}
