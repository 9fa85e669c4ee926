//! cron 스케줄러.
//!
//! 이름이 붙은 작업을 cron 표현식으로 등록하고, 트리거마다 독립된 태스크로 실행합니다.
//! 한 작업이 오래 걸려도 다른 작업의 스케줄은 밀리지 않습니다.
//!
//! 종료 시에는 새 트리거를 받지 않고, 실행 중인 작업이 끝날 때까지 제한 시간 동안 기다립니다.

use chrono_tz::Tz;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{CollectorError, Result};

/// 작업 실행 future.
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 등록된 작업 함수.
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// 등록된 작업 정보.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub name: String,
    pub cron: String,
}

/// 5필드 cron 표현식 앞에 초 필드를 붙입니다.
pub fn expand_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// 작업 스케줄러.
pub struct Scheduler {
    tz: Tz,
    jobs: Vec<JobInfo>,
    runners: HashMap<String, JobFn>,
    pending: Vec<Job>,
    inner: Option<JobScheduler>,
    tracker: TaskTracker,
    stopping: Arc<AtomicBool>,
}

impl Scheduler {
    /// `tz`는 cron 표현식을 해석할 시간대입니다.
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            jobs: Vec::new(),
            runners: HashMap::new(),
            pending: Vec::new(),
            inner: None,
            tracker: TaskTracker::new(),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 작업을 등록합니다. 잘못된 cron 표현식이나 중복 이름은 거절합니다.
    pub fn add_job<F, Fut>(&mut self, name: &str, cron: &str, job: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.runners.contains_key(name) {
            return Err(CollectorError::Scheduler(format!("duplicate job name: {}", name)));
        }
        if self.inner.is_some() {
            return Err(CollectorError::Scheduler(format!(
                "cannot add {} after the scheduler started",
                name
            )));
        }

        let run: JobFn = Arc::new(move || Box::pin(job()) as JobFuture);

        let job_name = name.to_string();
        let job_run = run.clone();
        let tracker = self.tracker.clone();
        let stopping = self.stopping.clone();
        let cron_job = Job::new_async_tz(expand_cron(cron).as_str(), self.tz, move |_id, _sched| {
            dispatch(&job_name, &job_run, &tracker, &stopping);
            Box::pin(async {})
        })
        .map_err(|e| CollectorError::Scheduler(format!("invalid cron for {} ({}): {}", name, cron, e)))?;

        self.pending.push(cron_job);
        self.runners.insert(name.to_string(), run);
        self.jobs.push(JobInfo {
            name: name.to_string(),
            cron: cron.to_string(),
        });
        debug!(job = name, cron, "Registered job");
        Ok(())
    }

    pub fn jobs(&self) -> &[JobInfo] {
        &self.jobs
    }

    /// 스케줄을 시작합니다.
    pub async fn start(&mut self) -> Result<()> {
        if self.inner.is_some() {
            return Ok(());
        }

        let scheduler = JobScheduler::new().await?;
        for job in self.pending.drain(..) {
            scheduler.add(job).await?;
        }
        scheduler.start().await?;
        self.inner = Some(scheduler);

        info!(jobs = self.jobs.len(), tz = %self.tz, "Scheduler started");
        Ok(())
    }

    /// 스케줄과 무관하게 작업을 즉시 한 번 실행합니다.
    ///
    /// 종료가 시작된 뒤에는 실행하지 않고 `false`를 반환합니다.
    pub fn trigger(&self, name: &str) -> Result<bool> {
        let run = self
            .runners
            .get(name)
            .ok_or_else(|| CollectorError::NotConfigured(format!("job {}", name)))?;
        Ok(dispatch(name, run, &self.tracker, &self.stopping))
    }

    /// 새 트리거를 막고 실행 중인 작업을 `timeout` 동안 기다립니다.
    ///
    /// 제한 시간 안에 모두 끝났으면 `true`.
    pub async fn stop(&mut self, timeout: Duration) -> Result<bool> {
        self.stopping.store(true, Ordering::SeqCst);

        if let Some(mut scheduler) = self.inner.take() {
            if let Err(e) = scheduler.shutdown().await {
                warn!(error = %e, "Cron scheduler shutdown failed");
            }
        }

        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        if drained {
            info!("Scheduler stopped");
        } else {
            warn!(in_flight = self.tracker.len(), "Scheduler stop timed out with jobs still running");
        }
        Ok(drained)
    }
}

fn dispatch(name: &str, run: &JobFn, tracker: &TaskTracker, stopping: &AtomicBool) -> bool {
    if stopping.load(Ordering::SeqCst) {
        debug!(job = name, "Ignoring trigger during shutdown");
        return false;
    }

    let name = name.to_string();
    let future = run();
    tracker.spawn(async move {
        info!(job = %name, "Running job");
        let started = Instant::now();
        future.await;
        info!(
            job = %name,
            elapsed = format!("{:.1}s", started.elapsed().as_secs_f64()),
            "Completed job"
        );
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_job(counter: &Arc<AtomicUsize>, delay: Duration) -> impl Fn() -> JobFuture + Send + Sync + 'static {
        let counter = counter.clone();
        move || {
            let counter = counter.clone();
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[test]
    fn test_expand_cron() {
        assert_eq!(expand_cron("*/15 * * * *"), "0 */15 * * * *");
        assert_eq!(expand_cron(" 30 0 6 * * 2-6 "), "30 0 6 * * 2-6");
    }

    #[tokio::test]
    async fn test_registration_validates_cron() {
        let mut scheduler = Scheduler::new(chrono_tz::Asia::Seoul);
        assert!(scheduler.add_job("news", "*/15 * * * *", || async {}).is_ok());
        assert!(matches!(
            scheduler.add_job("bad", "every minute please", || async {}),
            Err(CollectorError::Scheduler(_))
        ));
        assert!(scheduler.add_job("news", "0 * * * *", || async {}).is_err());

        assert_eq!(
            scheduler.jobs(),
            &[JobInfo {
                name: "news".to_string(),
                cron: "*/15 * * * *".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_trigger_and_graceful_stop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(chrono_tz::Asia::Seoul);
        scheduler
            .add_job("slow", "0 0 1 1 *", counting_job(&counter, Duration::from_millis(50)))
            .unwrap();
        scheduler.start().await.unwrap();

        assert!(scheduler.trigger("slow").unwrap());
        assert!(scheduler.trigger("missing").is_err());

        // 실행 중인 작업이 끝날 때까지 기다림
        assert!(scheduler.stop(Duration::from_secs(5)).await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // 종료 후 트리거는 무시
        assert!(!scheduler.trigger("slow").unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_bounded() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(chrono_tz::Asia::Seoul);
        scheduler
            .add_job("stuck", "0 0 1 1 *", counting_job(&counter, Duration::from_secs(3600)))
            .unwrap();

        assert!(scheduler.trigger("stuck").unwrap());
        assert!(!scheduler.stop(Duration::from_secs(1)).await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
