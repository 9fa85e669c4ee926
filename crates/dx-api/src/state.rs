//! 애플리케이션 공유 상태.
//!
//! 도메인 저장소는 각각 선택적입니다. 열리지 않은 도메인의 요청은 503으로 응답합니다.

use chrono::{DateTime, Utc};
use dx_collector::modules::CrawlCoordinator;
use dx_collector::Services;
use dx_core::AppConfig;
use dx_data::{DartRepository, JudalRepository, SqliteCandleStore, SqliteNewsStore};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::error::{ApiError, ApiResult};

/// 핸들러 간 공유 상태.
pub struct AppState {
    /// 도메인별 저장소와 파이프라인
    pub services: Services,

    /// 요청으로 시작된 백그라운드 작업 (종료 시 대기)
    pub background: TaskTracker,

    /// 기동 시 해석된 설정
    pub config: AppConfig,

    /// API 버전
    pub version: String,

    /// 서버 시작 시각
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            background: TaskTracker::new(),
            config: AppConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    pub fn dart(&self) -> ApiResult<&DartRepository> {
        self.services
            .dart_repo
            .as_deref()
            .ok_or_else(|| unavailable("DART"))
    }

    pub fn judal(&self) -> ApiResult<&JudalRepository> {
        self.services.judal.as_deref().ok_or_else(|| unavailable("Judal"))
    }

    pub fn crawler(&self) -> ApiResult<&Arc<CrawlCoordinator>> {
        self.services.crawl.as_ref().ok_or_else(|| unavailable("Judal crawler"))
    }

    pub fn candles(&self) -> ApiResult<&SqliteCandleStore> {
        self.services
            .candle_store
            .as_deref()
            .ok_or_else(|| unavailable("Candle"))
    }

    pub fn news(&self) -> ApiResult<&SqliteNewsStore> {
        self.services
            .news_store
            .as_deref()
            .ok_or_else(|| unavailable("News"))
    }
}

fn unavailable(domain: &str) -> ApiError {
    ApiError::Unavailable(format!("{} store is not available", domain))
}

/// 인메모리 저장소로 채운 테스트 상태.
///
/// 외부 제공자를 쓰는 파이프라인은 포함되지 않습니다.
#[cfg(test)]
pub async fn create_test_state() -> AppState {
    use dx_data::Database;

    async fn db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    let services = Services {
        news_store: Some(Arc::new(SqliteNewsStore::new(db().await).await.unwrap())),
        judal: Some(Arc::new(JudalRepository::new(db().await).await.unwrap())),
        dart_repo: Some(Arc::new(DartRepository::new(db().await).await.unwrap())),
        candle_store: Some(Arc::new(SqliteCandleStore::new(db().await).await.unwrap())),
        ..Default::default()
    };
    AppState::new(services)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_domain_is_unavailable() {
        let state = AppState::new(Services::default());
        assert!(matches!(state.dart(), Err(ApiError::Unavailable(_))));
        assert!(matches!(state.crawler(), Err(ApiError::Unavailable(_))));

        let state = create_test_state().await;
        assert!(state.dart().is_ok());
        assert!(state.news().is_ok());
        assert!(state.uptime_secs() >= 0);
    }
}
