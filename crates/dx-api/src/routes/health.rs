//! 헬스 체크 endpoint.
//!
//! - `GET /health`: 프로세스 생존 확인
//! - `GET /health/ready`: 도메인별 저장소/파이프라인 준비 상태

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

/// 서비스 식별자.
pub const SERVICE_NAME: &str = "dx-unified";

/// 생존 확인 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// 도메인 상태 ("up" | "store_only" | "down").
///
/// `store_only`는 저장소 조회는 되지만 수집 작업은 설정되지 않은 상태입니다.
#[derive(Debug, Serialize, Deserialize)]
pub struct DomainStatus {
    pub news: String,
    pub judal: String,
    pub dart: String,
    pub candle: String,
}

/// 준비 상태 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: i64,
    pub domains: DomainStatus,
}

fn domain_status(store: bool, pipeline: bool) -> String {
    match (store, pipeline) {
        (true, true) => "up",
        (true, false) => "store_only",
        (false, _) => "down",
    }
    .to_string()
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
    })
}

/// GET /health/ready
pub async fn health_ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    let services = &state.services;
    let domains = DomainStatus {
        news: domain_status(services.news_store.is_some(), services.news.is_some()),
        judal: domain_status(services.judal.is_some(), services.crawl.is_some()),
        dart: domain_status(services.dart_repo.is_some(), services.dart.is_some()),
        candle: domain_status(services.candle_store.is_some(), services.candles.is_some()),
    };

    let all_down = [&domains.news, &domains.judal, &domains.dart, &domains.candle]
        .iter()
        .all(|s| s.as_str() == "down");

    Json(ReadyResponse {
        status: if all_down { "degraded" } else { "ok" }.to_string(),
        service: SERVICE_NAME.to_string(),
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        domains,
    })
}

pub fn health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(health_ready))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check_returns_service() {
        let app = Router::new().route("/health", get(health_check));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.service, "dx-unified");
    }

    #[tokio::test]
    async fn test_ready_reports_domains() {
        use crate::state::create_test_state;

        let state = Arc::new(create_test_state().await);
        let app = health_router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let ready: ReadyResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(ready.status, "ok");
        assert_eq!(ready.domains.dart, "store_only");
        assert_eq!(ready.domains.news, "store_only");
    }
}
