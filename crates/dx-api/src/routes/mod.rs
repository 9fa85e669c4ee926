//! API 라우트.
//!
//! # 라우트 구조
//!
//! - `/health` - 헬스 체크
//! - `/admin` - 데이터 최신성, 설정 조회 (자격 증명 마스킹)
//! - `/dart` - 기업/공시 조회, 공시 이관
//! - `/judal` - 테마/종목 조회, 크롤링 트리거와 상태
//! - `/candle` - 유니버스/캔들 조회, 수집 트리거
//! - `/news` - 기사 조회/검색, 실행 로그, 기사 이관
//!
//! 조회 응답은 `{count, ...}`, 쓰기/트리거 응답은 `{message, ...}` 형식입니다.

pub mod admin;
pub mod candle;
pub mod dart;
pub mod health;
pub mod judal;
pub mod news;

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

pub use admin::admin_router;
pub use candle::candle_router;
pub use dart::dart_router;
pub use health::health_router;
pub use judal::judal_router;
pub use news::news_router;

/// 전체 API 라우터.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health_router())
        .merge(admin_router())
        .merge(dart_router())
        .merge(judal_router())
        .merge(candle_router())
        .merge(news_router())
}

/// `limit` 파라미터 정규화 (기본값, 상한).
pub(crate) fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    match limit {
        Some(n) if n > 0 => n.min(max),
        _ => default,
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        send(
            app,
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 20, 100), 20);
        assert_eq!(clamp_limit(Some(0), 20, 100), 20);
        assert_eq!(clamp_limit(Some(-5), 20, 100), 20);
        assert_eq!(clamp_limit(Some(50), 20, 100), 50);
        assert_eq!(clamp_limit(Some(1000), 20, 100), 100);
    }
}
