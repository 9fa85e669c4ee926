//! DX Unified REST API.
//!
//! DART 공시, 테마/종목, 캔들, 뉴스 저장소를 조회하고
//! 수집 작업을 수동으로 트리거하는 Axum 서버 구성 요소입니다.
//!
//! # 모듈
//!
//! - [`routes`]: 도메인별 엔드포인트
//! - [`state`]: 핸들러 공유 상태
//! - [`error`]: `{"error": ...}` 응답 에러
//! - [`metrics`], [`middleware`]: Prometheus 메트릭

pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_api_router;
pub use state::AppState;
