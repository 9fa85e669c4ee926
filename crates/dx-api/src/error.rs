//! API 에러 응답.
//!
//! 모든 엔드포인트는 실패 시 같은 형식을 반환합니다.
//!
//! ```json
//! { "error": "Filing not found" }
//! ```

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dx_collector::modules::CrawlInFlight;
use dx_collector::CollectorError;
use dx_data::DataError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// API 에러.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 잘못된 요청 파라미터 (400)
    #[error("{0}")]
    BadRequest(String),

    /// 리소스 없음 (404)
    #[error("{0}")]
    NotFound(String),

    /// 이미 실행 중인 작업 (409)
    #[error("{0}")]
    Conflict(String),

    /// 내부 오류 (500)
    #[error("{0}")]
    Internal(String),

    /// 저장소나 제공자가 준비되지 않음 (503)
    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NotFound(msg) => Self::NotFound(msg),
            DataError::InvalidData(msg) => Self::BadRequest(msg),
            DataError::NotConfigured(msg) => Self::Unavailable(msg),
            DataError::PoolExhausted => Self::Unavailable("Connection pool exhausted".to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Data(e) => e.into(),
            CollectorError::NotConfigured(what) => Self::Unavailable(format!("{} is not configured", what)),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CrawlInFlight> for ApiError {
    fn from(err: CrawlInFlight) -> Self {
        Self::Conflict(err.to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// API 핸들러 Result 타입.
pub type ApiResult<T> = Result<T, ApiError>;
