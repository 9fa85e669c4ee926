//! 데이터 계층 오류 타입.

use thiserror::Error;

/// 저장소/제공자 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 데이터베이스 연결 오류
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// 쿼리 실행 오류
    #[error("Query error: {0}")]
    QueryError(String),

    /// 레코드를 찾을 수 없음
    #[error("Record not found: {0}")]
    NotFound(String),

    /// 직렬화/역직렬화 오류
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// 잘못된 데이터
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// 제공자 미설정
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// 연결 풀 소진
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// 외부 요청 실패 (네트워크, 타임아웃)
    #[error("Fetch error: {0}")]
    FetchError(String),

    /// 외부 API가 오류 상태 코드를 반환
    #[error("Upstream returned status {status}: {context}")]
    Upstream { status: u16, context: String },

    /// 요청 한도 초과 (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 응답 구조를 해석할 수 없음
    #[error("Unrecognized response schema from {provider}: {detail}")]
    UnrecognizedSchema { provider: String, detail: String },

    /// HTML/XML 파싱 오류
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 파일 입출력 오류
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// 다음 실행에서 재시도할 만한 오류인지 여부.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::FetchError(_)
                | DataError::RateLimited(_)
                | DataError::Upstream { .. }
                | DataError::PoolExhausted
        )
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DataError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => DataError::PoolExhausted,
            sqlx::Error::Database(db_err) => DataError::QueryError(db_err.message().to_string()),
            _ => DataError::QueryError(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return DataError::RateLimited(err.to_string());
            }
            return DataError::Upstream {
                status: status.as_u16(),
                context: err.to_string(),
            };
        }
        DataError::FetchError(err.to_string())
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::SerializationError(err.to_string())
    }
}

impl From<zip::result::ZipError> for DataError {
    fn from(err: zip::result::ZipError) -> Self {
        DataError::ParseError(format!("zip: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
