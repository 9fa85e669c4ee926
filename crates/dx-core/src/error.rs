//! 공통 오류 타입.

use thiserror::Error;

/// 설정 및 도메인 검증 오류.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 설정 파일 로드/파싱 실패
    #[error("설정 오류: {0}")]
    Config(String),

    /// 잘못된 입력 값
    #[error("잘못된 값: {0}")]
    InvalidValue(String),

    /// 지원하지 않는 시장
    #[error("지원하지 않는 시장: {0}")]
    UnsupportedMarket(String),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
