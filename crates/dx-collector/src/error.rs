//! Collector 에러 타입.

use thiserror::Error;

/// 수집 작업 에러.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 저장소/제공자 에러
    #[error("데이터 에러: {0}")]
    Data(#[from] dx_data::DataError),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(#[from] dx_core::CoreError),

    /// 스케줄러 에러
    #[error("스케줄러 에러: {0}")]
    Scheduler(String),

    /// 실행에 필요한 구성 요소가 없음
    #[error("구성되지 않음: {0}")]
    NotConfigured(String),

    /// 기타 에러
    #[error("{0}")]
    Other(String),
}

impl From<tokio_cron_scheduler::JobSchedulerError> for CollectorError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        CollectorError::Scheduler(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
