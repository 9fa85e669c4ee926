//! 수집 파이프라인과 예약 작업.
//!
//! 이 crate는 API 서버와 독립 CLI가 함께 쓰는 수집 로직을 제공합니다:
//! - 뉴스 수집 (가져오기 → 정규화 → 중복 판정 → 저장 → 실행 로그)
//! - 테마/종목 크롤링과 단일 실행 보호
//! - 캔들 수집과 유니버스 생성
//! - DART 기업/공시/원문 작업
//! - cron 스케줄러와 작업 레지스트리

pub mod error;
pub mod jobs;
pub mod modules;
pub mod scheduler;
pub mod stats;

pub use error::{CollectorError, Result};
pub use jobs::{register_jobs, Services};
pub use scheduler::Scheduler;
pub use stats::CollectionStats;
