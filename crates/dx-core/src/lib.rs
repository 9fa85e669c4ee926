//! # DX Core
//!
//! 시장 데이터 수집기 전반에서 공유하는 도메인 레코드와 기반 기능을 제공합니다.
//!
//! - 뉴스 기사, 실행 로그(RunLog)
//! - DART 공시/기업 레코드
//! - 테마/종목 크롤링 레코드
//! - 캔들(OHLCV), 유니버스, 수집 실행 기록(IngestRun)
//! - 계층형 설정 (기본값 → 환경 변수 → 파일)
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
