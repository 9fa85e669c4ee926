//! 저장소 및 외부 제공자.
//!
//! 이 crate는 다음을 제공합니다:
//! - 도메인별 SQLite upsert 저장소 (뉴스, DART, 테마/종목, 캔들)
//! - 뉴스/공시/크롤링/캔들 제공자 클라이언트
//! - 제공자별 아웃바운드 rate limiter

pub mod error;
pub mod provider;
pub mod storage;

pub use error::{DataError, Result};

// 저장소 재내보내기
pub use storage::candle::{CandleStore, IngestRunStore, SqliteCandleStore, UniverseStore};
pub use storage::dart::{DartRepository, FilingDetail, MAX_DOWNLOAD_RETRIES};
pub use storage::judal::JudalRepository;
pub use storage::news::{NewsStore, SqliteNewsStore};
pub use storage::Database;

// 제공자 재내보내기
pub use provider::{
    CandleRequest, Fetcher, MultiCandleProvider, RateLimiter, SingleCandleProvider,
    UniverseProvider,
};
