//! 외부 데이터 제공자 클라이언트.
//!
//! ## 뉴스
//! - `NaverNewsFetcher`: 네이버 검색 API (키워드별 최신순)
//! - `NewsApiFetcher`: newsapi.org `/v2/everything`
//!
//! ## 공시
//! - `DartClient`: 기업 고유번호 ZIP, 공시 목록(페이지), 원문 ZIP
//!
//! ## 테마/종목
//! - `JudalClient`: 테마 목록/테마별 종목 HTML 페이지 파서
//!
//! ## 캔들/유니버스
//! - `AlpacaClient`: 다중 심볼 바 (미국)
//! - `KiwoomMinuteAdapter`, `KiwoomDailyAdapter`: 단일 심볼 분봉/일봉 (한국)
//! - `FmpClient`: 시가총액 스크리너 (미국 유니버스)
//!
//! 모든 클라이언트는 호출별 타임아웃을 가지며, 재시도는 다음 스케줄 실행에 맡깁니다.

pub mod alpaca;
pub mod candle;
pub mod dart;
pub mod fmp;
pub mod judal;
pub mod kiwoom;
pub mod naver_news;
pub mod newsapi;
pub mod rate_limit;

pub use alpaca::AlpacaClient;
pub use candle::{CandleRequest, MultiCandleProvider, SingleCandleProvider, UniverseProvider};
pub use dart::{DartClient, DownloadedDocument, FilingPage};
pub use fmp::FmpClient;
pub use judal::{parse_stock_list, parse_theme_list, JudalClient};
pub use kiwoom::{KiwoomDailyAdapter, KiwoomMinuteAdapter};
pub use naver_news::NaverNewsFetcher;
pub use newsapi::NewsApiFetcher;
pub use rate_limit::RateLimiter;

use async_trait::async_trait;
use dx_core::RawArticle;
use reqwest::Client;
use std::time::Duration;

use crate::error::{DataError, Result};

/// 뉴스 제공자 공통 인터페이스.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// 하위 `source` 필드와 통계 키로 쓰이는 고정 식별자.
    fn name(&self) -> &str;

    /// 최신 기사를 가져옵니다.
    ///
    /// 하위 쿼리 일부가 실패해도 성공한 결과는 반환합니다.
    async fn fetch(&self) -> Result<Vec<RawArticle>>;
}

pub(crate) const USER_AGENT: &str = concat!("dx-unified/", env!("CARGO_PKG_VERSION"));

/// 타임아웃이 설정된 HTTP 클라이언트를 만듭니다.
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| DataError::FetchError(format!("HTTP 클라이언트 생성 실패: {}", e)))
}
