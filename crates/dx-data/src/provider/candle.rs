//! 캔들/유니버스 제공자 인터페이스.
//!
//! 수집 서비스는 구체 타입이 아닌 이 trait들만 보관합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dx_core::{Candle, Instrument, Market};
use std::collections::HashMap;

use crate::error::Result;

/// 기간 조회 요청.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRequest {
    pub market: Market,
    /// 1m | 5m | 1d
    pub timeframe: String,
    /// 포함 시작 시각
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// 심볼 하나씩 조회하는 제공자.
#[async_trait]
pub trait SingleCandleProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_candles(&self, symbol: &str, request: &CandleRequest) -> Result<Vec<Candle>>;
}

/// 여러 심볼을 한 번에 조회하는 제공자.
#[async_trait]
pub trait MultiCandleProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 호출당 최대 심볼 수.
    fn batch_size(&self) -> usize {
        100
    }

    /// 심볼별 캔들. 응답에 없는 심볼은 키가 없습니다.
    async fn fetch_multi(
        &self,
        symbols: &[String],
        request: &CandleRequest,
    ) -> Result<HashMap<String, Vec<Candle>>>;
}

/// 수집 대상 종목 목록 제공자.
#[async_trait]
pub trait UniverseProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 시가총액 `min_market_cap` 이상 종목.
    async fn fetch_universe(&self, min_market_cap: f64) -> Result<Vec<Instrument>>;
}
