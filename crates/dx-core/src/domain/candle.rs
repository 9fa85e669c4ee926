//! 캔들(OHLCV) 및 유니버스 레코드.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// 시장 구분.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "KR")]
    Kr,
    #[serde(rename = "US")]
    Us,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kr => "KR",
            Self::Us => "US",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Market {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "KR" => Ok(Self::Kr),
            "US" => Ok(Self::Us),
            other => Err(CoreError::UnsupportedMarket(other.to_string())),
        }
    }
}

/// 단일 OHLCV 봉.
///
/// 자연 키: `(market, symbol, timeframe, ts)`. `ts`는 시가 시각(UTC epoch 초)입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct Candle {
    pub market: String,
    pub symbol: String,
    pub timeframe: String,
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub trade_count: Option<i64>,
}

/// 종목 마스터. 키: `(market, symbol)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct Instrument {
    pub market: String,
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub market_cap: Option<f64>,
    pub market_cap_ts: Option<i64>,
    pub is_active: bool,
    pub updated_at: i64,
}

/// 특정 일자/시장의 수집 대상 심볼 집합.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    /// YYYY-MM-DD
    pub ymd: String,
    pub market: String,
    pub market_cap_min: f64,
    pub symbols: Vec<String>,
    pub created_at: i64,
}

/// 캔들 수집 실행 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct IngestRun {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub market: String,
    /// universe | candles
    pub job: String,
    pub timeframe: Option<String>,
    pub symbols_count: i64,
    pub inserted_rows: i64,
    /// running | success | failed
    pub status: String,
    pub error_message: Option<String>,
}

/// 캔들 조회 조건.
#[derive(Debug, Clone, Default)]
pub struct CandleQuery {
    pub market: Option<String>,
    pub symbol: Option<String>,
    pub timeframe: String,
    /// epoch 초 (포함)
    pub ts_from: Option<i64>,
    /// epoch 초 (포함)
    pub ts_to: Option<i64>,
    pub limit: i64,
}

/// 수집 요청 파라미터.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestParams {
    pub market: Market,
    pub timeframe: String,
    /// 대상 유니버스 일자 (YYYY-MM-DD). 없으면 오늘.
    pub ymd: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_parse() {
        assert_eq!("kr".parse::<Market>().unwrap(), Market::Kr);
        assert_eq!("US".parse::<Market>().unwrap(), Market::Us);
        assert!("JP".parse::<Market>().is_err());
        assert_eq!(serde_json::to_string(&Market::Kr).unwrap(), "\"KR\"");
    }
}
