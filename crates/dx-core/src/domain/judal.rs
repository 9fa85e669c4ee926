//! 테마/종목 크롤링 레코드.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 테마. 키: `theme_idx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct Theme {
    pub theme_idx: i64,
    pub name: String,
    pub stock_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// 테마 목록 페이지에서 파싱한 항목.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeEntry {
    pub theme_idx: i64,
    pub name: String,
}

/// 종목 지표. 모든 값은 파싱 불가/0일 때 `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct StockIndicators {
    pub current_price: Option<i64>,
    pub price_change: Option<i64>,
    pub change_rate: Option<f64>,
    pub three_day_sum: Option<f64>,
    pub high_52w: Option<i64>,
    pub low_52w: Option<i64>,
    pub change_rate_52w_up: Option<f64>,
    pub change_rate_52w_down: Option<f64>,
    pub neglect_index_52w: Option<f64>,
    pub high_3y: Option<i64>,
    pub low_3y: Option<i64>,
    pub change_rate_3y_up: Option<f64>,
    pub change_rate_3y_down: Option<f64>,
    pub neglect_index_3y: Option<f64>,
    pub price_index_3y: Option<f64>,
    pub expected_return: Option<f64>,
    pub pbr: Option<f64>,
    pub per: Option<f64>,
    pub eps: Option<i64>,
    /// 시가총액 (억 원)
    pub market_cap: Option<i64>,
    pub volume_index: Option<f64>,
    pub volume_index_7d: Option<f64>,
    pub buffett_choice: Option<i64>,
}

/// 종목. 키: `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct Stock {
    pub code: String,
    pub name: String,
    /// KOSPI | KOSDAQ | 빈 문자열
    pub market: String,
    #[serde(flatten)]
    #[cfg_attr(feature = "sqlx-support", sqlx(flatten))]
    pub indicators: StockIndicators,
    pub updated_at: DateTime<Utc>,
}

/// 테마-종목 매핑 (고유 쌍).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeStock {
    pub theme_idx: i64,
    pub stock_code: String,
}

/// 일별 종목 스냅샷. 키: `(crawl_date, code)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct StockHistory {
    pub crawl_date: NaiveDate,
    pub code: String,
    pub name: String,
    pub market: String,
    #[serde(flatten)]
    #[cfg_attr(feature = "sqlx-support", sqlx(flatten))]
    pub indicators: StockIndicators,
}

/// 크롤링 실행 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct CrawlLog {
    pub id: i64,
    pub crawl_date: NaiveDate,
    pub crawl_type: String,
    pub themes_count: i64,
    pub stocks_count: i64,
    pub history_count: i64,
    pub duration_seconds: f64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 저장 전 크롤링 기록.
#[derive(Debug, Clone)]
pub struct NewCrawlLog {
    pub crawl_date: NaiveDate,
    pub crawl_type: String,
    pub themes_count: i64,
    pub stocks_count: i64,
    pub history_count: i64,
    pub duration_seconds: f64,
    pub status: String,
    pub error_message: Option<String>,
}

/// 크롤링 실행 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlResult {
    pub themes_crawled: u64,
    pub stocks_crawled: u64,
    pub history_saved: u64,
    pub crawl_date: NaiveDate,
    pub errors: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// 저장소 통계.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudalStats {
    pub theme_count: i64,
    pub stock_count: i64,
    pub mapping_count: i64,
    pub history_count: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_crawl_date: Option<NaiveDate>,
}

/// 종목 목록 정렬 필드 (화이트리스트).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockSort {
    Name,
    Code,
    CurrentPrice,
    ChangeRate,
    MarketCap,
    Per,
    Pbr,
    ExpectedReturn,
    NeglectIndex52w,
    UpdatedAt,
}

impl StockSort {
    /// 쿼리 파라미터에서 정렬 필드를 해석합니다. 알 수 없는 값은 `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(Self::Name),
            "code" => Some(Self::Code),
            "current_price" => Some(Self::CurrentPrice),
            "change_rate" => Some(Self::ChangeRate),
            "market_cap" => Some(Self::MarketCap),
            "per" => Some(Self::Per),
            "pbr" => Some(Self::Pbr),
            "expected_return" => Some(Self::ExpectedReturn),
            "neglect_index_52w" => Some(Self::NeglectIndex52w),
            "updated_at" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    /// SQL 컬럼명.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Code => "code",
            Self::CurrentPrice => "current_price",
            Self::ChangeRate => "change_rate",
            Self::MarketCap => "market_cap",
            Self::Per => "per",
            Self::Pbr => "pbr",
            Self::ExpectedReturn => "expected_return",
            Self::NeglectIndex52w => "neglect_index_52w",
            Self::UpdatedAt => "updated_at",
        }
    }
}

/// 종목 목록 조회 조건.
#[derive(Debug, Clone)]
pub struct StockQuery {
    pub sort: StockSort,
    pub descending: bool,
    pub market: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for StockQuery {
    fn default() -> Self {
        Self {
            sort: StockSort::MarketCap,
            descending: true,
            market: None,
            limit: 100,
            offset: 0,
        }
    }
}
