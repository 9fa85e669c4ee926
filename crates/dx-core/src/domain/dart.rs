//! DART 공시 레코드.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 원문 ZIP 문서 유형.
pub const DOC_TYPE_MAIN_XML_ZIP: &str = "MAIN_XML_ZIP";

/// 기업 기본 정보. 키: `corp_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct Corp {
    pub corp_code: String,
    pub corp_name: String,
    #[serde(default)]
    pub stock_code: String,
    pub modified_at: DateTime<Utc>,
}

/// 공시 메타데이터. 키: `rcept_no`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct Filing {
    pub rcept_no: String,
    pub corp_code: String,
    pub corp_name: String,
    pub report_nm: String,
    /// 접수일 (YYYYMMDD)
    pub rcept_dt: String,
    #[serde(default)]
    pub flr_nm: String,
    #[serde(default)]
    pub rm: String,
    #[serde(default)]
    pub dcm_no: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// 마지막 upsert 시각
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// 내려받은 공시 원문.
///
/// 같은 `rcept_no`에 대해 다시 생성되지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct FilingDocument {
    pub id: i64,
    pub rcept_no: String,
    pub doc_type: String,
    pub storage_uri: String,
    pub sha256: String,
    pub fetched_at: DateTime<Utc>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
}

/// 저장 전 원문 문서.
#[derive(Debug, Clone)]
pub struct NewFilingDocument {
    pub rcept_no: String,
    pub doc_type: String,
    pub storage_uri: String,
    pub sha256: String,
}

/// 공시 본문에서 추출한 구조화 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct ExtractedEvent {
    pub id: i64,
    pub rcept_no: String,
    pub event_type: String,
    pub payload_json: String,
    pub evidence_spans_json: String,
    pub created_at: DateTime<Utc>,
}

/// 공시 목록 조회 조건.
#[derive(Debug, Clone, Default)]
pub struct FilingQuery {
    pub corp_code: Option<String>,
    pub stock_code: Option<String>,
    /// YYYYMMDD (포함)
    pub date_from: Option<String>,
    /// YYYYMMDD (포함)
    pub date_to: Option<String>,
    pub page: i64,
    pub limit: i64,
}
