//! 뉴스 기사 레코드.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 제공자가 돌려준 원시 기사.
///
/// 파이프라인 실행 중에만 존재하며 그대로 저장되지 않습니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawArticle {
    pub title: String,
    pub summary: String,
    pub url: String,
    /// 제공자 형식에서 파싱한 게시 시각 (파싱 실패 시 None)
    pub published_at: Option<DateTime<Utc>>,
    pub publisher: Option<String>,
    /// 제공자별 부가 필드
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 중복 판정 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DupState {
    #[default]
    Unique,
    Duplicate,
}

impl DupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::Duplicate => "duplicate",
        }
    }
}

impl std::str::FromStr for DupState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unique" => Ok(Self::Unique),
            "duplicate" => Ok(Self::Duplicate),
            other => Err(format!("unknown dup_state: {}", other)),
        }
    }
}

/// 정규화된 기사.
///
/// `canonical_url`은 `url`에서 추적 파라미터를 제거해 결정적으로 만들고,
/// `id`는 `canonical_url`의 해시입니다. 같은 URL을 다시 가져오면 같은 `id`가 됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalArticle {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub url: String,
    pub canonical_url: String,
    pub source: String,
    #[serde(default)]
    pub publisher: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub dup_state: DupState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dup_of: Option<String>,
    #[serde(default)]
    pub dup_score: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl CanonicalArticle {
    pub fn is_duplicate(&self) -> bool {
        self.dup_state == DupState::Duplicate
    }
}

/// 기사 목록 조회 조건.
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub source: Option<String>,
    /// 제목/요약 부분 일치
    pub keyword: Option<String>,
    /// 이 시각 이하로 게시된 기사만
    pub published_before: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}
