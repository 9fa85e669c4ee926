//! 기사 중복 판정.
//!
//! 판정 순서:
//! 1. 같은 ID가 이번 실행에 이미 있으면 중복 (점수 1.0)
//! 2. 같은 ID가 저장소에 있으면 중복 (점수 1.0)
//! 3. 정규화한 제목의 Jaro-Winkler 유사도가 임계값 이상인 기사가
//!    이번 실행 또는 최근 저장분(unique만)에 있으면 중복
//!
//! 중복으로 판정된 기사도 저장됩니다. 소비자는 `dup_state`로 걸러냅니다.

use async_trait::async_trait;
use chrono::Duration;
use dx_core::{CanonicalArticle, NewsConfig};
use dx_data::NewsStore;
use std::sync::Arc;

use crate::error::Result;

/// 중복 판정 결과.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupDecision {
    pub is_duplicate: bool,
    pub dup_of: Option<String>,
    pub score: f64,
}

impl DedupDecision {
    pub fn unique() -> Self {
        Self {
            is_duplicate: false,
            dup_of: None,
            score: 0.0,
        }
    }

    fn duplicate_of(id: &str, score: f64) -> Self {
        Self {
            is_duplicate: true,
            dup_of: Some(id.to_string()),
            score,
        }
    }
}

/// 중복 판정기.
#[async_trait]
pub trait Deduplicator: Send + Sync {
    /// `pending`은 이번 실행에서 이미 판정을 마친 기사들입니다.
    async fn check(
        &self,
        article: &CanonicalArticle,
        pending: &[CanonicalArticle],
    ) -> Result<DedupDecision>;
}

/// 비교용 제목 정규화: 소문자, 문자/숫자 외 제거, 공백 정리.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 두 제목의 유사도 (0.0~1.0).
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(&a, &b)
}

/// 저장소 기반 판정기.
pub struct TitleSimilarityDeduplicator {
    store: Arc<dyn NewsStore>,
    threshold: f64,
    window: Duration,
    candidate_limit: i64,
}

impl TitleSimilarityDeduplicator {
    pub fn new(store: Arc<dyn NewsStore>, config: &NewsConfig) -> Self {
        Self {
            store,
            threshold: config.dedup_threshold,
            window: Duration::hours(config.dedup_window_hours),
            candidate_limit: config.dedup_candidate_limit,
        }
    }

    fn best_match<'a>(
        &self,
        article: &CanonicalArticle,
        candidates: impl Iterator<Item = (&'a str, &'a str)>,
    ) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for (id, title) in candidates {
            if id == article.id {
                continue;
            }
            let score = title_similarity(&article.title, title);
            if score >= self.threshold && best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some((id.to_string(), score));
            }
        }
        best
    }
}

#[async_trait]
impl Deduplicator for TitleSimilarityDeduplicator {
    async fn check(
        &self,
        article: &CanonicalArticle,
        pending: &[CanonicalArticle],
    ) -> Result<DedupDecision> {
        if pending.iter().any(|p| p.id == article.id) {
            return Ok(DedupDecision::duplicate_of(&article.id, 1.0));
        }
        if self.store.article_exists(&article.id).await? {
            return Ok(DedupDecision::duplicate_of(&article.id, 1.0));
        }

        let since = article.published_at - self.window;
        let stored = self
            .store
            .similarity_candidates(since, self.candidate_limit)
            .await?;

        let in_run = pending
            .iter()
            .filter(|p| !p.is_duplicate())
            .map(|p| (p.id.as_str(), p.title.as_str()));
        let persisted = stored.iter().map(|(id, title)| (id.as_str(), title.as_str()));

        Ok(match self.best_match(article, in_run.chain(persisted)) {
            Some((id, score)) => DedupDecision::duplicate_of(&id, score),
            None => DedupDecision::unique(),
        })
    }
}
