//! 기사 정규화.
//!
//! 제공자별 원본 기사를 저장 가능한 [`CanonicalArticle`]로 변환하는 순수 함수 모음입니다.
//!
//! - 제목/요약: 태그 제거, HTML 엔티티 복원, 공백 정리
//! - URL: 추적 파라미터(`utm_*`, `ref`, `source`)와 fragment 제거, 파라미터 정렬
//! - ID: 정규화 URL의 SHA-256 (hex)
//! - 태그: 키워드 그룹 매칭 (`stock`, `economy`, `market`)

use chrono::{DateTime, Utc};
use dx_core::{CanonicalArticle, DupState, RawArticle};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

/// 정규화 실패 사유.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("empty url")]
    EmptyUrl,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("empty title")]
    EmptyTitle,
}

/// 태그별 키워드 (소문자 비교).
const TAG_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "stock",
        &["주식", "주가", "종목", "코스피", "코스닥", "상장", "stock", "shares", "equity"],
    ),
    (
        "economy",
        &["경제", "금리", "물가", "환율", "성장률", "economy", "inflation", "interest rate", "gdp"],
    ),
    (
        "market",
        &["증시", "시장", "시황", "market", "nasdaq", "s&p", "dow jones", "wall street"],
    ),
];

fn tag_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").ok()).as_ref()
}

fn numeric_entity_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&#([xX]?)([0-9a-fA-F]+);").ok()).as_ref()
}

/// 추적용 쿼리 파라미터 여부.
pub fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || key == "ref" || key == "source"
}

/// URL을 정규화합니다.
///
/// 같은 기사를 가리키는 URL이 추적 파라미터나 파라미터 순서만 다르면
/// 같은 문자열이 됩니다.
pub fn canonicalize_url(raw: &str) -> Result<String, NormalizeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NormalizeError::EmptyUrl);
    }

    let mut url =
        Url::parse(trimmed).map_err(|e| NormalizeError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params.iter());
    }

    Ok(url.to_string())
}

/// 정규화 URL에서 기사 ID를 만듭니다.
pub fn article_id(canonical_url: &str) -> String {
    hex::encode(Sha256::digest(canonical_url.as_bytes()))
}

/// 태그를 지우고 HTML 엔티티를 복원한 뒤 공백을 정리합니다.
pub fn clean_text(input: &str) -> String {
    let stripped = match tag_pattern() {
        Some(re) => re.replace_all(input, "").into_owned(),
        None => input.to_string(),
    };
    let decoded = decode_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(input: &str) -> String {
    let numeric = match numeric_entity_pattern() {
        Some(re) => re
            .replace_all(input, |caps: &regex::Captures| {
                let radix = if caps[1].is_empty() { 10 } else { 16 };
                u32::from_str_radix(&caps[2], radix)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned(),
        None => input.to_string(),
    };

    // &amp;는 마지막에 풀어야 "&amp;lt;" 같은 이중 인코딩이 한 번만 풀림
    numeric
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&middot;", "·")
        .replace("&amp;", "&")
}

/// 제목/요약의 키워드로 태그를 붙입니다.
pub fn derive_tags(title: &str, summary: &str) -> BTreeSet<String> {
    let haystack = format!("{} {}", title, summary).to_lowercase();
    TAG_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(tag, _)| tag.to_string())
        .collect()
}

/// 원본 기사 하나를 정규화합니다.
///
/// 중복 관련 필드는 기본값(unique)으로 채워지며 이후 중복 판정 단계에서 정해집니다.
/// 발행 시각이 없으면 수집 시각을 씁니다.
pub fn normalize(
    raw: &RawArticle,
    source: &str,
    fetched_at: DateTime<Utc>,
) -> Result<CanonicalArticle, NormalizeError> {
    let title = clean_text(&raw.title);
    if title.is_empty() {
        return Err(NormalizeError::EmptyTitle);
    }
    let summary = clean_text(&raw.summary);
    let canonical_url = canonicalize_url(&raw.url)?;
    let tags = derive_tags(&title, &summary);

    Ok(CanonicalArticle {
        id: article_id(&canonical_url),
        title,
        summary,
        url: raw.url.trim().to_string(),
        canonical_url,
        source: source.to_string(),
        publisher: raw
            .publisher
            .as_deref()
            .map(clean_text)
            .unwrap_or_default(),
        published_at: raw.published_at.unwrap_or(fetched_at),
        fetched_at,
        dup_state: DupState::Unique,
        dup_of: None,
        dup_score: 0.0,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(title: &str, url: &str) -> RawArticle {
        RawArticle {
            title: title.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_canonicalize_strips_tracking_and_sorts() {
        let canonical = canonicalize_url(
            "https://News.Example.com/a/b?z=1&utm_source=naver&a=2&ref=home&source=rss#top",
        )
        .unwrap();
        assert_eq!(canonical, "https://news.example.com/a/b?a=2&z=1");

        let bare = canonicalize_url("https://news.example.com/a?utm_medium=x").unwrap();
        assert_eq!(bare, "https://news.example.com/a");
    }

    #[test]
    fn test_canonicalize_rejects_garbage() {
        assert_eq!(canonicalize_url("   "), Err(NormalizeError::EmptyUrl));
        assert!(matches!(
            canonicalize_url("not a url"),
            Err(NormalizeError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(
            clean_text("  <b>삼성전자</b>, 1분기 &quot;어닝 서프라이즈&quot;\n &amp; 코스피&#39;s  "),
            "삼성전자, 1분기 \"어닝 서프라이즈\" & 코스피's"
        );
        assert_eq!(clean_text("&#x41;&lt;b&gt;"), "A<b>");
    }

    #[test]
    fn test_derive_tags() {
        let tags = derive_tags("코스피 상승 마감", "Fed interest rate decision");
        assert!(tags.contains("stock"));
        assert!(tags.contains("economy"));
        assert!(!tags.contains("market"));

        assert!(derive_tags("날씨", "맑음").is_empty());
    }

    #[test]
    fn test_normalize_fills_defaults() {
        let fetched_at = Utc::now();
        let mut input = raw(" <b>증시</b> 동향 ", "https://example.com/n/1?utm_campaign=x");
        input.publisher = Some(" 연합뉴스 ".to_string());

        let article = normalize(&input, "naver_search_api", fetched_at).unwrap();
        assert_eq!(article.title, "증시 동향");
        assert_eq!(article.canonical_url, "https://example.com/n/1");
        assert_eq!(article.id, article_id("https://example.com/n/1"));
        assert_eq!(article.id.len(), 64);
        assert_eq!(article.published_at, fetched_at);
        assert_eq!(article.publisher, "연합뉴스");
        assert_eq!(article.dup_state, DupState::Unique);
        assert!(article.tags.contains("market"));
    }

    #[test]
    fn test_normalize_rejects_empty_title() {
        let result = normalize(&raw("<b> </b>", "https://example.com"), "newsapi", Utc::now());
        assert_eq!(result.unwrap_err(), NormalizeError::EmptyTitle);
    }

    fn tracking_key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("utm_source".to_string()),
            Just("utm_medium".to_string()),
            Just("ref".to_string()),
            Just("source".to_string()),
            "utm_[a-z]{1,6}",
        ]
    }

    proptest! {
        #[test]
        fn prop_tracking_params_do_not_change_identity(
            path in "[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}",
            params in proptest::collection::vec(("[a-z]{1,6}", "[a-z0-9]{0,6}"), 0..4),
            tracking in proptest::collection::vec((tracking_key(), "[a-z0-9]{0,6}"), 1..4),
        ) {
            prop_assume!(!params.iter().any(|(k, _)| is_tracking_param(k)));

            let join = |pairs: &[(String, String)]| {
                pairs
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("&")
            };

            let clean = if params.is_empty() {
                format!("https://news.example.com/{}", path)
            } else {
                format!("https://news.example.com/{}?{}", path, join(&params))
            };

            let mut noisy_pairs = tracking.clone();
            noisy_pairs.extend(params.iter().rev().cloned());
            let noisy = format!("https://news.example.com/{}?{}", path, join(&noisy_pairs));

            let a = normalize(&raw("t", &clean), "s", Utc::now()).unwrap();
            let b = normalize(&raw("t", &noisy), "s", Utc::now()).unwrap();
            prop_assert_eq!(a.canonical_url, b.canonical_url);
            prop_assert_eq!(a.id, b.id);
        }
    }
}
