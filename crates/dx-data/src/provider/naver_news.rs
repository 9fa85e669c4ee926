//! 네이버 뉴스 검색 API 클라이언트.
//!
//! 설정된 키워드마다 최신순 100건을 조회합니다. 한 키워드가 실패해도
//! 나머지 키워드 결과는 반환합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dx_core::RawArticle;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{http_client, Fetcher, RateLimiter};
use crate::error::{DataError, Result};

pub const SOURCE: &str = "naver_search_api";

/// 기본 검색 키워드.
pub const DEFAULT_QUERIES: &[&str] = &["주식", "증시", "경제", "코스피", "코스닥"];

const SEARCH_PATH: &str = "/v1/search/news.json";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    title: String,
    #[serde(default)]
    originallink: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    pub_date: String,
}

/// 네이버 뉴스 fetcher.
pub struct NaverNewsFetcher {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    queries: Vec<String>,
    limiter: RateLimiter,
}

impl NaverNewsFetcher {
    pub fn new(base_url: &str, client_id: &str, client_secret: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(10))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            queries: DEFAULT_QUERIES.iter().map(|q| q.to_string()).collect(),
            // 초당 10회 제한보다 보수적으로
            limiter: RateLimiter::per_second(9),
        })
    }

    pub fn with_queries(mut self, queries: Vec<String>) -> Self {
        self.queries = queries;
        self
    }

    async fn fetch_query(&self, query: &str) -> Result<Vec<RawArticle>> {
        self.limiter.acquire().await;

        let response: SearchResponse = self
            .client
            .get(format!("{}{}", self.base_url, SEARCH_PATH))
            .query(&[("query", query), ("display", "100"), ("sort", "date")])
            .header("X-Naver-Client-Id", &self.client_id)
            .header("X-Naver-Client-Secret", &self.client_secret)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.items.into_iter().map(into_raw).collect())
    }
}

fn into_raw(item: SearchItem) -> RawArticle {
    let url = if item.originallink.is_empty() {
        item.link.clone()
    } else {
        item.originallink.clone()
    };

    let mut extra = serde_json::Map::new();
    extra.insert("link".to_string(), item.link.into());

    RawArticle {
        title: item.title,
        summary: item.description,
        url,
        published_at: DateTime::parse_from_rfc2822(&item.pub_date)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        publisher: None,
        extra,
    }
}

#[async_trait]
impl Fetcher for NaverNewsFetcher {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn fetch(&self) -> Result<Vec<RawArticle>> {
        let mut articles = Vec::new();
        let mut last_error = None;

        for query in &self.queries {
            match self.fetch_query(query).await {
                Ok(items) => {
                    debug!(query = %query, count = items.len(), "Naver query fetched");
                    articles.extend(items);
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "Naver query failed");
                    last_error = Some(e);
                }
            }
        }

        // 모든 키워드가 실패한 경우에만 호출 실패로 봅니다
        match last_error {
            Some(e) if articles.is_empty() => Err(DataError::FetchError(format!(
                "{}: all queries failed: {}",
                SOURCE, e
            ))),
            _ => Ok(articles),
        }
    }
}
