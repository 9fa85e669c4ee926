//! newsapi.org 클라이언트 (미국/글로벌 비즈니스 뉴스).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dx_core::RawArticle;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{http_client, Fetcher, RateLimiter};
use crate::error::{DataError, Result};

pub const SOURCE: &str = "newsapi";

const EVERYTHING_PATH: &str = "/v2/everything";
const DEFAULT_QUERY: &str = "economy OR stock OR market OR finance OR business";

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    status: String,
    #[serde(default)]
    articles: Vec<Item>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    #[serde(default)]
    source: Option<SourceInfo>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    url: String,
    #[serde(default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceInfo {
    #[serde(default)]
    name: Option<String>,
}

/// newsapi.org fetcher.
pub struct NewsApiFetcher {
    client: Client,
    base_url: String,
    api_key: String,
    limiter: RateLimiter,
}

impl NewsApiFetcher {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(10))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            limiter: RateLimiter::per_second(1),
        })
    }
}

#[async_trait]
impl Fetcher for NewsApiFetcher {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn fetch(&self) -> Result<Vec<RawArticle>> {
        self.limiter.acquire().await;

        let response = self
            .client
            .get(format!("{}{}", self.base_url, EVERYTHING_PATH))
            .query(&[
                ("q", DEFAULT_QUERY),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", "100"),
            ])
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // 오류 응답도 JSON 본문에 사유가 담겨 옵니다
        let parsed: EverythingResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(DataError::UnrecognizedSchema {
                    provider: SOURCE.to_string(),
                    detail: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DataError::Upstream {
                    status: status.as_u16(),
                    context: SOURCE.to_string(),
                })
            }
        };

        if parsed.status != "ok" {
            let context = format!(
                "{}: {} {}",
                SOURCE,
                parsed.code.unwrap_or_default(),
                parsed.message.unwrap_or_default()
            );
            return Err(if status.as_u16() == 429 {
                DataError::RateLimited(context)
            } else {
                DataError::Upstream {
                    status: status.as_u16(),
                    context,
                }
            });
        }

        Ok(parsed.articles.into_iter().map(into_raw).collect())
    }
}

fn into_raw(item: Item) -> RawArticle {
    let mut extra = serde_json::Map::new();
    if let Some(author) = item.author {
        extra.insert("author".to_string(), author.into());
    }

    RawArticle {
        title: item.title.unwrap_or_default(),
        summary: item.description.unwrap_or_default(),
        url: item.url,
        published_at: item
            .published_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        publisher: item.source.and_then(|s| s.name),
        extra,
    }
}
