//! 뉴스 기사/실행 로그 endpoint.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use dx_core::{ArticleQuery, CanonicalArticle};
use dx_data::NewsStore;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::clamp_limit;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 200;
const RUNS_DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Default, Deserialize)]
pub struct ArticlesParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub source: Option<String>,
    pub keyword: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub date_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunsParams {
    pub limit: Option<i64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `date_to`를 해당 일자 UTC 23:59:59로 변환합니다.
fn end_of_day(value: Option<String>) -> ApiResult<Option<DateTime<Utc>>> {
    let Some(value) = non_empty(value) else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(&value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(&value, "%Y-%m-%d"))
        .map_err(|_| {
            ApiError::BadRequest(format!("date_to must be YYYYMMDD or YYYY-MM-DD: {}", value))
        })?;
    let end = date
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid date_to: {}", value)))?;
    Ok(Some(end.and_utc()))
}

/// GET /news/articles
pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ArticlesParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let query = ArticleQuery {
        source: non_empty(params.source),
        keyword: non_empty(params.keyword),
        published_before: end_of_day(params.date_to)?,
        limit: clamp_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT),
        offset: params.offset.unwrap_or(0).max(0),
    };
    let (total, articles) = state.news()?.list_articles(&query).await?;

    Ok(Json(json!({
        "total": total,
        "count": articles.len(),
        "offset": query.offset,
        "articles": articles,
    })))
}

/// GET /news/articles/{id}
pub async fn get_article(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CanonicalArticle>> {
    state
        .news()?
        .get_article(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Article not found".to_string()))
}

/// GET /news/search
pub async fn search_articles(
    State(state): State<Arc<AppState>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let q = non_empty(params.q)
        .ok_or_else(|| ApiError::BadRequest("q is required".to_string()))?;
    let query = ArticleQuery {
        keyword: Some(q.clone()),
        published_before: end_of_day(params.date_to)?,
        limit: clamp_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT),
        ..Default::default()
    };
    let (total, articles) = state.news()?.list_articles(&query).await?;

    Ok(Json(json!({
        "query": q,
        "total": total,
        "count": articles.len(),
        "articles": articles,
    })))
}

/// GET /news/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RunsParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let limit = clamp_limit(params.limit, RUNS_DEFAULT_LIMIT, 100);
    let runs = state.news()?.list_runs(limit).await?;
    Ok(Json(json!({ "count": runs.len(), "runs": runs })))
}

/// POST /news/migration
pub async fn migrate_articles(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<CanonicalArticle>>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(articles) = body?;
    let store = state.news()?;

    if articles.is_empty() {
        return Ok(Json(json!({ "message": "No data", "count": 0 })));
    }

    let count = store.upsert_articles(&articles).await?;
    info!(count, "Articles migrated");
    Ok(Json(json!({
        "message": "Articles ingested successfully",
        "count": count,
    })))
}

pub fn news_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/news/articles", get(list_articles))
        .route("/news/articles/{id}", get(get_article))
        .route("/news/search", get(search_articles))
        .route("/news/runs", get(list_runs))
        .route("/news/migration", post(migrate_articles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_util::{get as get_json, post_json};
    use crate::state::create_test_state;
    use axum::http::StatusCode;

    fn article(id: &str, title: &str, source: &str, published_at: &str) -> Value {
        json!({
            "id": id,
            "title": title,
            "summary": "",
            "url": format!("https://news.example.com/{}", id),
            "canonical_url": format!("https://news.example.com/{}", id),
            "source": source,
            "published_at": published_at,
            "fetched_at": "2024-05-03T00:00:00Z",
            "tags": ["stock"],
        })
    }

    async fn seeded_app() -> Router {
        let app = news_router().with_state(Arc::new(create_test_state().await));
        let (status, body) = post_json(
            app.clone(),
            "/news/migration",
            json!([
                article("a1", "삼성전자 신고가", "naver_search_api", "2024-05-02T09:00:00Z"),
                article("a2", "삼성전자 실적 발표", "naver_search_api", "2024-05-01T23:30:00Z"),
                article("a3", "Fed holds rates", "newsapi", "2024-05-01T12:00:00Z"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
        app
    }

    #[tokio::test]
    async fn test_articles_filters() {
        let app = seeded_app().await;

        let (status, body) = get_json(app.clone(), "/news/articles").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["offset"], 0);
        assert_eq!(body["articles"][0]["id"], "a1");

        let (_, body) = get_json(app.clone(), "/news/articles?source=newsapi").await;
        assert_eq!(body["total"], 1);

        // date_to는 그날 끝까지 포함
        let (_, body) = get_json(app.clone(), "/news/articles?date_to=2024-05-01").await;
        assert_eq!(body["total"], 2);
        let (_, body) = get_json(app.clone(), "/news/articles?date_to=20240501&limit=1&offset=1").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["articles"][0]["id"], "a3");

        let (status, _) = get_json(app, "/news/articles?date_to=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_and_detail() {
        let app = seeded_app().await;

        let (status, body) = get_json(app.clone(), "/news/search?q=%EC%82%BC%EC%84%B1%EC%A0%84%EC%9E%90").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["query"], "삼성전자");
        assert_eq!(body["total"], 2);

        let (status, body) = get_json(app.clone(), "/news/search?q=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "q is required");

        let (status, body) = get_json(app.clone(), "/news/articles/a3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Fed holds rates");

        let (status, body) = get_json(app.clone(), "/news/articles/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Article not found");

        let (_, body) = get_json(app, "/news/runs").await;
        assert_eq!(body["count"], 0);
    }
}
