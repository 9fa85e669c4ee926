//! 테마/종목 endpoint.
//!
//! 조회 외에 크롤링 트리거가 있습니다. 크롤링은 한 번에 하나만 실행되며,
//! 실행 중에 들어온 트리거는 대기열 없이 409로 거절합니다.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use dx_core::{Stock, StockQuery, StockSort};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::clamp_limit;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const STOCKS_DEFAULT_LIMIT: i64 = 100;
const STOCKS_MAX_LIMIT: i64 = 500;
const HISTORY_DEFAULT_LIMIT: i64 = 30;
const LOGS_DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct StocksParams {
    pub sort: Option<String>,
    pub order: Option<String>,
    pub market: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

/// 종목 상세 (관련 테마 포함).
#[derive(Debug, Serialize)]
pub struct StockDetail {
    #[serde(flatten)]
    pub stock: Stock,
    pub related_themes: Vec<String>,
}

fn parse_theme_idx(raw: &str) -> ApiResult<i64> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid theme index".to_string()))
}

impl StocksParams {
    fn into_query(self) -> StockQuery {
        let defaults = StockQuery::default();
        StockQuery {
            sort: self
                .sort
                .as_deref()
                .and_then(StockSort::parse)
                .unwrap_or(defaults.sort),
            descending: !matches!(self.order.as_deref(), Some(o) if o.eq_ignore_ascii_case("asc")),
            market: self.market.filter(|m| !m.trim().is_empty()),
            limit: clamp_limit(self.limit, STOCKS_DEFAULT_LIMIT, STOCKS_MAX_LIMIT),
            offset: self.offset.unwrap_or(0).max(0),
        }
    }
}

/// GET /judal/themes
pub async fn list_themes(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let themes = state.judal()?.themes().await?;
    Ok(Json(json!({ "count": themes.len(), "themes": themes })))
}

/// GET /judal/themes/{idx}
pub async fn get_theme(
    State(state): State<Arc<AppState>>,
    Path(idx): Path<String>,
) -> ApiResult<Json<dx_core::Theme>> {
    let idx = parse_theme_idx(&idx)?;
    let theme = state
        .judal()?
        .theme(idx)
        .await?
        .ok_or_else(|| ApiError::NotFound("Theme not found".to_string()))?;
    Ok(Json(theme))
}

/// GET /judal/themes/{idx}/stocks
pub async fn get_theme_stocks(
    State(state): State<Arc<AppState>>,
    Path(idx): Path<String>,
) -> ApiResult<Json<Value>> {
    let idx = parse_theme_idx(&idx)?;
    let repo = state.judal()?;
    let theme = repo
        .theme(idx)
        .await?
        .ok_or_else(|| ApiError::NotFound("Theme not found".to_string()))?;
    let stocks = repo.stocks_by_theme(idx).await?;
    Ok(Json(json!({
        "theme": theme,
        "count": stocks.len(),
        "stocks": stocks,
    })))
}

/// GET /judal/stocks
pub async fn list_stocks(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StocksParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let query = params.into_query();
    let (total, stocks) = state.judal()?.stocks(&query).await?;
    Ok(Json(json!({
        "total": total,
        "count": stocks.len(),
        "offset": query.offset,
        "stocks": stocks,
    })))
}

/// GET /judal/stocks/{code}
pub async fn get_stock(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<StockDetail>> {
    let repo = state.judal()?;
    let stock = repo
        .stock(&code)
        .await?
        .ok_or_else(|| ApiError::NotFound("Stock not found".to_string()))?;
    let related_themes = repo
        .themes_for_stock(&code)
        .await?
        .into_iter()
        .map(|t| t.name)
        .collect();
    Ok(Json(StockDetail {
        stock,
        related_themes,
    }))
}

/// GET /judal/stocks/{code}/themes
pub async fn get_stock_themes(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<Value>> {
    let themes = state.judal()?.themes_for_stock(&code).await?;
    Ok(Json(json!({
        "stock_code": code,
        "count": themes.len(),
        "themes": themes,
    })))
}

/// GET /judal/stocks/{code}/history
pub async fn get_stock_history(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let limit = clamp_limit(params.limit, HISTORY_DEFAULT_LIMIT, MAX_LIMIT);
    let history = state.judal()?.stock_history(&code, limit).await?;
    Ok(Json(json!({
        "code": code,
        "count": history.len(),
        "history": history,
    })))
}

fn start_crawl(state: &AppState, with_history: bool) -> ApiResult<(StatusCode, Json<Value>)> {
    state.crawler()?.try_spawn(&state.background, with_history)?;
    let message = if with_history {
        "Batch crawling started (with history saving)"
    } else {
        "Crawling started"
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": message,
            "status": "started",
            "history": with_history,
        })),
    ))
}

/// POST /judal/crawl
pub async fn trigger_crawl(State(state): State<Arc<AppState>>) -> ApiResult<(StatusCode, Json<Value>)> {
    start_crawl(&state, false)
}

/// POST /judal/crawl/batch
pub async fn trigger_batch_crawl(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    start_crawl(&state, true)
}

/// GET /judal/status
pub async fn crawl_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let stats = state.judal()?.stats().await?;
    let status = state.crawler().ok().map(|c| c.status());
    Ok(Json(json!({
        "is_crawling": status.as_ref().is_some_and(|s| s.is_crawling),
        "last_crawl": status.and_then(|s| s.last_crawl),
        "stats": stats,
    })))
}

/// GET /judal/history/dates
pub async fn history_dates(
    State(state): State<Arc<AppState>>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let limit = clamp_limit(params.limit, HISTORY_DEFAULT_LIMIT, MAX_LIMIT);
    let dates = state.judal()?.history_dates(limit).await?;
    Ok(Json(json!({ "count": dates.len(), "dates": dates })))
}

/// GET /judal/logs
pub async fn crawl_logs(
    State(state): State<Arc<AppState>>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let limit = clamp_limit(params.limit, LOGS_DEFAULT_LIMIT, MAX_LIMIT);
    let logs = state.judal()?.crawl_logs(limit).await?;
    Ok(Json(json!({ "count": logs.len(), "logs": logs })))
}

pub fn judal_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/judal/themes", get(list_themes))
        .route("/judal/themes/{idx}", get(get_theme))
        .route("/judal/themes/{idx}/stocks", get(get_theme_stocks))
        .route("/judal/stocks", get(list_stocks))
        .route("/judal/stocks/{code}", get(get_stock))
        .route("/judal/stocks/{code}/themes", get(get_stock_themes))
        .route("/judal/stocks/{code}/history", get(get_stock_history))
        .route("/judal/crawl", post(trigger_crawl))
        .route("/judal/crawl/batch", post(trigger_batch_crawl))
        .route("/judal/status", get(crawl_status))
        .route("/judal/history/dates", get(history_dates))
        .route("/judal/logs", get(crawl_logs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_util::{get as get_json, send};
    use crate::state::create_test_state;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{NaiveDate, Utc};
    use dx_collector::modules::{CrawlCoordinator, CrawlRunner};
    use dx_core::{CrawlResult, StockIndicators};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// 해제 신호 전까지 끝나지 않는 크롤러.
    struct SlowRunner {
        calls: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl CrawlRunner for SlowRunner {
        async fn run_crawl(&self, with_history: bool) -> CrawlResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            let now = Utc::now();
            CrawlResult {
                themes_crawled: 3,
                stocks_crawled: 12,
                history_saved: if with_history { 12 } else { 0 },
                crawl_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                errors: vec![],
                start_time: now,
                end_time: now,
                duration_seconds: 0.1,
            }
        }
    }

    fn stock(code: &str, name: &str, cap: i64) -> Stock {
        Stock {
            code: code.to_string(),
            name: name.to_string(),
            market: "KOSPI".to_string(),
            indicators: StockIndicators {
                market_cap: Some(cap),
                current_price: Some(70_000),
                ..Default::default()
            },
            updated_at: Utc::now(),
        }
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_crawl_trigger_conflicts() {
        let runner = Arc::new(SlowRunner {
            calls: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let mut state = create_test_state().await;
        state.services.crawl = Some(Arc::new(CrawlCoordinator::new(runner.clone())));
        let state = Arc::new(state);
        let app = judal_router().with_state(state.clone());

        let (status, body) = send(app.clone(), post("/judal/crawl/batch")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "started");
        assert_eq!(body["history"], true);

        let (status, body) = send(app.clone(), post("/judal/crawl")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Crawling already in progress");

        let (_, body) = get_json(app.clone(), "/judal/status").await;
        assert_eq!(body["is_crawling"], true);

        // 요청으로 시작된 크롤링은 종료 시 백그라운드 대기에 포함됨
        assert_eq!(state.background.len(), 1);
        runner.release.notify_one();
        state.background.close();
        tokio::time::timeout(Duration::from_secs(5), state.background.wait())
            .await
            .unwrap();

        let (_, body) = get_json(app, "/judal/status").await;
        assert_eq!(body["is_crawling"], false);
        assert_eq!(body["last_crawl"]["history_saved"], 12);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_theme_and_stock_queries() {
        let state = create_test_state().await;
        let repo = state.judal().unwrap();
        repo.upsert_theme(101, "반도체").await.unwrap();
        repo.upsert_stock(&stock("005930", "삼성전자", 4_000_000)).await.unwrap();
        repo.upsert_stock(&stock("000660", "SK하이닉스", 1_500_000)).await.unwrap();
        repo.add_theme_stock(101, "005930").await.unwrap();
        repo.add_theme_stock(101, "000660").await.unwrap();
        repo.update_theme_stock_count(101, 2).await.unwrap();
        let app = judal_router().with_state(Arc::new(state));

        let (status, body) = get_json(app.clone(), "/judal/themes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (_, body) = get_json(app.clone(), "/judal/themes/101/stocks").await;
        assert_eq!(body["theme"]["name"], "반도체");
        assert_eq!(body["count"], 2);

        let (status, body) = get_json(app.clone(), "/judal/themes/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid theme index");

        let (status, _) = get_json(app.clone(), "/judal/themes/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // 알 수 없는 정렬 필드는 시가총액순
        let (_, body) = get_json(app.clone(), "/judal/stocks?sort=drop_table&order=asc&limit=1").await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["count"], 1);
        assert_eq!(body["stocks"][0]["code"], "000660");

        let (_, body) = get_json(app.clone(), "/judal/stocks/005930").await;
        assert_eq!(body["name"], "삼성전자");
        assert_eq!(body["market_cap"], 4_000_000);
        assert_eq!(body["related_themes"], json!(["반도체"]));

        let (status, body) = get_json(app.clone(), "/judal/stocks/999999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Stock not found");
    }

    #[tokio::test]
    async fn test_crawl_unavailable_without_coordinator() {
        let app = judal_router().with_state(Arc::new(create_test_state().await));
        let (status, _) = send(app.clone(), post("/judal/crawl")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = get_json(app, "/judal/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_crawling"], false);
        assert_eq!(body["stats"]["theme_count"], 0);
    }
}
