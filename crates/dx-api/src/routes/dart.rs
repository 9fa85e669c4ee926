//! DART 기업/공시 endpoint.
//!
//! - `GET /dart/corps?page&limit`
//! - `GET /dart/filings?corp_code&stock_code&date_from&date_to&page&limit`
//! - `GET /dart/filings/{rcept_no}`
//! - `POST /dart/migration/filings`

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use dx_core::{Filing, FilingQuery};
use dx_data::FilingDetail;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::clamp_limit;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct CorpsParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilingsParams {
    pub corp_code: Option<String>,
    pub stock_code: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `YYYYMMDD` 또는 `YYYY-MM-DD`를 `YYYYMMDD`로.
fn parse_rcept_date(name: &str, value: Option<String>) -> ApiResult<Option<String>> {
    let Some(value) = non_empty(value) else {
        return Ok(None);
    };
    let digits: String = value.chars().filter(|c| *c != '-').collect();
    if digits.len() != 8 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::BadRequest(format!(
            "{} must be YYYYMMDD or YYYY-MM-DD: {}",
            name, value
        )));
    }
    Ok(Some(digits))
}

/// GET /dart/corps
pub async fn list_corps(
    State(state): State<Arc<AppState>>,
    params: Result<Query<CorpsParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let repo = state.dart()?;

    let page = params.page.unwrap_or(1).max(1);
    let limit = clamp_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let (total, corps) = repo.list_corps(page, limit).await?;

    Ok(Json(json!({
        "total": total,
        "page": page,
        "limit": limit,
        "count": corps.len(),
        "corps": corps,
    })))
}

/// GET /dart/filings
pub async fn list_filings(
    State(state): State<Arc<AppState>>,
    params: Result<Query<FilingsParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let repo = state.dart()?;

    let query = FilingQuery {
        corp_code: non_empty(params.corp_code),
        stock_code: non_empty(params.stock_code),
        date_from: parse_rcept_date("date_from", params.date_from)?,
        date_to: parse_rcept_date("date_to", params.date_to)?,
        page: params.page.unwrap_or(1).max(1),
        limit: clamp_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT),
    };
    let (total, filings) = repo.list_filings(&query).await?;

    Ok(Json(json!({
        "total": total,
        "page": query.page,
        "limit": query.limit,
        "count": filings.len(),
        "filings": filings,
    })))
}

/// GET /dart/filings/{rcept_no}
pub async fn get_filing(
    State(state): State<Arc<AppState>>,
    Path(rcept_no): Path<String>,
) -> ApiResult<Json<FilingDetail>> {
    let detail = state
        .dart()?
        .filing_detail(&rcept_no)
        .await?
        .ok_or_else(|| ApiError::NotFound("Filing not found".to_string()))?;
    Ok(Json(detail))
}

/// POST /dart/migration/filings
///
/// 공시 배열을 하나의 트랜잭션으로 upsert합니다.
pub async fn migrate_filings(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<Filing>>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(filings) = body?;
    let repo = state.dart()?;

    if filings.is_empty() {
        return Ok(Json(json!({ "message": "No data", "count": 0 })));
    }

    let count = repo.upsert_filings(&filings).await?;
    info!(count, "Filings migrated");
    Ok(Json(json!({
        "message": "Filings ingested successfully",
        "count": count,
    })))
}

pub fn dart_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dart/corps", get(list_corps))
        .route("/dart/filings", get(list_filings))
        .route("/dart/filings/{rcept_no}", get(get_filing))
        .route("/dart/migration/filings", post(migrate_filings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_util::{get as get_json, post_json};
    use crate::state::{create_test_state, AppState};
    use axum::http::StatusCode;
    use dx_collector::Services;

    fn filing_json(rcept_no: &str, corp_code: &str, rcept_dt: &str) -> Value {
        json!({
            "rcept_no": rcept_no,
            "corp_code": corp_code,
            "corp_name": "삼성전자",
            "report_nm": "분기보고서",
            "rcept_dt": rcept_dt,
        })
    }

    async fn app() -> Router {
        dart_router().with_state(Arc::new(create_test_state().await))
    }

    #[tokio::test]
    async fn test_migration_then_list_and_detail() {
        let app = app().await;

        let (status, body) = post_json(
            app.clone(),
            "/dart/migration/filings",
            json!([
                filing_json("20240515000123", "00126380", "20240515"),
                filing_json("20240514000456", "00126380", "20240514"),
                filing_json("20240301000001", "00164779", "20240301"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);

        let (status, body) = get_json(app.clone(), "/dart/filings?corp_code=00126380&limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["count"], 1);
        assert_eq!(body["limit"], 1);
        assert_eq!(body["filings"][0]["rcept_no"], "20240515000123");

        let (_, body) = get_json(app.clone(), "/dart/filings?date_from=2024-05-01&date_to=20240514").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["filings"][0]["rcept_no"], "20240514000456");

        let (status, body) = get_json(app.clone(), "/dart/filings/20240515000123").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filing"]["corp_code"], "00126380");
        assert_eq!(body["documents"], json!([]));
        assert_eq!(body["events"], json!([]));
    }

    #[tokio::test]
    async fn test_errors_use_error_body() {
        let app = app().await;

        let (status, body) = get_json(app.clone(), "/dart/filings/00000000000000").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Filing not found");

        let (status, body) = get_json(app.clone(), "/dart/filings?date_from=May").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("date_from"));

        let (status, body) = get_json(app.clone(), "/dart/corps?page=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = post_json(app, "/dart/migration/filings", json!([])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "No data", "count": 0 }));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let app = dart_router().with_state(Arc::new(AppState::new(Services::default())));
        let (status, body) = get_json(app, "/dart/corps").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("DART"));
    }
}
